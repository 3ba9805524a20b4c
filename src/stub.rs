//! Throwaway HTTP server standing in for the YouTube and completion APIs in tests.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};

/// Serves `handler` on an ephemeral localhost port and returns its base URL.
pub fn serve<F>(handler: F) -> String
where
    F: Fn(Request<Body>) -> Response<Body> + Send + Sync + 'static,
{
    let handler = Arc::new(handler);
    let make_service = make_service_fn(move |_| {
        let handler = handler.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let handler = handler.clone();
                async move { Ok::<_, Infallible>(handler(req)) }
            }))
        }
    });

    let server = Server::bind(&([127, 0, 0, 1], 0).into()).serve(make_service);
    let addr = server.local_addr();
    tokio::spawn(server);
    format!("http://{}", addr)
}

pub fn json(status: StatusCode, value: serde_json::Value) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(value.to_string()))
        .unwrap()
}

pub fn query(req: &Request<Body>) -> HashMap<String, String> {
    url::form_urlencoded::parse(req.uri().query().unwrap_or("").as_bytes())
        .into_owned()
        .collect()
}
