use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use log::{debug, info, warn};
use oauth2::basic::{BasicClient, BasicTokenResponse};
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    RedirectUrl, RefreshToken, Scope, TokenResponse, TokenUrl,
};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{ClientSecrets, Credential, OAuthState};
use crate::youtube::Auth;

/// Scope needed to insert live chat messages.
const WRITE_SCOPE: &str = "https://www.googleapis.com/auth/youtube.force-ssl";

impl Credential {
    pub fn auth(&self) -> Auth<'_> {
        Auth::Bearer(&self.access_token)
    }
}

/// Where the write credential and the OAuth client secrets live on disk.
pub struct CredentialStore {
    token_path: PathBuf,
    secrets_path: PathBuf,
}

impl CredentialStore {
    pub fn new(token_path: PathBuf, secrets_path: PathBuf) -> Self {
        Self {
            token_path,
            secrets_path,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.token_path(), config.secrets_path())
    }

    /// Returns `None` when no credential has been saved yet or the saved one is unreadable.
    pub fn load(&self) -> Result<Option<Credential>> {
        if !self.token_path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.token_path)?;
        match serde_json::from_str(&contents) {
            Ok(credential) => Ok(Some(credential)),
            Err(e) => {
                warn!(
                    "Ignoring unreadable token file {}: {}",
                    self.token_path.display(),
                    e
                );
                Ok(None)
            }
        }
    }

    /// Writes next to the token file and renames over it, so readers never see half a file.
    pub fn save(&self, credential: &Credential) -> Result<()> {
        if let Some(dir) = self.token_path.parent() {
            fs::create_dir_all(dir)?;
        }
        let staging = self.token_path.with_extension("json.tmp");
        fs::write(&staging, serde_json::to_string_pretty(credential)?)?;
        fs::rename(&staging, &self.token_path)?;
        debug!("Credential saved to {}", self.token_path.display());
        Ok(())
    }

    pub fn load_client_secrets(&self) -> Result<ClientSecrets> {
        let contents = fs::read_to_string(&self.secrets_path).map_err(|e| {
            Error::Configuration(format!(
                "could not read client secrets at {}: {}",
                self.secrets_path.display(),
                e
            ))
        })?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn oauth_client(&self, redirect_url: Option<String>) -> Result<BasicClient> {
        let secrets = self.load_client_secrets()?.installed;
        let client = BasicClient::new(
            ClientId::new(secrets.client_id),
            Some(ClientSecret::new(secrets.client_secret)),
            AuthUrl::new(secrets.auth_uri).map_err(authorization_error)?,
            Some(TokenUrl::new(secrets.token_uri).map_err(authorization_error)?),
        );
        Ok(match redirect_url {
            Some(url) => client.set_redirect_uri(RedirectUrl::new(url).map_err(authorization_error)?),
            None => client,
        })
    }
}

fn authorization_error(e: impl std::fmt::Display) -> Error {
    Error::Authorization(e.to_string())
}

fn credential_from(token: &BasicTokenResponse, previous_refresh: Option<&str>) -> Result<Credential> {
    let refresh_token = token
        .refresh_token()
        .map(|rt| rt.secret().clone())
        .or_else(|| previous_refresh.map(str::to_string))
        .ok_or_else(|| Error::Authorization("no refresh token received".to_string()))?;
    let lifetime = token.expires_in().unwrap_or(Duration::from_secs(3600));
    Ok(Credential {
        access_token: token.access_token().secret().clone(),
        refresh_token,
        expiry: Utc::now() + chrono::Duration::seconds(lifetime.as_secs() as i64),
    })
}

/// Cached credential if still valid, refreshed one if expired, otherwise a new consent.
pub async fn load_or_authorize(store: &CredentialStore, config: &Config) -> Result<Credential> {
    if let Some(credential) = store.load()? {
        info!("Found existing token file, loading...");
        if !credential.is_expired(Utc::now()) {
            debug!("Token is still valid, using existing token");
            return Ok(credential);
        }

        info!("Token expired, refreshing...");
        match refresh(store, &credential.refresh_token).await {
            Ok(credential) => return Ok(credential),
            Err(e) => warn!("Failed to refresh token: {}, starting new auth flow", e),
        }
    }

    info!("Starting OAuth authentication flow...");
    let credential = authorize(store, config).await?;
    store.save(&credential)?;
    Ok(credential)
}

/// Refreshes `credential` in place when it has expired during a long run.
pub async fn ensure_fresh(store: &CredentialStore, credential: &mut Credential) -> Result<()> {
    if credential.is_expired(Utc::now()) {
        info!("Token expired, refreshing...");
        *credential = refresh(store, &credential.refresh_token).await?;
    }
    Ok(())
}

pub async fn refresh(store: &CredentialStore, refresh_token: &str) -> Result<Credential> {
    let client = store.oauth_client(None)?;

    info!("Exchanging refresh token for new access token...");
    let token = client
        .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
        .request_async(oauth2::reqwest::async_http_client)
        .await
        .map_err(authorization_error)?;

    let credential = credential_from(&token, Some(refresh_token))?;
    store.save(&credential)?;
    info!("Token refreshed successfully");
    Ok(credential)
}

/// Interactive consent: prints the authorization URL and waits for the redirect.
pub async fn authorize(store: &CredentialStore, config: &Config) -> Result<Credential> {
    let client = store.oauth_client(Some(config.redirect_url()))?;
    let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

    let (auth_url, csrf_state) = client
        .authorize_url(CsrfToken::new_random)
        .add_scope(Scope::new(WRITE_SCOPE.to_string()))
        .add_extra_param("access_type", "offline")
        .add_extra_param("prompt", "consent")
        .set_pkce_challenge(pkce_challenge)
        .url();

    info!("Open this URL in your browser to authorize the application:");
    info!("{}", auth_url);

    let state = Arc::new(Mutex::new(OAuthState {
        auth_code: None,
        csrf_state: csrf_state.secret().clone(),
        pkce_verifier: Some(pkce_verifier),
    }));

    info!("Starting OAuth callback server on {}", config.redirect_url());
    let callback_state = state.clone();
    let make_service = make_service_fn(move |_| {
        let state = callback_state.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                let state = state.clone();
                async move { handle_oauth_callback(req, state).await }
            }))
        }
    });

    let addr: SocketAddr = ([127, 0, 0, 1], config.redirect_port).into();
    let server = Server::try_bind(&addr)
        .map_err(|e| Error::Authorization(format!("could not listen on {}: {}", addr, e)))?
        .serve(make_service);

    let waiting_state = state.clone();
    let deadline = config.auth_timeout;
    debug!("Waiting for authorization callback (timeout: {:?})...", deadline);
    server
        .with_graceful_shutdown(async move {
            let started = tokio::time::Instant::now();
            while started.elapsed() < deadline {
                if waiting_state.lock().await.auth_code.is_some() {
                    debug!("Authorization code received");
                    return;
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
            warn!("Timed out waiting for authorization");
        })
        .await
        .map_err(authorization_error)?;

    let (auth_code, pkce_verifier) = {
        let mut guard = state.lock().await;
        let code = guard.auth_code.take().ok_or_else(|| {
            Error::Authorization("no authorization code received".to_string())
        })?;
        let verifier = guard
            .pkce_verifier
            .take()
            .ok_or_else(|| Error::Authorization("PKCE verifier not found".to_string()))?;
        (code, verifier)
    };

    info!("Exchanging authorization code for access token...");
    let token = client
        .exchange_code(AuthorizationCode::new(auth_code))
        .set_pkce_verifier(pkce_verifier)
        .request_async(oauth2::reqwest::async_http_client)
        .await
        .map_err(authorization_error)?;

    let credential = credential_from(&token, None)?;
    info!("OAuth flow completed successfully");
    Ok(credential)
}

pub async fn handle_oauth_callback(
    req: Request<Body>,
    state: Arc<Mutex<OAuthState>>,
) -> std::result::Result<Response<Body>, hyper::Error> {
    let params: HashMap<_, _> = url::form_urlencoded::parse(req.uri().query().unwrap_or("").as_bytes())
        .into_owned()
        .collect();

    let mut response = Response::new(Body::empty());
    if let Some(error) = params.get("error") {
        *response.status_mut() = StatusCode::BAD_REQUEST;
        *response.body_mut() = Body::from(format!("Authorization was not granted: {}", error));
        return Ok(response);
    }

    match (params.get("code"), params.get("state")) {
        (Some(code), Some(received_state)) => {
            let mut guard = state.lock().await;
            if *received_state == guard.csrf_state {
                guard.auth_code = Some(code.clone());
                *response.body_mut() = Body::from(
                    "Authorization successful! You can close this window and return to the application.",
                );
            } else {
                *response.status_mut() = StatusCode::BAD_REQUEST;
                *response.body_mut() = Body::from("Invalid state parameter");
            }
        }
        _ => {
            *response.status_mut() = StatusCode::BAD_REQUEST;
            *response.body_mut() = Body::from("Missing code or state parameter");
        }
    }
    Ok(response)
}
