use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure of a single call to the YouTube or completion API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },
}

impl ApiError {
    /// Timeouts, dropped connections, throttling and server-side errors.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Transport(e) => e.is_timeout() || e.is_connect(),
            ApiError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            ApiError::Status { status, .. }
                if *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN
        )
    }

    // Turns a non-2xx response into `ApiError::Status`, keeping the body for the log.
    pub async fn check(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Status { status, body })
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("could not find a video id in {0:?}")]
    MissingVideoId(String),
    #[error("video {0} has no active live chat")]
    NotLive(String),
    #[error("failed to look up live stream details: {0}")]
    Resolve(#[source] ApiError),
    #[error("failed to fetch live chat messages: {0}")]
    Fetch(#[source] ApiError),
    #[error("failed to publish live chat message: {0}")]
    Publish(#[source] ApiError),
    #[error("failed to request completion: {0}")]
    Completion(#[source] ApiError),
    #[error("the language model returned an empty reply")]
    EmptyReply,
    #[error("authorization failed: {0}")]
    Authorization(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Resolve(e) | Error::Fetch(e) | Error::Publish(e) | Error::Completion(e) => {
                e.is_transient()
            }
            _ => false,
        }
    }
}
