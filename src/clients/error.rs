//! Errors shared by the HTTP collaborator clients

use std::fmt;

use reqwest::StatusCode;
use thiserror::Error;

/// An error body returned by the search engine or dashboard API
#[derive(Debug, Clone)]
pub struct ApiError {
    /// The HTTP status code
    pub status_code: StatusCode,
    /// Reason extracted from the response body, or the raw body
    pub reason: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (status {})", self.reason, self.status_code)
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    /// Turn a non-2xx response into an error, keeping the engine's reason when present
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status_code = response.status();
        let body = response.text().await.unwrap_or_default();
        let reason = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| {
                v.pointer("/error/reason")
                    .or_else(|| v.get("message"))
                    .and_then(|r| r.as_str())
                    .map(str::to_string)
            })
            .unwrap_or(body);
        Self {
            status_code,
            reason,
        }
    }
}

/// Pass 2xx responses through; everything else becomes [`ClientError::Api`]
pub async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(ApiError::from_response(response).await.into())
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("api error: {0}")]
    Api(#[from] ApiError),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("request timed out")]
    Timeout(#[from] tokio::time::error::Elapsed),
}

impl ClientError {
    /// Connection resets, timeouts and 5xx/429 answers may succeed when retried
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ClientError::Api(e) => {
                e.status_code.is_server_error()
                    || e.status_code == StatusCode::TOO_MANY_REQUESTS
            }
            ClientError::Timeout(_) => true,
            ClientError::Url(_) | ClientError::Decode(_) => false,
        }
    }

    /// True when the API answered 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::Api(e) if e.status_code == StatusCode::NOT_FOUND)
    }
}
