use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Missing X-User-Id header")]
    MissingKey,

    #[error("No available service instances")]
    NoInstances,

    #[error("Upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MissingKey => StatusCode::BAD_REQUEST,
            ProxyError::NoInstances => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Upstream(e) if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ProxyError::MissingKey | ProxyError::NoInstances => self.to_string(),
            ProxyError::Upstream(e) => {
                tracing::warn!("Upstream error: {}", e);
                "Upstream request failed".to_string()
            }
        };

        (status, message).into_response()
    }
}
