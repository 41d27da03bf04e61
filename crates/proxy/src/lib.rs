//! HTTP surfaces of the consistent-hash router.
//!
//! This crate provides:
//! - [`Proxy`], which picks the instance owning a request key and forwards
//!   the request to it
//! - [`balancer_app`], the load balancer's axum router
//! - [`backend_app`] and [`ProcessingService`], the backend service whose
//!   per-user work runs through a single-flight cache
//!
//! The routing key is read from the `X-User-Id` header on both sides.

use axum::http::{HeaderMap, HeaderName};

mod backend;
mod balancer;
mod error;
mod router;

pub use backend::{backend_app, BackendState, ProcessResponse, ProcessingService, UserResult};
pub use balancer::balancer_app;
pub use error::ProxyError;
pub use router::Proxy;

/// Header carrying the routing key.
pub static USER_ID_HEADER: HeaderName = HeaderName::from_static("x-user-id");

/// Response header naming the instance that served a proxied request.
pub static ROUTED_TO_HEADER: HeaderName = HeaderName::from_static("x-routed-to");

/// Routing key of a request, or `None` if the header is absent or blank.
pub fn user_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(&USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|key| !key.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_user_key() {
        let mut headers = HeaderMap::new();
        assert_eq!(user_key(&headers), None);

        headers.insert(&USER_ID_HEADER, HeaderValue::from_static("   "));
        assert_eq!(user_key(&headers), None);

        headers.insert(&USER_ID_HEADER, HeaderValue::from_static("user-1"));
        assert_eq!(user_key(&headers), Some("user-1"));
    }
}
