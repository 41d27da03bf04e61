use std::sync::Arc;

use axum::extract::{Request, State};
use axum::response::Response;
use axum::Router;

use crate::error::ProxyError;
use crate::router::Proxy;
use crate::user_key;

/// Load balancer surface: every path and method is proxied.
pub fn balancer_app(proxy: Arc<Proxy>) -> Router {
    Router::new().fallback(forward).with_state(proxy)
}

async fn forward(State(proxy): State<Arc<Proxy>>, request: Request) -> Result<Response, ProxyError> {
    let key = user_key(request.headers()).map(str::to_owned);
    proxy.route(key.as_deref(), request).await
}
