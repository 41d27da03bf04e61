use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::response::Response;
use bytes::Bytes;
use corelib::{InstanceResolver, ServiceInstance};

use crate::error::ProxyError;
use crate::ROUTED_TO_HEADER;

static HOP_BY_HOP: [header::HeaderName; 8] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::CONTENT_LENGTH,
];

/// Routes requests to the instance owning their key.
///
/// Routing reads the resolver's current snapshot and never waits for an
/// instance to appear. A failed upstream call is reported, not retried on
/// another instance.
pub struct Proxy {
    resolver: Arc<dyn InstanceResolver>,
    client: reqwest::Client,
    upstream_timeout: Option<Duration>,
}

impl Proxy {
    /// Builds a proxy with its own upstream client. Instances are dialed
    /// directly; `HTTP_PROXY` and friends are ignored.
    pub fn new(resolver: Arc<dyn InstanceResolver>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().no_proxy().build()?;
        Ok(Self {
            resolver,
            client,
            upstream_timeout: None,
        })
    }

    /// Bounds each upstream call. Unset by default, so a hung backend holds
    /// its caller indefinitely.
    pub fn upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = Some(timeout);
        self
    }

    /// Forwards `request` to the owner of `key`.
    ///
    /// A missing or blank key fails before any lookup. The upstream response
    /// is passed through with any status and tagged with the serving
    /// instance's id.
    pub async fn route(&self, key: Option<&str>, request: Request) -> Result<Response, ProxyError> {
        let key = key
            .filter(|key| !key.trim().is_empty())
            .ok_or(ProxyError::MissingKey)?;
        let instance = self.resolver.resolve(key).ok_or(ProxyError::NoInstances)?;

        tracing::debug!(
            key,
            instance_id = %instance.id,
            address = %instance.address(),
            "Routing request"
        );
        self.forward(&instance, request).await
    }

    async fn forward(
        &self,
        instance: &ServiceInstance,
        request: Request,
    ) -> Result<Response, ProxyError> {
        let (parts, body) = request.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = format!("http://{}{}", instance.address(), path_and_query);

        let mut headers = parts.headers;
        headers.remove(header::HOST);
        strip_hop_by_hop(&mut headers);

        let mut upstream = self
            .client
            .request(parts.method, url)
            .headers(headers)
            .body(reqwest::Body::wrap_stream(body.into_data_stream()));
        if let Some(timeout) = self.upstream_timeout {
            upstream = upstream.timeout(timeout);
        }

        let upstream = upstream.send().await?;
        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);
        let body: Bytes = upstream.bytes().await?;

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
            .headers_mut()
            .insert(ROUTED_TO_HEADER.clone(), HeaderValue::from(instance.id.0));
        Ok(response)
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
}
