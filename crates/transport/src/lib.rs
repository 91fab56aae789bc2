//! Lookout transport – list and watch requests against the cluster API.
//!
//! Two connection pools are kept: a plain pool with fixed timeouts for
//! one-shot list calls, and a watch pool whose connections are long-lived,
//! never reused, and bounded only by cancellation upstream.

#![forbid(unsafe_code)]

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use tracing::debug;

use lookout_core::ResourceKind;

pub use reqwest::StatusCode;

/// Fixed connect/request timeout for plain calls.
const PLAIN_TIMEOUT: Duration = Duration::from_secs(16);

/// Immutable connection bundle for one informer instance.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Base URL of the API server, e.g. `https://10.0.0.1:6443`.
    pub server: String,
    /// Optional bearer token attached to every outbound call.
    pub token: Option<String>,
    /// Optional PEM trust bundle used to validate the server certificate.
    pub trust_bundle_pem: Option<Vec<u8>>,
    /// Explicitly opted-in certificate validation bypass.
    pub insecure: bool,
    /// Namespace scope substituted into kind path templates.
    pub namespace: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("building http client: {0}")]
    Build(#[source] reqwest::Error),
    #[error("invalid trust bundle: {0}")]
    TrustMaterial(#[source] reqwest::Error),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("watch request refused: http {0}")]
    WatchStatus(StatusCode),
}

/// Raw byte chunks of an open watch response.
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// The transport surface the informer engine consumes. `HttpTransport` is
/// the real implementation; tests inject mocks.
#[async_trait]
pub trait ApiTransport: Send + Sync {
    /// One-shot list. Non-success statuses are returned as values so the
    /// caller can decide to retry.
    async fn list(&self, kind: &ResourceKind) -> Result<(StatusCode, String), TransportError>;

    /// Open a watch stream resuming from `resource_version`. The connection
    /// stays open until the server closes it, a transport error occurs, or
    /// the stream is dropped.
    async fn watch(
        &self,
        kind: &ResourceKind,
        resource_version: &str,
    ) -> Result<ByteStream, TransportError>;
}

/// HTTPS transport over reqwest.
pub struct HttpTransport {
    plain: reqwest::Client,
    watch: reqwest::Client,
    cfg: ClusterConfig,
}

impl HttpTransport {
    pub fn new(cfg: ClusterConfig) -> Result<Self, TransportError> {
        let plain = Self::builder(&cfg)?
            .timeout(PLAIN_TIMEOUT)
            .build()
            .map_err(TransportError::Build)?;
        // Watch connections are raw and streamed; keep none idle for reuse
        // and leave the request unbounded by read timeout.
        let watch = Self::builder(&cfg)?
            .pool_max_idle_per_host(0)
            .build()
            .map_err(TransportError::Build)?;
        Ok(Self { plain, watch, cfg })
    }

    fn builder(cfg: &ClusterConfig) -> Result<reqwest::ClientBuilder, TransportError> {
        let mut b = reqwest::Client::builder()
            .use_rustls_tls()
            .connect_timeout(PLAIN_TIMEOUT);
        if let Some(pem) = &cfg.trust_bundle_pem {
            let cert = reqwest::Certificate::from_pem(pem).map_err(TransportError::TrustMaterial)?;
            b = b.add_root_certificate(cert);
        }
        if cfg.insecure {
            b = b.danger_accept_invalid_certs(true);
        }
        Ok(b)
    }

    fn url_for(&self, kind: &ResourceKind) -> String {
        format!(
            "{}{}",
            self.cfg.server.trim_end_matches('/'),
            kind.path_for(&self.cfg.namespace)
        )
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.cfg.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[async_trait]
impl ApiTransport for HttpTransport {
    async fn list(&self, kind: &ResourceKind) -> Result<(StatusCode, String), TransportError> {
        let url = self.url_for(kind);
        debug!(kind = %kind.name, url = %url, "list request");
        let resp = self.authorize(self.plain.get(&url)).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        debug!(kind = %kind.name, status = %status, bytes = body.len(), "list response");
        Ok((status, body))
    }

    async fn watch(
        &self,
        kind: &ResourceKind,
        resource_version: &str,
    ) -> Result<ByteStream, TransportError> {
        let url = self.url_for(kind);
        debug!(kind = %kind.name, url = %url, rv = %resource_version, "opening watch");
        let resp = self
            .authorize(self.watch.get(&url))
            .query(&[("watch", "true"), ("resourceVersion", resource_version)])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::WatchStatus(status));
        }
        Ok(resp.bytes_stream().map_err(TransportError::from).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(server: &str, ns: &str) -> ClusterConfig {
        ClusterConfig {
            server: server.to_string(),
            token: None,
            trust_bundle_pem: None,
            insecure: false,
            namespace: ns.to_string(),
        }
    }

    #[test]
    fn url_joins_without_double_slash() {
        let t = HttpTransport::new(cfg("https://api.example:6443/", "prod")).unwrap();
        let k = ResourceKind::new("pods", "/api/v1/namespaces/{namespace}/pods");
        assert_eq!(t.url_for(&k), "https://api.example:6443/api/v1/namespaces/prod/pods");
    }

    #[test]
    fn insecure_mode_builds() {
        let mut c = cfg("https://api.example:6443", "default");
        c.insecure = true;
        assert!(HttpTransport::new(c).is_ok());
    }
}
