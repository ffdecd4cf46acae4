//! HTTP client abstraction for the upstream Z.AI call
//!
//! A thin trait over the hyper legacy client so tests can inject a mock
//! that replays canned SSE streams instead of talking to the network.
use async_trait::async_trait;
use axum::response::IntoResponse;
use hyper_util::{client::legacy::Client, rt::TokioExecutor};
use std::time::Duration;

pub type HyperClient = Client<
    hyper_tls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>,
    axum::body::Body,
>;

#[async_trait]
pub trait HttpClient: std::fmt::Debug {
    async fn request(
        &self,
        req: axum::extract::Request,
    ) -> Result<axum::response::Response, Box<dyn std::error::Error + Send + Sync>>;
}

#[async_trait]
impl HttpClient for HyperClient {
    async fn request(
        &self,
        req: axum::extract::Request,
    ) -> Result<axum::response::Response, Box<dyn std::error::Error + Send + Sync>> {
        self.request(req)
            .await
            .map(|res| res.into_response())
            .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
    }
}

/// Build the TLS-capable pooled client used for all upstream calls.
///
/// There is exactly one upstream host, so a small idle pool goes a long
/// way; responses stream for minutes, hence the generous idle timeout.
pub fn create_hyper_client(pool_max_idle_per_host: usize, pool_idle_timeout: Duration) -> HyperClient {
    let https = hyper_tls::HttpsConnector::new();

    tracing::debug!(
        idle_timeout_secs = pool_idle_timeout.as_secs(),
        max_idle_per_host = pool_max_idle_per_host,
        "HTTP client pool config"
    );

    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(pool_idle_timeout)
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .pool_timer(hyper_util::rt::TokioTimer::new())
        .build(https)
}
