//! Request execution: one HTTP request in, one classified outcome out.
//!
//! [`RequestExecutor`] is the seam between the worker pool and the network.
//! [`HttpExecutor`] is the production implementation on top of a shared
//! [`reqwest::Client`] tuned for many concurrent in-flight requests.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Method};

use crate::config::EngineSettings;
use crate::error::{LoadTestError, RequestError};
use crate::outcome::RequestOutcome;

/// Performs one request attempt and classifies it.
///
/// Implementations must never fail past this boundary: every failure mode is
/// encoded in the returned outcome's classification.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    /// Issue one request, giving up after `timeout`.
    async fn execute(&self, timeout: Duration) -> RequestOutcome;
}

/// Build the shared HTTP client used by every worker of a run.
///
/// Connection pooling is sized for high concurrency, redirects are not
/// followed (a 3xx counts as success), and response compression is off to
/// keep client CPU out of the measurement.
pub fn build_http_client(settings: &EngineSettings) -> Result<Client, LoadTestError> {
    Client::builder()
        .pool_max_idle_per_host(settings.pool_max_idle_per_host)
        .pool_idle_timeout(Some(settings.pool_idle_timeout()))
        .connect_timeout(settings.connect_timeout())
        .timeout(settings.request_timeout())
        .tcp_nodelay(true)
        .http1_title_case_headers()
        .redirect(reqwest::redirect::Policy::none())
        .no_gzip()
        .no_brotli()
        .no_deflate()
        .build()
        .map_err(|e| LoadTestError::Client {
            message: e.to_string(),
        })
}

/// Production executor: sends `method url` and drains the response body.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: Client,
    url: reqwest::Url,
    method: Method,
}

impl HttpExecutor {
    /// Creates an executor targeting `url` with the given client and method.
    pub fn new(client: Client, url: reqwest::Url, method: Method) -> Self {
        Self {
            client,
            url,
            method,
        }
    }

    /// The target URL.
    pub fn url(&self) -> &reqwest::Url {
        &self.url
    }

    async fn send(&self, timeout: Duration) -> Result<(), RequestError> {
        let response = self
            .client
            .request(self.method.clone(), self.url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| RequestError::classify_reqwest(&e))?;

        let status = response.status().as_u16();

        // Drain the body so the connection goes back to the pool. A received
        // error status wins over a failure while reading its body.
        let drained = response.bytes().await;
        if status >= 400 {
            return Err(RequestError::Http { status });
        }
        drained.map_err(|e| RequestError::classify_reqwest(&e))?;
        Ok(())
    }
}

#[async_trait]
impl RequestExecutor for HttpExecutor {
    async fn execute(&self, timeout: Duration) -> RequestOutcome {
        let start = Instant::now();
        let result = self.send(timeout).await;
        let latency = start.elapsed();

        if let Err(ref err) = result {
            tracing::trace!(url = %self.url, %err, "request failed");
        }
        RequestOutcome::from_result(latency, &result)
    }
}
