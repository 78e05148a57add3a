//! HTTP client for the Fedora Commons REST API
//!
//! Requests are rate limited with `governor`. Rate limiting (429), overload
//! (503) and connection failures are retried with exponential backoff until
//! a fixed time budget runs out. Binary bodies are streamed from disk and
//! reopened for every attempt.

use std::future::Future;
use std::num::NonZeroU32;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Jitter, Quota, RateLimiter};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client, RequestBuilder, Response, StatusCode};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use url::Url;

use super::preservation::{io_error, PreservationConfig, PreservationRepository};
use crate::constants::preservation;
use crate::errors::{PreservationError, PreservationResult};

#[derive(Debug)]
pub struct FedoraClient {
    client: Client,
    base_url: Url,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    max_elapsed: Duration,
}

impl FedoraClient {
    pub fn new(config: &PreservationConfig) -> PreservationResult<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| PreservationError::InvalidUrl {
            url: config.base_url.clone(),
            reason: e.to_string(),
        })?;
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("designsafe_tasks/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url,
            rate_limiter: Self::build_rate_limiter(config.rate_limit_rps)?,
            max_elapsed: preservation::MAX_ELAPSED_RETRY,
        })
    }

    /// Shorten the retry budget
    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }

    fn build_rate_limiter(
        rate_limit_rps: u32,
    ) -> PreservationResult<RateLimiter<NotKeyed, InMemoryState, DefaultClock>> {
        let rps = NonZeroU32::new(rate_limit_rps).ok_or_else(|| PreservationError::Configuration {
            reason: "Rate limit must be non-zero".to_string(),
        })?;
        Ok(RateLimiter::direct(Quota::per_second(rps)))
    }

    /// Absolute URL for an encoded repository path
    pub fn url_for(&self, path: &str) -> PreservationResult<Url> {
        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined).map_err(|e| PreservationError::InvalidUrl {
            url: joined.clone(),
            reason: e.to_string(),
        })
    }

    /// Send with rate limiting, retrying transient failures
    ///
    /// `build` runs once per attempt so streamed bodies start from the
    /// beginning each time.
    async fn send<F, Fut>(&self, build: F) -> PreservationResult<Response>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = PreservationResult<RequestBuilder>>,
    {
        let policy = ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(Some(self.max_elapsed))
            .build();
        let this = self;
        let build = &build;

        backoff::future::retry(policy, move || async move {
            this.rate_limiter
                .until_ready_with_jitter(Jitter::up_to(Duration::from_millis(100)))
                .await;

            let request = match build().await {
                Ok(request) => request,
                Err(e) => return Err(backoff::Error::permanent(e)),
            };
            match request.send().await {
                Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => {
                    warn!("Rate limited by preservation repository (429), backing off");
                    Err(backoff::Error::transient(PreservationError::RateLimitExceeded))
                }
                Ok(response) if response.status() == StatusCode::SERVICE_UNAVAILABLE => {
                    warn!("Preservation repository overloaded (503), backing off");
                    Err(backoff::Error::transient(PreservationError::ServerOverloaded))
                }
                Ok(response) => Ok(response),
                Err(e) if e.is_connect() || e.is_timeout() => {
                    warn!("Preservation request failed: {}. Retrying", e);
                    Err(backoff::Error::transient(PreservationError::Http(e)))
                }
                Err(e) => Err(backoff::Error::permanent(PreservationError::Http(e))),
            }
        })
        .await
    }

    fn expect_success(response: &Response) -> PreservationResult<()> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(PreservationError::UnexpectedStatus {
                status: response.status().as_u16(),
                url: response.url().to_string(),
            })
        }
    }
}

#[async_trait]
impl PreservationRepository for FedoraClient {
    async fn exists(&self, path: &str) -> PreservationResult<bool> {
        let url = &self.url_for(path)?;
        let response = self
            .send(move || async move { Ok(self.client.get(url.clone())) })
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(false),
            status if status.is_success() => Ok(true),
            _ => Self::expect_success(&response).map(|_| false),
        }
    }

    async fn put_container(&self, path: &str) -> PreservationResult<()> {
        let url = &self.url_for(path)?;
        let response = self
            .send(move || async move { Ok(self.client.put(url.clone())) })
            .await?;
        Self::expect_success(&response)?;
        debug!("PUT container {}", url);
        Ok(())
    }

    async fn put_binary(
        &self,
        path: &str,
        media_type: &str,
        file: &Path,
        size: u64,
    ) -> PreservationResult<()> {
        let url = &self.url_for(path)?;
        let response = self
            .send(move || async move {
                let handle = tokio::fs::File::open(file)
                    .await
                    .map_err(|source| io_error(file, source))?;
                Ok::<_, PreservationError>(
                    self.client
                        .put(url.clone())
                        .header(CONTENT_TYPE, media_type)
                        .header(CONTENT_LENGTH, size)
                        .body(Body::wrap_stream(ReaderStream::new(handle))),
                )
            })
            .await?;
        Self::expect_success(&response)?;
        debug!("PUT binary {} ({}, {} bytes)", url, media_type, size);
        Ok(())
    }
}
