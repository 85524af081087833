use crate::config::{RetryConfig, TargetConfig};
use crate::counter::RequestCounter;
use crate::identity::GridCoord;
use crate::topology::target_base_url;
use anyhow::Result;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// One logical echo request, addressed by grid coordinate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub target: GridCoord,
    pub caller: String,
    pub request_id: u64,
}

/// Result of a send after the retry loop has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Success,
    /// The peer answered with a non-success status. Never retried.
    ApplicationError(u16),
    /// Every attempt failed at the transport level.
    Failure,
}

/// Fixed-delay retry budget for transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.attempts, Duration::from_millis(config.delay_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// Trait for outbound transports. `Err` means the request never got a
/// response (refused, timed out, unresolvable) and may be retried; `Ok`
/// carries the status the peer answered with.
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    fn deliver<'a>(
        &'a self,
        request: &'a OutboundRequest,
    ) -> Pin<Box<dyn Future<Output = Result<u16>> + Send + 'a>>;

    /// Human-readable address of the request, used in logs.
    fn describe(&self, request: &OutboundRequest) -> String {
        format!(
            "{}/echo/{}/{}",
            request.target, request.caller, request.request_id
        )
    }
}

/// Mock transport for local runs (always answers 200 after a fixed delay)
pub struct MockTransport {
    delay_ms: u64,
}

impl MockTransport {
    pub fn new(delay_ms: u64) -> Self {
        Self { delay_ms }
    }
}

impl Transport for MockTransport {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn deliver<'a>(
        &'a self,
        _request: &'a OutboundRequest,
    ) -> Pin<Box<dyn Future<Output = Result<u16>> + Send + 'a>> {
        Box::pin(async move {
            sleep(Duration::from_millis(self.delay_ms)).await;
            Ok(200)
        })
    }
}

/// HTTP transport posting to `/echo/{caller}/{request_id}` on the target service
pub struct HttpTransport {
    client: reqwest::Client,
    target: TargetConfig,
}

impl HttpTransport {
    pub fn new(target: TargetConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout_ms) = target.timeout_ms {
            builder = builder.timeout(Duration::from_millis(timeout_ms));
        }
        let client = builder.build()?;

        Ok(Self { client, target })
    }

    pub fn url_for(&self, request: &OutboundRequest) -> String {
        format!(
            "{}/echo/{}/{}",
            target_base_url(request.target, &self.target),
            request.caller,
            request.request_id
        )
    }
}

impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    fn deliver<'a>(
        &'a self,
        request: &'a OutboundRequest,
    ) -> Pin<Box<dyn Future<Output = Result<u16>> + Send + 'a>> {
        Box::pin(async move {
            let url = self.url_for(request);
            let response = self
                .client
                .post(&url)
                .json(&serde_json::json!({}))
                .send()
                .await?;

            let status = response.status();
            if status.is_success() {
                // Drain the acknowledgement so the connection can be reused
                response.text().await?;
            }
            Ok(status.as_u16())
        })
    }

    fn describe(&self, request: &OutboundRequest) -> String {
        self.url_for(request)
    }
}

/// Performs one logical request with bounded retry and records successes.
pub struct RequestSender {
    transport: Arc<dyn Transport>,
    counter: RequestCounter,
    retry: RetryPolicy,
}

impl RequestSender {
    pub fn new(transport: Arc<dyn Transport>, counter: RequestCounter, retry: RetryPolicy) -> Self {
        Self {
            transport,
            counter,
            retry,
        }
    }

    pub fn counter(&self) -> &RequestCounter {
        &self.counter
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    pub async fn send(&self, request: &OutboundRequest) -> SendOutcome {
        let max_attempts = self.retry.max_attempts;

        for attempt in 1..=max_attempts {
            match self.transport.deliver(request).await {
                // Any 2xx acknowledges the request
                Ok(status) if (200..300).contains(&status) => {
                    self.counter.increment();
                    info!("-> {}, status: {}", self.transport.describe(request), status);
                    return SendOutcome::Success;
                }
                Ok(status) => {
                    warn!("-> {}, status: {}", self.transport.describe(request), status);
                    return SendOutcome::ApplicationError(status);
                }
                Err(e) => {
                    error!(
                        "Attempt {}/{} failed for {}: {:#}",
                        attempt,
                        max_attempts,
                        self.transport.describe(request),
                        e
                    );
                    if attempt < max_attempts {
                        sleep(self.retry.delay).await;
                    }
                }
            }
        }

        error!("-> Error: {}: giving up", self.transport.describe(request));
        SendOutcome::Failure
    }
}
