//! Rate-limited GETs against the data.go.kr operations.
//!
//! Every request holds two permits: one from a pool shared by the whole run and
//! one from a pool keyed by operation name (`getBidPblancListInfoServc`,
//! `getOpengResultListInfoServc`, ...). The portal throttles per operation, so
//! a slow award lookup never starves the announcement listing. Status codes
//! decide whether a failed call is retried at all; the `serviceKey` never
//! reaches a log line or an error message.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

/// A rejected key or malformed query gets the same answer every time; only
/// throttling (429), timeouts (408) and 5xx are worth another attempt.
pub fn classify_status(status: StatusCode) -> RetryDisposition {
    match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => RetryDisposition::Retryable,
        s if s.is_server_error() => RetryDisposition::Retryable,
        _ => RetryDisposition::NonRetryable,
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

/// Exponential backoff, shared with the adapter's envelope-level retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(16),
        }
    }
}

impl BackoffPolicy {
    /// `base * 2^attempt`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let factor = u32::try_from(attempt)
            .ok()
            .and_then(|shift| 1u32.checked_shl(shift))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn exhausted(&self, attempt: usize) -> bool {
        attempt >= self.max_retries
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    /// Requests in flight across all operations.
    pub global_concurrency: usize,
    /// Requests in flight for one operation name.
    pub per_endpoint_concurrency: usize,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            global_concurrency: 8,
            per_endpoint_concurrency: 4,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("fetcher is shut down")]
    Closed,
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Replace the `serviceKey` query value so URLs can be logged.
pub fn redact_service_key(url: &str) -> String {
    let Ok(mut parsed) = reqwest::Url::parse(url) else {
        return url.to_string();
    };
    let pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| {
            let value = if k.eq_ignore_ascii_case("serviceKey") {
                "***".to_string()
            } else {
                v.into_owned()
            };
            (k.into_owned(), value)
        })
        .collect();
    if !pairs.is_empty() {
        parsed.query_pairs_mut().clear().extend_pairs(pairs);
    }
    parsed.to_string()
}

/// Permit pools keyed by operation name, created on first use.
#[derive(Debug)]
struct OperationLimits {
    run: Arc<Semaphore>,
    per_operation: usize,
    operations: Mutex<HashMap<String, Arc<Semaphore>>>,
}

/// Both permits are released together when the request finishes.
struct Permits {
    _run: OwnedSemaphorePermit,
    _operation: OwnedSemaphorePermit,
}

impl OperationLimits {
    fn new(run: usize, per_operation: usize) -> Self {
        Self {
            run: Arc::new(Semaphore::new(run.max(1))),
            per_operation: per_operation.max(1),
            operations: Mutex::new(HashMap::new()),
        }
    }

    async fn pool(&self, operation: &str) -> Arc<Semaphore> {
        let mut operations = self.operations.lock().await;
        let pool = operations
            .entry(operation.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_operation)));
        Arc::clone(pool)
    }

    async fn acquire(&self, operation: &str) -> Result<Permits, FetchError> {
        let run = Arc::clone(&self.run)
            .acquire_owned()
            .await
            .map_err(|_| FetchError::Closed)?;
        let operation = self
            .pool(operation)
            .await
            .acquire_owned()
            .await
            .map_err(|_| FetchError::Closed)?;
        Ok(Permits {
            _run: run,
            _operation: operation,
        })
    }
}

enum Attempt {
    Done(FetchedResponse),
    Retry(String),
    Fail(FetchError),
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    limits: OperationLimits,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            limits: OperationLimits::new(config.global_concurrency, config.per_endpoint_concurrency),
            backoff: config.backoff,
        })
    }

    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    /// GET `url` under the permits of `operation`, retrying transient failures.
    pub async fn fetch_bytes(
        &self,
        run_id: Uuid,
        operation: &str,
        url: &str,
    ) -> Result<FetchedResponse, FetchError> {
        let _permits = self.limits.acquire(operation).await?;
        let span = info_span!("http_fetch", %run_id, operation, url = %redact_service_key(url));
        async {
            let mut attempt = 0;
            loop {
                let last = self.backoff.exhausted(attempt);
                match self.attempt(url, last).await {
                    Attempt::Done(response) => return Ok(response),
                    Attempt::Fail(err) => return Err(err),
                    Attempt::Retry(reason) => {
                        let delay = self.backoff.delay_for_attempt(attempt);
                        debug!(attempt, ?delay, %reason, "retrying request");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn attempt(&self, url: &str, last: bool) -> Attempt {
        let resp = match self.client.get(url).send().await {
            Ok(resp) => resp,
            Err(err) if last || classify_reqwest_error(&err) == RetryDisposition::NonRetryable => {
                return Attempt::Fail(FetchError::Request(err.without_url()));
            }
            Err(err) => return Attempt::Retry(err.without_url().to_string()),
        };

        let status = resp.status();
        if !status.is_success() {
            if last || classify_status(status) == RetryDisposition::NonRetryable {
                return Attempt::Fail(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: redact_service_key(resp.url().as_str()),
                });
            }
            return Attempt::Retry(status.to_string());
        }

        let final_url = redact_service_key(resp.url().as_str());
        match resp.bytes().await {
            Ok(body) => Attempt::Done(FetchedResponse {
                status,
                final_url,
                body: body.to_vec(),
            }),
            Err(err) if last => Attempt::Fail(FetchError::Request(err.without_url())),
            Err(err) => Attempt::Retry(err.without_url().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_are_final_server_errors_retry() {
        for code in [400, 401, 403, 404] {
            let status = StatusCode::from_u16(code).unwrap();
            assert_eq!(classify_status(status), RetryDisposition::NonRetryable);
        }
        for code in [408, 429, 500, 502, 503] {
            let status = StatusCode::from_u16(code).unwrap();
            assert_eq!(classify_status(status), RetryDisposition::Retryable);
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(350));
    }

    #[test]
    fn service_key_never_reaches_logs() {
        let url = "http://apis.data.go.kr/1230000/ad/BidPublicInfoService/getBidPblancListInfoServc?serviceKey=SECRET%2Bkey&pageNo=2";
        let redacted = redact_service_key(url);
        assert!(!redacted.contains("SECRET"));
        assert!(redacted.contains("serviceKey=***"));
        assert!(redacted.contains("pageNo=2"));
        assert_eq!(redact_service_key("not a url"), "not a url");
    }

    #[tokio::test]
    async fn operations_get_separate_pools() {
        let limits = OperationLimits::new(4, 1);
        let _listing = limits.acquire("getBidPblancListInfoServc").await.unwrap();
        let award = tokio::time::timeout(
            Duration::from_millis(100),
            limits.acquire("getOpengResultListInfoServc"),
        )
        .await;
        assert!(award.is_ok(), "a different operation is not blocked");

        let second_listing = tokio::time::timeout(
            Duration::from_millis(50),
            limits.acquire("getBidPblancListInfoServc"),
        )
        .await;
        assert!(second_listing.is_err(), "the same operation waits for its permit");
    }

    #[tokio::test]
    async fn unreachable_host_surfaces_request_error() {
        let fetcher = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_millis(200),
            backoff: BackoffPolicy {
                max_retries: 1,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
            },
            ..HttpClientConfig::default()
        })
        .unwrap();
        let err = fetcher
            .fetch_bytes(Uuid::nil(), "getBidPblancListInfoServc", "http://127.0.0.1:9/unreachable")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Request(_)));
        assert_eq!(err.status(), None);
    }
}
