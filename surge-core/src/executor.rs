use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::http::{HttpClient, HttpRequest, TransportErrorKind};
use crate::stats::RunStats;

/// Outcome of one HTTP call. Immutable; 4xx/5xx are normal results, only
/// connection-level failures set `error` (and leave `status` unset).
#[derive(Debug, Clone)]
pub struct RequestResult {
    pub status: Option<u16>,
    pub duration: Duration,
    pub body: Bytes,
    pub tags: Vec<(String, String)>,
    pub error: Option<TransportErrorKind>,
}

impl RequestResult {
    pub fn duration_ms(&self) -> f64 {
        self.duration.as_secs_f64() * 1000.0
    }

    pub fn body_utf8(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Transport error or HTTP error status.
    pub fn is_failed(&self) -> bool {
        self.error.is_some() || self.status.is_some_and(|s| s >= 400)
    }
}

/// The HTTP capability handed to scenario callbacks.
///
/// Issues requests over the run's shared connection pool, measures wall-clock
/// duration from send to full body received, and records the built-in request
/// metrics for every call.
#[derive(Debug, Clone)]
pub struct RequestExecutor {
    client: Arc<HttpClient>,
    stats: Arc<RunStats>,
    default_timeout: Duration,
}

impl RequestExecutor {
    pub(crate) fn new(client: Arc<HttpClient>, stats: Arc<RunStats>, default_timeout: Duration) -> Self {
        Self {
            client,
            stats,
            default_timeout,
        }
    }

    pub async fn execute(&self, mut req: HttpRequest) -> RequestResult {
        if req.timeout.is_none() {
            req.timeout = Some(self.default_timeout);
        }

        let tags = std::mem::take(&mut req.tags);
        let bytes_sent = req.body.len() as u64;
        let started = Instant::now();

        let result = match self.client.send(req).await {
            Ok(resp) => RequestResult {
                status: Some(resp.status),
                duration: started.elapsed(),
                body: resp.body,
                tags,
                error: None,
            },
            Err(err) => {
                tracing::debug!(error = %err, "http transport failure");
                RequestResult {
                    status: None,
                    duration: started.elapsed(),
                    body: Bytes::new(),
                    tags,
                    error: Some(err.transport_error_kind()),
                }
            }
        };

        self.stats.record_http_request(&result, bytes_sent);
        result
    }

    pub async fn get(&self, url: &str) -> RequestResult {
        self.execute(HttpRequest::get(url)).await
    }

    pub async fn post(&self, url: &str, body: Bytes) -> RequestResult {
        self.execute(HttpRequest::post(url, body)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_statuses_count_as_failed_but_are_not_errors() {
        let result = RequestResult {
            status: Some(503),
            duration: Duration::from_millis(3),
            body: Bytes::new(),
            tags: Vec::new(),
            error: None,
        };
        assert!(result.is_failed());
        assert!(result.error.is_none());

        let ok = RequestResult {
            status: Some(201),
            duration: Duration::from_millis(3),
            body: Bytes::from_static(b"{}"),
            tags: Vec::new(),
            error: None,
        };
        assert!(!ok.is_failed());
        assert_eq!(ok.body_utf8(), Some("{}"));
    }

    #[tokio::test]
    async fn transport_failure_produces_a_result_with_unset_status() {
        let stats = Arc::new(RunStats::default());
        let executor = RequestExecutor::new(
            Arc::new(HttpClient::default()),
            stats.clone(),
            Duration::from_secs(1),
        );

        let result = executor.get("not a url").await;
        assert_eq!(result.status, None);
        assert_eq!(result.error, Some(TransportErrorKind::InvalidUrl));
        assert_eq!(stats.requests_total(), 1);
        assert_eq!(stats.failed_requests_total(), 1);
    }
}
