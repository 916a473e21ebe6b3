use futures::future::BoxFuture;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, ClientBuilder};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{FetchFailure, TransportError};
use crate::registry::{EntryState, Registry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The one network capability the pipeline needs.
#[cfg_attr(test, mockall::automock)]
pub trait HttpClient {
    fn get(&self, url: &str, timeout: Duration) -> BoxFuture<'static, Result<HttpResponse, TransportError>>;
}

pub type SharedClient = Arc<dyn HttpClient + Send + Sync>;

/// [`HttpClient`] backed by reqwest with rustls.
#[derive(Clone)]
pub struct ReqwestClient {
    client: Client,
}

impl ReqwestClient {
    pub fn new(user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = ClientBuilder::new()
            .use_rustls_tls()
            .user_agent(user_agent)
            .build()?;

        Ok(Self { client })
    }
}

fn classify(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else if error.is_redirect() {
        TransportError::Redirect(error.to_string())
    } else if error.is_body() || error.is_decode() {
        TransportError::Body(error.to_string())
    } else {
        TransportError::Other(error.to_string())
    }
}

impl HttpClient for ReqwestClient {
    fn get(&self, url: &str, timeout: Duration) -> BoxFuture<'static, Result<HttpResponse, TransportError>> {
        let request = self.client.get(url).timeout(timeout);

        Box::pin(async move {
            let response = request.send().await.map_err(classify)?;
            let status = response.status().as_u16();
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            if !response.status().is_success() {
                return Ok(HttpResponse {
                    status,
                    body: Vec::new(),
                    content_type,
                });
            }

            let body = response.bytes().await.map_err(classify)?.to_vec();
            Ok(HttpResponse {
                status,
                body,
                content_type,
            })
        })
    }
}

/// Run-level cancellation flag. Cancelling stops new fetches from being
/// dispatched; fetches already in flight finish or time out on their own.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundSummary {
    pub fetched: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Bounded pool of fetch workers.
///
/// [`run_round`](Fetcher::run_round) returns only once every entry handed to
/// it has reached a terminal state.
#[derive(Clone)]
pub struct Fetcher {
    client: SharedClient,
    timeout: Duration,
    semaphore: Arc<Semaphore>,
    cancel: CancelToken,
    deadline: Option<Instant>,
}

impl Fetcher {
    pub fn new(client: SharedClient, concurrency: usize, timeout: Duration, cancel: CancelToken) -> Self {
        Self {
            client,
            timeout,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            cancel,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    fn should_stop(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.map_or(false, |d| Instant::now() >= d)
    }

    /// Retrieves `url` once and records the outcome on its registry entry.
    /// Failures are terminal; there is no retry.
    pub async fn fetch(&self, registry: &Registry, url: &str) -> EntryState {
        let outcome = match tokio::time::timeout(self.timeout, self.client.get(url, self.timeout)).await {
            Ok(Ok(response)) if response.is_success() => Ok(response),
            Ok(Ok(response)) => Err(FetchFailure::Status(response.status)),
            Ok(Err(error)) => Err(FetchFailure::Transport(error)),
            Err(_) => Err(FetchFailure::Transport(TransportError::Timeout)),
        };

        match outcome {
            Ok(response) => {
                debug!(url, bytes = response.body.len(), "fetched");
                registry.mark_fetched(url, response.body, response.content_type);
                EntryState::Fetched
            }
            Err(failure) => {
                warn!(url, reason = %failure, "fetch failed");
                registry.mark_failed(url, failure.to_string());
                EntryState::Failed
            }
        }
    }

    fn cancel_entry(registry: &Registry, url: &str) {
        debug!(url, "not dispatched, run cancelled");
        registry.mark_failed(url, FetchFailure::Cancelled.to_string());
    }

    /// Fetches every URL of one round under the concurrency bound and waits
    /// for all of them.
    pub async fn run_round(&self, registry: &Arc<Registry>, urls: &[String]) -> RoundSummary {
        let mut tasks = JoinSet::new();

        for url in urls {
            if self.should_stop() {
                Self::cancel_entry(registry, url);
                continue;
            }
            let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    Self::cancel_entry(registry, url);
                    continue;
                }
            };
            if self.should_stop() {
                Self::cancel_entry(registry, url);
                continue;
            }

            let fetcher = self.clone();
            let registry = Arc::clone(registry);
            let url = url.clone();
            tasks.spawn(async move {
                let _permit = permit;
                fetcher.fetch(&registry, &url).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(error) = joined {
                warn!(%error, "fetch task aborted");
            }
        }

        let mut summary = RoundSummary::default();
        for url in urls {
            if registry.state(url) == Some(EntryState::Pending) {
                registry.mark_failed(url, "fetch task aborted");
            }
            match registry.get(url) {
                Some(entry) if entry.state == EntryState::Fetched => summary.fetched += 1,
                Some(entry) if entry.failure_reason.as_deref() == Some("cancelled") => {
                    summary.cancelled += 1
                }
                _ => summary.failed += 1,
            }
        }

        info!(
            fetched = summary.fetched,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "fetch round complete"
        );
        summary
    }
}
