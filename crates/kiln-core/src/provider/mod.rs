//! External provider gateway.
//!
//! All third-party generation traffic goes through one asynchronous
//! submit-then-poll lifecycle, regardless of provider. Model wrappers build a
//! normalized payload (classified aspect ratio, whole-second duration, seed,
//! base64 media) and hand it to [`ExternalProviderAdapter::generate`]; the
//! adapter owns retry, backoff, timeout and cancellation semantics so no leaf
//! wrapper reimplements them.
//!
//! Retry rules are asymmetric on purpose: submission may be retried once on a
//! transient transport failure because no job exists yet, but polling is
//! never retried — the job was accepted, and resubmitting would risk a
//! duplicate billable generation.

pub mod http;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::ProviderError;
use crate::registry::Provider;

pub use http::HttpProviderTransport;

/// Transport-level failure, before it is given provider/job context.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O failure")]
    Network(#[source] anyhow::Error),

    #[error("provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("provider response violated the job protocol: {message}")]
    Protocol { message: String },
}

impl TransportError {
    /// Transient failures are worth one submission retry; protocol breakage
    /// and client errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Network(_) => true,
            TransportError::Http { status, .. } => *status == 429 || *status >= 500,
            TransportError::Protocol { .. } => false,
        }
    }
}

/// One artifact as the provider reports it: a fetchable URL or inline bytes
/// (some providers return base64 media directly in the poll response).
#[derive(Debug, Clone)]
pub enum ProviderArtifact {
    Url(String),
    Inline(Bytes),
}

/// Observed state of a provider-side job.
#[derive(Debug, Clone)]
pub enum PollStatus {
    Pending,
    Running,
    Succeeded { outputs: Vec<ProviderArtifact> },
    Failed { message: String },
}

/// The wire seam: one implementation per deployment (HTTP in production, a
/// scripted fake in tests). Everything above this trait is transport-agnostic.
#[async_trait]
pub trait ProviderTransport: Send + Sync {
    /// Submit a job, returning the provider-side task id.
    async fn submit(
        &self,
        provider: Provider,
        model: &str,
        payload: &serde_json::Value,
    ) -> Result<String, TransportError>;

    /// Observe the current state of a submitted job.
    async fn poll(&self, provider: Provider, task_id: &str) -> Result<PollStatus, TransportError>;

    /// Best-effort cancellation of a submitted job.
    async fn cancel(&self, provider: Provider, task_id: &str) -> Result<(), TransportError>;

    /// Retrieve artifact bytes from a provider-reported URL.
    async fn fetch(&self, url: &str) -> Result<Bytes, TransportError>;
}

/// Poll pacing and deadline for the job lifecycle.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub initial_interval: Duration,
    pub backoff_multiplier: f64,
    pub max_interval: Duration,
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            backoff_multiplier: 1.5,
            max_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(600),
        }
    }
}

/// Drives the submit/poll/fetch lifecycle against a [`ProviderTransport`].
///
/// Shared by every external model wrapper; constructed once per engine.
pub struct ExternalProviderAdapter {
    transport: Arc<dyn ProviderTransport>,
    policy: PollPolicy,
}

impl ExternalProviderAdapter {
    pub fn new(transport: Arc<dyn ProviderTransport>, policy: PollPolicy) -> Self {
        Self { transport, policy }
    }

    /// Run one job to completion and return its artifacts.
    ///
    /// Submission is retried once on a transient transport failure. Polling
    /// backs off geometrically from the configured initial interval up to the
    /// cap. A set `cancel` flag aborts the wait and requests best-effort
    /// provider-side cancellation.
    ///
    /// # Errors
    ///
    /// [`ProviderError`] with the provider and task id attached; see the
    /// variant docs for which conditions are retryable.
    pub async fn generate(
        &self,
        provider: Provider,
        model: &str,
        payload: serde_json::Value,
        mut cancel: Option<watch::Receiver<bool>>,
    ) -> Result<Vec<ProviderArtifact>, ProviderError> {
        let task_id = self.submit_with_retry(provider, model, &payload).await?;
        info!(%provider, model, %task_id, "provider job submitted");

        let started = tokio::time::Instant::now();
        let mut interval = self.policy.initial_interval;

        loop {
            if started.elapsed() > self.policy.timeout {
                self.cancel_best_effort(provider, &task_id).await;
                return Err(ProviderError::Timeout {
                    provider,
                    task_id,
                    timeout_secs: self.policy.timeout.as_secs(),
                });
            }

            if let Some(rx) = cancel.as_mut() {
                if *rx.borrow() {
                    self.cancel_best_effort(provider, &task_id).await;
                    return Err(ProviderError::Cancelled { provider, task_id });
                }
            }

            match self.transport.poll(provider, &task_id).await {
                Ok(PollStatus::Succeeded { outputs }) => {
                    if outputs.is_empty() {
                        return Err(ProviderError::EmptyResult { provider, task_id });
                    }
                    info!(%provider, %task_id, outputs = outputs.len(), "provider job succeeded");
                    return Ok(outputs);
                }
                Ok(PollStatus::Failed { message }) => {
                    return Err(ProviderError::Job {
                        provider,
                        task_id,
                        message,
                    });
                }
                Ok(status) => {
                    debug!(%provider, %task_id, ?status, "provider job in progress");
                }
                Err(source) => {
                    return Err(ProviderError::Poll {
                        provider,
                        task_id,
                        source: source.into(),
                    });
                }
            }

            self.sleep_or_cancel(interval, cancel.as_mut()).await;
            interval = next_interval(interval, &self.policy);
        }
    }

    /// Retrieve artifact bytes from a provider-reported URL.
    pub async fn fetch(&self, provider: Provider, url: &str) -> Result<Bytes, ProviderError> {
        self.transport
            .fetch(url)
            .await
            .map_err(|source| ProviderError::Fetch {
                provider,
                url: url.to_owned(),
                source: source.into(),
            })
    }

    async fn submit_with_retry(
        &self,
        provider: Provider,
        model: &str,
        payload: &serde_json::Value,
    ) -> Result<String, ProviderError> {
        match self.transport.submit(provider, model, payload).await {
            Ok(task_id) => Ok(task_id),
            Err(first) if first.is_transient() => {
                warn!(%provider, model, error = %first, "submission failed, retrying once");
                self.transport
                    .submit(provider, model, payload)
                    .await
                    .map_err(|source| ProviderError::Submit {
                        provider,
                        model: model.to_owned(),
                        source: source.into(),
                    })
            }
            Err(source) => Err(ProviderError::Submit {
                provider,
                model: model.to_owned(),
                source: source.into(),
            }),
        }
    }

    /// Wake early when the cancel flag flips so a cancelled request does not
    /// sit out a full capped interval.
    async fn sleep_or_cancel(&self, interval: Duration, cancel: Option<&mut watch::Receiver<bool>>) {
        match cancel {
            Some(rx) => {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = rx.changed() => {}
                }
            }
            None => tokio::time::sleep(interval).await,
        }
    }

    async fn cancel_best_effort(&self, provider: Provider, task_id: &str) {
        if let Err(error) = self.transport.cancel(provider, task_id).await {
            warn!(%provider, %task_id, %error, "provider-side cancellation failed");
        }
    }
}

fn next_interval(current: Duration, policy: &PollPolicy) -> Duration {
    current
        .mul_f64(policy.backoff_multiplier)
        .min(policy.max_interval)
}
