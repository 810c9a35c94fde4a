//! HTTP implementation of the provider transport.
//!
//! Talks to the deployment's provider gateway, which exposes every upstream
//! vendor behind one job-style REST surface:
//!
//! ```text
//! POST {base}/v1/jobs/{provider}/{model}   -> { "id": "..." }
//! GET  {base}/v1/jobs/{provider}/{id}      -> { "status": "...", ... }
//! POST {base}/v1/jobs/{provider}/{id}/cancel
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use tracing::debug;

use super::{PollStatus, ProviderArtifact, ProviderTransport, TransportError};
use crate::registry::Provider;

pub struct HttpProviderTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct SubmitResponse {
    id: String,
}

#[derive(Deserialize)]
struct JobResponse {
    status: String,
    #[serde(default)]
    outputs: Vec<JobOutput>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JobOutput {
    Url { url: String },
    Inline { b64: String },
}

impl HttpProviderTransport {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client,
            base_url,
            api_key: api_key.into(),
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Http {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl ProviderTransport for HttpProviderTransport {
    async fn submit(
        &self,
        provider: Provider,
        model: &str,
        payload: &serde_json::Value,
    ) -> Result<String, TransportError> {
        let url = format!("{}/v1/jobs/{provider}/{model}", self.base_url);
        debug!(%provider, model, "submitting provider job");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.into()))?;
        let parsed: SubmitResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| TransportError::Protocol {
                message: format!("invalid submit response: {e}"),
            })?;
        Ok(parsed.id)
    }

    async fn poll(&self, provider: Provider, task_id: &str) -> Result<PollStatus, TransportError> {
        let url = format!("{}/v1/jobs/{provider}/{task_id}", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.into()))?;
        let job: JobResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| TransportError::Protocol {
                message: format!("invalid job response: {e}"),
            })?;

        match job.status.as_str() {
            "pending" | "queued" | "starting" => Ok(PollStatus::Pending),
            "running" | "processing" => Ok(PollStatus::Running),
            "succeeded" => {
                let mut outputs = Vec::with_capacity(job.outputs.len());
                for output in job.outputs {
                    outputs.push(match output {
                        JobOutput::Url { url } => ProviderArtifact::Url(url),
                        JobOutput::Inline { b64 } => {
                            use base64::Engine as _;
                            let bytes = base64::engine::general_purpose::STANDARD
                                .decode(b64)
                                .map_err(|e| TransportError::Protocol {
                                    message: format!("invalid inline artifact: {e}"),
                                })?;
                            ProviderArtifact::Inline(Bytes::from(bytes))
                        }
                    });
                }
                Ok(PollStatus::Succeeded { outputs })
            }
            "failed" | "canceled" | "cancelled" => Ok(PollStatus::Failed {
                message: job.error.unwrap_or_else(|| "no failure detail".to_owned()),
            }),
            other => Err(TransportError::Protocol {
                message: format!("unknown job status '{other}'"),
            }),
        }
    }

    async fn cancel(&self, provider: Provider, task_id: &str) -> Result<(), TransportError> {
        let url = format!("{}/v1/jobs/{provider}/{task_id}/cancel", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.into()))?;
        Self::check(response).await.map(|_| ())
    }

    async fn fetch(&self, url: &str) -> Result<Bytes, TransportError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.into()))?;
        Self::check(response)
            .await?
            .bytes()
            .await
            .map_err(|e| TransportError::Network(e.into()))
    }
}

impl std::fmt::Debug for HttpProviderTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The API key stays out of debug output.
        f.debug_struct("HttpProviderTransport")
            .field("base_url", &self.base_url)
            .finish()
    }
}
