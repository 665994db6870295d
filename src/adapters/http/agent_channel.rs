//! HTTP implementation of the AgentChannel.
//!
//! Tasks are POSTed to the agent gateway at `/agents/{id}/tasks`. Transient
//! failures (connection errors, 5xx) are retried with exponential backoff
//! inside a bounded window; anything still failing is surfaced to the
//! dispatcher, which reverts the assignment and retries next tick.

use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use reqwest::StatusCode;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::TaskEnvelope;
use crate::domain::ports::AgentChannel;

#[derive(Clone)]
pub struct HttpAgentChannel {
    client: reqwest::Client,
    base_url: String,
    max_retry_elapsed: Duration,
}

impl HttpAgentChannel {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> DomainResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| DomainError::Transport(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            max_retry_elapsed: Duration::from_secs(10),
        })
    }

    pub fn with_max_retry_elapsed(mut self, window: Duration) -> Self {
        self.max_retry_elapsed = window;
        self
    }

    fn task_url(&self, agent_id: &str) -> String {
        format!("{}/agents/{}/tasks", self.base_url.trim_end_matches('/'), agent_id)
    }
}

#[async_trait]
impl AgentChannel for HttpAgentChannel {
    async fn send_task(&self, agent_id: &str, envelope: &TaskEnvelope) -> DomainResult<()> {
        let url = self.task_url(agent_id);
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(200))
            .with_max_elapsed_time(Some(self.max_retry_elapsed))
            .build();

        backoff::future::retry(policy, || async {
            let response = self
                .client
                .post(&url)
                .json(envelope)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(DomainError::Transport(e.to_string())))?;

            match response.status() {
                status if status.is_success() => Ok(()),
                status if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS => {
                    Err(backoff::Error::transient(DomainError::Transport(format!(
                        "agent {agent_id} returned {status}"
                    ))))
                }
                status => Err(backoff::Error::permanent(DomainError::Transport(format!(
                    "agent {agent_id} rejected task: {status}"
                )))),
            }
        })
        .await
    }
}
