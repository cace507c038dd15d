//! Coordinator ("organizer") clients.
//!
//! The coordinator tracks participant registration and the aggregate number
//! of jobs in flight. Generators poll it for backpressure and the block
//! turner polls it for readiness. Both only see it through
//! [`CoordinatorClient`], so a push-based signal can replace polling without
//! touching either state machine.

mod local;
mod types;

pub use local::LocalCoordinator;
pub use types::{RegisterRequest, RegisteredNodeInfo, TxsInQueuesResponse, WalletParams};

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Capability interface over the coordinator.
#[async_trait]
pub trait CoordinatorClient: Send + Sync {
    /// Every participant the coordinator knows about.
    async fn registered_nodes(&self) -> Result<Vec<RegisteredNodeInfo>, ClientError>;

    /// Announce an active participant.
    async fn register(&self, request: &RegisterRequest) -> Result<(), ClientError>;

    /// Jobs currently in flight across all participants.
    async fn txs_in_queues(&self) -> Result<u64, ClientError>;
}

/// HTTP client for the coordinator.
#[derive(Clone, Debug)]
pub struct HttpCoordinator {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCoordinator {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ClientError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[async_trait]
impl CoordinatorClient for HttpCoordinator {
    async fn registered_nodes(&self) -> Result<Vec<RegisteredNodeInfo>, ClientError> {
        let response = self
            .client
            .get(self.url("/registered-node-info"))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn register(&self, request: &RegisterRequest) -> Result<(), ClientError> {
        let response = self
            .client
            .post(self.url("/register"))
            .json(request)
            .send()
            .await?;
        let body = Self::check(response).await?.text().await?;
        debug!(id = request.params.id, response = %body, "Registered with coordinator");
        Ok(())
    }

    async fn txs_in_queues(&self) -> Result<u64, ClientError> {
        let response = self.client.get(self.url("/txs-in-queues")).send().await?;
        let parsed: TxsInQueuesResponse = Self::check(response).await?.json().await?;
        Ok(parsed.current_txs)
    }
}

/// Errors talking to the coordinator.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Coordinator returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unknown participant {0}")]
    UnknownParticipant(u32),
}
