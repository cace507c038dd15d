//! In-process coordinator used by the simulation runner and tests.

use super::{ClientError, CoordinatorClient, RegisterRequest, RegisteredNodeInfo};
use crate::queue::MemoryBroker;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Coordinator backed by local state.
///
/// Participants are announced up front with [`expect`](Self::expect) and
/// report their funding address through `register`. Pipeline depth is the
/// number of jobs the in-memory broker still holds.
pub struct LocalCoordinator {
    nodes: Mutex<BTreeMap<u32, RegisteredNodeInfo>>,
    broker: Arc<MemoryBroker>,
}

impl LocalCoordinator {
    pub fn new(broker: Arc<MemoryBroker>) -> Self {
        Self {
            nodes: Mutex::new(BTreeMap::new()),
            broker,
        }
    }

    /// Announce a participant that has not registered its address yet.
    pub fn expect(&self, id: u32) {
        self.nodes.lock().entry(id).or_default();
    }

    pub fn registered_count(&self) -> usize {
        self.nodes.lock().values().filter(|n| n.has_address()).count()
    }
}

#[async_trait]
impl CoordinatorClient for LocalCoordinator {
    async fn registered_nodes(&self) -> Result<Vec<RegisteredNodeInfo>, ClientError> {
        Ok(self.nodes.lock().values().cloned().collect())
    }

    async fn register(&self, request: &RegisterRequest) -> Result<(), ClientError> {
        let mut nodes = self.nodes.lock();
        let node = nodes
            .get_mut(&request.params.id)
            .ok_or(ClientError::UnknownParticipant(request.params.id))?;
        node.from = request.params.from.clone();
        info!(id = request.params.id, from = %node.from, "Participant registered");
        Ok(())
    }

    async fn txs_in_queues(&self) -> Result<u64, ClientError> {
        Ok(self.broker.outstanding() as u64)
    }
}
