//! Chain events observed by the block-turner watchdog.

use serde::{Deserialize, Serialize};

/// A `NewProposal` event emitted when a layer-2 block is proposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEvent {
    pub proposal_num: u64,
    pub block_hash: String,
    /// Layer-1 block the proposal landed in.
    pub block_number: u64,
}
