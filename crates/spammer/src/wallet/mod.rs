//! Chain-facing collaborators.
//!
//! Proof generation, key management and note discovery live outside this
//! crate. Generators and the block turner reach them through
//! [`Layer2Wallet`], and the turner observes block proposals through
//! [`ProposalSource`].

mod http;

pub use http::HttpWallet;

use async_trait::async_trait;
use futures::stream::BoxStream;
use stressnet_types::{
    ChainEvent, GeneratedTx, Salt, SpendUnit, SubmitResponse, UtxoStatus, Wei, ZkAddress,
    ZkPayload,
};

/// Stream of `NewProposal` events.
pub type ProposalStream = BoxStream<'static, ChainEvent>;

/// Recipient and salt of the note a deposit creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositNote {
    pub recipient: ZkAddress,
    pub salt: Salt,
}

/// A proof-capable wallet bound to one layer-2 account.
#[async_trait]
pub trait Layer2Wallet: Send + Sync {
    /// Shielded address of the bound account.
    fn zk_address(&self) -> &ZkAddress;

    /// Layer-1 address that funds deposits.
    fn eth_address(&self) -> &str;

    /// Deposit ether from layer 1. A refused deposit is an error.
    async fn deposit_ether(
        &self,
        value: &Wei,
        fee: &Wei,
        note: Option<DepositNote>,
    ) -> Result<(), ChainError>;

    /// Deposits merged into the staging pool and not yet committed.
    ///
    /// Zero means every staged deposit, ours included, has been committed.
    async fn staged_deposits_merged(&self) -> Result<u64, ChainError>;

    /// Notes of the bound account with the given status.
    async fn get_utxos(&self, status: UtxoStatus) -> Result<Vec<SpendUnit>, ChainError>;

    /// Produce the proof payload for a transaction.
    async fn shield_tx(&self, tx: &GeneratedTx) -> Result<ZkPayload, ChainError>;

    /// Submit a shielded transaction. Rejections come back as a non-success response.
    async fn send_layer2_tx(&self, payload: &ZkPayload) -> Result<SubmitResponse, ChainError>;
}

/// Source of block-proposal events.
#[async_trait]
pub trait ProposalSource: Send + Sync {
    /// Subscribe to proposals landing in layer-1 block `from_block` or later.
    async fn subscribe(&self, from_block: u64) -> Result<ProposalStream, ChainError>;
}

/// Errors from chain-facing collaborators.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Wallet gateway returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Transaction refused: {0}")]
    Refused(String),

    #[error("Shielding failed: {0}")]
    Shield(String),

    #[error("Malformed payload: {0}")]
    Decode(String),
}
