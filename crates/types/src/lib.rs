//! Core data types for the stressnet load harness.
//!
//! Everything in this crate is plain data: spend notes and their salts,
//! generated and shielded transactions, and the chain events the watchdog
//! observes. No I/O happens here.

mod amount;
mod event;
mod note;
mod salt;
mod tx;

pub use amount::{ether, gwei, milliether, wei, Wei};
pub use event::ChainEvent;
pub use note::{NoteHash, SpendUnit, UtxoStatus, ZkAddress};
pub use salt::{Salt, SaltParseError};
pub use tx::{GeneratedTx, ShieldedJob, SubmitResponse, ZkPayload};
