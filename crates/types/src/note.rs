//! Spend notes (UTXOs) owned by layer-2 accounts.

use crate::{Salt, Wei};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use std::fmt;

/// Shielded layer-2 address of an account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZkAddress(pub String);

impl ZkAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ZkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a note as seen by the wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UtxoStatus {
    #[default]
    Unspent,
    Pending,
    Spent,
}

impl UtxoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UtxoStatus::Unspent => "unspent",
            UtxoStatus::Pending => "pending",
            UtxoStatus::Spent => "spent",
        }
    }
}

impl fmt::Display for UtxoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An unspent value note.
///
/// Produced by deposits and by earlier generated transactions; consumed
/// exactly once as a transaction input.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendUnit {
    pub owner: ZkAddress,
    pub salt: Salt,
    #[serde_as(as = "DisplayFromStr")]
    pub value: Wei,
    #[serde(default)]
    pub status: UtxoStatus,
}

impl SpendUnit {
    pub fn new(owner: ZkAddress, salt: Salt, value: Wei) -> Self {
        Self {
            owner,
            salt,
            value,
            status: UtxoStatus::Unspent,
        }
    }

    pub fn with_status(mut self, status: UtxoStatus) -> Self {
        self.status = status;
        self
    }

    /// Commitment-style hash over owner, salt and value.
    ///
    /// Status is excluded: a note keeps its hash as it moves from unspent to spent.
    pub fn note_hash(&self) -> NoteHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.owner.as_str().as_bytes());
        hasher.update(&[0u8]);
        hasher.update(&self.salt.to_bytes_be());
        hasher.update(&[0u8]);
        hasher.update(&self.value.to_bytes_be());
        NoteHash(*hasher.finalize().as_bytes())
    }
}

/// 32-byte blake3 note hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NoteHash([u8; 32]);

impl NoteHash {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for NoteHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

impl fmt::Debug for NoteHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NoteHash({})", self)
    }
}
