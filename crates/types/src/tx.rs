//! Generated transactions and the jobs that carry them to the network.

use crate::{Salt, SpendUnit, Wei};
use serde::{Deserialize, Serialize};
use serde_with::{hex::Hex, serde_as, DisplayFromStr};

/// A self-transfer built from one selected input.
///
/// Immutable once built.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedTx {
    inflow: Vec<SpendUnit>,
    outflow: Vec<SpendUnit>,
    #[serde_as(as = "DisplayFromStr")]
    fee_per_byte: Wei,
}

impl GeneratedTx {
    pub fn new(inflow: Vec<SpendUnit>, outflow: Vec<SpendUnit>, fee_per_byte: Wei) -> Self {
        Self {
            inflow,
            outflow,
            fee_per_byte,
        }
    }

    pub fn inflow(&self) -> &[SpendUnit] {
        &self.inflow
    }

    pub fn outflow(&self) -> &[SpendUnit] {
        &self.outflow
    }

    pub fn fee_per_byte(&self) -> &Wei {
        &self.fee_per_byte
    }

    /// Salts of every input, in order.
    pub fn input_salts(&self) -> Vec<Salt> {
        self.inflow.iter().map(|n| n.salt.clone()).collect()
    }

    /// Value consumed by the transaction beyond what it re-outputs.
    pub fn implied_fee(&self) -> Wei {
        let spent: Wei = self.inflow.iter().map(|n| &n.value).sum();
        let created: Wei = self.outflow.iter().map(|n| &n.value).sum();
        if spent > created {
            spent - created
        } else {
            Wei::default()
        }
    }
}

/// Opaque proof payload produced by shielding a transaction.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZkPayload(#[serde_as(as = "Hex")] pub Vec<u8>);

impl ZkPayload {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Unit of work placed on the submission queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShieldedJob {
    pub tx: GeneratedTx,
    pub zk_tx: ZkPayload,
}

impl ShieldedJob {
    pub fn new(tx: GeneratedTx, zk_tx: ZkPayload) -> Self {
        Self { tx, zk_tx }
    }

    /// Salt of the first input; used to label the job in logs.
    pub fn lead_salt(&self) -> Option<&Salt> {
        self.tx.inflow().first().map(|n| &n.salt)
    }
}

/// Network response to a layer-2 transaction submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub status: u16,
    #[serde(default)]
    pub text: String,
}

impl SubmitResponse {
    pub fn accepted() -> Self {
        Self {
            status: 200,
            text: String::new(),
        }
    }

    pub fn rejected(status: u16, text: impl Into<String>) -> Self {
        Self {
            status,
            text: text.into(),
        }
    }

    /// Check if the submission was successful.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{wei, ZkAddress};

    fn unit(salt: u64, value: u64) -> SpendUnit {
        SpendUnit::new(ZkAddress::new("zk1carol"), Salt::from(salt), wei(value))
    }

    #[test]
    fn test_implied_fee() {
        let tx = GeneratedTx::new(vec![unit(1, 100)], vec![unit(2, 50)], wei(1));
        assert_eq!(tx.implied_fee(), wei(50));
        assert_eq!(tx.input_salts(), vec![Salt::from(1)]);
    }

    #[test]
    fn test_payload_hex_encoding() {
        let payload = ZkPayload(vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(serde_json::to_string(&payload).unwrap(), "\"deadbeef\"");
    }

    #[test]
    fn test_submit_response_success_range() {
        assert!(SubmitResponse::accepted().is_success());
        assert!(!SubmitResponse::rejected(400, "double spend").is_success());
        assert!(!SubmitResponse::rejected(500, "").is_success());
    }
}
