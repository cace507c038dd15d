//! Wire types for the coordinator ("organizer") HTTP API.

use serde::{Deserialize, Serialize};
use stressnet_types::Wei;

/// Entry of `GET /registered-node-info`.
///
/// `from` stays empty until the participant has registered its funding address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredNodeInfo {
    #[serde(default)]
    pub from: String,
}

impl RegisteredNodeInfo {
    pub fn has_address(&self) -> bool {
        !self.from.is_empty()
    }
}

/// Body of `POST /register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub role: String,
    pub params: WalletParams,
}

impl RegisterRequest {
    /// Registration announcing an active wallet participant.
    pub fn wallet(id: u32, from: impl Into<String>, wei_per_byte: &Wei) -> Self {
        Self {
            role: "wallet".to_string(),
            params: WalletParams {
                id,
                from: from.into(),
                wei_per_byte: wei_per_byte.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletParams {
    pub id: u32,
    pub from: String,
    pub wei_per_byte: String,
}

/// Response from `GET /txs-in-queues`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxsInQueuesResponse {
    pub current_txs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use stressnet_types::gwei;

    #[test]
    fn test_register_body_shape() {
        let body = RegisterRequest::wallet(4, "0xabc", &gwei(4_000));
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "role": "wallet",
                "params": { "id": 4, "from": "0xabc", "weiPerByte": "4000000000000" }
            })
        );
    }

    #[test]
    fn test_parse_queue_depth_and_nodes() {
        let depth: TxsInQueuesResponse = serde_json::from_str(r#"{"currentTxs": 17}"#).unwrap();
        assert_eq!(depth.current_txs, 17);

        let nodes: Vec<RegisteredNodeInfo> =
            serde_json::from_str(r#"[{"from":"0x1","id":1},{"id":2}]"#).unwrap();
        assert!(nodes[0].has_address());
        assert!(!nodes[1].has_address());
    }
}
