//! Adapter for a JSON wallet gateway.
//!
//! The gateway fronts a proof-capable wallet bound to one account:
//!
//! | Call | Method | Body / query | Response |
//! |---|---|---|---|
//! | `/account` | GET | | `{zkAddress, ethAddress}` |
//! | `/deposit` | POST | `{value, fee, to?, salt?}` | `{accepted}` |
//! | `/staged-deposits` | GET | | `{merged}` |
//! | `/utxos` | GET | `?status=unspent` | `[SpendUnit]` |
//! | `/shield` | POST | `GeneratedTx` | hex payload |
//! | `/layer2/tx` | POST | hex payload | passthrough status and text |
//! | `/proposals` | GET | `?from_block=N` | `[ChainEvent]` |

use super::{ChainError, DepositNote, Layer2Wallet, ProposalSource, ProposalStream};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use stressnet_types::{
    ChainEvent, GeneratedTx, Salt, SpendUnit, SubmitResponse, UtxoStatus, Wei, ZkAddress,
    ZkPayload,
};
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    zk_address: ZkAddress,
    eth_address: String,
}

#[derive(Debug, Serialize)]
struct DepositRequest {
    value: String,
    fee: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    to: Option<ZkAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    salt: Option<Salt>,
}

#[derive(Debug, Deserialize)]
struct DepositResponse {
    accepted: bool,
}

#[derive(Debug, Deserialize)]
struct StagedDepositsResponse {
    merged: u64,
}

/// Wallet and proposal source reached over HTTP.
#[derive(Clone, Debug)]
pub struct HttpWallet {
    client: reqwest::Client,
    base_url: String,
    zk_address: ZkAddress,
    eth_address: String,
    proposal_poll: Duration,
}

impl HttpWallet {
    /// Connect to a gateway and learn which account it is bound to.
    pub async fn connect(base_url: impl Into<String>) -> Result<Self, ChainError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let response = client.get(format!("{}/account", base_url)).send().await?;
        let account: AccountResponse = check(response).await?.json().await?;
        debug!(zk_address = %account.zk_address, eth_address = %account.eth_address, "Wallet gateway connected");

        Ok(Self {
            client,
            base_url,
            zk_address: account.zk_address,
            eth_address: account.eth_address,
            proposal_poll: Duration::from_secs(2),
        })
    }

    /// Set how often the proposal stream polls the gateway.
    pub fn with_proposal_poll(mut self, interval: Duration) -> Self {
        self.proposal_poll = interval;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, ChainError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(ChainError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Layer2Wallet for HttpWallet {
    fn zk_address(&self) -> &ZkAddress {
        &self.zk_address
    }

    fn eth_address(&self) -> &str {
        &self.eth_address
    }

    async fn deposit_ether(
        &self,
        value: &Wei,
        fee: &Wei,
        note: Option<DepositNote>,
    ) -> Result<(), ChainError> {
        let (to, salt) = match note {
            Some(note) => (Some(note.recipient), Some(note.salt)),
            None => (None, None),
        };
        let request = DepositRequest {
            value: value.to_string(),
            fee: fee.to_string(),
            to,
            salt,
        };
        let response = self
            .client
            .post(self.url("/deposit"))
            .json(&request)
            .send()
            .await?;
        let parsed: DepositResponse = check(response).await?.json().await?;
        if parsed.accepted {
            Ok(())
        } else {
            Err(ChainError::Refused("deposit transaction failed".to_string()))
        }
    }

    async fn staged_deposits_merged(&self) -> Result<u64, ChainError> {
        let response = self
            .client
            .get(self.url("/staged-deposits"))
            .send()
            .await?;
        let parsed: StagedDepositsResponse = check(response).await?.json().await?;
        Ok(parsed.merged)
    }

    async fn get_utxos(&self, status: UtxoStatus) -> Result<Vec<SpendUnit>, ChainError> {
        let response = self
            .client
            .get(self.url("/utxos"))
            .query(&[("status", status.as_str())])
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn shield_tx(&self, tx: &GeneratedTx) -> Result<ZkPayload, ChainError> {
        let response = self
            .client
            .post(self.url("/shield"))
            .json(tx)
            .send()
            .await?;
        match check(response).await {
            Ok(ok) => Ok(ok.json().await?),
            Err(ChainError::Status { body, .. }) => Err(ChainError::Shield(body)),
            Err(e) => Err(e),
        }
    }

    async fn send_layer2_tx(&self, payload: &ZkPayload) -> Result<SubmitResponse, ChainError> {
        let response = self
            .client
            .post(self.url("/layer2/tx"))
            .json(payload)
            .send()
            .await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        Ok(SubmitResponse { status, text })
    }
}

struct PollState {
    wallet: HttpWallet,
    from_block: u64,
    buffered: VecDeque<ChainEvent>,
    first: bool,
}

#[async_trait]
impl ProposalSource for HttpWallet {
    async fn subscribe(&self, from_block: u64) -> Result<ProposalStream, ChainError> {
        let state = PollState {
            wallet: self.clone(),
            from_block,
            buffered: VecDeque::new(),
            first: true,
        };

        let stream = stream::unfold(state, |mut state| async move {
            loop {
                if let Some(event) = state.buffered.pop_front() {
                    return Some((event, state));
                }
                if !state.first {
                    tokio::time::sleep(state.wallet.proposal_poll).await;
                }
                state.first = false;

                match state.wallet.fetch_proposals(state.from_block).await {
                    Ok(events) => {
                        if let Some(max) = events.iter().map(|e| e.block_number).max() {
                            state.from_block = max + 1;
                        }
                        state.buffered.extend(events);
                    }
                    Err(e) => warn!(error = %e, "Failed to poll proposals"),
                }
            }
        });

        Ok(stream.boxed())
    }
}

impl HttpWallet {
    async fn fetch_proposals(&self, from_block: u64) -> Result<Vec<ChainEvent>, ChainError> {
        let response = self
            .client
            .get(self.url("/proposals"))
            .query(&[("from_block", from_block)])
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::collections::HashMap;
    use stressnet_types::wei;

    async fn gateway() -> HttpWallet {
        let app = Router::new()
            .route(
                "/account",
                get(|| async {
                    Json(serde_json::json!({ "zkAddress": "zk1ivy", "ethAddress": "0xivy" }))
                }),
            )
            .route(
                "/deposit",
                post(|Json(body): Json<serde_json::Value>| async move {
                    let accepted = body["value"] != "0";
                    Json(serde_json::json!({ "accepted": accepted }))
                }),
            )
            .route(
                "/staged-deposits",
                get(|| async { Json(serde_json::json!({ "merged": 0 })) }),
            )
            .route(
                "/utxos",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    assert_eq!(q.get("status").map(String::as_str), Some("unspent"));
                    Json(serde_json::json!([
                        { "owner": "zk1ivy", "salt": "1", "value": "1000" }
                    ]))
                }),
            )
            .route(
                "/shield",
                post(|| async { (StatusCode::UNPROCESSABLE_ENTITY, "bad witness") }),
            )
            .route(
                "/layer2/tx",
                post(|| async { (StatusCode::BAD_REQUEST, "double spend") }),
            )
            .route(
                "/proposals",
                get(|Query(q): Query<HashMap<String, u64>>| async move {
                    let from = q.get("from_block").copied().unwrap_or(0);
                    let events: Vec<_> = (from..3)
                        .map(|n| ChainEvent {
                            proposal_num: n,
                            block_hash: format!("0x{:02x}", n),
                            block_number: n,
                        })
                        .collect();
                    Json(events)
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        HttpWallet::connect(format!("http://{}", addr))
            .await
            .unwrap()
            .with_proposal_poll(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_wallet_gateway_calls() {
        let wallet = gateway().await;
        assert_eq!(wallet.zk_address(), &ZkAddress::new("zk1ivy"));
        assert_eq!(wallet.eth_address(), "0xivy");

        wallet.deposit_ether(&wei(5), &wei(1), None).await.unwrap();
        assert!(matches!(
            wallet.deposit_ether(&wei(0), &wei(1), None).await,
            Err(ChainError::Refused(_))
        ));
        assert_eq!(wallet.staged_deposits_merged().await.unwrap(), 0);

        let notes = wallet.get_utxos(UtxoStatus::Unspent).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].value, wei(1_000));

        let tx = GeneratedTx::new(notes.clone(), vec![], wei(1));
        assert!(matches!(
            wallet.shield_tx(&tx).await,
            Err(ChainError::Shield(msg)) if msg == "bad witness"
        ));

        let response = wallet.send_layer2_tx(&ZkPayload(vec![1, 2])).await.unwrap();
        assert_eq!(response.status, 400);
        assert_eq!(response.text, "double spend");
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn test_proposal_stream_does_not_repeat_events() {
        let wallet = gateway().await;
        let mut stream = wallet.subscribe(1).await.unwrap();

        let first = stream.next().await.unwrap();
        let second = stream.next().await.unwrap();
        assert_eq!(first.block_number, 1);
        assert_eq!(second.block_number, 2);

        let more = tokio::time::timeout(Duration::from_millis(100), stream.next()).await;
        assert!(more.is_err(), "no new proposals should be yielded");
    }
}
