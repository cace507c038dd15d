//! Wallet bound to one account on the simulated chain.

use super::SimulatedChain;
use crate::wallet::{ChainError, DepositNote, Layer2Wallet};
use async_trait::async_trait;
use std::sync::Arc;
use stressnet_types::{
    GeneratedTx, SpendUnit, SubmitResponse, UtxoStatus, Wei, ZkAddress, ZkPayload,
};

/// Simulated proof wallet.
///
/// Shielding serializes the transaction as its "proof"; the chain decodes
/// it again on submission.
#[derive(Clone)]
pub struct SimWallet {
    chain: Arc<SimulatedChain>,
    zk_address: ZkAddress,
    eth_address: String,
}

impl SimWallet {
    pub(crate) fn new(chain: Arc<SimulatedChain>, name: &str) -> Self {
        let digest = blake3::hash(name.as_bytes());
        Self {
            chain,
            zk_address: ZkAddress::new(format!("zk1{}", name)),
            eth_address: format!("0x{}", &digest.to_hex()[..40]),
        }
    }
}

#[async_trait]
impl Layer2Wallet for SimWallet {
    fn zk_address(&self) -> &ZkAddress {
        &self.zk_address
    }

    fn eth_address(&self) -> &str {
        &self.eth_address
    }

    async fn deposit_ether(
        &self,
        value: &Wei,
        _fee: &Wei,
        note: Option<DepositNote>,
    ) -> Result<(), ChainError> {
        if *value == Wei::default() {
            return Err(ChainError::Refused("zero-value deposit".to_string()));
        }
        self.chain.stage_deposit(&self.zk_address, value, note);
        Ok(())
    }

    async fn staged_deposits_merged(&self) -> Result<u64, ChainError> {
        Ok(self.chain.staged_count())
    }

    async fn get_utxos(&self, status: UtxoStatus) -> Result<Vec<SpendUnit>, ChainError> {
        Ok(self.chain.notes(&self.zk_address, status))
    }

    async fn shield_tx(&self, tx: &GeneratedTx) -> Result<ZkPayload, ChainError> {
        let delay = self.chain.config().prove_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        serde_json::to_vec(tx)
            .map(ZkPayload)
            .map_err(|e| ChainError::Shield(e.to_string()))
    }

    async fn send_layer2_tx(&self, payload: &ZkPayload) -> Result<SubmitResponse, ChainError> {
        self.chain.submit(payload)
    }
}
