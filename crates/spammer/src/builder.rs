//! Self-transfer construction over the spend-salt chain.

use stressnet_types::{GeneratedTx, SpendUnit, Wei, ZkAddress};

/// How the transferred amount is derived from the input value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AmountPolicy {
    /// Send half the input. The other half must cover at least the fee floor.
    #[default]
    Halve,

    /// Send everything except the fee floor.
    DeductFee,
}

/// Builds one-input transfers back to the participant's own address.
///
/// The output note is salted `left(input.salt)`, so successive transactions
/// walk down a single branch of the salt tree. Exact fee accounting happens
/// when the transaction is shielded; the builder only fixes structure, salts
/// and the transferred amount.
#[derive(Clone, Debug)]
pub struct TransferBuilder {
    recipient: ZkAddress,
    fee_per_byte: Wei,
    fee_floor: Wei,
    policy: AmountPolicy,
}

impl TransferBuilder {
    pub fn new(recipient: ZkAddress, fee_per_byte: Wei) -> Self {
        Self {
            recipient,
            fee_floor: &fee_per_byte * crate::config::ESTIMATED_TX_BYTES,
            fee_per_byte,
            policy: AmountPolicy::default(),
        }
    }

    pub fn with_fee_floor(mut self, fee_floor: Wei) -> Self {
        self.fee_floor = fee_floor;
        self
    }

    pub fn with_policy(mut self, policy: AmountPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn fee_floor(&self) -> &Wei {
        &self.fee_floor
    }

    /// Amount transferred out of an input of the given value.
    pub fn output_value(&self, input_value: &Wei) -> Result<Wei, BuildError> {
        let insufficient = || BuildError::InsufficientValue {
            value: input_value.clone(),
            fee_floor: self.fee_floor.clone(),
        };

        let output = match self.policy {
            AmountPolicy::Halve => {
                let half: Wei = input_value / 2u32;
                if input_value - &half < self.fee_floor {
                    return Err(insufficient());
                }
                half
            }
            AmountPolicy::DeductFee => {
                if *input_value <= self.fee_floor {
                    return Err(insufficient());
                }
                input_value - &self.fee_floor
            }
        };

        if output == Wei::default() {
            return Err(insufficient());
        }
        Ok(output)
    }

    /// Build the transfer spending `input`.
    pub fn build(&self, input: &SpendUnit) -> Result<GeneratedTx, BuildError> {
        let value = self.output_value(&input.value)?;
        let output = SpendUnit::new(self.recipient.clone(), input.salt.left(), value);

        Ok(GeneratedTx::new(
            vec![input.clone()],
            vec![output],
            self.fee_per_byte.clone(),
        ))
    }
}

/// Failure to build a transaction from a selected input.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Input value {value} cannot cover fee floor {fee_floor}")]
    InsufficientValue { value: Wei, fee_floor: Wei },
}
