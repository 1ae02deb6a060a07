//! On-chain contract capability.
//!
//! The engine treats conditional-token operations as a blind capability: a
//! trait with mint/merge/approval/balance calls, fulfilled by whatever
//! transport the operator wires in. Without a configured signer the
//! [`DisabledContractClient`] is installed, which fails every mutating call
//! with `SigningUnavailable` while leaving the rest of the pipeline running.

use async_trait::async_trait;
use sha3::{Digest, Keccak256};

use crate::errors::{EngineError, EngineResult};

#[derive(Debug, Clone, Default)]
pub struct ContractResult {
    pub success: bool,
    pub tx_hash: Option<String>,
    pub error: Option<String>,
}

impl ContractResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            tx_hash: None,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait ContractClient: Send + Sync {
    async fn mint_tokens(
        &self,
        condition_id: &str,
        amount: f64,
        outcome_count: usize,
    ) -> ContractResult;

    async fn merge_tokens(
        &self,
        condition_id: &str,
        amount: f64,
        outcome_count: usize,
    ) -> ContractResult;

    async fn ensure_usdc_approval(&self, amount: f64) -> EngineResult<()>;

    async fn get_usdc_balance(&self) -> EngineResult<f64>;

    async fn get_token_balance(&self, position_id: &str) -> EngineResult<f64>;

    /// Whether mutating calls can succeed at all (signer present).
    fn is_enabled(&self) -> bool;
}

/// Installed when `PRIVATE_KEY` is absent.
pub struct DisabledContractClient;

#[async_trait]
impl ContractClient for DisabledContractClient {
    async fn mint_tokens(&self, _: &str, _: f64, _: usize) -> ContractResult {
        ContractResult::failure(EngineError::SigningUnavailable.to_string())
    }

    async fn merge_tokens(&self, _: &str, _: f64, _: usize) -> ContractResult {
        ContractResult::failure(EngineError::SigningUnavailable.to_string())
    }

    async fn ensure_usdc_approval(&self, _: f64) -> EngineResult<()> {
        Err(EngineError::SigningUnavailable)
    }

    async fn get_usdc_balance(&self) -> EngineResult<f64> {
        Err(EngineError::SigningUnavailable)
    }

    async fn get_token_balance(&self, _: &str) -> EngineResult<f64> {
        Err(EngineError::SigningUnavailable)
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Outcome-slot partition for an `n`-outcome condition: `[1, 2, 4, ...]`.
pub fn partition(outcome_count: usize) -> Vec<u64> {
    (0..outcome_count).map(|i| 1u64 << i).collect()
}

fn keccak(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Hex string (optionally 0x-prefixed) to left-padded 32 bytes.
fn to_bytes32(hex_str: &str) -> [u8; 32] {
    let clean = hex_str.trim_start_matches("0x");
    let mut out = [0u8; 32];
    if let Ok(bytes) = hex::decode(clean) {
        let take = bytes.len().min(32);
        out[32 - take..].copy_from_slice(&bytes[bytes.len() - take..]);
    }
    out
}

fn u64_to_u256_be(value: u64) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[24..].copy_from_slice(&value.to_be_bytes());
    out
}

/// `keccak256(conditionId ‖ indexSet)`, 0x-prefixed.
pub fn collection_id(condition_id: &str, index_set: u64) -> String {
    let digest = keccak(&[&to_bytes32(condition_id), &u64_to_u256_be(index_set)]);
    format!("0x{}", hex::encode(digest))
}

/// `keccak256(collateral ‖ collectionId ‖ outcomeIndex)`, 0x-prefixed.
pub fn position_id(collateral_address: &str, collection_id: &str, outcome_index: u64) -> String {
    let collateral = {
        let clean = collateral_address.trim_start_matches("0x");
        hex::decode(clean).unwrap_or_default()
    };
    let digest = keccak(&[
        &collateral,
        &to_bytes32(collection_id),
        &u64_to_u256_be(outcome_index),
    ]);
    format!("0x{}", hex::encode(digest))
}
