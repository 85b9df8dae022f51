//! Refund dispatch
//!
//! Paying a winner is an irreversible external transfer, so it always runs
//! after the settlement commit. [`RefundDispatcher`] is the seam; the shipped
//! [`TreasuryDispatcher`] pays from per-currency hot-wallet balances and
//! returns the hex ed25519 signature of the transfer as its reference.

use super::types::{Currency, WalletAddress};
use async_trait::async_trait;
use dashmap::DashMap;
use ed25519_dalek::{Signer, SigningKey};
use rand_core::OsRng;
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefundError {
    #[error("Treasury has {available} {currency}, refund needs {requested}")]
    InsufficientFunds {
        currency: String,
        available: u64,
        requested: u64,
    },

    #[error("Invalid destination wallet: {0}")]
    InvalidWallet(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Refund timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

impl RefundError {
    /// Whether the refund may be resent without an operator. A timed out
    /// send may still have landed, so it is never resent automatically.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RefundError::InvalidWallet(_) | RefundError::Timeout(_))
    }
}

#[async_trait]
pub trait RefundDispatcher: Send + Sync {
    /// Transfer `amount` to `wallet`, returning the transaction reference
    async fn send(&self, wallet: &WalletAddress, amount: u64, currency: &Currency) -> Result<String, RefundError>;
}

/// Transfer instruction as signed by the treasury key
#[derive(Debug, Serialize)]
struct TransferInstruction<'a> {
    from: String,
    to: &'a str,
    amount: u64,
    currency: &'a str,
    nonce: Uuid,
}

pub struct TreasuryDispatcher {
    signing_key: SigningKey,
    balances: DashMap<Currency, u64>,
}

impl TreasuryDispatcher {
    pub fn new(signing_key: SigningKey) -> Self {
        Self {
            signing_key,
            balances: DashMap::new(),
        }
    }

    /// Treasury with a fresh random key
    pub fn generate() -> Self {
        Self::new(SigningKey::generate(&mut OsRng))
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    pub fn fund(&self, currency: &Currency, amount: u64) {
        let mut balance = self.balances.entry(currency.clone()).or_insert(0);
        *balance = balance.saturating_add(amount);
    }

    pub fn balance(&self, currency: &Currency) -> u64 {
        self.balances.get(currency).map(|b| *b).unwrap_or(0)
    }
}

#[async_trait]
impl RefundDispatcher for TreasuryDispatcher {
    async fn send(&self, wallet: &WalletAddress, amount: u64, currency: &Currency) -> Result<String, RefundError> {
        // Addresses are validated at entry time, but records may predate a rule change
        WalletAddress::parse(wallet.as_str()).map_err(|e| RefundError::InvalidWallet(e.to_string()))?;

        let instruction = TransferInstruction {
            from: self.public_key_hex(),
            to: wallet.as_str(),
            amount,
            currency: currency.as_str(),
            nonce: Uuid::new_v4(),
        };
        let message = serde_json::to_vec(&instruction).map_err(|e| RefundError::Network(e.to_string()))?;

        {
            let mut balance = self.balances.entry(currency.clone()).or_insert(0);
            if *balance < amount {
                return Err(RefundError::InsufficientFunds {
                    currency: currency.to_string(),
                    available: *balance,
                    requested: amount,
                });
            }
            *balance -= amount;
        }

        let signature = self.signing_key.sign(&message);
        let tx_ref = hex::encode(signature.to_bytes());

        tracing::info!(
            wallet = %wallet.masked(),
            amount,
            currency = %currency,
            tx_ref = %tx_ref,
            "Refund transfer signed"
        );

        Ok(tx_ref)
    }
}
