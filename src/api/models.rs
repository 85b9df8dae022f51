//! API Request and Response Models
//!
//! Request bodies arrive as raw serde structs and are converted with
//! `TryFrom` into the typed requests the coordinator accepts.

use crate::{
    errors::WagerError,
    wager::{
        coordinator::{CreateEntryRequest, InitPoolRequest},
        types::{Currency, Entry, RecentWin, SettleState, WalletAddress},
    },
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OddsRequestBody {
    pub stake: u64,
    pub premium: u64,
    pub risk_level: i64,
    #[serde(default)]
    pub currency: Option<String>,
}

/// Validated odds request
#[derive(Debug, Clone)]
pub struct OddsRequest {
    pub stake: u64,
    pub premium: u64,
    pub risk_level: i64,
    pub currency: Option<Currency>,
}

impl TryFrom<OddsRequestBody> for OddsRequest {
    type Error = WagerError;

    fn try_from(body: OddsRequestBody) -> Result<Self, Self::Error> {
        if body.stake == 0 {
            return Err(WagerError::Validation("stake must be positive".to_string()));
        }
        let currency = body.currency.as_deref().map(Currency::parse).transpose()?;
        Ok(Self {
            stake: body.stake,
            premium: body.premium,
            risk_level: body.risk_level,
            currency,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateEntryBody {
    pub invoice_id: String,
    pub client_wallet: String,
    pub premium: u64,
    pub risk_level: i64,
    #[serde(default)]
    pub payment_tx_ref: Option<String>,
}

impl TryFrom<CreateEntryBody> for CreateEntryRequest {
    type Error = WagerError;

    fn try_from(body: CreateEntryBody) -> Result<Self, Self::Error> {
        let invoice_id = body.invoice_id.trim().to_string();
        if invoice_id.is_empty() {
            return Err(WagerError::Validation("invoice_id is required".to_string()));
        }
        if body.premium == 0 {
            return Err(WagerError::Validation("premium must be a positive integer".to_string()));
        }

        Ok(Self {
            invoice_id,
            client_wallet: WalletAddress::parse(&body.client_wallet)?,
            premium: body.premium,
            risk_level: body.risk_level,
            payment_tx_ref: body
                .payment_tx_ref
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty()),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitPoolBody {
    pub currency: String,
    #[serde(default)]
    pub house_edge_bps: Option<u16>,
    #[serde(default)]
    pub min_reserve_bps: Option<u16>,
    #[serde(default)]
    pub max_win_pct_bps: Option<u16>,
    #[serde(default)]
    pub initial_seed: u64,
}

impl TryFrom<InitPoolBody> for InitPoolRequest {
    type Error = WagerError;

    fn try_from(body: InitPoolBody) -> Result<Self, Self::Error> {
        Ok(Self {
            currency: Currency::parse(&body.currency)?,
            house_edge_bps: body.house_edge_bps,
            min_reserve_bps: body.min_reserve_bps,
            max_win_pct_bps: body.max_win_pct_bps,
            initial_seed: body.initial_seed,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedPoolBody {
    pub amount: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PausePoolBody {
    pub paused: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecentWinsQuery {
    pub limit: Option<usize>,
}

/// Entry with its caller-facing settlement state
#[derive(Debug, Clone, Serialize)]
pub struct EntryResponse {
    #[serde(flatten)]
    pub entry: Entry,
    pub state: SettleState,
    pub potential_refund: u64,
}

impl From<Entry> for EntryResponse {
    fn from(entry: Entry) -> Self {
        Self {
            state: SettleState::of(&entry),
            potential_refund: entry.stake_amount.saturating_add(entry.premium_paid),
            entry,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentWinsResponse {
    pub wins: Vec<RecentWin>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_entry_body_validation() {
        let body = CreateEntryBody {
            invoice_id: " inv-1 ".to_string(),
            client_wallet: "So11111111111111111111111111111111111111112".to_string(),
            premium: 10,
            risk_level: 20,
            payment_tx_ref: Some("  ".to_string()),
        };
        let request = CreateEntryRequest::try_from(body.clone()).unwrap();
        assert_eq!(request.invoice_id, "inv-1");
        assert_eq!(request.payment_tx_ref, None);

        let bad_wallet = CreateEntryBody {
            client_wallet: "0xabc".to_string(),
            ..body.clone()
        };
        assert!(matches!(
            CreateEntryRequest::try_from(bad_wallet),
            Err(WagerError::Validation(_))
        ));

        let zero_premium = CreateEntryBody { premium: 0, ..body };
        assert!(CreateEntryRequest::try_from(zero_premium).is_err());
    }

    #[test]
    fn test_odds_body_currency_parsed() {
        let body = OddsRequestBody {
            stake: 100,
            premium: 20,
            risk_level: 20,
            currency: Some("usdc".to_string()),
        };
        let request = OddsRequest::try_from(body).unwrap();
        assert_eq!(request.currency.unwrap().as_str(), "USDC");
    }
}
