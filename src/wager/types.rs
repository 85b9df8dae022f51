//! Core wager records: pools, entries, and the reports built from them

use crate::errors::{WagerError, WagerResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub const BPS_DIVISOR: u64 = 10_000;
/// Win probability never exceeds 50%
pub const MAX_WIN_PROBABILITY_BPS: u16 = 5_000;
pub const MAX_HOUSE_EDGE_BPS: u16 = 1_000;
pub const MAX_RESERVE_BPS: u16 = 5_000;
pub const MAX_WIN_PCT_BPS: u16 = 1_000;

/// Ticker of a settlement currency, stored upper-case
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    pub fn parse(raw: &str) -> WagerResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.len() > 10 {
            return Err(WagerError::Validation(format!(
                "currency must be 1-10 characters, got '{}'",
                raw
            )));
        }
        if !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(WagerError::Validation(format!(
                "currency must be alphanumeric, got '{}'",
                raw
            )));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Base58 encoded 32-byte public key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletAddress(String);

impl WalletAddress {
    pub fn parse(raw: &str) -> WagerResult<Self> {
        let raw = raw.trim();
        let bytes = bs58::decode(raw)
            .into_vec()
            .map_err(|e| WagerError::Validation(format!("invalid wallet address: {}", e)))?;
        if bytes.len() != 32 {
            return Err(WagerError::Validation(format!(
                "invalid wallet address: expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First and last four characters, for public feeds
    pub fn masked(&self) -> String {
        mask_wallet(&self.0)
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn mask_wallet(wallet: &str) -> String {
    let chars: Vec<char> = wallet.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolParams {
    pub house_edge_bps: u16,
    pub min_reserve_bps: u16,
    pub max_win_pct_bps: u16,
}

impl PoolParams {
    pub fn validate(&self) -> WagerResult<()> {
        if self.house_edge_bps > MAX_HOUSE_EDGE_BPS {
            return Err(WagerError::Validation(format!(
                "house_edge_bps {} exceeds {}",
                self.house_edge_bps, MAX_HOUSE_EDGE_BPS
            )));
        }
        if self.min_reserve_bps > MAX_RESERVE_BPS {
            return Err(WagerError::Validation(format!(
                "min_reserve_bps {} exceeds {}",
                self.min_reserve_bps, MAX_RESERVE_BPS
            )));
        }
        if self.max_win_pct_bps > MAX_WIN_PCT_BPS {
            return Err(WagerError::Validation(format!(
                "max_win_pct_bps {} exceeds {}",
                self.max_win_pct_bps, MAX_WIN_PCT_BPS
            )));
        }
        Ok(())
    }
}

impl From<&crate::config::PoolDefaults> for PoolParams {
    fn from(defaults: &crate::config::PoolDefaults) -> Self {
        Self {
            house_edge_bps: defaults.house_edge_bps,
            min_reserve_bps: defaults.min_reserve_bps,
            max_win_pct_bps: defaults.max_win_pct_bps,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolStatus {
    Active,
    Paused,
}

/// Per-currency liquidity pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub currency: Currency,
    pub balance: u64,
    pub premiums_collected: u64,
    pub payouts: u64,
    pub entry_count: u64,
    pub win_count: u64,
    pub params: PoolParams,
    pub status: PoolStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Pool {
    pub fn new(currency: Currency, params: PoolParams, now: DateTime<Utc>) -> Self {
        Self {
            currency,
            balance: 0,
            premiums_collected: 0,
            payouts: 0,
            entry_count: 0,
            win_count: 0,
            params,
            status: PoolStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolSnapshot {
    Seeded(Pool),
    /// No pool has been created for the currency yet
    Unseeded { currency: Currency },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    PendingSettlement,
    Won,
    Lost,
    /// Won, but the refund has not been confirmed yet
    RefundFailed,
}

impl EntryStatus {
    pub fn can_transition_to(self, next: EntryStatus) -> bool {
        use EntryStatus::*;
        match (self, next) {
            (PendingSettlement, Won) | (PendingSettlement, Lost) => true,
            (Won, RefundFailed) => true,
            (RefundFailed, Won) => true,
            (PendingSettlement, _) | (Won, _) | (Lost, _) | (RefundFailed, _) => false,
        }
    }

    pub fn is_pending(self) -> bool {
        matches!(self, EntryStatus::PendingSettlement)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeReason {
    /// The draw decided the outcome
    Draw,
    /// Provisional win exceeded the pool's payout ceiling
    SolvencyOverride,
    /// Provisional win failed the guarded debit at commit
    DebitGuard,
}

/// One wager attempt against one invoice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: Uuid,
    pub invoice_id: String,
    pub client_wallet: WalletAddress,
    pub currency: Currency,
    pub stake_amount: u64,
    pub premium_paid: u64,
    pub win_probability_bps: u16,
    pub status: EntryStatus,
    pub won: Option<bool>,
    pub outcome_reason: Option<OutcomeReason>,
    pub random_result: Option<String>,
    pub payment_tx_ref: Option<String>,
    pub refund_tx_ref: Option<String>,
    pub refund_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Entry {
    pub fn refund_amount(&self) -> WagerResult<u64> {
        self.stake_amount
            .checked_add(self.premium_paid)
            .ok_or(WagerError::Overflow("refund amount"))
    }

    pub fn transition(&mut self, next: EntryStatus) -> WagerResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(WagerError::Conflict(format!(
                "entry {} cannot move from {:?} to {:?}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Reference written to the invoice when settlement marks it paid
    pub fn invoice_payment_ref(&self) -> String {
        match &self.payment_tx_ref {
            Some(tx_ref) => tx_ref.clone(),
            None => format!("wager-entry:{}", self.id),
        }
    }
}

/// Caller-facing settlement state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettleState {
    Pending,
    Won,
    Lost,
    WonRefundPending,
}

impl SettleState {
    pub fn of(entry: &Entry) -> Self {
        match entry.status {
            EntryStatus::PendingSettlement => SettleState::Pending,
            EntryStatus::Lost => SettleState::Lost,
            EntryStatus::RefundFailed => SettleState::WonRefundPending,
            EntryStatus::Won if entry.refund_tx_ref.is_some() => SettleState::Won,
            EntryStatus::Won => SettleState::WonRefundPending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementReport {
    pub entry_id: Uuid,
    pub state: SettleState,
    pub status: EntryStatus,
    pub won: Option<bool>,
    pub outcome_reason: Option<OutcomeReason>,
    pub refund_amount: u64,
    pub refund_tx_ref: Option<String>,
    pub refund_error: Option<String>,
    pub random_result: Option<String>,
    pub already_settled: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl SettlementReport {
    pub fn from_entry(entry: &Entry, already_settled: bool) -> WagerResult<Self> {
        Ok(Self {
            entry_id: entry.id,
            state: SettleState::of(entry),
            status: entry.status,
            won: entry.won,
            outcome_reason: entry.outcome_reason,
            refund_amount: entry.refund_amount()?,
            refund_tx_ref: entry.refund_tx_ref.clone(),
            refund_error: entry.refund_error.clone(),
            random_result: entry.random_result.clone(),
            already_settled,
            resolved_at: entry.resolved_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OddsQuote {
    pub stake: u64,
    pub premium: u64,
    pub risk_level: i64,
    pub win_probability_bps: u16,
    pub total_payment: u64,
    pub potential_refund: u64,
    pub house_edge_bps: u16,
    pub max_single_win: Option<u64>,
    pub pool_available: bool,
}

/// Pool view with derived solvency figures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolOverview {
    pub currency: Currency,
    pub seeded: bool,
    pub status: Option<PoolStatus>,
    pub balance: u64,
    pub premiums_collected: u64,
    pub payouts: u64,
    pub entry_count: u64,
    pub win_count: u64,
    pub params: PoolParams,
    pub reserve_required: u64,
    pub available_for_payout: u64,
    pub max_single_win: u64,
    pub activation_threshold: u64,
    /// Progress toward the activation threshold, capped at 10000
    pub activation_progress_bps: u16,
    pub available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentWin {
    pub entry_id: Uuid,
    pub wallet: String,
    pub amount: u64,
    pub currency: Currency,
    pub won_at: DateTime<Utc>,
}
