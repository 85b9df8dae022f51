//! Settlement coordinator
//!
//! Owns the wager lifecycle: quoting, entry creation, settlement, and the
//! admin pool operations. All store work is synchronous RocksDB and runs on
//! the blocking pool; refund dispatch is the only async step and always runs
//! after the settlement commit.
//!
//! Row locks are always taken in the order entry, pool, invoice, active
//! marker, refund intent. Entry creation skips the first (its entry is new).

use super::{
    ledger::{DebitOutcome, PoolLedger},
    odds,
    outbox::{DispatchResult, RefundOutbox, RefundPolicy},
    randomness::RandomnessSource,
    rate_limit::{RateDecision, RateLimiter},
    refund::RefundDispatcher,
    registry::EntryRegistry,
    solvency::SolvencyLimits,
    types::{
        Currency, Entry, EntryStatus, OddsQuote, OutcomeReason, Pool, PoolOverview, PoolParams,
        PoolSnapshot, PoolStatus, RecentWin, SettlementReport, WalletAddress, BPS_DIVISOR,
    },
};
use crate::{
    config::WagerConfig,
    errors::{WagerError, WagerResult},
    invoices::{InvoiceStatus, InvoiceStore},
    metrics::WagerMetrics,
    storage::WagerStorage,
};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

pub const DEFAULT_RECENT_WINS: usize = 10;
pub const MAX_RECENT_WINS: usize = 50;

/// Pluggable collaborators of the coordinator
pub struct Collaborators {
    pub invoices: Arc<dyn InvoiceStore>,
    pub randomness: Arc<dyn RandomnessSource>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub dispatcher: Arc<dyn RefundDispatcher>,
}

#[derive(Debug, Clone, Copy)]
struct EntryRules {
    activation_threshold: u64,
    min_invoice_age: chrono::Duration,
    require_payable_at_entry: bool,
}

#[derive(Debug, Clone)]
pub struct CreateEntryRequest {
    pub invoice_id: String,
    pub client_wallet: WalletAddress,
    pub premium: u64,
    pub risk_level: i64,
    pub payment_tx_ref: Option<String>,
}

/// Pool creation; unset parameters fall back to the configured defaults
#[derive(Debug, Clone)]
pub struct InitPoolRequest {
    pub currency: Currency,
    pub house_edge_bps: Option<u16>,
    pub min_reserve_bps: Option<u16>,
    pub max_win_pct_bps: Option<u16>,
    pub initial_seed: u64,
}

/// Decision taken before the commit; the commit may still downgrade a win
struct Provisional {
    won: bool,
    reason: OutcomeReason,
    audit: String,
}

#[derive(Clone)]
pub struct SettlementCoordinator {
    storage: WagerStorage,
    ledger: PoolLedger,
    registry: EntryRegistry,
    invoices: Arc<dyn InvoiceStore>,
    randomness: Arc<dyn RandomnessSource>,
    rate_limiter: Arc<dyn RateLimiter>,
    outbox: Arc<RefundOutbox>,
    metrics: Arc<WagerMetrics>,
    rules: EntryRules,
}

impl SettlementCoordinator {
    pub fn new(
        storage: WagerStorage,
        config: &WagerConfig,
        collaborators: Collaborators,
        metrics: Arc<WagerMetrics>,
    ) -> Self {
        let outbox = RefundOutbox::new(
            storage.clone(),
            collaborators.dispatcher,
            RefundPolicy::from(&config.refunds),
            metrics.clone(),
        );

        Self {
            ledger: PoolLedger::new(storage.clone(), PoolParams::from(&config.pool)),
            registry: EntryRegistry::new(storage.clone()),
            storage,
            invoices: collaborators.invoices,
            randomness: collaborators.randomness,
            rate_limiter: collaborators.rate_limiter,
            outbox: Arc::new(outbox),
            metrics,
            rules: EntryRules {
                activation_threshold: config.pool.activation_threshold,
                min_invoice_age: chrono::Duration::seconds(
                    config.entries.min_invoice_age_secs.min(u32::MAX as u64) as i64,
                ),
                require_payable_at_entry: config.entries.require_payable_at_entry,
            },
        }
    }

    pub fn outbox(&self) -> Arc<RefundOutbox> {
        self.outbox.clone()
    }

    pub fn ledger(&self) -> &PoolLedger {
        &self.ledger
    }

    fn is_available(&self, pool: &Pool) -> bool {
        pool.status == PoolStatus::Active && pool.balance >= self.rules.activation_threshold
    }

    // ----- queries -----

    pub async fn calculate_odds(
        &self,
        stake: u64,
        premium: u64,
        risk_level: i64,
        currency: Option<Currency>,
    ) -> WagerResult<OddsQuote> {
        let pool = match currency {
            Some(currency) => {
                let this = self.clone();
                match tokio::task::spawn_blocking(move || this.ledger.snapshot(&currency)).await?? {
                    PoolSnapshot::Seeded(pool) => Some(pool),
                    PoolSnapshot::Unseeded { .. } => None,
                }
            }
            None => None,
        };
        let available = pool.as_ref().map(|p| self.is_available(p)).unwrap_or(false);
        odds::calculate_odds(stake, premium, risk_level, self.ledger.defaults(), pool.as_ref(), available)
    }

    pub async fn pool_overview(&self, currency: Currency) -> WagerResult<PoolOverview> {
        let this = self.clone();
        let snapshot = tokio::task::spawn_blocking(move || this.ledger.snapshot(&currency)).await??;
        Ok(self.overview(snapshot))
    }

    fn overview(&self, snapshot: PoolSnapshot) -> PoolOverview {
        let threshold = self.rules.activation_threshold;
        match snapshot {
            PoolSnapshot::Seeded(pool) => {
                let limits = SolvencyLimits::compute(pool.balance, &pool.params);
                let available = self.is_available(&pool);
                PoolOverview {
                    activation_progress_bps: activation_progress(pool.balance, threshold),
                    currency: pool.currency,
                    seeded: true,
                    status: Some(pool.status),
                    balance: pool.balance,
                    premiums_collected: pool.premiums_collected,
                    payouts: pool.payouts,
                    entry_count: pool.entry_count,
                    win_count: pool.win_count,
                    params: pool.params,
                    reserve_required: limits.reserve_required,
                    available_for_payout: limits.available_for_payout,
                    max_single_win: limits.max_single_win,
                    activation_threshold: threshold,
                    available,
                }
            }
            PoolSnapshot::Unseeded { currency } => PoolOverview {
                currency,
                seeded: false,
                status: None,
                balance: 0,
                premiums_collected: 0,
                payouts: 0,
                entry_count: 0,
                win_count: 0,
                params: *self.ledger.defaults(),
                reserve_required: 0,
                available_for_payout: 0,
                max_single_win: 0,
                activation_threshold: threshold,
                activation_progress_bps: activation_progress(0, threshold),
                available: false,
            },
        }
    }

    pub async fn entry(&self, entry_id: Uuid) -> WagerResult<Entry> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.registry.get(&entry_id))
            .await??
            .ok_or_else(|| WagerError::not_found("entry", entry_id.to_string()))
    }

    pub async fn recent_wins(&self, limit: Option<usize>) -> WagerResult<Vec<RecentWin>> {
        let limit = limit.unwrap_or(DEFAULT_RECENT_WINS).clamp(1, MAX_RECENT_WINS);
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.registry.recent_wins(limit)).await?
    }

    // ----- entry creation -----

    pub async fn create_entry(&self, request: CreateEntryRequest) -> WagerResult<Entry> {
        let this = self.clone();
        let entry = tokio::task::spawn_blocking(move || this.create_entry_blocking(request)).await??;

        self.metrics
            .entries_created
            .with_label_values(&[entry.currency.as_str()])
            .inc();
        tracing::info!(
            entry_id = %entry.id,
            invoice_id = %entry.invoice_id,
            currency = %entry.currency,
            stake = entry.stake_amount,
            premium = entry.premium_paid,
            win_probability_bps = entry.win_probability_bps,
            "Wager entry created"
        );
        Ok(entry)
    }

    fn create_entry_blocking(&self, request: CreateEntryRequest) -> WagerResult<Entry> {
        if request.premium == 0 {
            return Err(WagerError::Validation("premium must be a positive integer".to_string()));
        }

        let invoice = self
            .invoices
            .get_by_id(&request.invoice_id)?
            .ok_or_else(|| WagerError::not_found("invoice", request.invoice_id.clone()))?;
        if invoice.status != InvoiceStatus::Pending {
            return Err(WagerError::Conflict(format!(
                "invoice {} is not pending",
                invoice.id
            )));
        }
        if invoice.amount == 0 {
            return Err(WagerError::Validation(format!("invoice {} has no amount", invoice.id)));
        }
        let now = Utc::now();
        if now.signed_duration_since(invoice.created_at) < self.rules.min_invoice_age {
            return Err(WagerError::Conflict(format!(
                "invoice {} is too new to wager on",
                invoice.id
            )));
        }

        if let RateDecision::Throttled { retry_after } = self.rate_limiter.check(request.client_wallet.as_str()) {
            self.metrics.throttled.inc();
            tracing::warn!(
                wallet = %request.client_wallet.masked(),
                retry_after_secs = retry_after.as_secs(),
                "Entry creation throttled"
            );
            return Err(WagerError::Throttled { retry_after });
        }

        if let Some(existing) = self.registry.active_entry(&invoice.id)? {
            return Err(WagerError::Conflict(format!(
                "invoice {} already has pending entry {}",
                invoice.id, existing
            )));
        }

        let entry = Entry {
            id: Uuid::new_v4(),
            invoice_id: invoice.id.clone(),
            client_wallet: request.client_wallet,
            currency: invoice.currency.clone(),
            stake_amount: invoice.amount,
            premium_paid: request.premium,
            win_probability_bps: odds::win_probability_bps(request.risk_level),
            status: EntryStatus::PendingSettlement,
            won: None,
            outcome_reason: None,
            random_result: None,
            payment_tx_ref: request.payment_tx_ref,
            refund_tx_ref: None,
            refund_error: None,
            created_at: now,
            resolved_at: None,
        };
        let refund_amount = entry.refund_amount()?;

        let txn = self.storage.transaction();

        // pool
        match self.ledger.lock_in(&txn, &entry.currency)? {
            Some(pool) if pool.status == PoolStatus::Paused => {
                return Err(WagerError::PoolPaused {
                    currency: entry.currency.to_string(),
                });
            }
            Some(pool) if !self.is_available(&pool) => {
                return Err(WagerError::PoolUnavailable {
                    currency: entry.currency.to_string(),
                    reason: format!(
                        "balance {} below activation threshold {}",
                        pool.balance, self.rules.activation_threshold
                    ),
                });
            }
            Some(pool) => {
                if self.rules.require_payable_at_entry
                    && !SolvencyLimits::compute(pool.balance, &pool.params).allows(refund_amount)
                {
                    return Err(WagerError::Conflict(format!(
                        "potential refund {} exceeds the pool's max single win",
                        refund_amount
                    )));
                }
            }
            None if self.rules.activation_threshold == 0 && !self.rules.require_payable_at_entry => {}
            None => {
                return Err(WagerError::PoolUnavailable {
                    currency: entry.currency.to_string(),
                    reason: "pool has not been seeded".to_string(),
                });
            }
        }

        // invoice, re-checked under lock
        let locked = self
            .invoices
            .lock_in(&txn, &entry.invoice_id)?
            .ok_or_else(|| WagerError::not_found("invoice", entry.invoice_id.clone()))?;
        if locked.status != InvoiceStatus::Pending {
            return Err(WagerError::Conflict(format!(
                "invoice {} is not pending",
                locked.id
            )));
        }

        self.ledger.credit_in(&txn, &entry.currency, entry.premium_paid)?;
        self.registry.insert_in(&txn, &entry)?;
        txn.commit().map_err(WagerError::from)?;

        Ok(entry)
    }

    // ----- settlement -----

    /// Settle an entry exactly once. Repeat calls return the recorded outcome.
    pub async fn settle(&self, entry_id: Uuid) -> WagerResult<SettlementReport> {
        let this = self.clone();
        let (entry, already_settled) = tokio::task::spawn_blocking(move || this.settle_blocking(entry_id)).await??;

        if already_settled {
            return SettlementReport::from_entry(&entry, true);
        }

        let outcome = if entry.won == Some(true) { "won" } else { "lost" };
        self.metrics.record_settlement(outcome);
        tracing::info!(
            entry_id = %entry.id,
            invoice_id = %entry.invoice_id,
            outcome,
            reason = ?entry.outcome_reason,
            "Wager settled"
        );

        if entry.won != Some(true) {
            return SettlementReport::from_entry(&entry, false);
        }

        // runs detached so a dropped request cannot abandon a claimed intent;
        // failures are recorded on the entry and the retry worker picks them up
        let outbox = self.outbox.clone();
        let entry_id = entry.id;
        match tokio::spawn(async move { outbox.dispatch(entry_id, false).await }).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!(entry_id = %entry_id, "Inline refund dispatch errored: {}", e),
            Err(e) => tracing::error!(entry_id = %entry_id, "Inline refund dispatch task failed: {}", e),
        }

        let latest = self.entry(entry.id).await?;
        SettlementReport::from_entry(&latest, false)
    }

    fn settle_blocking(&self, entry_id: Uuid) -> WagerResult<(Entry, bool)> {
        let entry = self
            .registry
            .get(&entry_id)?
            .ok_or_else(|| WagerError::not_found("entry", entry_id.to_string()))?;
        if !entry.status.is_pending() {
            return Ok((entry, true));
        }

        let provisional = self.decide(&entry)?;
        let refund_amount = entry.refund_amount()?;

        let txn = self.storage.transaction();

        // entry: the compare-and-swap on PendingSettlement
        let mut entry = self
            .registry
            .lock_in(&txn, &entry_id)?
            .ok_or_else(|| WagerError::not_found("entry", entry_id.to_string()))?;
        if !entry.status.is_pending() {
            return Ok((entry, true));
        }

        let (mut won, mut reason) = (provisional.won, provisional.reason);

        // pool
        if won {
            match self.ledger.lock_in(&txn, &entry.currency)? {
                Some(pool) if !SolvencyLimits::compute(pool.balance, &pool.params).allows(refund_amount) => {
                    won = false;
                    reason = OutcomeReason::SolvencyOverride;
                }
                Some(pool) => {
                    if let DebitOutcome::InsufficientBalance { balance, requested } =
                        self.ledger.apply_debit_in(&txn, pool, refund_amount)?
                    {
                        tracing::warn!(entry_id = %entry_id, balance, requested, "Debit guard rejected payout");
                        won = false;
                        reason = OutcomeReason::DebitGuard;
                    }
                }
                None => {
                    won = false;
                    reason = OutcomeReason::DebitGuard;
                }
            }
        }

        // invoice
        let payment_ref = entry.invoice_payment_ref();
        if !self.invoices.mark_paid_in(&txn, &entry.invoice_id, &payment_ref)? {
            tracing::warn!(invoice_id = %entry.invoice_id, "Invoice was already paid at settlement");
        }

        // active marker
        self.registry.clear_active_in(&txn, &entry.invoice_id, &entry.id)?;

        let now = Utc::now();
        entry.transition(if won { EntryStatus::Won } else { EntryStatus::Lost })?;
        entry.won = Some(won);
        entry.outcome_reason = Some(reason);
        entry.random_result = Some(provisional.audit);
        entry.resolved_at = Some(now);
        self.registry.put_in(&txn, &entry)?;

        if won {
            self.outbox.enqueue_in(&txn, &entry, refund_amount, now)?;
            self.registry.record_win_in(&txn, &entry, refund_amount, now)?;
        }

        txn.commit().map_err(WagerError::from)?;

        let override_label = match reason {
            OutcomeReason::Draw => None,
            OutcomeReason::SolvencyOverride => Some("solvency_override"),
            OutcomeReason::DebitGuard => Some("debit_guard"),
        };
        if let Some(label) = override_label {
            self.metrics.solvency_overrides.with_label_values(&[label]).inc();
        }

        Ok((entry, false))
    }

    /// Draw and apply the governor against the current, unlocked pool
    fn decide(&self, entry: &Entry) -> WagerResult<Provisional> {
        let draw = self.randomness.draw(&entry.id)?;
        let provisional_win = u32::from(draw.value) < u32::from(entry.win_probability_bps);

        if !provisional_win {
            return Ok(Provisional {
                won: false,
                reason: OutcomeReason::Draw,
                audit: draw.audit,
            });
        }

        let payable = match self.ledger.snapshot(&entry.currency)? {
            PoolSnapshot::Seeded(pool) => {
                SolvencyLimits::compute(pool.balance, &pool.params).allows(entry.refund_amount()?)
            }
            PoolSnapshot::Unseeded { .. } => false,
        };

        if payable {
            Ok(Provisional {
                won: true,
                reason: OutcomeReason::Draw,
                audit: draw.audit,
            })
        } else {
            tracing::info!(entry_id = %entry.id, "Provisional win exceeds pool payout ceiling");
            Ok(Provisional {
                won: false,
                reason: OutcomeReason::SolvencyOverride,
                audit: draw.audit,
            })
        }
    }

    // ----- refunds -----

    /// Operator-triggered refund retry, ignoring backoff and exhaustion
    pub async fn retry_refund(&self, entry_id: Uuid) -> WagerResult<SettlementReport> {
        let outbox = self.outbox.clone();
        tokio::task::spawn_blocking(move || outbox.ensure_intent(&entry_id)).await??;

        if let DispatchResult::Skipped = self.outbox.dispatch(entry_id, true).await? {
            return Err(WagerError::Conflict(format!(
                "refund for entry {} is already in flight",
                entry_id
            )));
        }

        let entry = self.entry(entry_id).await?;
        SettlementReport::from_entry(&entry, true)
    }

    // ----- pool administration -----

    pub async fn init_pool(&self, request: InitPoolRequest) -> WagerResult<PoolOverview> {
        let defaults = *self.ledger.defaults();
        let params = PoolParams {
            house_edge_bps: request.house_edge_bps.unwrap_or(defaults.house_edge_bps),
            min_reserve_bps: request.min_reserve_bps.unwrap_or(defaults.min_reserve_bps),
            max_win_pct_bps: request.max_win_pct_bps.unwrap_or(defaults.max_win_pct_bps),
        };
        let this = self.clone();
        let currency = request.currency.clone();
        let pool =
            tokio::task::spawn_blocking(move || this.ledger.init(&currency, params, request.initial_seed)).await??;

        tracing::info!(
            currency = %pool.currency,
            balance = pool.balance,
            house_edge_bps = pool.params.house_edge_bps,
            min_reserve_bps = pool.params.min_reserve_bps,
            max_win_pct_bps = pool.params.max_win_pct_bps,
            "Pool created"
        );
        Ok(self.overview(PoolSnapshot::Seeded(pool)))
    }

    pub async fn seed_pool(&self, currency: Currency, amount: u64) -> WagerResult<PoolOverview> {
        let this = self.clone();
        let pool = tokio::task::spawn_blocking(move || this.ledger.seed(&currency, amount)).await??;

        tracing::info!(currency = %pool.currency, amount, balance = pool.balance, "Pool seeded");
        Ok(self.overview(PoolSnapshot::Seeded(pool)))
    }

    pub async fn set_paused(&self, currency: Currency, paused: bool) -> WagerResult<PoolOverview> {
        let status = if paused { PoolStatus::Paused } else { PoolStatus::Active };
        let this = self.clone();
        let pool = tokio::task::spawn_blocking(move || this.ledger.set_status(&currency, status)).await??;

        tracing::info!(currency = %pool.currency, status = ?pool.status, "Pool status changed");
        Ok(self.overview(PoolSnapshot::Seeded(pool)))
    }
}

fn activation_progress(balance: u64, threshold: u64) -> u16 {
    if threshold == 0 {
        return BPS_DIVISOR as u16;
    }
    let progress = balance as u128 * BPS_DIVISOR as u128 / threshold as u128;
    progress.min(BPS_DIVISOR as u128) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activation_progress() {
        assert_eq!(activation_progress(0, 0), 10_000);
        assert_eq!(activation_progress(250, 1_000), 2_500);
        assert_eq!(activation_progress(5_000, 1_000), 10_000);
        assert_eq!(activation_progress(u64::MAX, 3), 10_000);
    }
}
