//! Refund outbox
//!
//! A winning settlement writes a [`RefundIntent`] in the same transaction that
//! records the win. Dispatch happens afterwards: a caller claims the intent by
//! taking a time-limited lease on it, sends the refund, and then either clears
//! the intent (confirmed) or reschedules it with exponential backoff. Intents
//! that run out of attempts stay in place, marked exhausted, until an operator
//! forces another try. So do intents whose outcome is unknown: a send that
//! timed out, or a lease that expired before any result was recorded.

use super::{
    refund::{RefundDispatcher, RefundError},
    registry::{refund_intent_key, EntryRegistry, REFUND_INTENT_PREFIX},
    types::{Currency, Entry, EntryStatus, WalletAddress},
};
use crate::{
    config::RefundConfig,
    errors::{StorageError, WagerError, WagerResult},
    metrics::WagerMetrics,
    storage::{get_for_update_json, put_json, WagerStorage, WagerTxn},
};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::Notify;
use uuid::Uuid;

const RETRY_CONCURRENCY: usize = 4;
const SCAN_LIMIT: usize = 512;
const RECORD_ATTEMPTS: u32 = 6;
const RECORD_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundIntent {
    pub entry_id: Uuid,
    pub wallet: WalletAddress,
    pub amount: u64,
    pub currency: Currency,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub lease_until: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub exhausted: bool,
    pub created_at: DateTime<Utc>,
}

impl RefundIntent {
    fn claimable(&self, now: DateTime<Utc>, force: bool) -> bool {
        match self.lease_until {
            Some(until) if until > now => false,
            // lease ran out before a result was recorded: the send may have landed
            Some(_) => force,
            None => force || (!self.exhausted && self.next_attempt_at <= now),
        }
    }

    /// Claimed earlier, but neither success nor failure was ever recorded
    pub fn is_in_doubt(&self, now: DateTime<Utc>) -> bool {
        self.lease_until.map(|until| until <= now).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RefundPolicy {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub lease: Duration,
}

impl RefundPolicy {
    /// Delay before attempt `attempts + 1`
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(20);
        self.base_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

impl From<&RefundConfig> for RefundPolicy {
    fn from(config: &RefundConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            max_attempts: config.max_attempts,
            base_backoff: Duration::from_secs(config.base_backoff_secs),
            max_backoff: Duration::from_secs(config.max_backoff_secs),
            lease: Duration::from_secs(config.lease_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    Sent { tx_ref: String },
    Failed { error: RefundError, exhausted: bool },
    /// Missing, leased by someone else, or not yet due
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetrySummary {
    pub sent: usize,
    pub failed: usize,
    pub exhausted: usize,
    pub skipped: usize,
}

#[derive(Clone)]
pub struct RefundOutbox {
    storage: WagerStorage,
    registry: EntryRegistry,
    dispatcher: Arc<dyn RefundDispatcher>,
    policy: RefundPolicy,
    metrics: Arc<WagerMetrics>,
}

impl RefundOutbox {
    pub fn new(
        storage: WagerStorage,
        dispatcher: Arc<dyn RefundDispatcher>,
        policy: RefundPolicy,
        metrics: Arc<WagerMetrics>,
    ) -> Self {
        Self {
            registry: EntryRegistry::new(storage.clone()),
            storage,
            dispatcher,
            policy,
            metrics,
        }
    }

    /// Stage a refund for `entry` inside the settlement transaction
    pub fn enqueue_in(&self, txn: &WagerTxn<'_>, entry: &Entry, amount: u64, now: DateTime<Utc>) -> WagerResult<()> {
        let intent = RefundIntent {
            entry_id: entry.id,
            wallet: entry.client_wallet.clone(),
            amount,
            currency: entry.currency.clone(),
            attempts: 0,
            next_attempt_at: now,
            lease_until: None,
            last_error: None,
            exhausted: false,
            created_at: now,
        };
        put_json(txn, &refund_intent_key(&entry.id), &intent)
    }

    pub fn intent(&self, entry_id: &Uuid) -> WagerResult<Option<RefundIntent>> {
        self.storage.get_json(&refund_intent_key(entry_id))
    }

    /// Recreate a lost intent for a won entry whose refund was never confirmed
    pub fn ensure_intent(&self, entry_id: &Uuid) -> WagerResult<RefundIntent> {
        let txn = self.storage.transaction();
        let entry = self
            .registry
            .lock_in(&txn, entry_id)?
            .ok_or_else(|| WagerError::not_found("entry", entry_id.to_string()))?;

        let refundable = matches!(entry.status, EntryStatus::Won | EntryStatus::RefundFailed)
            && entry.refund_tx_ref.is_none();
        if !refundable {
            return Err(WagerError::Conflict(format!(
                "entry {} has no outstanding refund",
                entry_id
            )));
        }

        let key = refund_intent_key(entry_id);
        if let Some(intent) = get_for_update_json::<RefundIntent>(&txn, &key)? {
            return Ok(intent);
        }

        let now = Utc::now();
        self.enqueue_in(&txn, &entry, entry.refund_amount()?, now)?;
        txn.commit().map_err(WagerError::from)?;

        tracing::warn!(entry_id = %entry_id, "Recreated missing refund intent");
        self.intent(entry_id)?
            .ok_or_else(|| WagerError::Internal(format!("intent for {} vanished", entry_id)))
    }

    /// Take the lease on an intent if it is claimable
    fn claim(&self, entry_id: &Uuid, force: bool) -> WagerResult<Option<RefundIntent>> {
        let txn = self.storage.transaction();
        let key = refund_intent_key(entry_id);
        let Some(mut intent) = get_for_update_json::<RefundIntent>(&txn, &key)? else {
            return Ok(None);
        };

        let now = Utc::now();
        if !intent.claimable(now, force) {
            return Ok(None);
        }

        intent.attempts = intent.attempts.saturating_add(1);
        intent.lease_until = Some(now + chrono_duration(self.policy.lease));
        put_json(&txn, &key, &intent)?;
        txn.commit().map_err(WagerError::from)?;

        Ok(Some(intent))
    }

    fn record_success(&self, intent: &RefundIntent, tx_ref: &str) -> WagerResult<()> {
        let txn = self.storage.transaction();
        let mut entry = self
            .registry
            .lock_in(&txn, &intent.entry_id)?
            .ok_or_else(|| WagerError::not_found("entry", intent.entry_id.to_string()))?;

        if entry.status == EntryStatus::RefundFailed {
            entry.transition(EntryStatus::Won)?;
        }
        entry.refund_tx_ref = Some(tx_ref.to_string());
        entry.refund_error = None;
        self.registry.put_in(&txn, &entry)?;

        let key = refund_intent_key(&intent.entry_id);
        get_for_update_json::<RefundIntent>(&txn, &key)?;
        txn.delete(&key).map_err(WagerError::from)?;
        txn.commit().map_err(WagerError::from)
    }

    fn record_failure(&self, intent: &RefundIntent, error: &RefundError) -> WagerResult<bool> {
        let txn = self.storage.transaction();
        let mut entry = self
            .registry
            .lock_in(&txn, &intent.entry_id)?
            .ok_or_else(|| WagerError::not_found("entry", intent.entry_id.to_string()))?;

        if entry.status == EntryStatus::Won {
            entry.transition(EntryStatus::RefundFailed)?;
        }
        entry.refund_error = Some(error.to_string());
        self.registry.put_in(&txn, &entry)?;

        let key = refund_intent_key(&intent.entry_id);
        let mut stored = get_for_update_json::<RefundIntent>(&txn, &key)?.unwrap_or_else(|| intent.clone());
        let now = Utc::now();
        stored.attempts = intent.attempts;
        stored.lease_until = None;
        stored.last_error = Some(error.to_string());
        stored.next_attempt_at = now + chrono_duration(self.policy.backoff(intent.attempts));
        stored.exhausted = intent.attempts >= self.policy.max_attempts || !error.is_retryable();
        put_json(&txn, &key, &stored)?;
        txn.commit().map_err(WagerError::from)?;

        Ok(stored.exhausted)
    }

    /// Claim and send one refund. `force` ignores backoff and exhaustion, never a live lease.
    pub async fn dispatch(&self, entry_id: Uuid, force: bool) -> WagerResult<DispatchResult> {
        let this = self.clone();
        let claimed = tokio::task::spawn_blocking(move || this.claim(&entry_id, force)).await??;
        let Some(intent) = claimed else {
            return Ok(DispatchResult::Skipped);
        };

        let sent = match tokio::time::timeout(
            self.policy.timeout,
            self.dispatcher.send(&intent.wallet, intent.amount, &intent.currency),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RefundError::Timeout(self.policy.timeout)),
        };

        match sent {
            Ok(tx_ref) => {
                self.record_success_with_retry(&intent, &tx_ref).await?;
                self.metrics.record_refund("sent");
                tracing::info!(entry_id = %entry_id, tx_ref = %tx_ref, "Refund confirmed");
                Ok(DispatchResult::Sent { tx_ref })
            }
            Err(error) => {
                let this = self.clone();
                let failed = error.clone();
                let attempts = intent.attempts;
                let exhausted =
                    tokio::task::spawn_blocking(move || this.record_failure(&intent, &failed)).await??;
                self.metrics
                    .record_refund(if exhausted { "exhausted" } else { "failed" });
                tracing::warn!(
                    entry_id = %entry_id,
                    attempts,
                    exhausted,
                    error = %error,
                    "Refund dispatch failed"
                );
                Ok(DispatchResult::Failed { error, exhausted })
            }
        }
    }

    /// The transfer already happened, so a contended entry row is waited out
    /// rather than surfaced. If recording still fails the lease is left to
    /// expire and the intent needs a forced retry.
    async fn record_success_with_retry(&self, intent: &RefundIntent, tx_ref: &str) -> WagerResult<()> {
        let mut delay = RECORD_BACKOFF;
        let mut attempt = 1;
        loop {
            let this = self.clone();
            let claimed = intent.clone();
            let recorded = tx_ref.to_string();
            match tokio::task::spawn_blocking(move || this.record_success(&claimed, &recorded)).await? {
                Ok(()) => return Ok(()),
                Err(WagerError::Contention(reason)) if attempt < RECORD_ATTEMPTS => {
                    tracing::warn!(
                        entry_id = %intent.entry_id,
                        attempt,
                        "Recording sent refund hit contention, retrying: {}",
                        reason
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        entry_id = %intent.entry_id,
                        tx_ref = %tx_ref,
                        "Refund sent but not recorded; intent needs a forced retry after review: {}",
                        e
                    );
                    self.metrics.record_refund("unrecorded");
                    return Err(e);
                }
            }
        }
    }

    /// Intent ids eligible right now, oldest key order
    fn due_intents(&self, include_exhausted: bool) -> WagerResult<Vec<Uuid>> {
        let now = Utc::now();
        let mut due = Vec::new();
        for (_, value) in self.storage.scan_prefix(REFUND_INTENT_PREFIX, SCAN_LIMIT)? {
            let intent: RefundIntent = serde_json::from_slice(&value)
                .map_err(|e| StorageError::CorruptedData(format!("Failed to decode refund intent: {}", e)))?;
            if intent.claimable(now, include_exhausted) {
                due.push(intent.entry_id);
            }
        }
        Ok(due)
    }

    /// One pass over the outbox
    pub async fn run_due(&self, include_exhausted: bool) -> WagerResult<RetrySummary> {
        let this = self.clone();
        let due = tokio::task::spawn_blocking(move || this.due_intents(include_exhausted)).await??;

        let results: Vec<WagerResult<DispatchResult>> = stream::iter(due)
            .map(|entry_id| self.dispatch(entry_id, include_exhausted))
            .buffer_unordered(RETRY_CONCURRENCY)
            .collect()
            .await;

        let mut summary = RetrySummary::default();
        for result in results {
            match result {
                Ok(DispatchResult::Sent { .. }) => summary.sent += 1,
                Ok(DispatchResult::Failed { exhausted: true, .. }) => summary.exhausted += 1,
                Ok(DispatchResult::Failed { .. }) => summary.failed += 1,
                Ok(DispatchResult::Skipped) => summary.skipped += 1,
                Err(e) => {
                    tracing::warn!("Refund retry pass error: {}", e);
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }
}

fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(3_650))
}

/// Background task that drains the outbox on an interval
pub struct RefundRetryWorker {
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

impl RefundRetryWorker {
    pub fn spawn(outbox: Arc<RefundOutbox>, interval: Duration) -> Arc<Self> {
        let worker = Arc::new(Self {
            running: Arc::new(AtomicBool::new(true)),
            shutdown: Arc::new(Notify::new()),
        });

        let running = worker.running.clone();
        let shutdown = worker.shutdown.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            while running.load(Ordering::SeqCst) {
                tokio::select! {
                    _ = tick.tick() => {
                        match outbox.run_due(false).await {
                            Ok(summary) if summary.sent + summary.failed + summary.exhausted > 0 => {
                                tracing::info!(
                                    sent = summary.sent,
                                    failed = summary.failed,
                                    exhausted = summary.exhausted,
                                    "Refund retry pass"
                                );
                            }
                            Ok(_) => {}
                            Err(e) => tracing::warn!("Refund retry pass failed: {}", e),
                        }
                    }
                    _ = shutdown.notified() => break,
                }
            }
        });

        worker
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RefundPolicy {
        RefundPolicy {
            timeout: Duration::from_secs(5),
            max_attempts: 5,
            base_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(30),
            lease: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.backoff(1), Duration::from_secs(2));
        assert_eq!(p.backoff(2), Duration::from_secs(4));
        assert_eq!(p.backoff(4), Duration::from_secs(16));
        assert_eq!(p.backoff(5), Duration::from_secs(30));
        assert_eq!(p.backoff(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_claimable_rules() {
        let now = Utc::now();
        let mut intent = RefundIntent {
            entry_id: Uuid::new_v4(),
            wallet: WalletAddress::parse("So11111111111111111111111111111111111111112").unwrap(),
            amount: 10,
            currency: Currency::parse("SOL").unwrap(),
            attempts: 0,
            next_attempt_at: now,
            lease_until: None,
            last_error: None,
            exhausted: false,
            created_at: now,
        };
        assert!(intent.claimable(now, false));

        intent.lease_until = Some(now + chrono::Duration::seconds(30));
        assert!(!intent.claimable(now, false));
        assert!(!intent.claimable(now, true));

        intent.lease_until = None;
        intent.next_attempt_at = now + chrono::Duration::seconds(10);
        assert!(!intent.claimable(now, false));
        assert!(intent.claimable(now, true));

        intent.next_attempt_at = now;
        intent.exhausted = true;
        assert!(!intent.claimable(now, false));
        assert!(intent.claimable(now, true));
    }

    #[test]
    fn test_expired_lease_without_result_needs_force() {
        let now = Utc::now();
        let intent = RefundIntent {
            entry_id: Uuid::new_v4(),
            wallet: WalletAddress::parse("So11111111111111111111111111111111111111112").unwrap(),
            amount: 10,
            currency: Currency::parse("SOL").unwrap(),
            attempts: 1,
            next_attempt_at: now - chrono::Duration::seconds(5),
            lease_until: Some(now - chrono::Duration::seconds(1)),
            last_error: None,
            exhausted: false,
            created_at: now,
        };
        assert!(intent.is_in_doubt(now));
        assert!(!intent.claimable(now, false));
        assert!(intent.claimable(now, true));
    }

    #[test]
    fn test_timeout_is_not_resent_automatically() {
        assert!(!RefundError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(RefundError::Network("reset".to_string()).is_retryable());
    }
}
