//! End-to-end settlement against a real RocksDB database

mod common;

use common::{sol, Harness, OTHER_WALLET, WALLET};
use std::sync::Arc;
use wager_engine::{
    invoices::{InvoiceStatus, InvoiceStore},
    wager::{
        types::{PoolSnapshot, SettleState},
        CreateEntryRequest, EntryStatus, OutcomeReason, WalletAddress,
    },
    WagerError,
};

const STAKE: u64 = 100_000_000;
const PREMIUM: u64 = 20_000_000;
const REFUND: u64 = STAKE + PREMIUM;

fn entry_request(invoice_id: &str, wallet: &str) -> CreateEntryRequest {
    CreateEntryRequest {
        invoice_id: invoice_id.to_string(),
        client_wallet: WalletAddress::parse(wallet).unwrap(),
        premium: PREMIUM,
        risk_level: 20,
        payment_tx_ref: None,
    }
}

fn pool_balance(harness: &Harness) -> u64 {
    match harness.coordinator.ledger().snapshot(&sol()).unwrap() {
        PoolSnapshot::Seeded(pool) => pool.balance,
        PoolSnapshot::Unseeded { .. } => panic!("pool missing"),
    }
}

#[tokio::test]
async fn test_winning_entry_refunds_stake_and_premium() {
    let harness = Harness::new(vec![1_999]);
    harness.init_pool(10_000_000_000).await;
    harness.treasury.fund(&sol(), 1_000_000_000);
    harness.invoice("inv-win", STAKE);

    let entry = harness.coordinator.create_entry(entry_request("inv-win", WALLET)).await.unwrap();
    assert_eq!(entry.win_probability_bps, 2_000);
    assert_eq!(entry.stake_amount, STAKE);
    assert_eq!(pool_balance(&harness), 10_000_000_000 + PREMIUM);

    let report = harness.coordinator.settle(entry.id).await.unwrap();
    assert_eq!(report.state, SettleState::Won);
    assert_eq!(report.won, Some(true));
    assert_eq!(report.outcome_reason, Some(OutcomeReason::Draw));
    assert_eq!(report.refund_amount, REFUND);
    assert!(report.refund_tx_ref.is_some());
    assert!(!report.already_settled);

    assert_eq!(pool_balance(&harness), 10_000_000_000 + PREMIUM - REFUND);
    assert_eq!(harness.treasury.balance(&sol()), 1_000_000_000 - REFUND);

    let invoice = harness.invoices.get_by_id("inv-win").unwrap().unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Paid);
    assert_eq!(invoice.paid_tx_ref, Some(format!("wager-entry:{}", entry.id)));

    let wins = harness.coordinator.recent_wins(None).await.unwrap();
    assert_eq!(wins.len(), 1);
    assert_eq!(wins[0].amount, REFUND);
    assert_eq!(wins[0].wallet, "Toke...Q5DA");
}

#[tokio::test]
async fn test_losing_draw_keeps_premium_in_pool() {
    let harness = Harness::new(vec![2_000]);
    harness.init_pool(10_000_000_000).await;
    harness.invoice("inv-lose", STAKE);

    let entry = harness.coordinator.create_entry(entry_request("inv-lose", WALLET)).await.unwrap();
    let report = harness.coordinator.settle(entry.id).await.unwrap();

    assert_eq!(report.state, SettleState::Lost);
    assert_eq!(report.outcome_reason, Some(OutcomeReason::Draw));
    assert_eq!(pool_balance(&harness), 10_000_000_000 + PREMIUM);
    assert!(harness.coordinator.recent_wins(None).await.unwrap().is_empty());

    let invoice = harness.invoices.get_by_id("inv-lose").unwrap().unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Paid);
}

#[tokio::test]
async fn test_solvency_override_turns_win_into_loss() {
    let harness = Harness::with_config(vec![0], |config| {
        config.entries.require_payable_at_entry = false;
    });
    // 500M pool: 400M available, 40M max single win
    harness.init_pool(500_000_000).await;
    harness.invoice("inv-small", STAKE);

    let entry = harness.coordinator.create_entry(entry_request("inv-small", WALLET)).await.unwrap();
    let report = harness.coordinator.settle(entry.id).await.unwrap();

    assert_eq!(report.state, SettleState::Lost);
    assert_eq!(report.won, Some(false));
    assert_eq!(report.outcome_reason, Some(OutcomeReason::SolvencyOverride));
    assert_eq!(pool_balance(&harness), 500_000_000 + PREMIUM);
    assert_eq!(
        harness.invoices.get_by_id("inv-small").unwrap().unwrap().status,
        InvoiceStatus::Paid
    );
}

#[tokio::test]
async fn test_unpayable_entry_rejected_up_front() {
    let harness = Harness::new(vec![0]);
    harness.init_pool(500_000_000).await;
    harness.invoice("inv-unpayable", STAKE);

    let err = harness
        .coordinator
        .create_entry(entry_request("inv-unpayable", WALLET))
        .await
        .unwrap_err();
    assert!(matches!(err, WagerError::Conflict(_)));
    assert_eq!(pool_balance(&harness), 500_000_000);
}

#[tokio::test]
async fn test_refund_failure_is_durable_and_retryable() {
    let harness = Harness::new(vec![1_999]);
    harness.init_pool(10_000_000_000).await;
    harness.invoice("inv-refund", STAKE);

    let entry = harness.coordinator.create_entry(entry_request("inv-refund", WALLET)).await.unwrap();
    let report = harness.coordinator.settle(entry.id).await.unwrap();

    // treasury is empty so the inline dispatch fails
    assert_eq!(report.state, SettleState::WonRefundPending);
    assert_eq!(report.status, EntryStatus::RefundFailed);
    assert!(report.refund_error.is_some());
    assert_eq!(pool_balance(&harness), 10_000_000_000 + PREMIUM - REFUND);
    assert_eq!(
        harness.invoices.get_by_id("inv-refund").unwrap().unwrap().status,
        InvoiceStatus::Paid
    );

    let intent = harness.coordinator.outbox().intent(&entry.id).unwrap().unwrap();
    assert_eq!(intent.attempts, 1);
    assert_eq!(intent.amount, REFUND);

    // repeat settle reports the recorded outcome without another debit
    let again = harness.coordinator.settle(entry.id).await.unwrap();
    assert!(again.already_settled);
    assert_eq!(again.state, SettleState::WonRefundPending);

    harness.treasury.fund(&sol(), REFUND);
    let retried = harness.coordinator.retry_refund(entry.id).await.unwrap();
    assert_eq!(retried.state, SettleState::Won);
    assert_eq!(retried.status, EntryStatus::Won);
    assert!(retried.refund_tx_ref.is_some());
    assert!(retried.refund_error.is_none());
    assert!(harness.coordinator.outbox().intent(&entry.id).unwrap().is_none());

    // nothing left to retry
    let err = harness.coordinator.retry_refund(entry.id).await.unwrap_err();
    assert!(matches!(err, WagerError::Conflict(_)));
}

#[tokio::test]
async fn test_outbox_pass_retries_due_refunds() {
    let harness = Harness::with_config(vec![1_999], |config| {
        config.refunds.base_backoff_secs = 0;
    });
    harness.init_pool(10_000_000_000).await;
    harness.invoice("inv-outbox", STAKE);

    let entry = harness.coordinator.create_entry(entry_request("inv-outbox", WALLET)).await.unwrap();
    let report = harness.coordinator.settle(entry.id).await.unwrap();
    assert_eq!(report.state, SettleState::WonRefundPending);

    harness.treasury.fund(&sol(), REFUND);
    let summary = harness.coordinator.outbox().run_due(false).await.unwrap();
    assert_eq!(summary.sent, 1);
    assert_eq!(summary.failed, 0);

    let settled = harness.coordinator.entry(entry.id).await.unwrap();
    assert_eq!(settled.status, EntryStatus::Won);
    assert!(settled.refund_tx_ref.is_some());

    let empty = harness.coordinator.outbox().run_due(false).await.unwrap();
    assert_eq!(empty.sent + empty.failed + empty.exhausted + empty.skipped, 0);
}

#[tokio::test]
async fn test_sequential_settles_are_idempotent() {
    let harness = Harness::new(vec![1_999]);
    harness.init_pool(10_000_000_000).await;
    harness.treasury.fund(&sol(), 1_000_000_000);
    harness.invoice("inv-seq", STAKE);

    let entry = harness.coordinator.create_entry(entry_request("inv-seq", WALLET)).await.unwrap();
    let first = harness.coordinator.settle(entry.id).await.unwrap();
    let second = harness.coordinator.settle(entry.id).await.unwrap();

    assert!(!first.already_settled);
    assert!(second.already_settled);
    assert_eq!(first.refund_tx_ref, second.refund_tx_ref);
    assert_eq!(first.random_result, second.random_result);
    assert_eq!(pool_balance(&harness), 10_000_000_000 + PREMIUM - REFUND);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_settles_debit_once() {
    let harness = Arc::new(Harness::new(vec![1_999]));
    harness.init_pool(10_000_000_000).await;
    harness.treasury.fund(&sol(), 1_000_000_000);
    harness.invoice("inv-race", STAKE);

    let entry = harness.coordinator.create_entry(entry_request("inv-race", WALLET)).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let harness = harness.clone();
        let entry_id = entry.id;
        handles.push(tokio::spawn(async move { harness.coordinator.settle(entry_id).await }));
    }

    let mut fresh = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(report) => {
                assert_eq!(report.won, Some(true));
                if !report.already_settled {
                    fresh += 1;
                }
            }
            Err(e) => assert!(e.is_retryable(), "unexpected error: {}", e),
        }
    }

    assert_eq!(fresh, 1);
    assert_eq!(pool_balance(&harness), 10_000_000_000 + PREMIUM - REFUND);
    assert_eq!(harness.treasury.balance(&sol()), 1_000_000_000 - REFUND);
    assert_eq!(harness.coordinator.recent_wins(None).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pool_never_goes_negative_under_concurrent_wins() {
    let harness = Arc::new(Harness::with_config(vec![0], |config| {
        config.entries.require_payable_at_entry = false;
        config.rate_limit.max_entries = 100;
    }));
    // the ceiling is 8% of the balance, so only the first few 60M refunds fit
    harness.init_pool(1_000_000_000).await;
    harness.treasury.fund(&sol(), u64::MAX / 2);

    let mut entries = Vec::new();
    for i in 0..12 {
        let id = format!("inv-burst-{}", i);
        harness.invoice(&id, 50_000_000);
        let mut request = entry_request(&id, if i % 2 == 0 { WALLET } else { OTHER_WALLET });
        request.premium = 10_000_000;
        entries.push(harness.coordinator.create_entry(request).await.unwrap());
    }

    let mut handles = Vec::new();
    for entry in &entries {
        let harness = harness.clone();
        let entry_id = entry.id;
        handles.push(tokio::spawn(async move { harness.coordinator.settle(entry_id).await }));
    }
    for handle in handles {
        let _ = handle.await.unwrap();
    }

    let snapshot = match harness.coordinator.ledger().snapshot(&sol()).unwrap() {
        PoolSnapshot::Seeded(pool) => pool,
        PoolSnapshot::Unseeded { .. } => panic!("pool missing"),
    };
    let settled_wins = {
        let mut wins = 0u64;
        for entry in &entries {
            if harness.coordinator.entry(entry.id).await.unwrap().won == Some(true) {
                wins += 1;
            }
        }
        wins
    };

    assert_eq!(snapshot.win_count, settled_wins);
    assert_eq!(snapshot.payouts, settled_wins * 60_000_000);
    assert_eq!(
        snapshot.balance,
        1_000_000_000 + 12 * 10_000_000 - settled_wins * 60_000_000
    );
}

#[tokio::test]
async fn test_duplicate_active_entry_rejected() {
    let harness = Harness::new(vec![5_000]);
    harness.init_pool(10_000_000_000).await;
    harness.invoice("inv-dup", STAKE);

    harness.coordinator.create_entry(entry_request("inv-dup", WALLET)).await.unwrap();
    let err = harness
        .coordinator
        .create_entry(entry_request("inv-dup", OTHER_WALLET))
        .await
        .unwrap_err();
    assert!(matches!(err, WagerError::Conflict(_)));
}

#[tokio::test]
async fn test_entry_requires_pending_invoice() {
    let harness = Harness::new(vec![5_000]);
    harness.init_pool(10_000_000_000).await;
    harness.invoice("inv-paid", STAKE);
    harness.invoices.mark_paid("inv-paid", "external-tx").unwrap();

    let err = harness
        .coordinator
        .create_entry(entry_request("inv-paid", WALLET))
        .await
        .unwrap_err();
    assert!(matches!(err, WagerError::Conflict(_)));

    let missing = harness
        .coordinator
        .create_entry(entry_request("inv-missing", WALLET))
        .await
        .unwrap_err();
    assert!(matches!(missing, WagerError::NotFound { .. }));
}

#[tokio::test]
async fn test_young_invoice_rejected() {
    let harness = Harness::with_config(vec![5_000], |config| {
        config.entries.min_invoice_age_secs = 300;
    });
    harness.init_pool(10_000_000_000).await;
    let invoice = wager_engine::invoices::Invoice::pending("inv-young", STAKE, sol(), chrono::Utc::now());
    harness.invoices.insert(&invoice).unwrap();

    let err = harness
        .coordinator
        .create_entry(entry_request("inv-young", WALLET))
        .await
        .unwrap_err();
    assert!(matches!(err, WagerError::Conflict(_)));
}

#[tokio::test]
async fn test_entries_throttled_after_quota() {
    let harness = Harness::with_config(vec![5_000], |config| {
        config.rate_limit.max_entries = 3;
    });
    harness.init_pool(10_000_000_000).await;

    for i in 0..3 {
        let id = format!("inv-quota-{}", i);
        harness.invoice(&id, STAKE);
        harness.coordinator.create_entry(entry_request(&id, WALLET)).await.unwrap();
    }

    harness.invoice("inv-quota-3", STAKE);
    let err = harness
        .coordinator
        .create_entry(entry_request("inv-quota-3", WALLET))
        .await
        .unwrap_err();
    match err {
        WagerError::Throttled { retry_after } => assert!(retry_after.as_secs() >= 1),
        other => panic!("expected throttling, got {}", other),
    }

    // a different wallet has its own window
    harness
        .coordinator
        .create_entry(entry_request("inv-quota-3", OTHER_WALLET))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_paused_pool_rejects_entries() {
    let harness = Harness::new(vec![5_000]);
    harness.init_pool(10_000_000_000).await;
    harness.coordinator.set_paused(sol(), true).await.unwrap();
    harness.invoice("inv-paused", STAKE);

    let err = harness
        .coordinator
        .create_entry(entry_request("inv-paused", WALLET))
        .await
        .unwrap_err();
    assert!(matches!(err, WagerError::PoolPaused { .. }));

    let seed_err = harness.coordinator.seed_pool(sol(), 1_000).await.unwrap_err();
    assert!(matches!(seed_err, WagerError::PoolPaused { .. }));

    harness.coordinator.set_paused(sol(), false).await.unwrap();
    harness.coordinator.create_entry(entry_request("inv-paused", WALLET)).await.unwrap();
}

#[tokio::test]
async fn test_pool_below_activation_threshold_unavailable() {
    let harness = Harness::with_config(vec![5_000], |config| {
        config.pool.activation_threshold = 50_000_000_000;
    });
    harness.init_pool(10_000_000_000).await;
    harness.invoice("inv-early", STAKE);

    let overview = harness.coordinator.pool_overview(sol()).await.unwrap();
    assert!(!overview.available);
    assert_eq!(overview.activation_progress_bps, 2_000);

    let err = harness
        .coordinator
        .create_entry(entry_request("inv-early", WALLET))
        .await
        .unwrap_err();
    assert!(matches!(err, WagerError::PoolUnavailable { .. }));

    harness.coordinator.seed_pool(sol(), 40_000_000_000).await.unwrap();
    assert!(harness.coordinator.pool_overview(sol()).await.unwrap().available);
}
