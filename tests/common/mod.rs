//! Shared fixtures for the integration tests

#![allow(dead_code)]

use chrono::{Duration, Utc};
use std::sync::Arc;
use tempfile::TempDir;
use wager_engine::{
    config::WagerConfig,
    invoices::{Invoice, RocksInvoiceStore},
    metrics::WagerMetrics,
    wager::{
        randomness::FixedRandomness,
        rate_limit::SlidingWindowLimiter,
        refund::{RefundDispatcher, TreasuryDispatcher},
        Collaborators, Currency, InitPoolRequest, SettlementCoordinator,
    },
    WagerStorage,
};

pub const WALLET: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
pub const OTHER_WALLET: &str = "So11111111111111111111111111111111111111112";
pub const ADMIN_SECRET: &str = "test-admin-secret";

pub fn test_config(dir: &TempDir) -> WagerConfig {
    let mut config = WagerConfig::default();
    config.storage.data_dir = dir.path().join("db").to_string_lossy().to_string();
    config.storage.lock_timeout_ms = 5_000;
    config.pool.activation_threshold = 1_000_000;
    config.entries.min_invoice_age_secs = 0;
    config.admin.secret = Some(ADMIN_SECRET.to_string());
    config
}

pub fn sol() -> Currency {
    Currency::parse("SOL").unwrap()
}

pub struct Harness {
    pub dir: TempDir,
    pub config: WagerConfig,
    pub storage: WagerStorage,
    pub invoices: Arc<RocksInvoiceStore>,
    pub treasury: Arc<TreasuryDispatcher>,
    pub coordinator: SettlementCoordinator,
}

impl Harness {
    pub fn new(draws: Vec<u16>) -> Self {
        Self::with_config(draws, |_| {})
    }

    pub fn with_config(draws: Vec<u16>, tweak: impl FnOnce(&mut WagerConfig)) -> Self {
        Self::with_dispatcher(draws, tweak, |_, treasury| treasury as Arc<dyn RefundDispatcher>)
    }

    /// Harness whose refunds go through `dispatcher` instead of the treasury
    pub fn with_dispatcher(
        draws: Vec<u16>,
        tweak: impl FnOnce(&mut WagerConfig),
        dispatcher: impl FnOnce(&WagerStorage, Arc<TreasuryDispatcher>) -> Arc<dyn RefundDispatcher>,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        tweak(&mut config);

        let storage = WagerStorage::open(&config.storage).unwrap();
        let invoices = Arc::new(RocksInvoiceStore::new(storage.clone()));
        let treasury = Arc::new(TreasuryDispatcher::generate());

        let collaborators = collaborators(&config, invoices.clone(), dispatcher(&storage, treasury.clone()), draws);
        let coordinator = SettlementCoordinator::new(
            storage.clone(),
            &config,
            collaborators,
            Arc::new(WagerMetrics::new().unwrap()),
        );

        Self {
            dir,
            config,
            storage,
            invoices,
            treasury,
            coordinator,
        }
    }

    pub async fn init_pool(&self, seed: u64) {
        self.coordinator
            .init_pool(InitPoolRequest {
                currency: sol(),
                house_edge_bps: None,
                min_reserve_bps: Some(2_000),
                max_win_pct_bps: Some(1_000),
                initial_seed: seed,
            })
            .await
            .unwrap();
    }

    /// Pending SOL invoice created an hour ago
    pub fn invoice(&self, id: &str, amount: u64) -> Invoice {
        let invoice = Invoice::pending(id, amount, sol(), Utc::now() - Duration::hours(1));
        self.invoices.insert(&invoice).unwrap();
        invoice
    }
}

pub fn collaborators(
    config: &WagerConfig,
    invoices: Arc<RocksInvoiceStore>,
    dispatcher: Arc<dyn RefundDispatcher>,
    draws: Vec<u16>,
) -> Collaborators {
    Collaborators {
        invoices,
        randomness: Arc::new(FixedRandomness::sequence(draws)),
        rate_limiter: Arc::new(SlidingWindowLimiter::from_config(&config.rate_limit)),
        dispatcher,
    }
}
