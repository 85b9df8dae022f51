//! Pool ledger
//!
//! Balance changes go through `get_for_update` on the pool row, so credits
//! and guarded debits on one currency serialize at the store. Every operation
//! has a transaction-scoped `*_in` form that the coordinator composes into its
//! own commit, and a standalone form that commits on its own.

use super::{
    registry::pool_key,
    types::{Currency, Pool, PoolParams, PoolSnapshot, PoolStatus},
};
use crate::{
    errors::{WagerError, WagerResult},
    storage::{get_for_update_json, put_json, WagerStorage, WagerTxn},
};
use chrono::Utc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebitOutcome {
    Debited(Pool),
    /// Guard failed; nothing was written
    InsufficientBalance { balance: u64, requested: u64 },
}

#[derive(Clone)]
pub struct PoolLedger {
    storage: WagerStorage,
    defaults: PoolParams,
}

impl PoolLedger {
    pub fn new(storage: WagerStorage, defaults: PoolParams) -> Self {
        Self { storage, defaults }
    }

    pub fn defaults(&self) -> &PoolParams {
        &self.defaults
    }

    pub fn credit(&self, currency: &Currency, amount: u64) -> WagerResult<Pool> {
        let txn = self.storage.transaction();
        let pool = self.credit_in(&txn, currency, amount)?;
        txn.commit().map_err(WagerError::from)?;
        Ok(pool)
    }

    pub fn debit(&self, currency: &Currency, amount: u64) -> WagerResult<DebitOutcome> {
        let txn = self.storage.transaction();
        let outcome = self.debit_in(&txn, currency, amount)?;
        if matches!(outcome, DebitOutcome::Debited(_)) {
            txn.commit().map_err(WagerError::from)?;
        }
        Ok(outcome)
    }

    pub fn snapshot(&self, currency: &Currency) -> WagerResult<PoolSnapshot> {
        Ok(match self.storage.get_json::<Pool>(&pool_key(currency))? {
            Some(pool) => PoolSnapshot::Seeded(pool),
            None => PoolSnapshot::Unseeded {
                currency: currency.clone(),
            },
        })
    }

    /// Lock and return the pool row, if any
    pub fn lock_in(&self, txn: &WagerTxn<'_>, currency: &Currency) -> WagerResult<Option<Pool>> {
        get_for_update_json(txn, &pool_key(currency))
    }

    /// Premium intake: balance, premiums, and entry count move together
    pub fn credit_in(&self, txn: &WagerTxn<'_>, currency: &Currency, amount: u64) -> WagerResult<Pool> {
        let mut pool = self
            .lock_in(txn, currency)?
            .unwrap_or_else(|| Pool::new(currency.clone(), self.defaults, Utc::now()));

        pool.balance = pool
            .balance
            .checked_add(amount)
            .ok_or(WagerError::Overflow("pool balance"))?;
        pool.premiums_collected = pool
            .premiums_collected
            .checked_add(amount)
            .ok_or(WagerError::Overflow("premiums collected"))?;
        pool.entry_count = pool
            .entry_count
            .checked_add(1)
            .ok_or(WagerError::Overflow("entry count"))?;
        pool.updated_at = Utc::now();

        put_json(txn, &pool_key(currency), &pool)?;
        Ok(pool)
    }

    /// Guarded payout: subtracts only when the balance covers `amount`
    pub fn debit_in(&self, txn: &WagerTxn<'_>, currency: &Currency, amount: u64) -> WagerResult<DebitOutcome> {
        let Some(pool) = self.lock_in(txn, currency)? else {
            return Ok(DebitOutcome::InsufficientBalance {
                balance: 0,
                requested: amount,
            });
        };
        self.apply_debit_in(txn, pool, amount)
    }

    /// Debit against a pool row the caller already locked in `txn`
    pub fn apply_debit_in(&self, txn: &WagerTxn<'_>, mut pool: Pool, amount: u64) -> WagerResult<DebitOutcome> {
        let Some(balance) = pool.balance.checked_sub(amount) else {
            return Ok(DebitOutcome::InsufficientBalance {
                balance: pool.balance,
                requested: amount,
            });
        };

        pool.balance = balance;
        pool.payouts = pool
            .payouts
            .checked_add(amount)
            .ok_or(WagerError::Overflow("payouts"))?;
        pool.win_count = pool
            .win_count
            .checked_add(1)
            .ok_or(WagerError::Overflow("win count"))?;
        pool.updated_at = Utc::now();

        put_json(txn, &pool_key(&pool.currency), &pool)?;
        Ok(DebitOutcome::Debited(pool))
    }

    /// Create a pool with explicit parameters and an opening balance
    pub fn init(&self, currency: &Currency, params: PoolParams, initial_seed: u64) -> WagerResult<Pool> {
        params.validate()?;

        let txn = self.storage.transaction();
        if self.lock_in(&txn, currency)?.is_some() {
            return Err(WagerError::Conflict(format!("pool for {} already exists", currency)));
        }

        let mut pool = Pool::new(currency.clone(), params, Utc::now());
        pool.balance = initial_seed;
        put_json(&txn, &pool_key(currency), &pool)?;
        txn.commit().map_err(WagerError::from)?;

        Ok(pool)
    }

    /// House funding. Adds to the balance only; a missing pool is created
    /// with the default params.
    pub fn seed(&self, currency: &Currency, amount: u64) -> WagerResult<Pool> {
        if amount == 0 {
            return Err(WagerError::Validation("seed amount must be positive".to_string()));
        }

        let txn = self.storage.transaction();
        let mut pool = self
            .lock_in(&txn, currency)?
            .unwrap_or_else(|| Pool::new(currency.clone(), self.defaults, Utc::now()));
        if pool.status == PoolStatus::Paused {
            return Err(WagerError::PoolPaused {
                currency: currency.to_string(),
            });
        }

        pool.balance = pool
            .balance
            .checked_add(amount)
            .ok_or(WagerError::Overflow("pool balance"))?;
        pool.updated_at = Utc::now();
        put_json(&txn, &pool_key(currency), &pool)?;
        txn.commit().map_err(WagerError::from)?;

        Ok(pool)
    }

    pub fn set_status(&self, currency: &Currency, status: PoolStatus) -> WagerResult<Pool> {
        let txn = self.storage.transaction();
        let mut pool = self
            .lock_in(&txn, currency)?
            .ok_or_else(|| WagerError::not_found("pool", currency.as_str()))?;

        pool.status = status;
        pool.updated_at = Utc::now();
        put_json(&txn, &pool_key(currency), &pool)?;
        txn.commit().map_err(WagerError::from)?;

        Ok(pool)
    }
}
