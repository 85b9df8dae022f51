//! Entry registry and key layout
//!
//! Tables share one keyspace, separated by prefix:
//!
//! - `pool:{currency}` pool rows
//! - `entry:record:{id}` entries
//! - `entry:active:{invoice_id}` marker for the single pending entry of an invoice
//! - `wins:recent:{inv_millis}{id}` newest-first win feed
//! - `refund:intent:{id}` refund outbox

use super::types::{Currency, Entry, RecentWin};
use crate::{
    errors::{StorageError, WagerError, WagerResult},
    storage::{get_for_update_json, put_json, WagerStorage, WagerTxn},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const POOL_PREFIX: &str = "pool:";
const ENTRY_PREFIX: &str = "entry:record:";
const ACTIVE_ENTRY_PREFIX: &str = "entry:active:";
pub const RECENT_WINS_PREFIX: &[u8] = b"wins:recent:";
pub const REFUND_INTENT_PREFIX: &[u8] = b"refund:intent:";

pub fn pool_key(currency: &Currency) -> Vec<u8> {
    format!("{}{}", POOL_PREFIX, currency).into_bytes()
}

pub fn entry_key(id: &Uuid) -> Vec<u8> {
    format!("{}{}", ENTRY_PREFIX, id).into_bytes()
}

pub fn active_entry_key(invoice_id: &str) -> Vec<u8> {
    format!("{}{}", ACTIVE_ENTRY_PREFIX, invoice_id).into_bytes()
}

fn recent_win_key(won_at: &DateTime<Utc>, entry_id: &Uuid) -> Vec<u8> {
    // Newest first: prefix | inv_millis(be) | entry_id
    let millis = won_at.timestamp_millis().max(0) as u64;
    let mut key = Vec::with_capacity(RECENT_WINS_PREFIX.len() + 8 + 16);
    key.extend_from_slice(RECENT_WINS_PREFIX);
    key.extend_from_slice(&(u64::MAX - millis).to_be_bytes());
    key.extend_from_slice(entry_id.as_bytes());
    key
}

pub fn refund_intent_key(entry_id: &Uuid) -> Vec<u8> {
    let mut key = Vec::with_capacity(REFUND_INTENT_PREFIX.len() + 16);
    key.extend_from_slice(REFUND_INTENT_PREFIX);
    key.extend_from_slice(entry_id.as_bytes());
    key
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ActiveMarker {
    entry_id: Uuid,
}

/// Unmasked row behind the public win feed
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecentWinRow {
    entry_id: Uuid,
    wallet: String,
    amount: u64,
    currency: Currency,
    won_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct EntryRegistry {
    storage: WagerStorage,
}

impl EntryRegistry {
    pub fn new(storage: WagerStorage) -> Self {
        Self { storage }
    }

    pub fn get(&self, id: &Uuid) -> WagerResult<Option<Entry>> {
        self.storage.get_json(&entry_key(id))
    }

    /// Id of the pending entry on `invoice_id`, if one exists
    pub fn active_entry(&self, invoice_id: &str) -> WagerResult<Option<Uuid>> {
        Ok(self
            .storage
            .get_json::<ActiveMarker>(&active_entry_key(invoice_id))?
            .map(|marker| marker.entry_id))
    }

    pub fn lock_in(&self, txn: &WagerTxn<'_>, id: &Uuid) -> WagerResult<Option<Entry>> {
        get_for_update_json(txn, &entry_key(id))
    }

    pub fn put_in(&self, txn: &WagerTxn<'_>, entry: &Entry) -> WagerResult<()> {
        put_json(txn, &entry_key(&entry.id), entry)
    }

    /// Insert a new pending entry together with its invoice marker.
    /// Fails with a conflict when the invoice already has a pending entry.
    pub fn insert_in(&self, txn: &WagerTxn<'_>, entry: &Entry) -> WagerResult<()> {
        let marker_key = active_entry_key(&entry.invoice_id);
        if let Some(existing) = get_for_update_json::<ActiveMarker>(txn, &marker_key)? {
            return Err(WagerError::Conflict(format!(
                "invoice {} already has pending entry {}",
                entry.invoice_id, existing.entry_id
            )));
        }
        if self.lock_in(txn, &entry.id)?.is_some() {
            return Err(WagerError::Conflict(format!("entry {} already exists", entry.id)));
        }

        self.put_in(txn, entry)?;
        put_json(txn, &marker_key, &ActiveMarker { entry_id: entry.id })
    }

    /// Drop the invoice marker if it still points at `entry_id`
    pub fn clear_active_in(&self, txn: &WagerTxn<'_>, invoice_id: &str, entry_id: &Uuid) -> WagerResult<()> {
        let marker_key = active_entry_key(invoice_id);
        match get_for_update_json::<ActiveMarker>(txn, &marker_key)? {
            Some(marker) if marker.entry_id == *entry_id => txn.delete(&marker_key).map_err(WagerError::from),
            _ => Ok(()),
        }
    }

    pub fn record_win_in(&self, txn: &WagerTxn<'_>, entry: &Entry, amount: u64, won_at: DateTime<Utc>) -> WagerResult<()> {
        let row = RecentWinRow {
            entry_id: entry.id,
            wallet: entry.client_wallet.as_str().to_string(),
            amount,
            currency: entry.currency.clone(),
            won_at,
        };
        put_json(txn, &recent_win_key(&won_at, &entry.id), &row)
    }

    /// Newest wins first, wallets masked
    pub fn recent_wins(&self, limit: usize) -> WagerResult<Vec<RecentWin>> {
        self.storage
            .scan_prefix(RECENT_WINS_PREFIX, limit)?
            .into_iter()
            .map(|(_, value)| {
                let row: RecentWinRow = serde_json::from_slice(&value).map_err(|e| {
                    StorageError::CorruptedData(format!("Failed to decode recent win: {}", e))
                })?;
                Ok(RecentWin {
                    entry_id: row.entry_id,
                    wallet: super::types::mask_wallet(&row.wallet),
                    amount: row.amount,
                    currency: row.currency,
                    won_at: row.won_at,
                })
            })
            .collect()
    }
}
