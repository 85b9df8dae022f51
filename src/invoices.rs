//! Invoice store
//!
//! Invoices are owned by the invoicing platform. The engine only needs to
//! look one up and to flip it to paid; the latter must be able to join a
//! settlement transaction, so the shipped store lives in the same database.

use crate::{
    errors::{WagerError, WagerResult},
    storage::{get_for_update_json, put_json, WagerStorage, WagerTxn},
    wager::types::Currency,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const INVOICE_PREFIX: &str = "invoice:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub amount: u64,
    pub currency: Currency,
    pub status: InvoiceStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub paid_tx_ref: Option<String>,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
}

impl Invoice {
    pub fn pending(id: impl Into<String>, amount: u64, currency: Currency, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            amount,
            currency,
            status: InvoiceStatus::Pending,
            created_at,
            paid_tx_ref: None,
            paid_at: None,
        }
    }
}

pub trait InvoiceStore: Send + Sync {
    fn get_by_id(&self, id: &str) -> WagerResult<Option<Invoice>>;

    fn mark_paid(&self, id: &str, tx_ref: &str) -> WagerResult<()>;

    /// Read and lock an invoice as part of `txn`
    fn lock_in(&self, txn: &WagerTxn<'_>, id: &str) -> WagerResult<Option<Invoice>>;

    /// Mark paid as part of `txn`. Returns false when the invoice was already paid.
    fn mark_paid_in(&self, txn: &WagerTxn<'_>, id: &str, tx_ref: &str) -> WagerResult<bool>;
}

pub fn invoice_key(id: &str) -> Vec<u8> {
    format!("{}{}", INVOICE_PREFIX, id).into_bytes()
}

#[derive(Clone)]
pub struct RocksInvoiceStore {
    storage: WagerStorage,
}

impl RocksInvoiceStore {
    pub fn new(storage: WagerStorage) -> Self {
        Self { storage }
    }

    /// Upsert an invoice record as handed over by the invoicing platform
    pub fn insert(&self, invoice: &Invoice) -> WagerResult<()> {
        if invoice.id.trim().is_empty() {
            return Err(WagerError::Validation("invoice id is required".to_string()));
        }
        self.storage.put_json(&invoice_key(&invoice.id), invoice)
    }
}

impl InvoiceStore for RocksInvoiceStore {
    fn get_by_id(&self, id: &str) -> WagerResult<Option<Invoice>> {
        self.storage.get_json(&invoice_key(id))
    }

    fn mark_paid(&self, id: &str, tx_ref: &str) -> WagerResult<()> {
        let txn = self.storage.transaction();
        self.mark_paid_in(&txn, id, tx_ref)?;
        txn.commit().map_err(WagerError::from)
    }

    fn lock_in(&self, txn: &WagerTxn<'_>, id: &str) -> WagerResult<Option<Invoice>> {
        get_for_update_json(txn, &invoice_key(id))
    }

    fn mark_paid_in(&self, txn: &WagerTxn<'_>, id: &str, tx_ref: &str) -> WagerResult<bool> {
        let key = invoice_key(id);
        let mut invoice = self
            .lock_in(txn, id)?
            .ok_or_else(|| WagerError::not_found("invoice", id))?;

        match invoice.status {
            InvoiceStatus::Paid => Ok(false),
            InvoiceStatus::Cancelled => Err(WagerError::Conflict(format!(
                "invoice {} is cancelled",
                id
            ))),
            InvoiceStatus::Pending => {
                invoice.status = InvoiceStatus::Paid;
                invoice.paid_tx_ref = Some(tx_ref.to_string());
                invoice.paid_at = Some(Utc::now());
                put_json(txn, &key, &invoice)?;
                Ok(true)
            }
        }
    }
}
