//! Wager Engine
//!
//! Settlement engine for the "double-or-nothing" invoice wager: a client pays
//! an invoice plus a premium, and a winning draw refunds stake and premium
//! from a per-currency liquidity pool guarded by a solvency governor.
//!
//! State lives in a RocksDB `TransactionDB`; every settlement commits its
//! entry transition, pool debit, invoice payment and refund intent in one
//! pessimistic transaction.

pub mod api;
pub mod config;
pub mod errors;
pub mod invoices;
pub mod metrics;
pub mod storage;
pub mod wager;

pub use config::{ConfigLoader, WagerConfig};
pub use errors::{WagerError, WagerResult};
pub use storage::WagerStorage;
