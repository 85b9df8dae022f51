//! Wager settlement domain
//!
//! Pools, entries, odds, the solvency governor, randomness, throttling and
//! the refund outbox, tied together by [`coordinator::SettlementCoordinator`].

pub mod coordinator;
pub mod ledger;
pub mod odds;
pub mod outbox;
pub mod randomness;
pub mod rate_limit;
pub mod refund;
pub mod registry;
pub mod solvency;
pub mod types;

pub use coordinator::{Collaborators, CreateEntryRequest, InitPoolRequest, SettlementCoordinator};
pub use types::{Currency, Entry, EntryStatus, OutcomeReason, Pool, PoolParams, SettleState, WalletAddress};
