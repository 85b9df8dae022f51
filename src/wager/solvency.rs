//! Solvency governor
//!
//! Decides whether a provisional win can be paid out of a pool without
//! touching the reserve or exceeding the single-win ceiling. Pure arithmetic,
//! carried out in u128 so `balance * bps` cannot overflow.

use super::types::{PoolParams, BPS_DIVISOR};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolvencyLimits {
    pub reserve_required: u64,
    pub available_for_payout: u64,
    pub max_single_win: u64,
}

impl SolvencyLimits {
    pub fn compute(balance: u64, params: &PoolParams) -> Self {
        let reserve_required = bps_of(balance, params.min_reserve_bps);
        let available_for_payout = balance.saturating_sub(reserve_required);
        let max_single_win = bps_of(available_for_payout, params.max_win_pct_bps);
        Self {
            reserve_required,
            available_for_payout,
            max_single_win,
        }
    }

    pub fn allows(&self, refund_amount: u64) -> bool {
        refund_amount <= self.available_for_payout && refund_amount <= self.max_single_win
    }
}

/// floor(amount * bps / 10000), never larger than `amount` for bps <= 10000
fn bps_of(amount: u64, bps: u16) -> u64 {
    let scaled = amount as u128 * bps.min(BPS_DIVISOR as u16) as u128 / BPS_DIVISOR as u128;
    scaled as u64
}
