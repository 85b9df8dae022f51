//! Odds quoting

use super::{
    solvency::SolvencyLimits,
    types::{OddsQuote, Pool, PoolParams, MAX_WIN_PROBABILITY_BPS},
};
use crate::errors::{WagerError, WagerResult};

/// Risk level is a whole percentage; 1% maps to 100 bps, capped at 50%.
pub fn win_probability_bps(risk_level: i64) -> u16 {
    risk_level
        .saturating_mul(100)
        .clamp(0, MAX_WIN_PROBABILITY_BPS as i64) as u16
}

/// Quote a wager without touching any state.
///
/// `pool` is the current pool for the currency when one exists; `available`
/// reports whether that pool accepts entries right now.
pub fn calculate_odds(
    stake: u64,
    premium: u64,
    risk_level: i64,
    default_params: &PoolParams,
    pool: Option<&Pool>,
    available: bool,
) -> WagerResult<OddsQuote> {
    let total_payment = stake
        .checked_add(premium)
        .ok_or(WagerError::Overflow("total payment"))?;

    let (house_edge_bps, max_single_win) = match pool {
        Some(pool) => (
            pool.params.house_edge_bps,
            Some(SolvencyLimits::compute(pool.balance, &pool.params).max_single_win),
        ),
        None => (default_params.house_edge_bps, None),
    };

    Ok(OddsQuote {
        stake,
        premium,
        risk_level,
        win_probability_bps: win_probability_bps(risk_level),
        total_payment,
        potential_refund: total_payment,
        house_edge_bps,
        max_single_win,
        pool_available: available && pool.is_some(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wager::types::Currency;
    use chrono::Utc;

    fn defaults() -> PoolParams {
        PoolParams {
            house_edge_bps: 500,
            min_reserve_bps: 2_000,
            max_win_pct_bps: 1_000,
        }
    }

    #[test]
    fn test_probability_clamped() {
        assert_eq!(win_probability_bps(0), 0);
        assert_eq!(win_probability_bps(20), 2_000);
        assert_eq!(win_probability_bps(50), 5_000);
        assert_eq!(win_probability_bps(75), 5_000);
        assert_eq!(win_probability_bps(-3), 0);
        assert_eq!(win_probability_bps(i64::MAX), 5_000);
    }

    #[test]
    fn test_quote_without_pool_uses_defaults() {
        let quote = calculate_odds(100, 20, 20, &defaults(), None, false).unwrap();
        assert_eq!(quote.total_payment, 120);
        assert_eq!(quote.potential_refund, 120);
        assert_eq!(quote.house_edge_bps, 500);
        assert_eq!(quote.max_single_win, None);
        assert!(!quote.pool_available);
    }

    #[test]
    fn test_quote_reports_pool_ceiling() {
        let mut pool = Pool::new(Currency::parse("SOL").unwrap(), defaults(), Utc::now());
        pool.balance = 10_000;
        pool.params.house_edge_bps = 300;

        let quote = calculate_odds(100, 20, 10, &defaults(), Some(&pool), true).unwrap();
        assert_eq!(quote.win_probability_bps, 1_000);
        assert_eq!(quote.house_edge_bps, 300);
        assert_eq!(quote.max_single_win, Some(800));
        assert!(quote.pool_available);
    }

    #[test]
    fn test_quote_overflow_is_error() {
        let result = calculate_odds(u64::MAX, 1, 10, &defaults(), None, false);
        assert!(matches!(result, Err(WagerError::Overflow(_))));
    }
}
