//! Prometheus counters for the wager engine

use crate::errors::{WagerError, WagerResult};
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

pub struct WagerMetrics {
    registry: Registry,
    pub entries_created: IntCounterVec,
    pub settlements: IntCounterVec,
    pub solvency_overrides: IntCounterVec,
    pub refunds: IntCounterVec,
    pub throttled: IntCounter,
}

impl WagerMetrics {
    pub fn new() -> WagerResult<Self> {
        let registry = Registry::new();

        let entries_created = IntCounterVec::new(
            Opts::new("wager_entries_created_total", "Wager entries accepted"),
            &["currency"],
        )
        .map_err(metrics_error)?;
        let settlements = IntCounterVec::new(
            Opts::new("wager_settlements_total", "Settlement decisions committed"),
            &["outcome"],
        )
        .map_err(metrics_error)?;
        let solvency_overrides = IntCounterVec::new(
            Opts::new("wager_solvency_overrides_total", "Provisional wins turned into losses"),
            &["reason"],
        )
        .map_err(metrics_error)?;
        let refunds = IntCounterVec::new(
            Opts::new("wager_refunds_total", "Refund dispatch attempts"),
            &["result"],
        )
        .map_err(metrics_error)?;
        let throttled = IntCounter::new("wager_entries_throttled_total", "Entry creations rejected by the rate limiter")
            .map_err(metrics_error)?;

        registry.register(Box::new(entries_created.clone())).map_err(metrics_error)?;
        registry.register(Box::new(settlements.clone())).map_err(metrics_error)?;
        registry.register(Box::new(solvency_overrides.clone())).map_err(metrics_error)?;
        registry.register(Box::new(refunds.clone())).map_err(metrics_error)?;
        registry.register(Box::new(throttled.clone())).map_err(metrics_error)?;

        Ok(Self {
            registry,
            entries_created,
            settlements,
            solvency_overrides,
            refunds,
            throttled,
        })
    }

    pub fn record_settlement(&self, outcome: &str) {
        self.settlements.with_label_values(&[outcome]).inc();
    }

    pub fn record_refund(&self, result: &str) {
        self.refunds.with_label_values(&[result]).inc();
    }

    /// Prometheus text exposition format
    pub fn encode(&self) -> WagerResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| WagerError::Internal(e.to_string()))
    }
}

fn metrics_error(e: prometheus::Error) -> WagerError {
    WagerError::Internal(format!("metrics: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_includes_counters() {
        let metrics = WagerMetrics::new().unwrap();
        metrics.record_settlement("won");
        metrics.record_settlement("won");
        metrics.throttled.inc();

        let text = metrics.encode().unwrap();
        assert!(text.contains("wager_settlements_total{outcome=\"won\"} 2"));
        assert!(text.contains("wager_entries_throttled_total 1"));
    }
}
