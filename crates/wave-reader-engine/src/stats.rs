//! Engine diagnostics.

use std::time::Duration;

use serde::Serialize;

/// Samples over which the recompute duration average rolls.
const ROLLING_WINDOW: u64 = 100;

/// Running engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    /// Recomputes run, skipped ones included.
    pub recomputes: u64,
    /// Recomputes skipped for lack of pointer movement.
    pub skipped: u64,
    /// Rules written to the stylesheet.
    pub writes: u64,
    /// Writes abandoned after exhausting retries, plus failed queries.
    pub errors: u64,
    /// Rolling average recompute duration in microseconds.
    pub avg_recompute_us: f64,
}

impl EngineStats {
    /// Fold in one recompute. Returns true when a diagnostic line is due.
    pub fn record_recompute(&mut self, elapsed: Duration, log_interval: u64) -> bool {
        self.recomputes += 1;
        #[allow(clippy::cast_precision_loss)]
        let weight = 1.0 / self.recomputes.min(ROLLING_WINDOW) as f64;
        #[allow(clippy::cast_precision_loss)]
        let sample = elapsed.as_micros() as f64;
        self.avg_recompute_us += (sample - self.avg_recompute_us) * weight;
        log_interval > 0 && self.recomputes % log_interval == 0
    }
}
