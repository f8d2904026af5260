//! CPU usage rate from cumulative tick counters

/// Implied decimal scale of a rate: 10000 is 100.00%.
pub const RATE_SCALE: u64 = 10_000;

/// Instantaneous rate between two counter snapshots.
///
/// Returns 0 whenever the total counter has not advanced (counter reset, clock
/// skew or two samples within the same tick) and never underflows when the
/// used counter went backwards.
pub fn rate(
    previous_used: u64,
    previous_total: u64,
    new_used: u64,
    new_total: u64,
    scale: u64,
) -> u64 {
    if new_total <= previous_total {
        return 0;
    }

    new_used.saturating_sub(previous_used).saturating_mul(scale) / (new_total - previous_total)
}

/// Baseline for [`rate`]: the counters seen at the previous sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuCounters {
    pub used: u64,
    pub total: u64,
}

impl CpuCounters {
    pub fn new(used: u64, total: u64) -> Self {
        Self { used, total }
    }

    /// Rate against the stored baseline, then adopt the new counters as the
    /// baseline for the next call.
    pub fn advance(&mut self, used: u64, total: u64) -> u64 {
        let result = rate(self.used, self.total, used, total, RATE_SCALE);
        self.used = used;
        self.total = total;
        result
    }
}
