//! Valid-event totals

/// Lifetime total plus the count for the current reporting period
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventCounter {
    total: u64,
    period: u32,
}

impl EventCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self) {
        self.total += 1;
        self.period = self.period.saturating_add(1);
    }

    /// Return the period count and start a new period.
    pub fn take_period(&mut self) -> u32 {
        std::mem::take(&mut self.period)
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn period(&self) -> u32 {
        self.period
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_period_keeps_total() {
        let mut counter = EventCounter::new();
        for _ in 0..3 {
            counter.record();
        }
        assert_eq!(counter.take_period(), 3);
        assert_eq!(counter.period(), 0);
        assert_eq!(counter.total(), 3);

        counter.record();
        assert_eq!(counter.take_period(), 1);
        assert_eq!(counter.total(), 4);
    }
}
