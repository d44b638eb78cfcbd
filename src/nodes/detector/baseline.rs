//! Resting-level estimate

/// Exponential moving average of the idle signal level.
///
/// The first sample seeds the level exactly; afterwards every update moves it
/// `alpha` of the way towards the new sample.
#[derive(Debug, Clone)]
pub struct BaselineTracker {
    alpha: f32,
    level: Option<f32>,
}

impl BaselineTracker {
    pub fn new(alpha: f32) -> Self {
        Self { alpha, level: None }
    }

    /// Fold `volts` into the estimate and return the new level.
    pub fn update(&mut self, volts: f32) -> f32 {
        let level = match self.level {
            None => volts,
            Some(level) => level + self.alpha * (volts - level),
        };
        self.level = Some(level);
        level
    }

    /// Seed the level if nothing has been seen yet.
    pub fn seed(&mut self, volts: f32) {
        self.level.get_or_insert(volts);
    }

    /// Current level, `None` before the first sample
    pub fn level(&self) -> Option<f32> {
        self.level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_seeds_exactly() {
        let mut baseline = BaselineTracker::new(0.001);
        assert_eq!(baseline.level(), None);
        assert_eq!(baseline.update(2.95), 2.95);
    }

    #[test]
    fn test_slow_adaptation() {
        let mut baseline = BaselineTracker::new(0.001);
        baseline.update(3.0);
        let level = baseline.update(2.0);
        assert!((level - 2.999).abs() < 1e-6);
    }

    #[test]
    fn test_converges_towards_new_level() {
        let mut baseline = BaselineTracker::new(0.1);
        baseline.update(3.0);
        for _ in 0..200 {
            baseline.update(2.5);
        }
        assert!((baseline.level().unwrap() - 2.5).abs() < 1e-3);
    }

    #[test]
    fn test_seed_keeps_existing_level() {
        let mut baseline = BaselineTracker::new(0.5);
        baseline.seed(3.0);
        baseline.seed(1.0);
        assert_eq!(baseline.level(), Some(3.0));
    }
}
