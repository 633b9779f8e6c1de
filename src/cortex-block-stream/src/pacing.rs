//! Human-like pacing between emitted blocks.

use std::time::Duration;

use rand::Rng;

use crate::config::PacingConfig;

/// Draws the delay applied before each block after a run's first.
#[derive(Debug, Clone, Copy)]
pub struct Pacer {
    range_ms: Option<(u64, u64)>,
}

impl Pacer {
    /// Create a pacer for the configured mode.
    pub fn new(config: &PacingConfig) -> Self {
        let range_ms = config
            .range_ms()
            .map(|(min, max)| (min.min(max), min.max(max)));
        Self { range_ms }
    }

    /// Whether any delay is ever applied.
    pub fn is_enabled(&self) -> bool {
        self.range_ms.is_some()
    }

    /// Delay to wait before emitting the block at `block_index`.
    ///
    /// The first block of a run is never delayed.
    pub fn delay_before(&self, block_index: usize) -> Option<Duration> {
        if block_index == 0 {
            return None;
        }
        let (min, max) = self.range_ms?;
        let ms = rand::rng().random_range(min..=max);
        Some(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_off_never_delays() {
        let pacer = Pacer::new(&PacingConfig::Off);
        assert!(!pacer.is_enabled());
        assert_eq!(pacer.delay_before(0), None);
        assert_eq!(pacer.delay_before(5), None);
    }

    #[test]
    fn test_first_block_not_delayed() {
        let pacer = Pacer::new(&PacingConfig::Natural);
        assert!(pacer.is_enabled());
        assert_eq!(pacer.delay_before(0), None);
    }

    #[test]
    fn test_natural_range() {
        let pacer = Pacer::new(&PacingConfig::Natural);
        for index in 1..200 {
            let delay = pacer.delay_before(index).unwrap();
            assert!(delay >= Duration::from_millis(800));
            assert!(delay <= Duration::from_millis(2500));
        }
    }

    #[test]
    fn test_custom_range() {
        let pacer = Pacer::new(&PacingConfig::Custom {
            min_ms: 40,
            max_ms: 60,
        });
        for index in 1..200 {
            let delay = pacer.delay_before(index).unwrap();
            assert!((40..=60).contains(&(delay.as_millis() as u64)));
        }
    }

    #[test]
    fn test_custom_fixed_and_inverted_bounds() {
        let fixed = Pacer::new(&PacingConfig::Custom {
            min_ms: 75,
            max_ms: 75,
        });
        assert_eq!(fixed.delay_before(1), Some(Duration::from_millis(75)));

        let inverted = Pacer::new(&PacingConfig::Custom {
            min_ms: 90,
            max_ms: 10,
        });
        let delay = inverted.delay_before(3).unwrap();
        assert!(delay >= Duration::from_millis(10) && delay <= Duration::from_millis(90));
    }
}
