//! Rolling average of run durations

use ferrosync_types::SampleLimit;
use std::collections::VecDeque;
use std::time::Duration;

/// Average duration over the most recent samples
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AverageTimer {
    samples: VecDeque<Duration>,
    limit: SampleLimit,
}

impl AverageTimer {
    /// Create an empty timer
    pub fn new(limit: SampleLimit) -> Self {
        Self {
            samples: VecDeque::with_capacity(limit.get()),
            limit,
        }
    }

    /// Record a sample, evicting the oldest once the limit is reached
    pub fn record(&mut self, elapsed: Duration) {
        while self.samples.len() >= self.limit.get() {
            self.samples.pop_front();
        }
        self.samples.push_back(elapsed);
    }

    /// Average of the kept samples
    pub fn average(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let total: Duration = self.samples.iter().sum();
        let count = u32::try_from(self.samples.len()).unwrap_or(u32::MAX);
        Some(total / count)
    }

    /// Number of kept samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if no sample was recorded
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Drop every sample
    pub fn reset(&mut self) {
        self.samples.clear();
    }
}

impl Default for AverageTimer {
    fn default() -> Self {
        Self::new(SampleLimit::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_timer_has_no_average() {
        let timer = AverageTimer::default();
        assert!(timer.is_empty());
        assert_eq!(timer.average(), None);
    }

    #[test]
    fn test_oldest_samples_are_evicted() {
        let mut timer = AverageTimer::new(SampleLimit::new(2).unwrap());
        timer.record(Duration::from_secs(10));
        timer.record(Duration::from_secs(2));
        timer.record(Duration::from_secs(4));

        assert_eq!(timer.len(), 2);
        assert_eq!(timer.average(), Some(Duration::from_secs(3)));
    }

    proptest! {
        #[test]
        fn test_average_within_bounds(samples in proptest::collection::vec(1u64..10_000, 1..50)) {
            let mut timer = AverageTimer::new(SampleLimit::new(10).unwrap());
            for millis in &samples {
                timer.record(Duration::from_millis(*millis));
            }
            let kept = &samples[samples.len().saturating_sub(10)..];
            let min = Duration::from_millis(*kept.iter().min().unwrap());
            let max = Duration::from_millis(*kept.iter().max().unwrap());
            let average = timer.average().unwrap();

            prop_assert!(timer.len() <= 10);
            prop_assert!(average >= min && average <= max);
        }
    }
}
