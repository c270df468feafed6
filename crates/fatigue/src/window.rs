//! Sliding closure window for PERCLOS
//!
//! Samples live in a deque ordered by timestamp. Each closed sample holds
//! until the next one, and the window measures closed time inside
//! `(now - W, now]`: an interval straddling the cutoff counts only its
//! in-window share, so the result does not depend on the sampling rate.
//! The running total is maintained on push/evict so a query is O(1).

use std::collections::VecDeque;
use std::time::Duration;

use crate::FatigueError;

/// One fused eye-closure observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosureSample {
    pub timestamp: Duration,
    pub closed: bool,
}

/// Time-bounded closure history
#[derive(Debug, Clone)]
pub struct ClosureWindow {
    length: Duration,
    samples: VecDeque<ClosureSample>,
    closed_total: Duration,
}

impl ClosureWindow {
    /// Create a window of length `length`
    pub fn new(length: Duration) -> Self {
        Self::with_capacity(length, 0)
    }

    /// Pre-size for the expected number of samples (window * fps)
    pub fn with_capacity(length: Duration, capacity: usize) -> Self {
        Self {
            length,
            samples: VecDeque::with_capacity(capacity),
            closed_total: Duration::ZERO,
        }
    }

    pub fn length(&self) -> Duration {
        self.length
    }

    /// Append a sample; timestamps must not go backwards
    pub fn push(&mut self, sample: ClosureSample) -> Result<(), FatigueError> {
        if let Some(last) = self.samples.back() {
            if sample.timestamp < last.timestamp {
                return Err(FatigueError::TimestampOrder {
                    previous: last.timestamp,
                    received: sample.timestamp,
                });
            }
            if last.closed {
                self.closed_total += sample.timestamp - last.timestamp;
            }
        }
        self.samples.push_back(sample);
        Ok(())
    }

    /// Record a frame that carried no evidence. A closed interval ends at
    /// `timestamp` and nothing counts as closed until the next sample.
    pub fn push_gap(&mut self, timestamp: Duration) -> Result<(), FatigueError> {
        match self.samples.back().copied() {
            Some(last) if timestamp < last.timestamp => Err(FatigueError::TimestampOrder {
                previous: last.timestamp,
                received: timestamp,
            }),
            Some(last) if last.closed => self.push(ClosureSample {
                timestamp,
                closed: false,
            }),
            _ => Ok(()),
        }
    }

    /// Drop history older than `now - W`
    pub fn evict(&mut self, now: Duration) {
        let Some(cutoff) = now.checked_sub(self.length) else {
            return;
        };
        // intervals ending at or before the cutoff
        while self.samples.len() > 1 && self.samples[1].timestamp <= cutoff {
            if let Some(front) = self.samples.pop_front() {
                if front.closed {
                    self.closed_total -= self.samples[0].timestamp - front.timestamp;
                }
            }
        }
        // straddling interval: keep the share after the cutoff
        if self.samples.len() > 1 {
            if let Some(front) = self.samples.front_mut() {
                if front.timestamp < cutoff {
                    if front.closed {
                        self.closed_total -= cutoff - front.timestamp;
                    }
                    front.timestamp = cutoff;
                }
            }
        }
    }

    /// Closed time inside the window
    pub fn closed_duration(&self) -> Duration {
        self.closed_total
    }

    /// Closed time divided by the window length
    pub fn perclos(&self) -> f64 {
        if self.length.is_zero() {
            return 0.0;
        }
        self.closed_total.as_secs_f64() / self.length.as_secs_f64()
    }

    pub fn latest(&self) -> Option<&ClosureSample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClosureSample> {
        self.samples.iter()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.closed_total = Duration::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn sample(t: u64, closed: bool) -> ClosureSample {
        ClosureSample {
            timestamp: ms(t),
            closed,
        }
    }

    /// Recompute from scratch: closed intervals clipped to `[now - W, now]`
    fn brute_force(samples: &[ClosureSample], now: Duration, length: Duration) -> Duration {
        let cutoff = now.saturating_sub(length);
        samples
            .windows(2)
            .filter(|pair| pair[0].closed)
            .map(|pair| {
                let start = pair[0].timestamp.max(cutoff);
                let end = pair[1].timestamp.min(now);
                end.saturating_sub(start)
            })
            .sum()
    }

    #[test]
    fn test_perclos_time_weighted() {
        let mut window = ClosureWindow::new(ms(10_000));
        window.push(sample(0, false)).unwrap();
        window.push(sample(1000, true)).unwrap();
        window.push(sample(4000, false)).unwrap();
        window.evict(ms(4000));

        assert_eq!(window.closed_duration(), ms(3000));
        assert!((window.perclos() - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_straddling_interval_keeps_in_window_share() {
        let mut window = ClosureWindow::new(ms(1000));
        window.push(sample(0, true)).unwrap();
        window.push(sample(500, true)).unwrap();
        window.push(sample(1000, false)).unwrap();
        window.evict(ms(1000));
        assert_eq!(window.len(), 3);
        assert_eq!(window.closed_duration(), ms(1000));

        window.push(sample(1200, false)).unwrap();
        window.evict(ms(1200));
        assert_eq!(window.closed_duration(), ms(800));
        assert_eq!(window.iter().next().unwrap().timestamp, ms(200));

        // first closed interval fully out, second clipped to 600..1000
        window.evict(ms(1600));
        assert_eq!(window.len(), 3);
        assert_eq!(window.closed_duration(), ms(400));
    }

    #[test]
    fn test_sparse_and_dense_sampling_agree() {
        let length = ms(1000);
        let mut sparse = ClosureWindow::new(length);
        sparse.push(sample(0, true)).unwrap();
        sparse.push(sample(1500, false)).unwrap();
        sparse.evict(ms(1500));

        let mut dense = ClosureWindow::new(length);
        for t in (0..=1400).step_by(100) {
            dense.push(sample(t, true)).unwrap();
            dense.evict(ms(t));
        }
        dense.push(sample(1500, false)).unwrap();
        dense.evict(ms(1500));

        assert_eq!(sparse.closed_duration(), ms(1000));
        assert_eq!(dense.closed_duration(), ms(1000));
        assert!((sparse.perclos() - 1.0).abs() < 1e-9);
        assert!((dense.perclos() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_gap_ends_closed_interval() {
        let mut window = ClosureWindow::new(ms(30_000));
        window.push(sample(0, false)).unwrap();
        window.push(sample(100, true)).unwrap();
        for t in (200..30_000).step_by(100) {
            window.push_gap(ms(t)).unwrap();
            window.evict(ms(t));
        }
        // one marker, not one per frame
        assert_eq!(window.len(), 3);
        window.push(sample(30_000, false)).unwrap();
        window.evict(ms(30_000));

        assert_eq!(window.closed_duration(), ms(100));
        assert!(window.perclos() < 0.01);
    }

    #[test]
    fn test_gap_respects_ordering() {
        let mut window = ClosureWindow::new(ms(1000));
        window.push(sample(500, false)).unwrap();
        assert!(window.push_gap(ms(400)).is_err());
        window.push_gap(ms(600)).unwrap();
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_rejects_out_of_order() {
        let mut window = ClosureWindow::new(ms(1000));
        window.push(sample(500, true)).unwrap();
        let err = window.push(sample(400, true)).unwrap_err();
        assert_eq!(
            err,
            FatigueError::TimestampOrder {
                previous: ms(500),
                received: ms(400)
            }
        );
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_clear() {
        let mut window = ClosureWindow::new(ms(1000));
        window.push(sample(0, true)).unwrap();
        window.push(sample(100, true)).unwrap();
        window.clear();
        assert!(window.is_empty());
        assert_eq!(window.perclos(), 0.0);
    }

    fn arb_samples() -> impl Strategy<Value = Vec<(u64, bool)>> {
        prop::collection::vec((0u64..500, any::<bool>()), 1..120)
    }

    /// Closed/open runs, lengths in units of the coarse sampling step
    fn arb_runs() -> impl Strategy<Value = Vec<(u64, bool)>> {
        prop::collection::vec((1u64..8, any::<bool>()), 1..30)
    }

    fn closed_at(runs: &[(u64, bool)], step: u64, t: u64) -> bool {
        let mut end = 0;
        for &(len, closed) in runs {
            end += len * step;
            if t < end {
                return closed;
            }
        }
        false
    }

    proptest! {
        #[test]
        fn prop_matches_brute_force(steps in arb_samples(), window_ms in 500u64..5000) {
            let length = ms(window_ms);
            let mut window = ClosureWindow::new(length);
            let mut all = Vec::new();
            let mut t = 0u64;
            for (dt, closed) in steps {
                t += dt;
                let s = sample(t, closed);
                all.push(s);
                window.push(s).unwrap();
                window.evict(ms(t));
                prop_assert_eq!(window.closed_duration(), brute_force(&all, ms(t), length));
                prop_assert!(window.perclos() <= 1.0);
            }
        }

        #[test]
        fn prop_duplicate_instants_do_not_change_perclos(
            steps in arb_samples(), dup_every in 1usize..5
        ) {
            let length = ms(3000);
            let mut plain = ClosureWindow::new(length);
            let mut dense = ClosureWindow::new(length);
            let mut t = 0u64;
            for (i, (dt, closed)) in steps.into_iter().enumerate() {
                t += dt;
                let s = sample(t, closed);
                plain.push(s).unwrap();
                dense.push(s).unwrap();
                if i % dup_every == 0 {
                    dense.push(s).unwrap();
                }
                plain.evict(ms(t));
                dense.evict(ms(t));
                prop_assert_eq!(plain.perclos(), dense.perclos());
            }
        }

        #[test]
        fn prop_sampling_rate_does_not_change_perclos(
            runs in arb_runs(),
            fine in 10u64..100,
            factor in 1u64..6,
            window_ms in 500u64..5000,
        ) {
            let coarse = fine * factor;
            let total: u64 = runs.iter().map(|(len, _)| len * coarse).sum();
            let length = ms(window_ms);
            let mut sparse = ClosureWindow::new(length);
            let mut dense = ClosureWindow::new(length);

            let mut t = 0;
            while t <= total {
                dense.push(sample(t, closed_at(&runs, coarse, t))).unwrap();
                dense.evict(ms(t));
                if t % coarse == 0 {
                    sparse.push(sample(t, closed_at(&runs, coarse, t))).unwrap();
                    sparse.evict(ms(t));
                    prop_assert_eq!(sparse.closed_duration(), dense.closed_duration());
                }
                t += fine;
            }
        }
    }
}
