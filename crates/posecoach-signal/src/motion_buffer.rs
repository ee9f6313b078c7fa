//! Motion Buffer
//!
//! A time-bounded rolling window of [`Features`] for one session. History is
//! stored raw; EMA smoothing (angles) and median filtering (visibility) are
//! applied on read so the unmodified history stays available through
//! [`MotionBuffer::raw`].

use std::collections::VecDeque;

use posecoach_core::Timestamp;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::features::{FeatureKey, Features};
use crate::filters::{ema_last, median};
use crate::{Result, SignalError};

/// Configuration for the motion buffer.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MotionBufferConfig {
    /// Samples older than this (relative to the newest) are evicted
    pub window_ms: u64,
    /// Hard cap on retained samples
    pub max_samples: usize,
    /// EMA factor applied on read
    pub ema_alpha: f32,
    /// Samples in the visibility median filter
    pub visibility_median_samples: usize,
}

impl Default for MotionBufferConfig {
    fn default() -> Self {
        Self {
            window_ms: 2000,
            max_samples: 48,
            ema_alpha: 0.3,
            visibility_median_samples: 5,
        }
    }
}

impl MotionBufferConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::InvalidConfig`] if any field is zero or the EMA
    /// factor is outside (0, 1].
    pub fn validate(&self) -> Result<()> {
        if self.window_ms == 0 || self.max_samples == 0 || self.visibility_median_samples == 0 {
            return Err(SignalError::InvalidConfig(
                "window_ms, max_samples and visibility_median_samples must be non-zero".into(),
            ));
        }
        if !(self.ema_alpha > 0.0 && self.ema_alpha <= 1.0) {
            return Err(SignalError::InvalidConfig(format!(
                "ema_alpha must be in (0, 1], got {}",
                self.ema_alpha
            )));
        }
        Ok(())
    }
}

/// Summary of one feature over a trailing window.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BufferQuery {
    /// Mean of the defined samples
    pub average: f32,
    /// Population variance of the defined samples
    pub variance: f32,
    /// Mean rate of change per second
    pub average_velocity: f32,
    /// Mean stability score over the window
    pub stability_score: f32,
    /// EMA of the defined samples, oldest first
    pub smoothed: f32,
    /// Number of defined samples
    pub sample_count: usize,
    /// Time between the oldest and newest defined sample
    pub span_ms: i64,
}

impl BufferQuery {
    /// `true` when no defined sample fell inside the window.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }
}

/// Rolling window of recent features.
#[derive(Debug, Clone)]
pub struct MotionBuffer {
    config: MotionBufferConfig,
    samples: VecDeque<Features>,
}

impl MotionBuffer {
    /// Create an empty buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: MotionBufferConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            samples: VecDeque::with_capacity(config.max_samples),
            config,
        })
    }

    /// Buffer configuration.
    #[must_use]
    pub fn config(&self) -> &MotionBufferConfig {
        &self.config
    }

    /// Append a sample and evict stale entries. Samples older than the
    /// newest stored one are discarded.
    pub fn push(&mut self, features: Features) {
        if let Some(newest) = self.samples.back() {
            if features.timestamp < newest.timestamp {
                tracing::debug!(
                    timestamp = %features.timestamp,
                    newest = %newest.timestamp,
                    "Discarding out-of-order sample"
                );
                return;
            }
        }

        let horizon = features
            .timestamp
            .sub_millis(self.config.window_ms);
        self.samples.push_back(features);

        while self
            .samples
            .front()
            .is_some_and(|oldest| oldest.timestamp < horizon)
        {
            self.samples.pop_front();
        }
        while self.samples.len() > self.config.max_samples {
            self.samples.pop_front();
        }
    }

    /// Most recent sample.
    #[must_use]
    pub fn latest(&self) -> Option<&Features> {
        self.samples.back()
    }

    /// Unmodified history, oldest first.
    pub fn raw(&self) -> impl DoubleEndedIterator<Item = &Features> + ExactSizeIterator {
        self.samples.iter()
    }

    /// Number of stored samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Drop all history.
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Summarize `key` over the trailing `window_ms` (defaults to the whole
    /// buffer). Undefined samples are skipped.
    #[must_use]
    pub fn query(&self, key: FeatureKey, window_ms: Option<u64>) -> BufferQuery {
        let Some(newest) = self.samples.back() else {
            return BufferQuery::default();
        };
        let horizon = newest
            .timestamp
            .sub_millis(window_ms.unwrap_or(self.config.window_ms));
        let in_window: Vec<&Features> = self
            .samples
            .iter()
            .filter(|f| f.timestamp >= horizon)
            .collect();

        let stability_score = in_window.iter().map(|f| f.stability.score).sum::<f32>()
            / in_window.len() as f32;

        let defined: Vec<(&Features, f32)> = in_window
            .iter()
            .filter_map(|f| f.value(key).map(|v| (*f, v)))
            .collect();
        let (Some((first, first_value)), Some((last, last_value))) =
            (defined.first(), defined.last())
        else {
            return BufferQuery {
                stability_score,
                ..BufferQuery::default()
            };
        };

        let n = defined.len() as f32;
        let average = defined.iter().map(|(_, v)| v).sum::<f32>() / n;
        let variance = defined
            .iter()
            .map(|(_, v)| (v - average).powi(2))
            .sum::<f32>()
            / n;
        let span_ms = last.timestamp.millis_since(first.timestamp);

        let engine_velocities: Vec<f32> = defined
            .iter()
            .filter_map(|(f, _)| f.velocity_of(key))
            .collect();
        let average_velocity = if !engine_velocities.is_empty() {
            engine_velocities.iter().sum::<f32>() / engine_velocities.len() as f32
        } else if span_ms > 0 {
            (last_value - first_value) / (span_ms as f32 / 1000.0)
        } else {
            0.0
        };

        BufferQuery {
            average,
            variance,
            average_velocity,
            stability_score,
            smoothed: ema_last(defined.iter().map(|(_, v)| *v), self.config.ema_alpha)
                .unwrap_or(average),
            sample_count: defined.len(),
            span_ms,
        }
    }

    /// `true` iff every sample in the trailing `duration_ms` is stable and
    /// history reaches back at least that far. One unstable sample restarts
    /// the clock.
    #[must_use]
    pub fn stable_for(&self, duration_ms: u64, now: Timestamp) -> bool {
        self.holds_for(duration_ms, now, |f| f.stability.is_stable)
    }

    /// `true` iff `predicate` held for every sample of an unbroken run ending
    /// at the newest sample, and that run started at least `duration_ms`
    /// before `now`.
    pub fn holds_for<F>(&self, duration_ms: u64, now: Timestamp, predicate: F) -> bool
    where
        F: Fn(&Features) -> bool,
    {
        self.run_start(predicate)
            .is_some_and(|start| now.millis_since(start) >= duration_ms as i64)
    }

    /// Timestamp of the oldest sample in the unbroken run of samples that
    /// satisfy `predicate`, ending at the newest sample.
    pub fn run_start<F>(&self, predicate: F) -> Option<Timestamp>
    where
        F: Fn(&Features) -> bool,
    {
        self.samples
            .iter()
            .rev()
            .take_while(|f| predicate(f))
            .last()
            .map(|f| f.timestamp)
    }

    /// Median of `extract` over the newest `samples` entries.
    pub fn median_of<F>(&self, samples: usize, extract: F) -> Option<f32>
    where
        F: Fn(&Features) -> f32,
    {
        let values: Vec<f32> = self.samples.iter().rev().take(samples).map(extract).collect();
        median(&values)
    }

    /// Median-filtered critical visibility over the configured sample count.
    #[must_use]
    pub fn filtered_visibility(&self) -> Option<f32> {
        self.median_of(self.config.visibility_median_samples, |f| {
            f.visibility.critical
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{Angle, Stability};
    use approx::assert_abs_diff_eq;

    fn sample(ts: i64, body_line: Option<f32>, stable: bool) -> Features {
        let mut f = Features::unavailable(Timestamp::from_millis(ts));
        f.body_line.angle = body_line.map_or(Angle::UNDEFINED, Angle::measured);
        f.stability = Stability {
            is_stable: stable,
            score: if stable { 1.0 } else { 0.0 },
            motion_gate: !stable,
            motion_ratio: if stable { 0.0 } else { 3.0 },
        };
        f
    }

    fn buffer() -> MotionBuffer {
        MotionBuffer::new(MotionBufferConfig::default()).unwrap()
    }

    #[test]
    fn test_eviction_by_window_and_capacity() {
        let mut buf = buffer();
        for i in 0..30 {
            buf.push(sample(i * 100, Some(0.0), true));
        }
        // Window 2000 ms at 100 ms spacing: 2900 - 2000 = 900 onwards.
        assert_eq!(buf.len(), 21);
        assert_eq!(buf.raw().next().unwrap().timestamp, Timestamp::from_millis(900));

        let mut small = MotionBuffer::new(MotionBufferConfig {
            max_samples: 5,
            ..MotionBufferConfig::default()
        })
        .unwrap();
        for i in 0..10 {
            small.push(sample(i * 10, Some(0.0), true));
        }
        assert_eq!(small.len(), 5);
    }

    #[test]
    fn test_out_of_order_sample_discarded() {
        let mut buf = buffer();
        buf.push(sample(500, Some(1.0), true));
        buf.push(sample(400, Some(2.0), true));
        buf.push(sample(500, Some(3.0), true));
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_query_statistics() {
        let mut buf = buffer();
        buf.push(sample(0, Some(-8.0), true));
        buf.push(sample(100, None, true));
        buf.push(sample(200, Some(-10.0), true));
        buf.push(sample(300, Some(-12.0), false));

        let q = buf.query(FeatureKey::BodyLine, None);
        assert_eq!(q.sample_count, 3);
        assert_abs_diff_eq!(q.average, -10.0, epsilon = 1e-5);
        assert_abs_diff_eq!(q.variance, 8.0 / 3.0, epsilon = 1e-4);
        assert_eq!(q.span_ms, 300);
        assert_abs_diff_eq!(q.stability_score, 0.75, epsilon = 1e-6);
        assert!(q.smoothed > -12.0 && q.smoothed < -8.0);

        let recent = buf.query(FeatureKey::BodyLine, Some(150));
        assert_eq!(recent.sample_count, 2);
        assert_eq!(recent.span_ms, 100);
    }

    #[test]
    fn test_query_without_defined_samples() {
        let mut buf = buffer();
        assert!(buf.query(FeatureKey::Neck, None).is_empty());
        buf.push(sample(0, None, true));
        let q = buf.query(FeatureKey::BodyLine, None);
        assert!(q.is_empty());
        assert_eq!(q.stability_score, 1.0);
    }

    #[test]
    fn test_single_spike_resets_stability_clock() {
        let mut buf = buffer();
        for i in 0..=10 {
            buf.push(sample(i * 100, Some(0.0), true));
        }
        assert!(buf.stable_for(1000, Timestamp::from_millis(1000)));

        buf.push(sample(1100, Some(0.0), false));
        assert!(!buf.stable_for(500, Timestamp::from_millis(1100)));

        for i in 12..=16 {
            buf.push(sample(i * 100, Some(0.0), true));
        }
        // Run restarted at 1200 ms.
        assert!(!buf.stable_for(500, Timestamp::from_millis(1600)));
        buf.push(sample(1700, Some(0.0), true));
        assert!(buf.stable_for(500, Timestamp::from_millis(1700)));
    }

    #[test]
    fn test_stable_for_requires_history() {
        let mut buf = buffer();
        buf.push(sample(0, Some(0.0), true));
        buf.push(sample(100, Some(0.0), true));
        assert!(!buf.stable_for(1000, Timestamp::from_millis(100)));
        assert!(buffer().run_start(|_| true).is_none());
    }

    #[test]
    fn test_visibility_median_ignores_dropout() {
        let mut buf = buffer();
        for (i, critical) in [1.0, 1.0, 0.0, 1.0, 1.0].into_iter().enumerate() {
            let mut f = sample(i as i64 * 100, None, true);
            f.visibility.critical = critical;
            buf.push(f);
        }
        assert_eq!(buf.filtered_visibility(), Some(1.0));
    }

    #[test]
    fn test_clear_leaves_no_history() {
        let mut buf = buffer();
        buf.push(sample(0, Some(-9.0), false));
        buf.clear();
        assert!(buf.is_empty());
        assert!(buf.latest().is_none());
        assert!(!buf.stable_for(0, Timestamp::ZERO));
    }

    #[test]
    fn test_invalid_config() {
        let config = MotionBufferConfig {
            ema_alpha: 0.0,
            ..MotionBufferConfig::default()
        };
        assert!(MotionBuffer::new(config).is_err());
    }
}
