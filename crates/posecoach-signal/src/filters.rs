//! Smoothing filters.
//!
//! Angles are smoothed with an exponential moving average; visibility is a
//! step-like signal and goes through a median filter instead, which rejects
//! single-frame dropouts without lagging real transitions.

/// Exponential moving average: `smoothed = α × current + (1 − α) × previous`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ema {
    alpha: f32,
    value: Option<f32>,
}

impl Ema {
    /// Creates a filter with the given smoothing factor, clamped to (0, 1].
    #[must_use]
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha: alpha.clamp(f32::EPSILON, 1.0),
            value: None,
        }
    }

    /// Feeds a sample and returns the smoothed value. The first sample
    /// passes through unchanged.
    pub fn update(&mut self, sample: f32) -> f32 {
        let next = match self.value {
            Some(prev) => blend(self.alpha, sample, prev),
            None => sample,
        };
        self.value = Some(next);
        next
    }

    /// Current smoothed value, if any sample has been seen.
    #[must_use]
    pub fn value(&self) -> Option<f32> {
        self.value
    }

    /// Forgets all history.
    pub fn reset(&mut self) {
        self.value = None;
    }
}

/// One EMA step.
#[inline]
#[must_use]
pub fn blend(alpha: f32, current: f32, previous: f32) -> f32 {
    alpha * current + (1.0 - alpha) * previous
}

/// Runs an EMA over a series and returns the final smoothed value.
pub fn ema_last(values: impl IntoIterator<Item = f32>, alpha: f32) -> Option<f32> {
    let mut ema = Ema::new(alpha);
    values.into_iter().fold(None, |_, v| Some(ema.update(v)))
}

/// Median of a slice (sorts a copy). Returns `None` for empty input.
pub fn median(data: &[f32]) -> Option<f32> {
    if data.is_empty() {
        return None;
    }
    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}
