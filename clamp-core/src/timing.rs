//! Millisecond to sample-count conversions for the host tick period.

use core::fmt;

/// Absorbs representation error such as `1000.0 / 0.1` landing just below an
/// integer before truncation.
const SAMPLE_EPSILON: f64 = 1e-9;

/// Active sampling period of the host tick, in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplePeriod(f64);

impl SamplePeriod {
    /// Validates a period in milliseconds. Rejects zero, negative, and
    /// non-finite values.
    #[must_use]
    pub const fn from_ms(period_ms: f64) -> Option<Self> {
        if period_ms.is_finite() && period_ms > 0.0 {
            Some(Self(period_ms))
        } else {
            None
        }
    }

    /// Period length in milliseconds.
    #[must_use]
    pub const fn as_ms(self) -> f64 {
        self.0
    }

    /// Number of whole samples covering `duration_ms`.
    ///
    /// Truncates toward zero. Negative durations produce negative counts,
    /// which lets callers express "ends before the first sample".
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn samples(self, duration_ms: f64) -> i64 {
        let raw = duration_ms / self.0;
        if raw >= 0.0 {
            (raw + SAMPLE_EPSILON).floor() as i64
        } else {
            (raw - SAMPLE_EPSILON).ceil() as i64
        }
    }

    /// Sample count converted to a buffer length, clamping negatives to zero.
    #[must_use]
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    pub fn sample_len(self, duration_ms: f64) -> usize {
        self.samples(duration_ms).max(0) as usize
    }
}

impl fmt::Display for SamplePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_degenerate_periods() {
        assert!(SamplePeriod::from_ms(0.0).is_none());
        assert!(SamplePeriod::from_ms(-1.0).is_none());
        assert!(SamplePeriod::from_ms(f64::NAN).is_none());
        assert!(SamplePeriod::from_ms(f64::INFINITY).is_none());
    }

    #[test]
    fn converts_fractional_periods_without_losing_a_sample() {
        let period = SamplePeriod::from_ms(0.1).expect("valid period");
        assert_eq!(period.samples(1000.0), 10_000);
        assert_eq!(period.samples(0.25), 2);
        assert_eq!(period.sample_len(-5.0), 0);
    }
}
