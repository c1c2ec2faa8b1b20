//! Adaptive resolution
//!
//! The number of samples requested per series is tuned after every fetch so the
//! total number of rendered points stays near `max_data_points_soft`. Small
//! corrections are ignored so that noisy result sizes don't cause a re-fetch on
//! every poll.

use crate::config::SamplingLimits;

/// What to do with a fetched result set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleDecision {
    /// Render at the current sample count
    Keep,
    /// Discard the result and re-fetch with this many samples
    Resample(usize),
    /// Already at minimum resolution and still over the hard limit
    DatasetTooLarge,
}

/// Sample bounds for one span
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    limits: SamplingLimits,
    max_for_span: usize,
}

impl Resolution {
    /// Bounds for `span` milliseconds. `default_samples` replaces the span-derived
    /// maximum but is still kept inside the configured range.
    pub fn new(limits: SamplingLimits, span: f64, default_samples: Option<usize>) -> Self {
        let max_for_span = match default_samples {
            Some(samples) => samples.clamp(limits.min_samples, limits.max_samples),
            None => max_samples_for_span(&limits, span),
        };
        Self { limits, max_for_span }
    }

    pub fn min_samples(&self) -> usize {
        self.limits.min_samples
    }

    pub fn max_samples_for_span(&self) -> usize {
        self.max_for_span
    }

    /// Keep an existing sample count inside the bounds for this span
    pub fn clamp(&self, samples: usize) -> usize {
        samples.clamp(self.limits.min_samples, self.max_for_span)
    }

    /// Decide whether `num_data_points` fetched at `samples` can be rendered
    pub fn adjust(&self, samples: usize, num_data_points: usize) -> SampleDecision {
        let min = self.limits.min_samples;
        let max = self.max_for_span;

        if num_data_points >= self.limits.max_data_points_hard && samples <= min {
            return SampleDecision::DatasetTooLarge;
        }

        let new_samples = if num_data_points == 0 {
            max
        } else {
            let scaled = samples as f64 * self.limits.max_data_points_soft as f64
                / num_data_points as f64;
            (scaled.floor() as usize).clamp(min, max)
        };

        if new_samples == samples {
            return SampleDecision::Keep;
        }

        let change = (new_samples as f64 - samples as f64).abs() / samples.max(1) as f64;
        if change > self.limits.samples_leeway || new_samples == max || new_samples == min {
            SampleDecision::Resample(new_samples)
        } else {
            SampleDecision::Keep
        }
    }
}

/// Limit the sample count so the step never falls below `min_step`
pub fn max_samples_for_span(limits: &SamplingLimits, span: f64) -> usize {
    let samples = (span / limits.min_step).round();
    if !samples.is_finite() || samples < limits.min_samples as f64 {
        return limits.min_samples;
    }
    (samples as usize).clamp(limits.min_samples, limits.max_samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duration::{ONE_DAY, ONE_HOUR, ONE_MINUTE, ONE_SECOND, ONE_WEEK};

    fn resolution(span: f64) -> Resolution {
        Resolution::new(SamplingLimits::default(), span, None)
    }

    #[test]
    fn test_max_samples_for_span_bounds() {
        let limits = SamplingLimits::default();
        for span in [
            1.0,
            ONE_SECOND,
            30.0 * ONE_SECOND,
            5.0 * ONE_MINUTE,
            30.0 * ONE_MINUTE,
            ONE_HOUR,
            ONE_DAY,
            2.0 * ONE_WEEK,
            f64::MAX,
        ] {
            let samples = max_samples_for_span(&limits, span);
            assert!(samples >= limits.min_samples, "span {} gave {}", span, samples);
            assert!(samples <= limits.max_samples, "span {} gave {}", span, samples);
        }
    }

    #[test]
    fn test_max_samples_for_span_values() {
        let limits = SamplingLimits::default();
        // 5m / 5s = 60 samples
        assert_eq!(max_samples_for_span(&limits, 5.0 * ONE_MINUTE), 60);
        assert_eq!(max_samples_for_span(&limits, 30.0 * ONE_MINUTE), 300);
        assert_eq!(max_samples_for_span(&limits, 30.0 * ONE_SECOND), 10);
    }

    #[test]
    fn test_default_samples_is_clamped() {
        let limits = SamplingLimits::default();
        assert_eq!(Resolution::new(limits, ONE_HOUR, Some(5000)).max_samples_for_span(), 300);
        assert_eq!(Resolution::new(limits, ONE_HOUR, Some(1)).max_samples_for_span(), 10);
        assert_eq!(Resolution::new(limits, ONE_HOUR, Some(50)).max_samples_for_span(), 50);
    }

    #[test]
    fn test_keep_within_leeway() {
        let res = resolution(ONE_HOUR);
        // 200 * 6000 / 5000 = 240, a 20% change, not more than the leeway
        assert_eq!(res.adjust(200, 5000), SampleDecision::Keep);
        // 200 * 6000 / 6000 = 200
        assert_eq!(res.adjust(200, 6000), SampleDecision::Keep);
    }

    #[test]
    fn test_resample_past_leeway() {
        let res = resolution(ONE_HOUR);
        // 300 * 6000 / 12000 = 150
        assert_eq!(res.adjust(300, 12000), SampleDecision::Resample(150));
        // 100 * 6000 / 3000 = 200
        assert_eq!(res.adjust(100, 3000), SampleDecision::Resample(200));
    }

    #[test]
    fn test_resample_to_bounds() {
        let res = resolution(ONE_HOUR);
        // 280 * 6000 / 5500 = 305 -> clamped to 300, a small change but at the bound
        assert_eq!(res.adjust(280, 5500), SampleDecision::Resample(300));
        // 11 * 6000 / 6500 = 10 -> lower bound
        assert_eq!(res.adjust(11, 6500), SampleDecision::Resample(10));
        // Already at the bound
        assert_eq!(res.adjust(300, 100), SampleDecision::Keep);
    }

    #[test]
    fn test_no_data_points() {
        let res = resolution(ONE_HOUR);
        assert_eq!(res.adjust(300, 0), SampleDecision::Keep);
        assert_eq!(res.adjust(120, 0), SampleDecision::Resample(300));
    }

    #[test]
    fn test_dataset_too_large_at_hard_limit() {
        let res = resolution(ONE_HOUR);
        assert_eq!(res.adjust(10, 10000), SampleDecision::DatasetTooLarge);
        assert_eq!(res.adjust(10, 50000), SampleDecision::DatasetTooLarge);
        assert_eq!(res.adjust(10, 9999), SampleDecision::Keep);
        // Still room to downsample
        assert_eq!(res.adjust(20, 10000), SampleDecision::Resample(12));
    }

    #[test]
    fn test_committed_samples_stay_in_bounds() {
        let limits = SamplingLimits::default();
        for span in [ONE_MINUTE, 10.0 * ONE_MINUTE, ONE_HOUR, ONE_WEEK] {
            let res = Resolution::new(limits, span, None);
            let mut samples = res.max_samples_for_span();
            for points in [0, 1, 50, 3000, 6000, 9000, 20000, 1_000_000, 7] {
                if let SampleDecision::Resample(next) = res.adjust(samples, points) {
                    samples = next;
                }
                assert!(samples >= limits.min_samples && samples <= limits.max_samples);
            }
        }
    }

    #[test]
    fn test_clamp_after_span_change() {
        let res = resolution(5.0 * ONE_MINUTE);
        assert_eq!(res.clamp(300), 60);
        assert_eq!(res.clamp(1), 10);
    }
}
