//! Speed schedules - the time-varying playback-speed curve
//!
//! A schedule maps an input sample position to the speed factor active at
//! that position, plus the position of the next change. It is pure and
//! stateless from the stream's perspective; the stream samples it as input
//! is consumed and never caches results across a flush.
//!
//! The module also carries the two static schedule-level estimators:
//! - [`output_sample_count`]: exact output length for a known input length
//! - [`output_duration_us`]: playout duration for a media duration

use crate::engine::expected_output_frame_count;
use crate::format::{SampleFormat, StreamFormat};

/// A playback-speed curve over input sample positions
pub trait SpeedSchedule {
    /// Speed factor active at `sample_position` (must be finite and > 0)
    fn speed_at(&self, sample_position: u64) -> f32;

    /// Sample position of the next speed change strictly after the segment
    /// containing `sample_position`, or `None` if speed stays constant from
    /// there on
    fn next_change_at(&self, sample_position: u64) -> Option<u64>;
}

impl<S: SpeedSchedule + ?Sized> SpeedSchedule for &S {
    fn speed_at(&self, sample_position: u64) -> f32 {
        (**self).speed_at(sample_position)
    }

    fn next_change_at(&self, sample_position: u64) -> Option<u64> {
        (**self).next_change_at(sample_position)
    }
}

/// Piecewise-constant schedule over sorted `(start_sample, speed)` steps
///
/// The first step must start at sample 0 and step positions must be strictly
/// increasing. Each speed holds from its start position up to the next step.
#[derive(Debug, Clone)]
pub struct StepSchedule {
    steps: Vec<(u64, f32)>,
}

impl StepSchedule {
    /// Build a schedule from `(start_sample, speed)` steps
    ///
    /// # Panics
    ///
    /// Panics if `steps` is empty, does not start at sample 0, is not
    /// strictly increasing in position, or contains a non-finite or
    /// non-positive speed. These are construction-time programmer errors.
    pub fn new(steps: Vec<(u64, f32)>) -> Self {
        assert!(!steps.is_empty(), "schedule needs at least one step");
        assert_eq!(steps[0].0, 0, "first step must start at sample 0");
        for window in steps.windows(2) {
            assert!(
                window[0].0 < window[1].0,
                "step positions must be strictly increasing"
            );
        }
        for &(_, speed) in &steps {
            assert!(
                speed.is_finite() && speed > 0.0,
                "speed must be finite and positive, got {speed}"
            );
        }
        Self { steps }
    }

    /// Schedule holding a single speed for the whole stream
    pub fn constant(speed: f32) -> Self {
        Self::new(vec![(0, speed)])
    }
}

impl SpeedSchedule for StepSchedule {
    fn speed_at(&self, sample_position: u64) -> f32 {
        let idx = self.steps.partition_point(|&(start, _)| start <= sample_position);
        self.steps[idx - 1].1
    }

    fn next_change_at(&self, sample_position: u64) -> Option<u64> {
        let idx = self.steps.partition_point(|&(start, _)| start <= sample_position);
        self.steps.get(idx).map(|&(start, _)| start)
    }
}

/// Estimate the exact output sample count for `input_samples` input samples
/// under `schedule`, without running the pipeline
///
/// Walks the schedule's change points from position 0 and sums each
/// segment's frame count independently. Per-segment rounding matches the
/// stream's run-time behavior, so when the schedule's change points align
/// with input sample positions the estimate equals the actual output length.
///
/// # Panics
///
/// Panics if `sample_rate_hz` or `input_samples` is zero.
pub fn output_sample_count<S: SpeedSchedule>(
    schedule: &S,
    sample_rate_hz: u32,
    input_samples: u64,
) -> u64 {
    assert!(sample_rate_hz > 0, "sample rate must be positive");
    assert!(input_samples > 0, "input sample count must be positive");

    let mut output_samples = 0u64;
    let mut position = 0u64;

    while position < input_samples {
        let boundary = schedule
            .next_change_at(position)
            .filter(|&boundary| boundary <= input_samples)
            .unwrap_or(input_samples);
        let speed = schedule.speed_at(position);
        output_samples += expected_output_frame_count(speed, boundary - position);
        position = boundary;
    }

    output_samples
}

/// Convert a media duration to the playout duration produced by `schedule`
///
/// Time-domain mirror of [`output_sample_count`]: walks the change points,
/// accumulates each segment's `duration / speed` in double precision and
/// rounds once at the end.
pub fn output_duration_us<S: SpeedSchedule>(
    schedule: &S,
    sample_rate_hz: u32,
    duration_us: u64,
) -> u64 {
    assert!(sample_rate_hz > 0, "sample rate must be positive");

    // Positions are tracked in samples, durations in microseconds.
    let clock = StreamFormat::new(sample_rate_hz, 1, SampleFormat::I16);
    let mut output_us = 0.0f64;
    let mut segment_start_us = 0u64;
    let mut position = 0u64;

    while segment_start_us < duration_us {
        let speed = schedule.speed_at(position);
        let (segment_end_us, next_position) = match schedule.next_change_at(position) {
            Some(boundary) => (clock.frames_to_duration_us(boundary), boundary),
            None => (duration_us, position),
        };
        let segment_end_us = segment_end_us.min(duration_us);
        output_us += (segment_end_us - segment_start_us) as f64 / speed as f64;
        segment_start_us = segment_end_us;
        position = next_position;
    }

    output_us.round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_schedule_lookup() {
        let schedule = StepSchedule::new(vec![(0, 1.0), (1000, 2.0), (5000, 0.5)]);

        assert_eq!(schedule.speed_at(0), 1.0);
        assert_eq!(schedule.speed_at(999), 1.0);
        assert_eq!(schedule.speed_at(1000), 2.0);
        assert_eq!(schedule.speed_at(4999), 2.0);
        assert_eq!(schedule.speed_at(5000), 0.5);
        assert_eq!(schedule.speed_at(u64::MAX), 0.5);

        assert_eq!(schedule.next_change_at(0), Some(1000));
        assert_eq!(schedule.next_change_at(999), Some(1000));
        assert_eq!(schedule.next_change_at(1000), Some(5000));
        assert_eq!(schedule.next_change_at(5000), None);
    }

    #[test]
    fn test_constant_schedule_never_changes() {
        let schedule = StepSchedule::constant(1.5);
        assert_eq!(schedule.speed_at(0), 1.5);
        assert_eq!(schedule.next_change_at(0), None);
        assert_eq!(schedule.next_change_at(1_000_000), None);
    }

    #[test]
    #[should_panic(expected = "strictly increasing")]
    fn test_unsorted_steps_rejected() {
        StepSchedule::new(vec![(0, 1.0), (500, 2.0), (500, 3.0)]);
    }

    #[test]
    #[should_panic(expected = "finite and positive")]
    fn test_zero_speed_rejected() {
        StepSchedule::new(vec![(0, 0.0)]);
    }

    #[test]
    fn test_output_sample_count_two_segments() {
        // Speed 1.0 on [0, 1000), 2.0 afterwards: 1000 unchanged plus
        // 1000 compressed 2:1.
        let schedule = StepSchedule::new(vec![(0, 1.0), (1000, 2.0)]);
        assert_eq!(output_sample_count(&schedule, 16000, 2000), 1500);
    }

    #[test]
    fn test_output_sample_count_identity() {
        let schedule = StepSchedule::constant(1.0);
        assert_eq!(output_sample_count(&schedule, 44100, 44100), 44100);
    }

    #[test]
    fn test_output_sample_count_rounds_each_segment() {
        // 3 samples at speed 2.0 rounds to 2, not 1: segments round
        // independently, half away from zero.
        let schedule = StepSchedule::new(vec![(0, 2.0), (3, 1.0)]);
        assert_eq!(output_sample_count(&schedule, 16000, 3), 2);
        assert_eq!(output_sample_count(&schedule, 16000, 7), 6);
    }

    #[test]
    fn test_output_duration_identity() {
        let schedule = StepSchedule::constant(1.0);
        assert_eq!(output_duration_us(&schedule, 16000, 125_000), 125_000);
    }

    #[test]
    fn test_output_duration_two_segments() {
        // Boundary at sample 1000 of 16 kHz = 62 500 us; the second half
        // plays at double speed.
        let schedule = StepSchedule::new(vec![(0, 1.0), (1000, 2.0)]);
        assert_eq!(output_duration_us(&schedule, 16000, 125_000), 93_750);
    }

    #[test]
    fn test_output_duration_clips_at_requested_duration() {
        // Change point beyond the queried duration has no effect.
        let schedule = StepSchedule::new(vec![(0, 2.0), (1_000_000, 1.0)]);
        assert_eq!(output_duration_us(&schedule, 16000, 50_000), 25_000);
    }
}
