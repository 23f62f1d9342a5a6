//! PCM stream format description and exact time/size conversions
//!
//! All timestamp math in this crate is integer microseconds. Conversions go
//! through 128-bit intermediates so large frame counts never overflow.

use std::fmt;

/// Sample encoding of a PCM stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Interleaved signed 16-bit little-endian
    I16,
    /// Interleaved 32-bit float
    F32,
}

impl SampleFormat {
    /// Size of one sample in bytes
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::I16 => 2,
            SampleFormat::F32 => 4,
        }
    }
}

/// Format of a raw PCM stream entering or leaving the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    /// Sample rate in Hz
    pub sample_rate_hz: u32,
    /// Number of interleaved channels
    pub channel_count: u16,
    /// Per-sample encoding
    pub sample_format: SampleFormat,
}

impl StreamFormat {
    /// Create a format descriptor
    ///
    /// Validity (non-zero rate and channel count) is checked when the format
    /// is handed to a resampling engine, not here.
    pub fn new(sample_rate_hz: u32, channel_count: u16, sample_format: SampleFormat) -> Self {
        Self {
            sample_rate_hz,
            channel_count,
            sample_format,
        }
    }

    /// Size of one interleaved frame in bytes
    pub fn bytes_per_frame(&self) -> usize {
        self.sample_format.bytes_per_sample() * self.channel_count as usize
    }

    /// Convert a whole-frame count to a duration in microseconds
    ///
    /// Truncating division, matching the rest of the per-segment rounding
    /// policy: 1000 frames at 16 kHz is exactly 62 500 us.
    pub fn frames_to_duration_us(&self, frames: u64) -> u64 {
        (frames as u128 * 1_000_000 / self.sample_rate_hz as u128) as u64
    }

    /// Convert a duration in microseconds to a whole-frame count (truncating)
    pub fn duration_us_to_frames(&self, duration_us: u64) -> u64 {
        (duration_us as u128 * self.sample_rate_hz as u128 / 1_000_000) as u64
    }

    /// Convert a byte count of interleaved frames to a duration in microseconds
    pub fn bytes_to_duration_us(&self, bytes: u64) -> u64 {
        let divisor = self.sample_rate_hz as u128 * self.bytes_per_frame() as u128;
        (bytes as u128 * 1_000_000 / divisor) as u64
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {} ch, {:?}",
            self.sample_rate_hz, self.channel_count, self.sample_format
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_per_frame() {
        let mono = StreamFormat::new(16000, 1, SampleFormat::I16);
        assert_eq!(mono.bytes_per_frame(), 2);

        let stereo = StreamFormat::new(44100, 2, SampleFormat::I16);
        assert_eq!(stereo.bytes_per_frame(), 4);

        let stereo_f32 = StreamFormat::new(48000, 2, SampleFormat::F32);
        assert_eq!(stereo_f32.bytes_per_frame(), 8);
    }

    #[test]
    fn test_frame_duration_round_trip() {
        let format = StreamFormat::new(16000, 1, SampleFormat::I16);
        assert_eq!(format.frames_to_duration_us(1000), 62_500);
        assert_eq!(format.frames_to_duration_us(2000), 125_000);
        assert_eq!(format.duration_us_to_frames(62_500), 1000);
    }

    #[test]
    fn test_bytes_to_duration() {
        let format = StreamFormat::new(16000, 1, SampleFormat::I16);
        // 2000 bytes = 1000 mono i16 frames = 62.5 ms
        assert_eq!(format.bytes_to_duration_us(2000), 62_500);

        let stereo = StreamFormat::new(48000, 2, SampleFormat::I16);
        // One second of stereo i16 at 48 kHz
        assert_eq!(stereo.bytes_to_duration_us(48_000 * 4), 1_000_000);
    }

    #[test]
    fn test_large_frame_counts_do_not_overflow() {
        let format = StreamFormat::new(48000, 2, SampleFormat::I16);
        // ~24 hours of audio
        let frames = 48_000u64 * 60 * 60 * 24;
        assert_eq!(format.frames_to_duration_us(frames), 86_400_000_000);
    }
}
