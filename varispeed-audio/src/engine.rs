//! Resampling engine interface and a bundled linear-interpolation engine
//!
//! The speed-changing stream never touches sample data itself; it feeds
//! whole frames to a [`ResamplingEngine`] and reads stretched output back.
//! The engine is the sole owner of sample-level processing state, and the
//! stream guarantees every call into it happens inside the stream's own
//! critical section.
//!
//! [`LinearResampler`] is a deliberately simple engine: varispeed playback
//! by linear interpolation, so pitch follows speed. It exists so the
//! pipeline runs end to end without an external DSP dependency; a
//! higher-quality pitch-preserving engine can be dropped in behind the same
//! trait.

use crate::error::{StreamError, StreamResult};
use crate::format::{SampleFormat, StreamFormat};

/// Exact output frame count for `input_frames` frames played at `speed`
///
/// One segment's worth of the engine's duration conversion: rounded half
/// away from zero, independently of any neighboring segment.
pub fn expected_output_frame_count(speed: f32, input_frames: u64) -> u64 {
    (input_frames as f64 / speed as f64).round() as u64
}

/// A time-stretching engine the stream delegates sample processing to
///
/// Lifecycle: `configure` once, then any number of
/// `queue_input`/`get_output` cycles terminated by `queue_end_of_stream`.
/// `flush` discards buffered samples and re-opens the engine after an
/// end-of-stream signal, so the stream can start the next speed segment
/// within the same epoch. `reset` additionally restores default speed and
/// pitch.
pub trait ResamplingEngine {
    /// Validate `format` and return the output format the engine will emit
    fn configure(&mut self, format: &StreamFormat) -> StreamResult<StreamFormat>;

    /// Set the playback speed factor for subsequently queued input
    fn set_speed(&mut self, speed: f32);

    /// Set the pitch factor for subsequently queued input
    fn set_pitch(&mut self, pitch: f32);

    /// Queue raw input bytes; returns the number of bytes accepted
    ///
    /// The engine consumes whole frames only. The returned count is always
    /// a multiple of the configured frame size.
    fn queue_input(&mut self, input: &[u8]) -> usize;

    /// Signal that no more input arrives for the current segment
    fn queue_end_of_stream(&mut self);

    /// Append all currently available output bytes to `out`
    fn get_output(&mut self, out: &mut Vec<u8>);

    /// Whether end-of-stream was signaled and all output has been drained
    fn is_ended(&self) -> bool;

    /// Discard buffered input and output and re-open the engine
    ///
    /// Speed, pitch and format survive. The processed-input byte counter
    /// restarts at zero.
    fn flush(&mut self);

    /// Flush and restore default speed and pitch (1.0)
    fn reset(&mut self);

    /// Convert a media duration to a playout duration at the current speed
    fn convert_to_playout_duration(&self, media_duration_us: u64) -> u64;

    /// Convert a playout duration to a media duration at the current speed
    fn convert_to_media_duration(&self, playout_duration_us: u64) -> u64;

    /// Input bytes consumed since the last flush or reset
    fn processed_input_byte_count(&self) -> u64;
}

/// Varispeed resampler using linear interpolation over interleaved i16 PCM
///
/// Output frame `n` is sampled at input position `n * speed`. While input is
/// still arriving the last buffered frame is held back (its interpolation
/// partner has not arrived); on end-of-stream the tail is emitted so that
/// the total output length equals [`expected_output_frame_count`] exactly.
pub struct LinearResampler {
    format: Option<StreamFormat>,
    speed: f32,
    pitch: f32,
    /// Interleaved samples buffered for the current segment
    input: Vec<i16>,
    /// Stretched output bytes awaiting `get_output`
    output: Vec<u8>,
    /// Fractional input-frame position of the next output frame
    read_pos: f64,
    frames_emitted: u64,
    processed_input_bytes: u64,
    input_ended: bool,
}

impl LinearResampler {
    pub fn new() -> Self {
        Self {
            format: None,
            speed: 1.0,
            pitch: 1.0,
            input: Vec::new(),
            output: Vec::new(),
            read_pos: 0.0,
            frames_emitted: 0,
            processed_input_bytes: 0,
            input_ended: false,
        }
    }

    fn format(&self) -> &StreamFormat {
        self.format
            .as_ref()
            .expect("engine used before configure()")
    }

    fn frames_buffered(&self) -> usize {
        self.input.len() / self.format().channel_count as usize
    }

    /// Emit one output frame interpolated at `read_pos`, clamped to the
    /// final buffered frame
    fn emit_frame(&mut self) {
        let channels = self.format().channel_count as usize;
        let frames = self.frames_buffered();
        let idx0 = (self.read_pos.floor() as usize).min(frames - 1);
        let idx1 = (idx0 + 1).min(frames - 1);
        let frac = (self.read_pos - idx0 as f64).clamp(0.0, 1.0);

        for channel in 0..channels {
            let a = self.input[idx0 * channels + channel] as f64;
            let b = self.input[idx1 * channels + channel] as f64;
            let value = a + (b - a) * frac;
            let sample = value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
            self.output.extend_from_slice(&sample.to_le_bytes());
        }

        self.read_pos += self.speed as f64;
        self.frames_emitted += 1;
    }

    /// Emit every frame whose interpolation partner is already buffered
    fn emit_available(&mut self) {
        let frames = self.frames_buffered();
        while (self.read_pos.floor() as usize) + 1 < frames {
            self.emit_frame();
        }
    }

    /// Emit the tail after end-of-stream so the segment's total output
    /// length matches the static estimate exactly
    fn emit_tail(&mut self) {
        if self.frames_buffered() == 0 {
            return;
        }
        let expected = expected_output_frame_count(self.speed, self.frames_buffered() as u64);
        while self.frames_emitted < expected {
            self.emit_frame();
        }
    }
}

impl Default for LinearResampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResamplingEngine for LinearResampler {
    fn configure(&mut self, format: &StreamFormat) -> StreamResult<StreamFormat> {
        if format.sample_format != SampleFormat::I16
            || format.sample_rate_hz == 0
            || format.channel_count == 0
        {
            return Err(StreamError::UnsupportedFormat { format: *format });
        }
        self.format = Some(*format);
        self.flush();
        // Speed changing does not alter the sample rate or layout.
        Ok(*format)
    }

    fn set_speed(&mut self, speed: f32) {
        assert!(
            speed.is_finite() && speed > 0.0,
            "speed must be finite and positive, got {speed}"
        );
        self.speed = speed;
    }

    fn set_pitch(&mut self, pitch: f32) {
        assert!(
            pitch.is_finite() && pitch > 0.0,
            "pitch must be finite and positive, got {pitch}"
        );
        // A plain resampler cannot decouple pitch from speed; the value is
        // recorded so a caller can observe what was requested.
        self.pitch = pitch;
    }

    fn queue_input(&mut self, input: &[u8]) -> usize {
        let bytes_per_frame = self.format().bytes_per_frame();
        let usable = input.len() - input.len() % bytes_per_frame;

        for sample_bytes in input[..usable].chunks_exact(2) {
            self.input
                .push(i16::from_le_bytes([sample_bytes[0], sample_bytes[1]]));
        }
        self.processed_input_bytes += usable as u64;
        self.emit_available();
        usable
    }

    fn queue_end_of_stream(&mut self) {
        if self.input_ended {
            return;
        }
        self.input_ended = true;
        self.emit_tail();
    }

    fn get_output(&mut self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.output);
        self.output.clear();
    }

    fn is_ended(&self) -> bool {
        self.input_ended && self.output.is_empty()
    }

    fn flush(&mut self) {
        self.input.clear();
        self.output.clear();
        self.read_pos = 0.0;
        self.frames_emitted = 0;
        self.processed_input_bytes = 0;
        self.input_ended = false;
    }

    fn reset(&mut self) {
        self.flush();
        self.speed = 1.0;
        self.pitch = 1.0;
    }

    fn convert_to_playout_duration(&self, media_duration_us: u64) -> u64 {
        (media_duration_us as f64 / self.speed as f64).round() as u64
    }

    fn convert_to_media_duration(&self, playout_duration_us: u64) -> u64 {
        (playout_duration_us as f64 * self.speed as f64).round() as u64
    }

    fn processed_input_byte_count(&self) -> u64 {
        self.processed_input_bytes
    }
}
