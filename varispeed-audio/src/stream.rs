//! Speed-changing stream - the core processor
//!
//! Drives input through the resampling engine, splitting buffers exactly at
//! schedule boundaries, and keeps the segment timeline and the deferred
//! query queue consistent while doing so.
//!
//! # Threading
//!
//! The stream spawns no threads. One caller thread typically pushes input
//! and pulls output; any number of other threads may ask for time
//! translations. All shared state sits in a single `Inner` struct behind one
//! `parking_lot::Mutex`, and every public operation holds that lock for its
//! whole (computation-only) duration. Deferred callbacks run synchronously
//! on whichever thread drains them, with the lock held: callbacks must not
//! block and must not call back into the stream.

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::engine::ResamplingEngine;
use crate::error::StreamResult;
use crate::format::StreamFormat;
use crate::query::{PendingQuery, QueryQueue, TimestampCallback};
use crate::schedule::{self, SpeedSchedule};
use crate::timeline::{SegmentTimeline, TimeSegment};

/// Applies a time-varying playback-speed schedule to a sample stream while
/// maintaining an exact bidirectional media/playout time mapping
///
/// See the [module docs](self) for the threading model. Flush and reset
/// start a new epoch; pending deferred queries deliberately survive both
/// (callers may register queries before flushing) and resolve against the
/// new epoch's timeline.
pub struct SpeedChangingStream<S, E> {
    inner: Mutex<Inner<S, E>>,
}

struct Inner<S, E> {
    schedule: S,
    engine: E,
    format: Option<StreamFormat>,
    timeline: SegmentTimeline,
    pending: QueryQueue,
    current_speed: f32,
    /// Input frames consumed since the last flush or reset
    frames_read: u64,
    /// Media time for which output is guaranteed already available
    last_processed_input_time_us: u64,
    /// Admission high-water mark for async queries
    async_high_water_us: Option<u64>,
    input_ended: bool,
    eos_queued_to_engine: bool,
}

impl<S: SpeedSchedule, E: ResamplingEngine> SpeedChangingStream<S, E> {
    /// Create a stream over `schedule`, delegating resampling to `engine`
    pub fn new(schedule: S, engine: E) -> Self {
        Self {
            inner: Mutex::new(Inner {
                schedule,
                engine,
                format: None,
                timeline: SegmentTimeline::new(),
                pending: QueryQueue::new(),
                current_speed: 1.0,
                frames_read: 0,
                last_processed_input_time_us: 0,
                async_high_water_us: None,
                input_ended: false,
                eos_queued_to_engine: false,
            }),
        }
    }

    /// Validate the input format against the engine and start a fresh epoch
    pub fn configure(&self, format: &StreamFormat) -> StreamResult<StreamFormat> {
        let mut inner = self.inner.lock();
        let output_format = inner.engine.configure(format)?;
        inner.format = Some(*format);
        inner.reset_epoch();
        debug!(%format, "stream configured");
        Ok(output_format)
    }

    /// Queue raw input, returning the number of bytes consumed
    ///
    /// Consumption stops at the next schedule boundary so a single buffer
    /// never spans two speed segments; callers loop until the whole buffer
    /// is consumed. Whole frames only: the engine accepting a partial frame
    /// is a contract violation and panics.
    ///
    /// # Panics
    ///
    /// Panics if called before a successful [`configure`](Self::configure).
    pub fn queue_input(&self, input: &[u8]) -> usize {
        let mut inner = self.inner.lock();
        let format = inner
            .format
            .expect("configure() must be called before queue_input()");
        let bytes_per_frame = format.bytes_per_frame() as u64;

        let current_time_us = format.frames_to_duration_us(inner.frames_read);
        let new_speed = inner.schedule.speed_at(inner.frames_read);
        let next_change = inner.schedule.next_change_at(inner.frames_read);
        inner.update_speed(new_speed, current_time_us);

        // Clip so all queued samples share one speed.
        let bytes_to_boundary =
            next_change.map(|boundary| (boundary - inner.frames_read) * bytes_per_frame);
        let limit = match bytes_to_boundary {
            Some(bytes) => (input.len() as u64).min(bytes) as usize,
            None => input.len(),
        };

        let accepted = inner.engine.queue_input(&input[..limit]);
        if bytes_to_boundary == Some(accepted as u64) {
            // The clip landed exactly on the boundary: finalize this
            // segment's output inside the engine.
            inner.engine.queue_end_of_stream();
            inner.eos_queued_to_engine = true;
        }
        assert!(
            accepted as u64 % bytes_per_frame == 0,
            "a frame was not queued completely"
        );
        inner.frames_read += accepted as u64 / bytes_per_frame;
        inner.update_last_processed_input_time(&format);
        accepted
    }

    /// Mark the input as exhausted
    ///
    /// Idempotent. The engine is signaled at most once per epoch, and not
    /// again if a boundary clip already signaled it.
    pub fn queue_end_of_stream(&self) {
        let mut inner = self.inner.lock();
        if inner.input_ended {
            return;
        }
        inner.input_ended = true;
        if !inner.eos_queued_to_engine {
            inner.engine.queue_end_of_stream();
            inner.eos_queued_to_engine = true;
        }
        inner.drain_pending();
    }

    /// Append available stretched output to `out` and resolve any pending
    /// queries that the new high-water mark unblocks
    pub fn get_output(&self, out: &mut Vec<u8>) {
        let mut inner = self.inner.lock();
        inner.engine.get_output(out);
        inner.drain_pending();
    }

    /// Whether the input ended and all output has been drained
    pub fn is_ended(&self) -> bool {
        let inner = self.inner.lock();
        inner.input_ended && inner.engine.is_ended()
    }

    /// Start a new epoch, preserving the current speed
    pub fn flush(&self) {
        let mut inner = self.inner.lock();
        inner.reset_epoch();
        inner.engine.flush();
        debug!("stream flushed");
    }

    /// Start a new epoch and restore the default speed (1.0)
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.reset_epoch();
        inner.current_speed = 1.0;
        inner.engine.reset();
        debug!("stream reset");
    }

    /// Resolve the playout time for `input_time_us`, now or later
    ///
    /// Resolves synchronously (callback invoked before returning) when
    /// enough input has been processed and no older query is still pending,
    /// or when the stream has ended. Otherwise the query parks until output
    /// progress unblocks it; the callback then runs on whichever thread
    /// drains the queue.
    ///
    /// Callable from any thread. Successive calls must use strictly
    /// increasing `input_time_us`.
    ///
    /// # Panics
    ///
    /// Panics if `input_time_us` does not exceed the previous call's value.
    pub fn speed_adjusted_time_async(
        &self,
        input_time_us: u64,
        callback: impl FnOnce(u64) + Send + 'static,
    ) {
        let mut inner = self.inner.lock();
        if let Some(high_water) = inner.async_high_water_us {
            assert!(
                input_time_us > high_water,
                "query times must be strictly increasing: {input_time_us} after {high_water}"
            );
        }
        inner.async_high_water_us = Some(input_time_us);

        let ended = inner.input_ended && inner.engine.is_ended();
        if (input_time_us <= inner.last_processed_input_time_us && inner.pending.is_empty())
            || ended
        {
            let output_time_us = inner.translate(input_time_us);
            trace!(input_time_us, output_time_us, "query resolved synchronously");
            callback(output_time_us);
            return;
        }
        inner.pending.push(PendingQuery {
            input_time_us,
            callback: Box::new(callback) as TimestampCallback,
        });
    }

    /// Map a playout duration back to the media duration that produced it
    ///
    /// Both durations count from the last flush or reset. Caller contract:
    /// `playout_duration_us` must not exceed the last fully processed output
    /// duration; beyond it the open segment's speed is extrapolated.
    pub fn media_duration_us(&self, playout_duration_us: u64) -> u64 {
        let inner = self.inner.lock();
        inner
            .timeline
            .map_output_to_input(playout_duration_us, |us| {
                inner.engine.convert_to_media_duration(us)
            })
    }

    /// Playout duration the whole schedule produces for `duration_us` of
    /// media, independent of how much has been processed
    ///
    /// # Panics
    ///
    /// Panics if called before a successful [`configure`](Self::configure)
    /// (the schedule walk needs the input sample rate).
    pub fn duration_after_speed_applied(&self, duration_us: u64) -> u64 {
        let inner = self.inner.lock();
        let format = inner
            .format
            .expect("configure() must be called before duration_after_speed_applied()");
        schedule::output_duration_us(&inner.schedule, format.sample_rate_hz, duration_us)
    }

    /// Speed factor of the currently open segment
    pub fn current_speed(&self) -> f32 {
        self.inner.lock().current_speed
    }

    /// Copy of the current epoch's breakpoints, for diagnostics
    pub fn timeline_snapshot(&self) -> Vec<TimeSegment> {
        self.inner.lock().timeline.segments().to_vec()
    }
}

impl<S: SpeedSchedule, E: ResamplingEngine> Inner<S, E> {
    /// React to a schedule-reported speed for the upcoming input
    ///
    /// On a transition: record the breakpoint under the outgoing speed,
    /// retune the engine, and flush it. Output of the previous segment not
    /// yet drained is dropped; the ordering contract requires callers to
    /// drain output before pushing input past a boundary.
    fn update_speed(&mut self, new_speed: f32, time_us: u64) {
        if new_speed == self.current_speed {
            return;
        }
        trace!(
            from = self.current_speed as f64,
            to = new_speed as f64,
            at_us = time_us,
            "speed transition"
        );
        let Inner {
            timeline, engine, ..
        } = self;
        // A change at the open segment's start (first input after a flush,
        // or before any frame was consumed) replaces the segment's speed; a
        // zero-length segment would break the strictly-increasing timeline
        // invariant.
        if time_us > timeline.open_segment_input_start_us() {
            timeline.append_breakpoint(time_us, |us| engine.convert_to_playout_duration(us));
        }
        self.current_speed = new_speed;
        self.engine.set_speed(new_speed);
        self.engine.set_pitch(new_speed);
        self.engine.flush();
        self.eos_queued_to_engine = false;
    }

    /// Recompute the durable high-water mark from the engine's processed
    /// byte count
    fn update_last_processed_input_time(&mut self, format: &StreamFormat) {
        let processed_us = format.bytes_to_duration_us(self.engine.processed_input_byte_count());
        self.last_processed_input_time_us =
            self.timeline.open_segment_input_start_us() + processed_us;
    }

    /// Resolve deferred queries from the front while resolvable
    fn drain_pending(&mut self) {
        loop {
            let ended = self.input_ended && self.engine.is_ended();
            let Some(head_time_us) = self.pending.head_input_time_us() else {
                break;
            };
            if head_time_us > self.last_processed_input_time_us && !ended {
                break;
            }
            let query = self.pending.pop().expect("head was just observed");
            let output_time_us = self.translate(query.input_time_us);
            trace!(
                input_time_us = query.input_time_us,
                output_time_us,
                "deferred query resolved"
            );
            (query.callback)(output_time_us);
        }
    }

    fn translate(&mut self, input_time_us: u64) -> u64 {
        let Inner {
            timeline, engine, ..
        } = self;
        timeline.map_input_to_output(input_time_us, |us| engine.convert_to_playout_duration(us))
    }

    /// Clear per-epoch state; speed and pending queries survive
    fn reset_epoch(&mut self) {
        self.timeline.clear();
        self.last_processed_input_time_us = 0;
        self.frames_read = 0;
        self.input_ended = false;
        self.eos_queued_to_engine = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LinearResampler;
    use crate::format::SampleFormat;
    use crate::schedule::StepSchedule;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    fn mono_16k() -> StreamFormat {
        StreamFormat::new(16000, 1, SampleFormat::I16)
    }

    /// Speed 1.0 on samples [0, 1000), 2.0 afterwards
    fn two_speed_stream() -> SpeedChangingStream<StepSchedule, LinearResampler> {
        let schedule = StepSchedule::new(vec![(0, 1.0), (1000, 2.0)]);
        let stream = SpeedChangingStream::new(schedule, LinearResampler::new());
        stream.configure(&mono_16k()).unwrap();
        stream
    }

    fn silence_frames(count: usize) -> Vec<u8> {
        vec![0u8; count * 2]
    }

    /// Push frames through the stream, draining output between boundary
    /// splits, and return the total output byte count
    fn run_through(
        stream: &SpeedChangingStream<StepSchedule, LinearResampler>,
        input: &[u8],
    ) -> usize {
        let mut drained = Vec::new();
        let mut offset = 0;
        while offset < input.len() {
            stream.get_output(&mut drained);
            offset += stream.queue_input(&input[offset..]);
        }
        stream.queue_end_of_stream();
        stream.get_output(&mut drained);
        drained.len()
    }

    #[test]
    fn test_input_splits_at_schedule_boundary() {
        let stream = two_speed_stream();
        // 2000 frames offered in one buffer; only the 1000 up to the
        // boundary may be consumed in one call.
        let input = silence_frames(2000);
        assert_eq!(stream.queue_input(&input), 2000);
        assert_eq!(stream.queue_input(&input[2000..]), 2000);
    }

    #[test]
    fn test_boundary_records_breakpoint() {
        let stream = two_speed_stream();
        run_through(&stream, &silence_frames(2000));

        let segments = stream.timeline_snapshot();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].input_start_us, 62_500);
        assert_eq!(segments[1].output_start_us, 62_500);
        assert_eq!(stream.current_speed(), 2.0);
    }

    #[test]
    fn test_output_length_matches_static_estimate() {
        let stream = two_speed_stream();
        let output_bytes = run_through(&stream, &silence_frames(2000));
        // 1000 frames unchanged + 1000 compressed 2:1 = 1500 frames.
        assert_eq!(output_bytes / 2, 1500);
        assert!(stream.is_ended());
    }

    #[test]
    fn test_flush_preserves_speed_reset_restores_it() {
        let stream = two_speed_stream();
        run_through(&stream, &silence_frames(2000));
        assert_eq!(stream.current_speed(), 2.0);

        stream.flush();
        assert_eq!(stream.current_speed(), 2.0);
        assert_eq!(stream.timeline_snapshot().len(), 1);
        assert!(!stream.is_ended());

        stream.reset();
        assert_eq!(stream.current_speed(), 1.0);
        assert_eq!(stream.timeline_snapshot().len(), 1);
    }

    #[test]
    fn test_immediate_query_after_processing() {
        let stream = two_speed_stream();
        stream.queue_input(&silence_frames(1000));

        let result = Arc::new(AtomicI64::new(-1));
        let slot = result.clone();
        stream.speed_adjusted_time_async(62_500, move |out| {
            slot.store(out as i64, Ordering::SeqCst);
        });
        assert_eq!(result.load(Ordering::SeqCst), 62_500);
    }

    #[test]
    fn test_deferred_query_resolves_when_output_drained() {
        let stream = two_speed_stream();

        let result = Arc::new(AtomicI64::new(-1));
        let slot = result.clone();
        stream.speed_adjusted_time_async(100_000, move |out| {
            slot.store(out as i64, Ordering::SeqCst);
        });
        // Nothing processed yet: still pending.
        assert_eq!(result.load(Ordering::SeqCst), -1);

        run_through(&stream, &silence_frames(2000));
        // 100 000 us = 62 500 + 37 500 media, second half at speed 2.0.
        assert_eq!(result.load(Ordering::SeqCst), 81_250);
    }

    #[test]
    fn test_query_behind_pending_head_stays_queued() {
        let stream = two_speed_stream();
        let order = Arc::new(AtomicI64::new(0));

        // First query is unresolvable when admitted. By the time the second
        // arrives its own time is already processed, but it still must queue
        // behind the older pending query and resolve after it.
        let o1 = order.clone();
        stream.speed_adjusted_time_async(70_000, move |_| {
            o1.compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
                .unwrap();
        });
        stream.queue_input(&silence_frames(1000));
        stream.queue_input(&silence_frames(1000));
        let o2 = order.clone();
        stream.speed_adjusted_time_async(70_001, move |_| {
            o2.compare_exchange(1, 2, Ordering::SeqCst, Ordering::SeqCst)
                .unwrap();
        });
        assert_eq!(order.load(Ordering::SeqCst), 0);

        stream.queue_end_of_stream();
        assert_eq!(order.load(Ordering::SeqCst), 2);
    }

    #[test]
    #[should_panic(expected = "strictly increasing")]
    fn test_non_monotonic_query_times_panic() {
        let stream = two_speed_stream();
        stream.speed_adjusted_time_async(1000, |_| {});
        stream.speed_adjusted_time_async(1000, |_| {});
    }

    #[test]
    #[should_panic(expected = "configure()")]
    fn test_queue_input_before_configure_panics() {
        let stream =
            SpeedChangingStream::new(StepSchedule::constant(1.0), LinearResampler::new());
        stream.queue_input(&[0, 0]);
    }

    #[test]
    fn test_media_duration_inverts_playout_duration() {
        let stream = two_speed_stream();
        run_through(&stream, &silence_frames(2000));
        assert_eq!(stream.media_duration_us(62_500), 62_500);
        assert_eq!(stream.media_duration_us(93_750), 125_000);
    }

    #[test]
    fn test_duration_after_speed_applied() {
        let stream = two_speed_stream();
        assert_eq!(stream.duration_after_speed_applied(125_000), 93_750);
    }

    #[test]
    fn test_end_of_stream_is_idempotent() {
        let stream = two_speed_stream();
        stream.queue_input(&silence_frames(500));
        stream.queue_end_of_stream();
        stream.queue_end_of_stream();

        let mut out = Vec::new();
        stream.get_output(&mut out);
        assert_eq!(out.len() / 2, 500);
        assert!(stream.is_ended());
    }
}
