//! Segment timeline - breakpoints pairing media time with playout time
//!
//! Every speed change closes the currently open segment and records a
//! breakpoint: the input time and the accumulated output time at which the
//! new speed takes effect. Within an epoch (the span between two
//! flush/reset events) the timeline is append-only and strictly increasing
//! in both coordinates.
//!
//! Mapping through the open segment goes through an incremental cursor so
//! repeated queries accumulate rounding consistently instead of recomputing
//! from the segment start every time. Closed segments no longer have their
//! speed curve available, so they are interpolated linearly from the
//! recorded spans; that approximation is the accepted precision trade-off.

/// Time coordinates at which a constant-speed segment begins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSegment {
    /// Segment start on the media (input) timeline, in microseconds
    pub input_start_us: u64,
    /// Segment start on the playout (output) timeline, in microseconds
    pub output_start_us: u64,
}

/// Ordered, append-only-within-an-epoch sequence of breakpoints
#[derive(Debug)]
pub struct SegmentTimeline {
    segments: Vec<TimeSegment>,
    /// Media time of the last input-to-output mapping
    cursor_input_us: u64,
    /// Playout time of the last input-to-output mapping
    cursor_output_us: u64,
}

impl SegmentTimeline {
    /// Timeline holding only the origin breakpoint `(0, 0)`
    pub fn new() -> Self {
        Self {
            segments: vec![TimeSegment {
                input_start_us: 0,
                output_start_us: 0,
            }],
            cursor_input_us: 0,
            cursor_output_us: 0,
        }
    }

    /// Drop all breakpoints and the cursor, starting a new epoch
    pub fn clear(&mut self) {
        self.segments.clear();
        self.segments.push(TimeSegment {
            input_start_us: 0,
            output_start_us: 0,
        });
        self.cursor_input_us = 0;
        self.cursor_output_us = 0;
    }

    /// The breakpoints recorded so far, origin included
    pub fn segments(&self) -> &[TimeSegment] {
        &self.segments
    }

    /// Media time at which the open segment starts
    pub fn open_segment_input_start_us(&self) -> u64 {
        self.segments[self.segments.len() - 1].input_start_us
    }

    /// Close the open segment at `input_time_us` and open the next one
    ///
    /// `playout_of` converts a media duration to a playout duration at the
    /// speed that is being replaced; the new breakpoint's output coordinate
    /// is the previous one plus the closed segment's playout span.
    pub fn append_breakpoint(&mut self, input_time_us: u64, playout_of: impl Fn(u64) -> u64) {
        let last = self.segments[self.segments.len() - 1];
        let media_duration_us = input_time_us - last.input_start_us;
        let breakpoint = TimeSegment {
            input_start_us: input_time_us,
            output_start_us: last.output_start_us + playout_of(media_duration_us),
        };
        debug_assert!(
            breakpoint.input_start_us > last.input_start_us
                && breakpoint.output_start_us > last.output_start_us,
            "breakpoints must strictly increase in both coordinates"
        );
        self.segments.push(breakpoint);
    }

    /// Index of the last segment with `input_start_us <= input_time_us`
    fn floor_by_input(&self, input_time_us: u64) -> usize {
        let mut idx = self.segments.len() - 1;
        while idx > 0 && self.segments[idx].input_start_us > input_time_us {
            idx -= 1;
        }
        idx
    }

    /// Index of the last segment with `output_start_us <= output_time_us`
    fn floor_by_output(&self, output_time_us: u64) -> usize {
        let mut idx = self.segments.len() - 1;
        while idx > 0 && self.segments[idx].output_start_us > output_time_us {
            idx -= 1;
        }
        idx
    }

    /// Map a media time to the playout time it is emitted at
    ///
    /// `playout_at_current_speed` converts a media duration to a playout
    /// duration at the speed of the open segment. Callers must present
    /// non-decreasing `input_time_us` values within an epoch; the cursor
    /// advances with every call.
    pub fn map_input_to_output(
        &mut self,
        input_time_us: u64,
        playout_at_current_speed: impl Fn(u64) -> u64,
    ) -> u64 {
        let floor = self.floor_by_input(input_time_us);
        let segment_output_duration_us = if floor == self.segments.len() - 1 {
            // Open segment: snap the cursor forward to the segment start if
            // it still points into an already-closed segment.
            if self.cursor_input_us < self.segments[floor].input_start_us {
                self.cursor_input_us = self.segments[floor].input_start_us;
                self.cursor_output_us = self.segments[floor].output_start_us;
            }
            playout_at_current_speed(input_time_us - self.cursor_input_us)
        } else {
            let span_in = self.segments[floor + 1].input_start_us
                - self.segments[floor].input_start_us;
            let span_out = self.segments[floor + 1].output_start_us
                - self.segments[floor].output_start_us;
            let media_duration_us = input_time_us - self.cursor_input_us;
            (media_duration_us as f64 * span_out as f64 / span_in as f64).round() as u64
        };
        self.cursor_input_us = input_time_us;
        self.cursor_output_us += segment_output_duration_us;
        self.cursor_output_us
    }

    /// Map a playout time back to the media time that produced it
    ///
    /// `media_at_current_speed` inverts the open segment's conversion.
    /// Closed segments apply the inverse interpolation ratio. This mapping
    /// is cursor-free and leaves the timeline untouched.
    pub fn map_output_to_input(
        &self,
        output_time_us: u64,
        media_at_current_speed: impl Fn(u64) -> u64,
    ) -> u64 {
        let floor = self.floor_by_output(output_time_us);
        let segment_output_duration_us = output_time_us - self.segments[floor].output_start_us;
        let segment_input_duration_us = if floor == self.segments.len() - 1 {
            media_at_current_speed(segment_output_duration_us)
        } else {
            let span_in = self.segments[floor + 1].input_start_us
                - self.segments[floor].input_start_us;
            let span_out = self.segments[floor + 1].output_start_us
                - self.segments[floor].output_start_us;
            (segment_output_duration_us as f64 * span_in as f64 / span_out as f64).round() as u64
        };
        self.segments[floor].input_start_us + segment_input_duration_us
    }
}

impl Default for SegmentTimeline {
    fn default() -> Self {
        Self::new()
    }
}
