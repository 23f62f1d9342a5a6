//! Speed-changing audio stream with exact media/playout time bookkeeping
//!
//! This crate applies a time-varying playback-speed schedule to a raw PCM
//! stream and keeps a queryable bidirectional mapping between media time
//! (the original input timeline) and playout time (the stretched output
//! timeline):
//! - **Schedule**: piecewise-constant speed curve over input sample positions
//! - **Stream**: splits input exactly at schedule boundaries and drives a
//!   resampling engine through each constant-speed segment
//! - **Timeline**: breakpoint record translating between the two timelines
//! - **Queries**: synchronous when enough input is processed, otherwise
//!   deferred and resolved as output is drained - safely from any thread
//!
//! The resampling algorithm itself stays behind the [`ResamplingEngine`]
//! trait; a linear-interpolation engine is bundled for complete pipelines
//! and tests.

mod engine;
mod error;
mod format;
mod query;
mod schedule;
mod stream;
mod timeline;

pub use engine::{expected_output_frame_count, LinearResampler, ResamplingEngine};
pub use error::{StreamError, StreamResult};
pub use format::{SampleFormat, StreamFormat};
pub use query::TimestampCallback;
pub use schedule::{output_duration_us, output_sample_count, SpeedSchedule, StepSchedule};
pub use stream::SpeedChangingStream;
pub use timeline::{SegmentTimeline, TimeSegment};
