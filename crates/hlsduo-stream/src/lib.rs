//! # hlsduo-stream
//!
//! The stream lifecycle manager. One [`StreamCoordinator`] owns:
//!
//! - a lazily opened, memory-mapped [`SourceBuffer`] shared read-only by
//!   both pipelines and released exactly once on close;
//! - two [`Pipeline`]s, `play` and `push`, each supervising at most one
//!   external transcoder process through an explicit state machine
//!   (`Idle -> Starting -> Active -> Stopping -> Idle`);
//! - per pipeline, a rolling [`SegmentIndex`] (newest six segments) kept in
//!   sync with the transcoder's output directory.
//!
//! Start/stop for the same pipeline is strictly serialized; the two
//! pipelines never wait on each other.

pub mod buffer;
pub mod coordinator;
pub mod pipeline;
pub mod segment;
pub mod tail;

pub use buffer::{SourceBuffer, SourceView};
pub use coordinator::{StreamCoordinator, StreamSettings, StreamStarted};
pub use pipeline::{Fault, Pipeline, PipelineState, PipelineStatus};
pub use segment::{Segment, SegmentIndex, SegmentPayload, TARGET_DURATION, WINDOW_SIZE};
