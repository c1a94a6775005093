//! Codec backend seam
//!
//! Platform encoders (hardware H.264, AAC) live behind this trait. The
//! pipeline drives a codec synchronously from the track's drain thread:
//! raw payloads in, zero or more access units out, with the negotiated
//! output format becoming available once enough input has been consumed.

use crate::error::PipelineResult;
use crate::mux::TrackFormat;
use crate::sample::AccessUnit;
use bytes::Bytes;
use std::time::Duration;

/// One encoder backend instance, exclusive to a single track
///
/// Call order: `start`, then any number of `encode`, then `finish` exactly
/// once. A finished codec cannot be restarted; the pipeline allocates a
/// fresh instance per recording.
pub trait Codec: Send {
    /// Initialize the underlying encoder. Failure aborts the pipeline's
    /// `Preparing` phase with `EncoderInitFailed`.
    fn start(&mut self) -> PipelineResult<()>;

    /// Encode one raw payload captured at `pts` (already rebased to the
    /// recording epoch). May return no units while the codec buffers input.
    fn encode(&mut self, payload: Bytes, pts: Duration) -> PipelineResult<Vec<AccessUnit>>;

    /// The negotiated output format, once known. Must return `Some` no later
    /// than the first `encode` call that produces units, and must never
    /// change afterwards.
    fn format(&self) -> Option<TrackFormat>;

    /// Flush any buffered input and return the trailing units.
    fn finish(&mut self) -> PipelineResult<Vec<AccessUnit>>;
}
