//! Capture source seam
//!
//! The pipeline does not know how frames or PCM buffers are produced; it only
//! sees this contract. Platform capture backends (screen, loopback audio)
//! implement `SampleSource` and push timestamped raw samples into the
//! `SampleSink` they are handed on start.

use crate::encoder::feed::FeedQueue;
use crate::error::PipelineResult;
use crate::sample::{RawSample, TrackKind};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Opaque proof that the user granted capture for this session
///
/// Obtained once by the embedding application (OS permission prompt, session
/// broker, etc.) before the pipeline is started; the pipeline never inspects
/// it beyond handing it to each source.
#[derive(Clone)]
pub struct CaptureAuthorization {
    grant_id: Arc<str>,
}

impl CaptureAuthorization {
    /// Wrap a grant identifier returned by the platform permission flow
    pub fn from_grant(grant_id: impl Into<String>) -> Self {
        Self {
            grant_id: grant_id.into().into(),
        }
    }

    pub fn grant_id(&self) -> &str {
        &self.grant_id
    }
}

impl fmt::Debug for CaptureAuthorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureAuthorization").finish_non_exhaustive()
    }
}

/// Handle a source uses to deliver raw samples to its encoder
///
/// Cloneable; all clones feed the same bounded queue. `push` takes ownership
/// of the sample and may block briefly under backpressure, so call it from a
/// dedicated capture thread rather than an async task.
#[derive(Clone)]
pub struct SampleSink {
    pub(crate) queue: Arc<FeedQueue>,
}

impl SampleSink {
    /// Hand one raw sample to the encoder
    ///
    /// Fails with `EncoderClosed` after the pipeline has begun stopping.
    pub fn push(&self, sample: RawSample) -> PipelineResult<()> {
        self.queue.push(sample)
    }

    /// Which track this sink feeds
    pub fn kind(&self) -> TrackKind {
        self.queue.kind()
    }
}

impl fmt::Debug for SampleSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleSink")
            .field("kind", &self.kind())
            .finish()
    }
}

/// A producer of raw timestamped media samples
///
/// Two instances exist per recording: one video, one audio. Implementations
/// own their capture thread; `start` must return once production is under
/// way, `stop` once no further samples will be pushed.
#[async_trait]
pub trait SampleSource: Send {
    /// Which track this source produces
    fn kind(&self) -> TrackKind;

    /// Begin producing samples into `sink`
    ///
    /// A rejected or revoked authorization surfaces as `PermissionDenied`.
    async fn start(
        &mut self,
        auth: &CaptureAuthorization,
        sink: SampleSink,
    ) -> PipelineResult<()>;

    /// Stop producing. Must be safe to call after a failed `start`.
    async fn stop(&mut self) -> PipelineResult<()>;
}
