//! Encoder wrapper
//!
//! Wraps a `Codec` backend and its bounded feed queue into the pull-based
//! contract the pipeline's drain loops consume: `drain()` yields format
//! discovery, access units, idle polls, and end-of-stream as explicit
//! events instead of callbacks.

pub mod codec;
pub(crate) mod feed;

pub use codec::Codec;

use crate::error::{PipelineError, PipelineResult};
use crate::mux::TrackFormat;
use crate::sample::{AccessUnit, TrackKind};
use crate::source::SampleSink;
use feed::{FeedItem, FeedQueue};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One step of draining an encoder
#[derive(Debug)]
pub enum DrainEvent {
    /// The track's output format was discovered. Emitted exactly once,
    /// before any `Unit` for this track.
    Format(TrackFormat),
    /// One encoded access unit, presentation timestamps non-decreasing
    Unit(AccessUnit),
    /// Nothing available within the poll timeout; re-poll
    Idle,
    /// The final unit has been yielded; the encoder is exhausted
    EndOfStream,
}

/// A track encoder: feed queue on one side, codec backend on the other
///
/// Owned by the track's drain thread after start; the feed side only keeps
/// cloned `SampleSink` handles.
pub struct Encoder {
    kind: TrackKind,
    queue: Arc<FeedQueue>,
    codec: Box<dyn Codec>,
    epoch: Instant,
    format_announced: bool,
    pending: VecDeque<AccessUnit>,
    eos_reached: bool,
    last_pts: Duration,
}

impl Encoder {
    /// Initialize the codec backend and allocate the feed queue
    pub fn start(kind: TrackKind, mut codec: Box<dyn Codec>) -> PipelineResult<Self> {
        codec.start()?;
        Ok(Self {
            kind,
            queue: Arc::new(FeedQueue::new(kind)),
            codec,
            epoch: Instant::now(),
            format_announced: false,
            pending: VecDeque::new(),
            eos_reached: false,
            last_pts: Duration::ZERO,
        })
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// Feed-side handle to hand to the capture source
    pub fn sink(&self) -> SampleSink {
        SampleSink {
            queue: Arc::clone(&self.queue),
        }
    }

    /// Rebase all subsequent presentation timestamps onto `epoch`
    ///
    /// Called once, at the moment the pipeline enters its recording state.
    /// Samples captured before the epoch clamp to presentation time zero.
    pub fn set_epoch(&mut self, epoch: Instant) {
        self.epoch = epoch;
    }

    /// Raw samples dropped so far under backpressure
    pub fn dropped_samples(&self) -> u64 {
        self.queue.dropped()
    }

    /// Reject further feeding. Queued samples still drain normally.
    pub fn stop(&mut self) {
        self.queue.close();
    }

    /// Pull the next event, waiting up to `timeout` for input
    ///
    /// Never blocks longer than `timeout`, so a stop request is observed
    /// within one poll interval.
    pub fn drain(&mut self, timeout: Duration) -> PipelineResult<DrainEvent> {
        loop {
            if !self.format_announced {
                if let Some(format) = self.codec.format() {
                    self.format_announced = true;
                    return Ok(DrainEvent::Format(format));
                }
            }

            if let Some(unit) = self.pending.pop_front() {
                return Ok(DrainEvent::Unit(unit));
            }

            if self.eos_reached {
                return Ok(DrainEvent::EndOfStream);
            }

            match self.queue.pop(timeout) {
                None => return Ok(DrainEvent::Idle),
                Some(FeedItem::Sample(sample)) => {
                    let pts = sample.captured_at.saturating_duration_since(self.epoch);
                    let units = self
                        .codec
                        .encode(sample.payload, pts)
                        .map_err(|e| match e {
                            err @ PipelineError::EncodeFailed(_) => err,
                            other => PipelineError::EncodeFailed(other.to_string()),
                        })?;
                    self.enqueue_units(units, false);
                }
                Some(FeedItem::EndOfStream) => {
                    let units = self.codec.finish().map_err(|e| match e {
                        err @ PipelineError::EncodeFailed(_) => err,
                        other => PipelineError::EncodeFailed(other.to_string()),
                    })?;
                    self.enqueue_units(units, true);
                    self.eos_reached = true;
                }
            }
        }
    }

    /// Queue codec output, enforcing per-track timestamp monotonicity and
    /// flagging the last unit of the stream.
    fn enqueue_units(&mut self, mut units: Vec<AccessUnit>, final_batch: bool) {
        let count = units.len();
        for (i, unit) in units.iter_mut().enumerate() {
            if unit.pts < self.last_pts {
                unit.pts = self.last_pts;
            } else {
                self.last_pts = unit.pts;
            }
            if final_batch && i + 1 == count {
                unit.flags.end_of_stream = true;
            }
        }
        self.pending.extend(units);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{AccessUnitFlags, RawSample};
    use bytes::Bytes;

    /// Codec that emits one keyframe unit per input and discovers its format
    /// on the first encode.
    struct StubCodec {
        format: Option<TrackFormat>,
        fail_encode: bool,
    }

    impl StubCodec {
        fn new() -> Self {
            Self {
                format: None,
                fail_encode: false,
            }
        }
    }

    impl Codec for StubCodec {
        fn start(&mut self) -> PipelineResult<()> {
            Ok(())
        }

        fn encode(&mut self, payload: Bytes, pts: Duration) -> PipelineResult<Vec<AccessUnit>> {
            if self.fail_encode {
                return Err(PipelineError::EncodeFailed("stub failure".into()));
            }
            self.format = Some(TrackFormat::Aac {
                sample_rate: 44_100,
                channels: 2,
                bitrate: 128_000,
            });
            Ok(vec![AccessUnit {
                payload,
                pts,
                duration: Duration::from_micros(23_220),
                flags: AccessUnitFlags {
                    key_frame: true,
                    ..Default::default()
                },
            }])
        }

        fn format(&self) -> Option<TrackFormat> {
            self.format.clone()
        }

        fn finish(&mut self) -> PipelineResult<Vec<AccessUnit>> {
            Ok(vec![])
        }
    }

    const POLL: Duration = Duration::from_millis(10);

    #[test]
    fn test_format_precedes_first_unit() {
        let mut enc = Encoder::start(TrackKind::Audio, Box::new(StubCodec::new())).unwrap();
        let epoch = Instant::now();
        enc.set_epoch(epoch);

        let sink = enc.sink();
        sink.push(RawSample::new(Bytes::from_static(b"a"), epoch)).unwrap();

        assert!(matches!(enc.drain(POLL).unwrap(), DrainEvent::Format(_)));
        assert!(matches!(enc.drain(POLL).unwrap(), DrainEvent::Unit(_)));
        assert!(matches!(enc.drain(POLL).unwrap(), DrainEvent::Idle));
    }

    #[test]
    fn test_end_of_stream_flags_last_unit() {
        let mut enc = Encoder::start(TrackKind::Audio, Box::new(StubCodec::new())).unwrap();
        let epoch = Instant::now();
        enc.set_epoch(epoch);

        let sink = enc.sink();
        sink.push(RawSample::new(Bytes::from_static(b"a"), epoch)).unwrap();
        enc.queue.finish();

        assert!(matches!(enc.drain(POLL).unwrap(), DrainEvent::Format(_)));
        match enc.drain(POLL).unwrap() {
            DrainEvent::Unit(unit) => assert!(!unit.flags.end_of_stream),
            other => panic!("expected unit, got {:?}", other),
        }
        assert!(matches!(enc.drain(POLL).unwrap(), DrainEvent::EndOfStream));
        // Exhausted encoders keep reporting end-of-stream
        assert!(matches!(enc.drain(POLL).unwrap(), DrainEvent::EndOfStream));
    }

    #[test]
    fn test_out_of_order_timestamps_are_clamped() {
        let mut enc = Encoder::start(TrackKind::Audio, Box::new(StubCodec::new())).unwrap();
        let epoch = Instant::now();
        enc.set_epoch(epoch);

        let sink = enc.sink();
        sink.push(RawSample::new(
            Bytes::from_static(b"a"),
            epoch + Duration::from_millis(100),
        ))
        .unwrap();
        // Captured before the previous sample: must not go backwards
        sink.push(RawSample::new(
            Bytes::from_static(b"b"),
            epoch + Duration::from_millis(40),
        ))
        .unwrap();

        let mut pts = Vec::new();
        loop {
            match enc.drain(POLL).unwrap() {
                DrainEvent::Unit(unit) => pts.push(unit.pts),
                DrainEvent::Format(_) => {}
                _ => break,
            }
        }
        assert_eq!(pts.len(), 2);
        assert!(pts[1] >= pts[0]);
    }

    #[test]
    fn test_encode_failure_propagates() {
        let mut codec = StubCodec::new();
        codec.fail_encode = true;
        let mut enc = Encoder::start(TrackKind::Audio, Box::new(codec)).unwrap();
        let epoch = Instant::now();
        enc.set_epoch(epoch);

        enc.sink()
            .push(RawSample::new(Bytes::from_static(b"a"), epoch))
            .unwrap();
        assert!(matches!(
            enc.drain(POLL),
            Err(PipelineError::EncodeFailed(_))
        ));
    }

    #[test]
    fn test_stop_rejects_further_feeding() {
        let mut enc = Encoder::start(TrackKind::Video, Box::new(StubCodec::new())).unwrap();
        let sink = enc.sink();
        enc.stop();
        assert!(matches!(
            sink.push(RawSample::new(Bytes::from_static(b"a"), Instant::now())),
            Err(PipelineError::EncoderClosed)
        ));
    }
}
