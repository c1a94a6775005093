//! Media sample types
//!
//! The units of data that flow through the pipeline: raw samples from the
//! capture sources and encoded access units on their way into the container.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Which logical media stream a sample or track belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Video => "video",
            TrackKind::Audio => "audio",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw, unencoded media sample handed from a capture source to its encoder
///
/// Ownership transfers to the encoder on `SampleSink::push`; the source must
/// not retain the payload afterwards.
#[derive(Debug)]
pub struct RawSample {
    /// Opaque payload (interleaved PCM bytes, or raw frame data)
    pub payload: Bytes,

    /// Capture timestamp on the source's monotonic clock
    pub captured_at: Instant,
}

impl RawSample {
    pub fn new(payload: impl Into<Bytes>, captured_at: Instant) -> Self {
        Self {
            payload: payload.into(),
            captured_at,
        }
    }
}

/// Flags attached to an encoded access unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessUnitFlags {
    /// Sync point (IDR frame for video; every audio frame)
    pub key_frame: bool,
    /// Final unit of the track
    pub end_of_stream: bool,
    /// Out-of-band codec configuration (e.g. SPS/PPS), not media data
    pub codec_config: bool,
}

/// One encoded, independently-timestamped chunk of media
///
/// Produced by exactly one encoder, consumed by exactly one muxer write.
/// Presentation timestamps are relative to the shared recording epoch and
/// non-decreasing within a track.
#[derive(Debug, Clone)]
pub struct AccessUnit {
    /// Encoded payload bytes
    pub payload: Bytes,

    /// Presentation timestamp since the recording epoch
    pub pts: Duration,

    /// How long this unit plays for (frame interval, or samples/rate)
    pub duration: Duration,

    /// Flag set
    pub flags: AccessUnitFlags,
}

impl AccessUnit {
    /// Presentation timestamp in microseconds
    pub fn pts_micros(&self) -> u64 {
        self.pts.as_micros() as u64
    }

    /// Duration in microseconds
    pub fn duration_micros(&self) -> u64 {
        self.duration.as_micros() as u64
    }
}
