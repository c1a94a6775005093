//! Track formats and the track registry
//!
//! A track's format is discovered exactly once by its encoder and registered
//! here; `all_registered` is the single predicate that gates starting the
//! container, evaluated under the same lock that performs registration.

use crate::error::{PipelineError, PipelineResult};
use crate::sample::TrackKind;

/// Negotiated output format of one track, immutable once discovered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackFormat {
    /// H.264/AVC video
    H264 {
        width: u16,
        height: u16,
        /// Sequence parameter set, raw bytes without start code
        sps: Vec<u8>,
        /// Picture parameter set, raw bytes without start code
        pps: Vec<u8>,
    },
    /// AAC-LC audio
    Aac {
        sample_rate: u32,
        channels: u16,
        bitrate: u32,
    },
}

impl TrackFormat {
    pub fn kind(&self) -> TrackKind {
        match self {
            TrackFormat::H264 { .. } => TrackKind::Video,
            TrackFormat::Aac { .. } => TrackKind::Audio,
        }
    }
}

/// One registered track
#[derive(Debug, Clone)]
pub struct RegisteredTrack {
    pub kind: TrackKind,
    pub index: usize,
    pub format: TrackFormat,
}

/// Maps discovered track formats to container track indices
///
/// Not internally synchronized: the coordinator keeps the registry inside
/// the same mutex as the muxer-start decision, so two tracks registering
/// "simultaneously" can never both observe "not yet ready".
#[derive(Debug)]
pub struct TrackRegistry {
    expected: Vec<TrackKind>,
    entries: Vec<RegisteredTrack>,
}

impl TrackRegistry {
    pub fn new(expected: Vec<TrackKind>) -> Self {
        Self {
            expected,
            entries: Vec::new(),
        }
    }

    /// Register a track's format, returning its container track index
    ///
    /// Idempotent per kind: re-registering the same format returns the same
    /// index; a different format is a logic bug and fails with
    /// `FormatRedefinition`.
    pub fn register(&mut self, kind: TrackKind, format: TrackFormat) -> PipelineResult<usize> {
        if let Some(existing) = self.entries.iter().find(|e| e.kind == kind) {
            if existing.format == format {
                return Ok(existing.index);
            }
            return Err(PipelineError::FormatRedefinition(kind));
        }

        let index = self.entries.len();
        tracing::info!(track = %kind, index, "track format registered");
        self.entries.push(RegisteredTrack {
            kind,
            index,
            format,
        });
        Ok(index)
    }

    /// True once every expected track has registered
    pub fn all_registered(&self) -> bool {
        self.expected
            .iter()
            .all(|kind| self.entries.iter().any(|e| e.kind == *kind))
    }

    /// Registered tracks in index order
    pub fn tracks(&self) -> &[RegisteredTrack] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_format() -> TrackFormat {
        TrackFormat::H264 {
            width: 1280,
            height: 720,
            sps: vec![0x67, 0x42, 0x00, 0x1f],
            pps: vec![0x68, 0xce, 0x38, 0x80],
        }
    }

    fn audio_format() -> TrackFormat {
        TrackFormat::Aac {
            sample_rate: 44_100,
            channels: 2,
            bitrate: 128_000,
        }
    }

    #[test]
    fn test_register_assigns_sequential_indices() {
        let mut registry = TrackRegistry::new(vec![TrackKind::Video, TrackKind::Audio]);
        assert!(!registry.all_registered());

        let v = registry.register(TrackKind::Video, video_format()).unwrap();
        assert!(!registry.all_registered());

        let a = registry.register(TrackKind::Audio, audio_format()).unwrap();
        assert_eq!((v, a), (0, 1));
        assert!(registry.all_registered());
    }

    #[test]
    fn test_register_is_idempotent_per_kind() {
        let mut registry = TrackRegistry::new(vec![TrackKind::Video, TrackKind::Audio]);
        let first = registry.register(TrackKind::Video, video_format()).unwrap();
        let second = registry.register(TrackKind::Video, video_format()).unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.tracks().len(), 1);
    }

    #[test]
    fn test_redefinition_is_fatal() {
        let mut registry = TrackRegistry::new(vec![TrackKind::Video, TrackKind::Audio]);
        registry.register(TrackKind::Video, video_format()).unwrap();

        let changed = TrackFormat::H264 {
            width: 1920,
            height: 1080,
            sps: vec![0x67],
            pps: vec![0x68],
        };
        assert!(matches!(
            registry.register(TrackKind::Video, changed),
            Err(PipelineError::FormatRedefinition(TrackKind::Video))
        ));
    }
}
