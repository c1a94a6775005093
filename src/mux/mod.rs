//! Container muxing
//!
//! The muxer owns the output file handle and enforces the container
//! lifecycle: tracks are added while the pipeline is preparing, the
//! container is started exactly once after every track is known, samples
//! are only writable between start and stop, and stop finalizes the trailer.

pub mod track;

pub use track::{RegisteredTrack, TrackFormat, TrackRegistry};

use crate::error::{PipelineError, PipelineResult};
use crate::sample::AccessUnit;
use mp4::{
    AacConfig, AudioObjectType, AvcConfig, ChannelConfig, MediaConfig, Mp4Config, Mp4Sample,
    Mp4Writer, SampleFreqIndex, TrackConfig, TrackType,
};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Ticks per second for each media track; microsecond timestamps map 1:1
const TRACK_TIMESCALE: u32 = 1_000_000;

/// Movie-level timescale
const MOVIE_TIMESCALE: u32 = 1000;

/// Appends access units into a container file
///
/// Contract: `add_track` before `start`, `start` exactly once, samples only
/// after `start` and before `stop`, `stop` at most once, `release`
/// idempotent. Violations are programming errors and fail loudly; the
/// pipeline treats them as fatal.
pub trait ContainerMuxer: Send {
    /// Declare a track. Legal only before `start`.
    fn add_track(&mut self, format: &TrackFormat) -> PipelineResult<usize>;

    /// Start the container. Legal exactly once, after every track is added.
    fn start(&mut self) -> PipelineResult<()>;

    /// Append one access unit to a track
    fn write_sample(&mut self, track_index: usize, unit: &AccessUnit) -> PipelineResult<()>;

    /// Flush, write the trailer, and commit the output file. Returns the
    /// final output path.
    fn stop(&mut self) -> PipelineResult<PathBuf>;

    /// Free any still-held resource, discarding uncommitted output. Safe to
    /// call multiple times and after failures.
    fn release(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MuxerPhase {
    Created,
    Started,
    Stopped,
    Released,
}

/// MP4 muxer writing through a temp file in the destination directory
///
/// The container is assembled in a `NamedTempFile` and only persisted to the
/// destination path by a clean `stop()`, so an aborted recording never
/// leaves a partial file that looks like a finished one.
pub struct Mp4Muxer {
    output_path: PathBuf,
    phase: MuxerPhase,
    formats: Vec<TrackFormat>,
    temp: Option<NamedTempFile>,
    writer: Option<Mp4Writer<BufWriter<File>>>,
}

impl Mp4Muxer {
    /// Allocate the muxer and its temp file next to `output_path`
    pub fn create(output_path: &Path) -> PipelineResult<Self> {
        let dir = output_path.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(dir) = dir {
            std::fs::create_dir_all(dir)?;
        }
        let temp = match dir {
            Some(dir) => NamedTempFile::new_in(dir)?,
            None => NamedTempFile::new()?,
        };
        tracing::debug!(output = %output_path.display(), temp = %temp.path().display(), "muxer allocated");
        Ok(Self {
            output_path: output_path.to_path_buf(),
            phase: MuxerPhase::Created,
            formats: Vec::new(),
            temp: Some(temp),
            writer: None,
        })
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    fn track_config(format: &TrackFormat) -> TrackConfig {
        match format {
            TrackFormat::H264 {
                width,
                height,
                sps,
                pps,
            } => TrackConfig {
                track_type: TrackType::Video,
                timescale: TRACK_TIMESCALE,
                language: "und".to_string(),
                media_conf: MediaConfig::AvcConfig(AvcConfig {
                    width: *width,
                    height: *height,
                    seq_param_set: sps.clone(),
                    pic_param_set: pps.clone(),
                }),
            },
            TrackFormat::Aac {
                sample_rate,
                channels,
                bitrate,
            } => TrackConfig {
                track_type: TrackType::Audio,
                timescale: TRACK_TIMESCALE,
                language: "und".to_string(),
                media_conf: MediaConfig::AacConfig(AacConfig {
                    bitrate: *bitrate,
                    profile: AudioObjectType::AacLowComplexity,
                    freq_index: Self::freq_index(*sample_rate),
                    chan_conf: Self::channel_config(*channels),
                }),
            },
        }
    }

    fn freq_index(sample_rate: u32) -> SampleFreqIndex {
        match sample_rate {
            96_000 => SampleFreqIndex::Freq96000,
            88_200 => SampleFreqIndex::Freq88200,
            64_000 => SampleFreqIndex::Freq64000,
            48_000 => SampleFreqIndex::Freq48000,
            44_100 => SampleFreqIndex::Freq44100,
            32_000 => SampleFreqIndex::Freq32000,
            24_000 => SampleFreqIndex::Freq24000,
            22_050 => SampleFreqIndex::Freq22050,
            16_000 => SampleFreqIndex::Freq16000,
            12_000 => SampleFreqIndex::Freq12000,
            11_025 => SampleFreqIndex::Freq11025,
            8_000 => SampleFreqIndex::Freq8000,
            _ => SampleFreqIndex::Freq44100,
        }
    }

    fn channel_config(channels: u16) -> ChannelConfig {
        match channels {
            1 => ChannelConfig::Mono,
            2 => ChannelConfig::Stereo,
            3 => ChannelConfig::Three,
            4 => ChannelConfig::Four,
            5 => ChannelConfig::Five,
            6 => ChannelConfig::FiveOne,
            8 => ChannelConfig::SevenOne,
            _ => ChannelConfig::Stereo,
        }
    }
}

impl ContainerMuxer for Mp4Muxer {
    fn add_track(&mut self, format: &TrackFormat) -> PipelineResult<usize> {
        match self.phase {
            MuxerPhase::Created => {}
            MuxerPhase::Started => {
                return Err(PipelineError::Container(
                    "track added after container start".into(),
                ))
            }
            MuxerPhase::Stopped | MuxerPhase::Released => {
                return Err(PipelineError::MuxerClosed)
            }
        }
        self.formats.push(format.clone());
        Ok(self.formats.len() - 1)
    }

    fn start(&mut self) -> PipelineResult<()> {
        match self.phase {
            MuxerPhase::Created => {}
            MuxerPhase::Started => {
                return Err(PipelineError::Container("container started twice".into()))
            }
            MuxerPhase::Stopped | MuxerPhase::Released => {
                return Err(PipelineError::MuxerClosed)
            }
        }
        if self.formats.is_empty() {
            return Err(PipelineError::Container(
                "container started with no tracks".into(),
            ));
        }

        let temp = self
            .temp
            .as_ref()
            .ok_or(PipelineError::MuxerClosed)?;
        let file = temp.reopen()?;

        let config = Mp4Config {
            major_brand: "isom"
                .parse()
                .map_err(|_| PipelineError::Container("invalid major brand".into()))?,
            minor_version: 512,
            compatible_brands: ["isom", "iso2", "avc1", "mp41"]
                .iter()
                .filter_map(|b| b.parse().ok())
                .collect(),
            timescale: MOVIE_TIMESCALE,
        };

        let mut writer = Mp4Writer::write_start(BufWriter::new(file), &config)?;
        for format in &self.formats {
            writer.add_track(&Self::track_config(format))?;
        }

        self.writer = Some(writer);
        self.phase = MuxerPhase::Started;
        tracing::info!(tracks = self.formats.len(), "container started");
        Ok(())
    }

    fn write_sample(&mut self, track_index: usize, unit: &AccessUnit) -> PipelineResult<()> {
        match self.phase {
            MuxerPhase::Started => {}
            MuxerPhase::Created => return Err(PipelineError::MuxerNotStarted),
            MuxerPhase::Stopped | MuxerPhase::Released => {
                return Err(PipelineError::MuxerClosed)
            }
        }
        let writer = self.writer.as_mut().ok_or(PipelineError::MuxerClosed)?;

        // mp4 track ids are 1-based in add order
        let track_id = track_index as u32 + 1;
        let sample = Mp4Sample {
            start_time: unit.pts_micros(),
            duration: unit.duration_micros() as u32,
            rendering_offset: 0,
            is_sync: unit.flags.key_frame,
            bytes: unit.payload.clone(),
        };
        writer.write_sample(track_id, &sample)?;
        Ok(())
    }

    fn stop(&mut self) -> PipelineResult<PathBuf> {
        match self.phase {
            MuxerPhase::Started => {}
            MuxerPhase::Created => return Err(PipelineError::MuxerNotStarted),
            MuxerPhase::Stopped | MuxerPhase::Released => {
                return Err(PipelineError::MuxerClosed)
            }
        }

        let mut writer = self.writer.take().ok_or(PipelineError::MuxerClosed)?;
        writer.write_end()?;
        writer
            .into_writer()
            .into_inner()
            .map_err(|e| PipelineError::Io(e.to_string()))?
            .sync_all()?;

        let temp = self.temp.take().ok_or(PipelineError::MuxerClosed)?;
        temp.persist(&self.output_path)
            .map_err(|e| PipelineError::Io(e.error.to_string()))?;

        self.phase = MuxerPhase::Stopped;
        tracing::info!(output = %self.output_path.display(), "container finalized");
        Ok(self.output_path.clone())
    }

    fn release(&mut self) {
        // Dropping an unpersisted temp file deletes it
        self.writer = None;
        self.temp = None;
        if self.phase != MuxerPhase::Stopped {
            self.phase = MuxerPhase::Released;
        }
    }
}
