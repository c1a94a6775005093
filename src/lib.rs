//! screenreel - live capture-encode-mux recording pipeline.
//!
//! Records a live audio/video session into a single playable MP4. Two
//! capture sources (screen frames, PCM audio) feed two encoders; per-track
//! drain loops pull encoded access units, register each track's discovered
//! format, start the container exactly once when both tracks are known, and
//! interleave samples until stop finalizes the trailer.
//!
//! Capture backends and codec backends are external: implement
//! [`SampleSource`] and [`Codec`] for your platform and hand them to
//! [`Pipeline::new`].
//!
//! ```no_run
//! # use screenreel::*;
//! # async fn demo(video_src: Box<dyn SampleSource>, audio_src: Box<dyn SampleSource>,
//! #               video_codec: Box<dyn Codec>, audio_codec: Box<dyn Codec>)
//! #               -> PipelineResult<()> {
//! let config = RecorderConfig::new("/tmp/session.mp4");
//! let pipeline = Pipeline::new(config, video_src, audio_src, video_codec, audio_codec)?;
//!
//! let auth = CaptureAuthorization::from_grant("session-grant");
//! pipeline.start(&auth).await?;
//! // ... record ...
//! let summary = pipeline.stop().await?;
//! println!("wrote {}", summary.output_path.display());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod encoder;
pub mod error;
pub mod mux;
pub mod pipeline;
pub mod sample;
pub mod source;

pub use config::{AudioConfig, RecorderConfig, VideoConfig};
pub use encoder::{Codec, DrainEvent, Encoder};
pub use error::{PipelineError, PipelineResult};
pub use mux::{ContainerMuxer, Mp4Muxer, TrackFormat, TrackRegistry};
pub use pipeline::{Pipeline, PipelineEvent, PipelineState, RecordingSummary};
pub use sample::{AccessUnit, AccessUnitFlags, RawSample, TrackKind};
pub use source::{CaptureAuthorization, SampleSink, SampleSource};
