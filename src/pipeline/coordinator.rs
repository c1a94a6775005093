//! Pipeline coordinator
//!
//! Owns the recording lifecycle: allocates encoders and the muxer, starts
//! the capture sources, runs one drain loop per track, gates the container
//! start on both track formats being registered, and tears everything down
//! in dependency order on stop or failure.

use crate::config::RecorderConfig;
use crate::encoder::{Codec, DrainEvent, Encoder};
use crate::error::{PipelineError, PipelineResult};
use crate::mux::{ContainerMuxer, Mp4Muxer, TrackFormat, TrackRegistry};
use crate::pipeline::state::PipelineState;
use crate::sample::{AccessUnit, TrackKind};
use crate::source::{CaptureAuthorization, SampleSink, SampleSource};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Bounded wait per drain poll; a stop request is observed within this
const DRAIN_POLL: Duration = Duration::from_millis(100);

/// Encoded units buffered per track before the container has started.
/// Overflow is fatal: dropping encoded units would corrupt the track.
const PENDING_UNIT_LIMIT: usize = 1024;

/// Events emitted during a recording
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Recording entered its steady state
    Started,
    /// A track's format was discovered and registered
    TrackReady(TrackKind),
    /// All tracks registered; the container is now accepting samples
    ContainerStarted,
    /// Raw samples were dropped under backpressure
    SamplesDropped { track: TrackKind, count: u64 },
    /// Recording stopped cleanly
    Stopped,
    /// Recording aborted
    Failed(String),
}

/// Result of a completed recording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSummary {
    /// Unique id of this recording
    pub recording_id: Uuid,

    /// Finished container file
    pub output_path: PathBuf,

    /// Recorded duration in milliseconds
    pub duration_ms: u64,

    /// Encoded video units written
    pub video_samples: u64,

    /// Encoded audio units written
    pub audio_samples: u64,

    /// Raw samples dropped under backpressure, both tracks
    pub dropped_samples: u64,

    /// Wall-clock time recording began
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct TrackStats {
    kind: TrackKind,
    written: u64,
    dropped: u64,
}

/// Registry, muxer, started flag, and the pre-start unit buffers, all under
/// one mutex so registration and the start decision are a single critical
/// section and muxer writes are serialized.
struct MuxControl {
    registry: TrackRegistry,
    muxer: Box<dyn ContainerMuxer>,
    started: bool,
    pending: HashMap<usize, Vec<AccessUnit>>,
}

/// State shared between the coordinator and the two drain loops
struct Shared {
    state: Arc<RwLock<PipelineState>>,
    mux: Mutex<MuxControl>,
    failed: AtomicBool,
    error: Mutex<Option<PipelineError>>,
    event_tx: broadcast::Sender<PipelineEvent>,
}

impl Shared {
    fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Record the first unrecoverable error and signal both drain loops
    fn fail(&self, err: PipelineError) {
        if !self.failed.swap(true, Ordering::AcqRel) {
            tracing::error!(error = %err, "pipeline failure");
            *self.error.lock() = Some(err.clone());
            *self.state.write() = PipelineState::Failed;
            let _ = self.event_tx.send(PipelineEvent::Failed(err.to_string()));
        }
    }

    fn take_error(&self) -> Option<PipelineError> {
        self.error.lock().take()
    }

    /// Register a track format; once every expected track is present, start
    /// the muxer exactly once and flush the buffered units in track order.
    fn register_track(&self, kind: TrackKind, format: TrackFormat) -> PipelineResult<usize> {
        let mut mux = self.mux.lock();
        let index = mux.registry.register(kind, format)?;
        let _ = self.event_tx.send(PipelineEvent::TrackReady(kind));

        if mux.registry.all_registered() && !mux.started {
            let formats: Vec<TrackFormat> = mux
                .registry
                .tracks()
                .iter()
                .map(|t| t.format.clone())
                .collect();
            for format in &formats {
                mux.muxer.add_track(format)?;
            }
            mux.muxer.start()?;
            mux.started = true;

            let mut pending: Vec<(usize, Vec<AccessUnit>)> =
                mux.pending.drain().collect();
            pending.sort_by_key(|(index, _)| *index);
            let mut flushed = 0usize;
            for (track_index, units) in pending {
                for unit in units {
                    mux.muxer.write_sample(track_index, &unit)?;
                    flushed += 1;
                }
            }
            tracing::info!(flushed, "container started, buffered units flushed");
            let _ = self.event_tx.send(PipelineEvent::ContainerStarted);
        }

        Ok(index)
    }

    /// Write one unit, or buffer it if the container has not started yet
    fn write_unit(
        &self,
        track_index: usize,
        kind: TrackKind,
        unit: AccessUnit,
    ) -> PipelineResult<()> {
        let mut mux = self.mux.lock();
        if mux.started {
            mux.muxer.write_sample(track_index, &unit)
        } else {
            let queue = mux.pending.entry(track_index).or_default();
            if queue.len() >= PENDING_UNIT_LIMIT {
                return Err(PipelineError::PendingOverflow(kind));
            }
            queue.push(unit);
            Ok(())
        }
    }
}

/// One track's drain loop, run on a blocking worker
fn run_drain_loop(encoder: &mut Encoder, shared: &Shared) -> PipelineResult<TrackStats> {
    let kind = encoder.kind();
    let mut track_index: Option<usize> = None;
    let mut written = 0u64;

    loop {
        if shared.is_failed() {
            tracing::debug!(track = %kind, "drain loop exiting after pipeline failure");
            break;
        }
        match encoder.drain(DRAIN_POLL)? {
            DrainEvent::Format(format) => {
                track_index = Some(shared.register_track(kind, format)?);
            }
            DrainEvent::Unit(unit) => {
                if unit.flags.codec_config {
                    // Carried in the track format; the container never sees it
                    tracing::trace!(track = %kind, "skipping codec-config unit");
                    continue;
                }
                if unit.payload.is_empty() {
                    continue;
                }
                // An encoder must announce its format before any unit
                let index = track_index.ok_or_else(|| {
                    PipelineError::EncodeFailed(format!(
                        "{kind} encoder produced a unit before announcing its format"
                    ))
                })?;
                shared.write_unit(index, kind, unit)?;
                written += 1;
            }
            DrainEvent::Idle => {}
            DrainEvent::EndOfStream => {
                tracing::debug!(track = %kind, written, "track reached end of stream");
                break;
            }
        }
    }

    Ok(TrackStats {
        kind,
        written,
        dropped: encoder.dropped_samples(),
    })
}

type MuxerFactory = Box<dyn FnOnce() -> PipelineResult<Box<dyn ContainerMuxer>> + Send>;
type DrainResult = Result<(TrackStats, Encoder), PipelineError>;

#[derive(Default)]
struct RecordingClock {
    epoch: Option<Instant>,
    finished: Option<Duration>,
}

struct Lifecycle {
    video_source: Box<dyn SampleSource>,
    audio_source: Box<dyn SampleSource>,
    video_codec: Option<Box<dyn Codec>>,
    audio_codec: Option<Box<dyn Codec>>,
    muxer_factory: Option<MuxerFactory>,
    shared: Option<Arc<Shared>>,
    sinks: Vec<SampleSink>,
    drain_tasks: Vec<JoinHandle<DrainResult>>,
    started_at: Option<DateTime<Utc>>,
    terminal: Option<Result<RecordingSummary, PipelineError>>,
}

/// Coordinates one recording from start to a single terminal result
///
/// `start` then `stop` produce one MP4 containing one video and one audio
/// track. Terminal states are final: record again with a new pipeline.
pub struct Pipeline {
    recording_id: Uuid,
    config: RecorderConfig,
    state: Arc<RwLock<PipelineState>>,
    event_tx: broadcast::Sender<PipelineEvent>,
    clock: Mutex<RecordingClock>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
}

impl Pipeline {
    /// Create a pipeline writing through the built-in MP4 muxer
    pub fn new(
        config: RecorderConfig,
        video_source: Box<dyn SampleSource>,
        audio_source: Box<dyn SampleSource>,
        video_codec: Box<dyn Codec>,
        audio_codec: Box<dyn Codec>,
    ) -> PipelineResult<Self> {
        let output = config.output_path.clone();
        Self::with_muxer_factory(
            config,
            video_source,
            audio_source,
            video_codec,
            audio_codec,
            Box::new(move || Ok(Box::new(Mp4Muxer::create(&output)?) as Box<dyn ContainerMuxer>)),
        )
    }

    /// Create a pipeline with a custom container muxer
    pub fn with_muxer_factory(
        config: RecorderConfig,
        video_source: Box<dyn SampleSource>,
        audio_source: Box<dyn SampleSource>,
        video_codec: Box<dyn Codec>,
        audio_codec: Box<dyn Codec>,
        muxer_factory: MuxerFactory,
    ) -> PipelineResult<Self> {
        config.validate()?;
        let (event_tx, _) = broadcast::channel(100);
        Ok(Self {
            recording_id: Uuid::new_v4(),
            config,
            state: Arc::new(RwLock::new(PipelineState::Idle)),
            event_tx,
            clock: Mutex::new(RecordingClock::default()),
            lifecycle: tokio::sync::Mutex::new(Lifecycle {
                video_source,
                audio_source,
                video_codec: Some(video_codec),
                audio_codec: Some(audio_codec),
                muxer_factory: Some(muxer_factory),
                shared: None,
                sinks: Vec::new(),
                drain_tasks: Vec::new(),
                started_at: None,
                terminal: None,
            }),
        })
    }

    pub fn recording_id(&self) -> Uuid {
        self.recording_id
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Current pipeline state
    pub fn state(&self) -> PipelineState {
        *self.state.read()
    }

    /// Subscribe to recording events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.event_tx.subscribe()
    }

    /// Recorded duration so far (final duration once stopped)
    pub fn duration(&self) -> Duration {
        let clock = self.clock.lock();
        if let Some(finished) = clock.finished {
            return finished;
        }
        clock.epoch.map(|e| e.elapsed()).unwrap_or(Duration::ZERO)
    }

    /// Start recording
    ///
    /// Allocates the muxer and both encoders, starts both capture sources
    /// with `auth`, records the shared epoch, and launches the drain loops.
    /// Any failure here cleans up and leaves the pipeline `Failed`.
    pub async fn start(&self, auth: &CaptureAuthorization) -> PipelineResult<()> {
        let mut lifecycle = self.lifecycle.lock().await;

        {
            let mut state = self.state.write();
            if *state != PipelineState::Idle {
                return Err(PipelineError::AlreadyRecording);
            }
            *state = PipelineState::Preparing;
        }
        tracing::info!(
            recording = %self.recording_id,
            output = %self.config.output_path.display(),
            "preparing recording"
        );

        match self.prepare_and_launch(&mut lifecycle, auth).await {
            Ok(()) => {
                *self.state.write() = PipelineState::Recording;
                let _ = self.event_tx.send(PipelineEvent::Started);
                tracing::info!("recording started");
                Ok(())
            }
            Err(err) => {
                self.abort_start(&mut lifecycle, err.clone()).await;
                Err(err)
            }
        }
    }

    async fn prepare_and_launch(
        &self,
        lifecycle: &mut Lifecycle,
        auth: &CaptureAuthorization,
    ) -> PipelineResult<()> {
        let factory = lifecycle
            .muxer_factory
            .take()
            .ok_or(PipelineError::AlreadyRecording)?;
        let muxer = factory()?;
        let video_codec = lifecycle
            .video_codec
            .take()
            .ok_or(PipelineError::AlreadyRecording)?;
        let audio_codec = lifecycle
            .audio_codec
            .take()
            .ok_or(PipelineError::AlreadyRecording)?;

        let shared = Arc::new(Shared {
            state: Arc::clone(&self.state),
            mux: Mutex::new(MuxControl {
                registry: TrackRegistry::new(vec![TrackKind::Video, TrackKind::Audio]),
                muxer,
                started: false,
                pending: HashMap::new(),
            }),
            failed: AtomicBool::new(false),
            error: Mutex::new(None),
            event_tx: self.event_tx.clone(),
        });
        lifecycle.shared = Some(Arc::clone(&shared));

        let mut video_encoder = Encoder::start(TrackKind::Video, video_codec)?;
        let mut audio_encoder = Encoder::start(TrackKind::Audio, audio_codec)?;

        let video_sink = video_encoder.sink();
        let audio_sink = audio_encoder.sink();
        lifecycle.sinks = vec![video_sink.clone(), audio_sink.clone()];

        lifecycle.video_source.start(auth, video_sink).await?;
        lifecycle.audio_source.start(auth, audio_sink).await?;

        // Both sources are producing: this instant is presentation time
        // zero for both tracks.
        let epoch = Instant::now();
        video_encoder.set_epoch(epoch);
        audio_encoder.set_epoch(epoch);
        self.clock.lock().epoch = Some(epoch);
        lifecycle.started_at = Some(Utc::now());

        for mut encoder in [video_encoder, audio_encoder] {
            let shared = Arc::clone(&shared);
            lifecycle
                .drain_tasks
                .push(tokio::task::spawn_blocking(move || {
                    match run_drain_loop(&mut encoder, &shared) {
                        Ok(stats) => Ok((stats, encoder)),
                        Err(err) => {
                            shared.fail(err.clone());
                            Err(err)
                        }
                    }
                }));
        }
        Ok(())
    }

    /// Best-effort cleanup when `start` fails before reaching `Recording`
    async fn abort_start(&self, lifecycle: &mut Lifecycle, err: PipelineError) {
        tracing::error!(error = %err, "failed to start recording");
        *self.state.write() = PipelineState::Failed;

        if let Err(e) = lifecycle.video_source.stop().await {
            tracing::warn!(error = %e, "video source did not stop cleanly");
        }
        if let Err(e) = lifecycle.audio_source.stop().await {
            tracing::warn!(error = %e, "audio source did not stop cleanly");
        }
        for sink in &lifecycle.sinks {
            sink.queue.close();
        }
        if let Some(shared) = lifecycle.shared.take() {
            shared.mux.lock().muxer.release();
        }

        let _ = self.event_tx.send(PipelineEvent::Failed(err.to_string()));
        lifecycle.terminal = Some(Err(err));
    }

    /// Stop recording and return the terminal result
    ///
    /// Idempotent: repeated calls return the same result without touching
    /// the muxer again. Safe to call from any task.
    pub async fn stop(&self) -> PipelineResult<RecordingSummary> {
        let mut lifecycle = self.lifecycle.lock().await;
        if let Some(terminal) = &lifecycle.terminal {
            return terminal.clone();
        }

        {
            let mut state = self.state.write();
            match *state {
                PipelineState::Idle => return Err(PipelineError::NotRecording),
                PipelineState::Preparing | PipelineState::Recording => {
                    *state = PipelineState::Stopping;
                }
                // A drain loop may already have moved us to Failed; still
                // run the same teardown sequence.
                _ => {}
            }
        }
        tracing::info!("stopping recording");

        let final_duration = {
            let mut clock = self.clock.lock();
            let elapsed = clock.epoch.map(|e| e.elapsed()).unwrap_or(Duration::ZERO);
            clock.finished = Some(elapsed);
            elapsed
        };

        // Sources first, so no further raw samples arrive
        if let Err(e) = lifecycle.video_source.stop().await {
            tracing::warn!(error = %e, "video source did not stop cleanly");
        }
        if let Err(e) = lifecycle.audio_source.stop().await {
            tracing::warn!(error = %e, "audio source did not stop cleanly");
        }

        // End-of-stream markers let the drain loops run to completion
        for sink in &lifecycle.sinks {
            sink.queue.finish();
        }

        let mut stats: Vec<TrackStats> = Vec::new();
        let mut encoders: Vec<Encoder> = Vec::new();
        let mut drain_error: Option<PipelineError> = None;
        for task in lifecycle.drain_tasks.drain(..) {
            match task.await {
                Ok(Ok((track_stats, encoder))) => {
                    stats.push(track_stats);
                    encoders.push(encoder);
                }
                Ok(Err(err)) => {
                    drain_error.get_or_insert(err);
                }
                Err(join_err) => {
                    drain_error.get_or_insert(PipelineError::EncodeFailed(format!(
                        "drain task panicked: {join_err}"
                    )));
                }
            }
        }

        let Some(shared) = lifecycle.shared.take() else {
            *self.state.write() = PipelineState::Stopped;
            let err = PipelineError::NotRecording;
            lifecycle.terminal = Some(Err(err.clone()));
            return Err(err);
        };

        if let Some(err) = drain_error {
            shared.fail(err);
        }

        let dropped_total: u64 = stats.iter().map(|s| s.dropped).sum();
        for track_stats in &stats {
            if track_stats.dropped > 0 {
                tracing::warn!(
                    track = %track_stats.kind,
                    dropped = track_stats.dropped,
                    "raw samples were dropped under backpressure"
                );
                let _ = self.event_tx.send(PipelineEvent::SamplesDropped {
                    track: track_stats.kind,
                    count: track_stats.dropped,
                });
            }
        }

        let outcome: Result<RecordingSummary, PipelineError> = {
            let mut mux = shared.mux.lock();
            if shared.is_failed() {
                mux.muxer.release();
                Err(shared
                    .take_error()
                    .unwrap_or_else(|| PipelineError::EncodeFailed("unknown failure".into())))
            } else if !mux.started {
                // Nothing ever reached the container: a zero-byte file must
                // not be presented as a successful recording.
                mux.muxer.release();
                *self.state.write() = PipelineState::Stopped;
                let _ = self.event_tx.send(PipelineEvent::Stopped);
                Err(PipelineError::EmptyRecording)
            } else {
                match mux.muxer.stop() {
                    Ok(output_path) => {
                        mux.muxer.release();
                        let video_samples = stats
                            .iter()
                            .find(|s| s.kind == TrackKind::Video)
                            .map(|s| s.written)
                            .unwrap_or(0);
                        let audio_samples = stats
                            .iter()
                            .find(|s| s.kind == TrackKind::Audio)
                            .map(|s| s.written)
                            .unwrap_or(0);
                        Ok(RecordingSummary {
                            recording_id: self.recording_id,
                            output_path,
                            duration_ms: final_duration.as_millis() as u64,
                            video_samples,
                            audio_samples,
                            dropped_samples: dropped_total,
                            started_at: lifecycle.started_at.unwrap_or_else(Utc::now),
                        })
                    }
                    Err(err) => {
                        mux.muxer.release();
                        *self.state.write() = PipelineState::Failed;
                        let _ = self.event_tx.send(PipelineEvent::Failed(err.to_string()));
                        Err(err)
                    }
                }
            }
        };

        // Muxer finalized and released before encoder teardown
        for mut encoder in encoders {
            encoder.stop();
        }

        if let Ok(summary) = &outcome {
            *self.state.write() = PipelineState::Stopped;
            let _ = self.event_tx.send(PipelineEvent::Stopped);
            tracing::info!(
                duration_ms = summary.duration_ms,
                video_samples = summary.video_samples,
                audio_samples = summary.audio_samples,
                "recording stopped"
            );
        }

        lifecycle.terminal = Some(outcome.clone());
        outcome
    }
}
