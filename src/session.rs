use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{Arc, Condvar, Mutex, PoisonError},
    time::Instant,
};

use crate::{
    buffer_pool::{BufferSource, PixelBufferPool, PoolConfig},
    compose::{ContentMode, compose_into},
    encode::{CodecConfig, EncoderSetup, VideoEncoder},
    foundation::{
        core::{CanvasSize, Fps, FrameIndex, Timestamp, format_elapsed},
        error::{ReelError, ReelResult},
    },
    output::OutputResolver,
    pacer::FramePacer,
    publish::{NoopPublisher, Publisher},
    source::{SourceImage, open_image},
};

/// Lifecycle of a [`Session`]. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Writing,
    Finalizing,
    Finalized,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Finalized | SessionState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Writing => "writing",
            SessionState::Finalizing => "finalizing",
            SessionState::Finalized => "finalized",
            SessionState::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type SuccessCallback = Box<dyn FnOnce(PathBuf) + Send + 'static>;
pub type FailureCallback = Box<dyn FnOnce(ReelError) + Send + 'static>;

/// Caller-facing configuration of one encode.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub output_filename: String,
    /// Directory the output lands in; `None` defers to [`OutputResolver::from_env`].
    pub output_dir: Option<PathBuf>,
    pub canvas: CanvasSize,
    pub fps: Fps,
    /// Mode used when a frame does not specify one.
    pub content_mode: ContentMode,
    pub codec: CodecConfig,
    pub pool: PoolConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            output_filename: "stillreel.mp4".to_string(),
            output_dir: None,
            canvas: CanvasSize::default(),
            fps: Fps::default(),
            content_mode: ContentMode::Fit,
            codec: CodecConfig::default(),
            pool: PoolConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn new(output_filename: impl Into<String>, canvas: CanvasSize) -> Self {
        Self {
            output_filename: output_filename.into(),
            canvas,
            ..Self::default()
        }
    }

    pub fn with_fps(mut self, fps: Fps) -> Self {
        self.fps = fps;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn with_content_mode(mut self, mode: ContentMode) -> Self {
        self.content_mode = mode;
        self
    }

    pub fn validate(&self) -> ReelResult<()> {
        self.canvas.validate()?;
        Fps::new(self.fps.num, self.fps.den)?;
        self.pool.validate()?;
        if self.output_filename.trim().is_empty() {
            return Err(ReelError::validation("output_filename must not be empty"));
        }
        Ok(())
    }

    fn resolver(&self) -> OutputResolver {
        match &self.output_dir {
            Some(dir) => OutputResolver::new(dir),
            None => OutputResolver::from_env(),
        }
    }
}

/// What a session ended with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionReport {
    pub state: SessionState,
    pub output: Option<PathBuf>,
    /// Frames attempted, including ones whose append failed.
    pub frames: u64,
    pub error: Option<String>,
    pub elapsed: String,
}

#[derive(Debug)]
struct Progress {
    state: SessionState,
    report: Option<SessionReport>,
}

#[derive(Debug)]
struct Shared {
    progress: Mutex<Progress>,
    done: Condvar,
}

impl Shared {
    fn state(&self) -> SessionState {
        self.lock().state
    }

    fn set_state(&self, state: SessionState) {
        self.lock().state = state;
    }

    fn complete(&self, report: SessionReport) {
        let mut p = self.lock();
        p.state = report.state;
        p.report = Some(report);
        self.done.notify_all();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Observer for a session's terminal outcome, usable from any thread.
#[derive(Clone, Debug)]
pub struct Completion {
    shared: Arc<Shared>,
}

impl Completion {
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn try_report(&self) -> Option<SessionReport> {
        self.shared.lock().report.clone()
    }

    /// Blocks until the session is finalized or failed.
    ///
    /// Never returns for a session that is dropped before `finish()`.
    pub fn wait(&self) -> SessionReport {
        let mut guard = self.shared.lock();
        loop {
            if let Some(report) = &guard.report {
                return report.clone();
            }
            guard = self
                .shared
                .done
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// One start-to-finish encode of still images into a video.
///
/// Frames are composed onto the canvas, stamped one frame apart and handed to the encoder in
/// call order. A frame that fails to append is recorded and the session keeps going; the
/// outcome is only known once `finish()` completes, through the callbacks or [`Completion`].
pub struct Session<E: VideoEncoder> {
    config: SessionConfig,
    encoder: E,
    resolver: OutputResolver,
    publisher: Arc<dyn Publisher>,
    buffers: Option<Box<dyn BufferSource>>,
    pacer: FramePacer,
    output: Option<PathBuf>,
    frame_count: u64,
    started_at: Option<Instant>,
    recorded_error: Option<ReelError>,
    on_success: Option<SuccessCallback>,
    on_failure: Option<FailureCallback>,
    shared: Arc<Shared>,
}

impl<E: VideoEncoder> Session<E> {
    pub fn new(
        config: SessionConfig,
        encoder: E,
        on_success: impl FnOnce(PathBuf) + Send + 'static,
        on_failure: impl FnOnce(ReelError) + Send + 'static,
    ) -> Self {
        Self {
            resolver: config.resolver(),
            pacer: FramePacer::new(config.fps),
            config,
            encoder,
            publisher: Arc::new(NoopPublisher),
            buffers: None,
            output: None,
            frame_count: 0,
            started_at: None,
            recorded_error: None,
            on_success: Some(Box::new(on_success)),
            on_failure: Some(Box::new(on_failure)),
            shared: Arc::new(Shared {
                progress: Mutex::new(Progress {
                    state: SessionState::Idle,
                    report: None,
                }),
                done: Condvar::new(),
            }),
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn with_resolver(mut self, resolver: OutputResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Replaces the pool that `start()` would otherwise create from `config.pool`.
    pub fn with_buffer_source(mut self, buffers: Box<dyn BufferSource>) -> Self {
        self.buffers = Some(buffers);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn recorded_error(&self) -> Option<&ReelError> {
        self.recorded_error.as_ref()
    }

    pub fn output_location(&self) -> Option<&Path> {
        self.output.as_deref()
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    pub fn completion(&self) -> Completion {
        Completion {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Idle → Writing: resolves (and clears) the output location, initializes the encoder and
    /// starts its clock at zero. Any failure is fatal for the session.
    #[tracing::instrument(skip_all, fields(output = %self.config.output_filename))]
    pub fn start(&mut self) -> ReelResult<()> {
        let state = self.state();
        if state != SessionState::Idle {
            return Err(ReelError::invalid_state("start", state));
        }
        self.started_at = Some(Instant::now());

        match self.open() {
            Ok(()) => {
                self.shared.set_state(SessionState::Writing);
                tracing::info!(
                    canvas = %self.config.canvas,
                    fps = %self.config.fps,
                    "session writing"
                );
                Ok(())
            }
            Err(e) => {
                let msg = match e {
                    ReelError::FailedToStartEncoder(msg) => msg,
                    other => other.to_string(),
                };
                tracing::error!(error = %msg, "session failed to start");
                self.shared.complete(SessionReport {
                    state: SessionState::Failed,
                    output: self.output.clone(),
                    frames: 0,
                    error: Some(msg.clone()),
                    elapsed: self.elapsed(),
                });
                if let Some(cb) = self.on_failure.take() {
                    cb(ReelError::start_encoder(msg.clone()));
                }
                Err(ReelError::start_encoder(msg))
            }
        }
    }

    fn open(&mut self) -> ReelResult<()> {
        self.config.validate()?;
        let output = self.resolver.resolve(&self.config.output_filename)?;
        self.output = Some(output.clone());

        let buffers: Box<dyn BufferSource> = match self.buffers.take() {
            Some(b) => b,
            None => Box::new(PixelBufferPool::new(self.config.canvas, self.config.pool)?),
        };
        self.buffers = Some(buffers);

        let setup = EncoderSetup {
            output,
            canvas: self.config.canvas,
            fps: self.config.fps,
            pixel_format: self.config.pool.format,
            codec: self.config.codec.clone(),
        };
        self.encoder.initialize(&setup)?;
        self.encoder.begin_session(Timestamp::ZERO)?;
        Ok(())
    }

    /// Composes `image` into the next frame and submits it.
    ///
    /// Blocks until the encoder is ready for more data. Append failures are recorded, not
    /// returned; the frame counter advances either way. Only misuse (wrong state) is an error.
    pub fn add_image(&mut self, image: &SourceImage, mode: Option<ContentMode>) -> ReelResult<()> {
        let state = self.state();
        if state != SessionState::Writing {
            return Err(ReelError::invalid_state("add image", state));
        }

        self.encoder.ready_flag().await_ready();

        let index = FrameIndex(self.frame_count);
        let mode = mode.unwrap_or(self.config.content_mode);
        match self.append(image, index, mode) {
            Ok(pts) => tracing::debug!(frame = index.0, %pts, %mode, "frame submitted"),
            Err(e) => {
                let err = ReelError::append(index.0, &e, self.encoder.last_error());
                tracing::warn!(error = %err, "frame append failed");
                self.recorded_error = Some(err);
            }
        }
        self.frame_count += 1;
        Ok(())
    }

    /// Decodes the image at `path` and adds it. A file that cannot be read or decoded is
    /// returned as an error and does not count as a frame.
    pub fn add_image_file(&mut self, path: &Path, mode: Option<ContentMode>) -> ReelResult<()> {
        let state = self.state();
        if state != SessionState::Writing {
            return Err(ReelError::invalid_state("add image", state));
        }
        let image = open_image(path)?;
        self.add_image(&image, mode)
    }

    fn append(
        &mut self,
        image: &SourceImage,
        index: FrameIndex,
        mode: ContentMode,
    ) -> ReelResult<Timestamp> {
        let pts = self.pacer.next_timestamp(index)?;
        let buffers = self
            .buffers
            .as_ref()
            .ok_or_else(|| ReelError::validation("no buffer source (session not started)"))?;
        let mut buffer = buffers.acquire_buffer(self.config.canvas)?;
        compose_into(image, self.config.canvas, mode, &mut buffer)?;
        self.encoder.submit(buffer, pts)?;
        Ok(pts)
    }

    /// Ends a writing session as Failed with `reason`.
    ///
    /// The encoder is still finalized so it releases the output, but nothing is published and
    /// the failure callback receives `reason` in place of any earlier append error.
    pub fn abort(&mut self, reason: ReelError) -> ReelResult<()> {
        let state = self.state();
        if state != SessionState::Writing {
            return Err(ReelError::invalid_state("abort", state));
        }
        if let Some(prev) = self.recorded_error.replace(reason) {
            tracing::warn!(error = %prev, "earlier append error superseded by abort");
        }
        self.finish()
    }

    /// Writing → Finalizing: closes encoder input and finalizes in the background.
    ///
    /// On completion the session becomes Finalized (output published, success callback) if no
    /// error was recorded and the encoder finished cleanly, otherwise Failed (failure callback
    /// with the recorded error, or the encoder's finalize error).
    #[tracing::instrument(skip_all, fields(frames = self.frame_count))]
    pub fn finish(&mut self) -> ReelResult<()> {
        let state = self.state();
        if state != SessionState::Writing {
            return Err(ReelError::invalid_state("finish", state));
        }
        self.shared.set_state(SessionState::Finalizing);
        self.encoder.mark_finished();

        let output = self.output.clone();
        let recorded = self.recorded_error.take();
        let on_success = self.on_success.take();
        let on_failure = self.on_failure.take();
        let publisher = Arc::clone(&self.publisher);
        let shared = Arc::clone(&self.shared);
        let frames = self.frame_count;
        let started_at = self.started_at;

        self.encoder.finalize(Box::new(move |finalize_err| {
            let elapsed = started_at
                .map(|t| format_elapsed(t.elapsed()))
                .unwrap_or_default();

            let err = match (recorded, finalize_err) {
                (Some(recorded), Some(fin)) => {
                    tracing::warn!(error = %fin, "encoder finalize also failed");
                    Some(recorded)
                }
                (recorded, fin) => recorded.or(fin),
            };

            match (err, output) {
                (None, Some(path)) => {
                    shared.set_state(SessionState::Finalized);
                    tracing::info!(path = %path.display(), frames, %elapsed, "session finalized");
                    publisher.publish(&path);
                    if let Some(cb) = on_success {
                        cb(path.clone());
                    }
                    shared.complete(SessionReport {
                        state: SessionState::Finalized,
                        output: Some(path),
                        frames,
                        error: None,
                        elapsed,
                    });
                }
                (err, output) => {
                    let err = err.unwrap_or_else(|| ReelError::finalize("output location missing"));
                    shared.set_state(SessionState::Failed);
                    tracing::warn!(error = %err, frames, %elapsed, "session failed");
                    let msg = err.to_string();
                    if let Some(cb) = on_failure {
                        cb(err);
                    }
                    shared.complete(SessionReport {
                        state: SessionState::Failed,
                        output,
                        frames,
                        error: Some(msg),
                        elapsed,
                    });
                }
            }
        }));
        Ok(())
    }

    fn elapsed(&self) -> String {
        self.started_at
            .map(|t| format_elapsed(t.elapsed()))
            .unwrap_or_default()
    }
}

impl<E: VideoEncoder> Drop for Session<E> {
    fn drop(&mut self) {
        if self.state() == SessionState::Writing {
            tracing::warn!(
                frames = self.frame_count,
                "session dropped while writing; output is left unfinished"
            );
        }
    }
}
