use std::{
    io::Write,
    path::Path,
    process::{Child, ChildStdin, Command, Stdio},
    sync::{
        Arc, Mutex, PoisonError,
        mpsc::{Receiver, SyncSender, sync_channel},
    },
    thread::{self, JoinHandle},
};

use anyhow::Context as _;

use crate::{
    buffer_pool::PixelBuffer,
    encode::{CompletionHandler, EncoderSetup, VideoEncoder},
    foundation::{
        core::{Fps, PixelFormat, Timestamp},
        error::{ReelError, ReelResult},
    },
    pacer::ReadyFlag,
};

pub fn is_ffmpeg_on_path() -> bool {
    std::process::Command::new("ffmpeg")
        .arg("-version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

pub fn ensure_parent_dir(path: &Path) -> ReelResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

/// Builds the ffmpeg command line for `setup`.
pub fn ffmpeg_args(setup: &EncoderSetup) -> Vec<String> {
    let mut args: Vec<String> = [
        "-y",
        "-loglevel",
        "error",
        "-f",
        "rawvideo",
        "-pix_fmt",
        setup.pixel_format.ffmpeg_name(),
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    args.push("-s".into());
    args.push(setup.canvas.to_string());
    args.push("-framerate".into());
    args.push(format!("{}/{}", setup.fps.num, setup.fps.den));
    args.extend(["-i", "pipe:0", "-an", "-c:v"].map(String::from));
    args.push(setup.codec.codec.ffmpeg_encoder().into());

    if let Some(preset) = &setup.codec.preset {
        args.push("-preset".into());
        args.push(preset.clone());
    }
    if let Some(crf) = setup.codec.crf {
        args.push("-crf".into());
        args.push(crf.to_string());
    }
    if let Some(kbps) = setup.codec.bitrate_kbps {
        args.push("-b:v".into());
        args.push(format!("{kbps}k"));
    }

    args.push("-pix_fmt".into());
    args.push(setup.codec.output_pix_fmt.clone());
    if setup.codec.container == crate::encode::Container::Mp4 {
        args.push("-movflags".into());
        args.push("+faststart".into());
    }
    args.push("-f".into());
    args.push(setup.codec.container.ffmpeg_format().into());
    args.push(setup.output.to_string_lossy().into_owned());
    args
}

/// Tracks queued frames and drives the ready flag under one lock, so the flag always agrees
/// with the final queue depth.
#[derive(Debug)]
struct Backpressure {
    pending: Mutex<usize>,
    depth: usize,
    ready: ReadyFlag,
}

impl Backpressure {
    fn enqueue(&self) {
        let mut p = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *p += 1;
        self.ready.set(*p < self.depth);
    }

    fn dequeue(&self) {
        let mut p = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *p = p.saturating_sub(1);
        self.ready.set(*p < self.depth);
    }
}

type SharedError = Arc<Mutex<Option<String>>>;

fn record(err: &SharedError, msg: String) {
    tracing::warn!(error = %msg, "ffmpeg encoder error");
    *err.lock().unwrap_or_else(PoisonError::into_inner) = Some(msg);
}

/// Frame slot of `pts` on the constant-rate grid of `fps`, or `None` between slots.
fn frame_slot(pts: Timestamp, fps: Fps) -> Option<u64> {
    let num = i128::from(pts.value) * i128::from(fps.num);
    let den = i128::from(pts.timescale) * i128::from(fps.den);
    if den == 0 || num < 0 || num % den != 0 {
        return None;
    }
    u64::try_from(num / den).ok()
}

/// Slots left empty between the next unwritten slot and `pts`.
///
/// Fails for a pts between slots or one that does not move past what was already written.
fn skipped_slots(next_slot: u64, pts: Timestamp, fps: Fps) -> ReelResult<u64> {
    let slot = frame_slot(pts, fps).ok_or_else(|| {
        ReelError::validation(format!("pts {pts} is not on the {fps} fps frame grid"))
    })?;
    slot.checked_sub(next_slot).ok_or_else(|| {
        ReelError::validation(format!(
            "pts {pts} is out of order: frame slot {slot} is already written"
        ))
    })
}

/// One frame for the writer thread, preceded by `skipped` slots that repeat the last frame.
struct WriteJob {
    buffer: PixelBuffer,
    skipped: u64,
}

struct Running {
    child: Child,
    frames: Option<SyncSender<WriteJob>>,
    writer: Option<JoinHandle<()>>,
    setup: EncoderSetup,
    began: bool,
    next_slot: u64,
}

/// Encoder backed by the system `ffmpeg` binary.
///
/// Frames are queued to a writer thread that flattens alpha over `bg_rgba` and streams
/// rawvideo into ffmpeg's stdin. The encoder is ready while fewer than `queue_depth` frames
/// are waiting.
///
/// The input is constant-rate, so a pts that skips slots (after a failed append upstream) has
/// the previous frame repeated over the gap; before any frame, the gap is `bg_rgba`.
pub struct FfmpegEncoder {
    bg_rgba: [u8; 4],
    queue_depth: usize,
    backpressure: Arc<Backpressure>,
    last_error: SharedError,
    running: Option<Running>,
    finished: bool,
}

impl FfmpegEncoder {
    pub fn new(bg_rgba: [u8; 4]) -> Self {
        Self::with_queue_depth(bg_rgba, 4)
    }

    pub fn with_queue_depth(bg_rgba: [u8; 4], queue_depth: usize) -> Self {
        let queue_depth = queue_depth.max(1);
        Self {
            bg_rgba,
            queue_depth,
            backpressure: Arc::new(Backpressure {
                pending: Mutex::new(0),
                depth: queue_depth,
                ready: ReadyFlag::new(false),
            }),
            last_error: Arc::new(Mutex::new(None)),
            running: None,
            finished: false,
        }
    }
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new([0, 0, 0, 255])
    }
}

impl VideoEncoder for FfmpegEncoder {
    fn initialize(&mut self, setup: &EncoderSetup) -> ReelResult<()> {
        if self.running.is_some() {
            return Err(ReelError::start_encoder("ffmpeg encoder is already initialized"));
        }
        setup
            .codec
            .validate(setup.canvas)
            .map_err(|e| ReelError::start_encoder(format!("output settings rejected: {e}")))?;
        ensure_parent_dir(&setup.output)?;

        if !is_ffmpeg_on_path() {
            return Err(ReelError::start_encoder(
                "ffmpeg is required for encoding, but was not found on PATH",
            ));
        }

        let args = ffmpeg_args(setup);
        tracing::debug!(?args, "spawning ffmpeg");

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                ReelError::start_encoder(format!(
                    "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ReelError::start_encoder("failed to open ffmpeg stdin (unexpected)"))?;

        let (tx, rx) = sync_channel::<WriteJob>(self.queue_depth);
        let writer = match spawn_writer(
            rx,
            stdin,
            self.bg_rgba,
            Arc::clone(&self.backpressure),
            Arc::clone(&self.last_error),
        ) {
            Ok(w) => w,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };

        self.running = Some(Running {
            child,
            frames: Some(tx),
            writer: Some(writer),
            setup: setup.clone(),
            began: false,
            next_slot: 0,
        });
        Ok(())
    }

    fn begin_session(&mut self, at: Timestamp) -> ReelResult<()> {
        let Some(run) = self.running.as_mut() else {
            return Err(ReelError::start_encoder("ffmpeg encoder is not initialized"));
        };
        if at != Timestamp::ZERO {
            return Err(ReelError::start_encoder(
                "rawvideo input can only start its session at time zero",
            ));
        }
        run.began = true;
        self.backpressure.ready.set(true);
        Ok(())
    }

    fn ready_flag(&self) -> ReadyFlag {
        self.backpressure.ready.clone()
    }

    fn submit(&mut self, buffer: PixelBuffer, pts: Timestamp) -> ReelResult<()> {
        let Some(run) = self.running.as_mut() else {
            return Err(ReelError::validation("ffmpeg encoder is not initialized"));
        };
        if !run.began || self.finished {
            return Err(ReelError::validation(
                "ffmpeg encoder is not accepting frames",
            ));
        }
        if let Some(err) = self.last_error.lock().unwrap_or_else(PoisonError::into_inner).clone() {
            return Err(ReelError::validation(format!("encoder has failed: {err}")));
        }
        if buffer.canvas() != run.setup.canvas {
            return Err(ReelError::validation(format!(
                "frame size mismatch: got {}, expected {}",
                buffer.canvas(),
                run.setup.canvas
            )));
        }
        if buffer.format() != run.setup.pixel_format {
            return Err(ReelError::validation(format!(
                "pixel format mismatch: got {:?}, expected {:?}",
                buffer.format(),
                run.setup.pixel_format
            )));
        }
        let skipped = skipped_slots(run.next_slot, pts, run.setup.fps)?;
        if skipped > 0 {
            tracing::debug!(skipped, %pts, "repeating last frame over empty slots");
        }

        let Some(tx) = run.frames.as_ref() else {
            return Err(ReelError::validation("ffmpeg encoder input is closed"));
        };
        self.backpressure.enqueue();
        if tx.send(WriteJob { buffer, skipped }).is_err() {
            self.backpressure.dequeue();
            return Err(ReelError::validation("ffmpeg writer thread has exited"));
        }
        run.next_slot += skipped + 1;
        Ok(())
    }

    fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn mark_finished(&mut self) {
        self.finished = true;
        if let Some(run) = self.running.as_mut() {
            drop(run.frames.take());
        }
    }

    fn finalize(&mut self, on_complete: CompletionHandler) {
        self.mark_finished();
        let Some(run) = self.running.take() else {
            on_complete(Some(ReelError::finalize("ffmpeg encoder was never initialized")));
            return;
        };
        let last_error = Arc::clone(&self.last_error);

        spawn_or_inline(
            thread::Builder::new().name("stillreel-finalize".into()),
            move || {
                let err = finish_child(run, &last_error).err();
                on_complete(err);
            },
        );
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        let Some(Running {
            mut child,
            frames,
            writer,
            ..
        }) = self.running.take()
        else {
            return;
        };
        tracing::warn!("ffmpeg encoder dropped before finalize; aborting encode");
        drop(frames);
        let _ = child.kill();
        if let Some(writer) = writer {
            let _ = writer.join();
        }
        let _ = child.wait();
    }
}

/// Runs `work` on a thread from `builder`, or on the calling thread when no thread can be
/// spawned. `work` runs exactly once either way.
fn spawn_or_inline<F>(builder: thread::Builder, work: F)
where
    F: FnOnce() + Send + 'static,
{
    let slot = Arc::new(Mutex::new(Some(work)));
    let theirs = Arc::clone(&slot);
    let spawned = builder.spawn(move || {
        let work = theirs.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(work) = work {
            work();
        }
    });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "failed to spawn thread; running inline");
        let work = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(work) = work {
            work();
        }
    }
}

fn finish_child(run: Running, last_error: &SharedError) -> ReelResult<()> {
    let Running { child, writer, .. } = run;
    if let Some(writer) = writer
        && writer.join().is_err()
    {
        return Err(ReelError::finalize("ffmpeg writer thread panicked"));
    }

    let output = child
        .wait_with_output()
        .map_err(|e| ReelError::finalize(format!("failed to wait for ffmpeg to finish: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ReelError::finalize(format!(
            "ffmpeg exited with status {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    if let Some(err) = last_error.lock().unwrap_or_else(PoisonError::into_inner).clone() {
        return Err(ReelError::finalize(err));
    }
    Ok(())
}

fn spawn_writer(
    rx: Receiver<WriteJob>,
    mut stdin: ChildStdin,
    bg_rgba: [u8; 4],
    backpressure: Arc<Backpressure>,
    last_error: SharedError,
) -> ReelResult<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("stillreel-ffmpeg-writer".into())
        .spawn(move || {
            write_frames(rx, &mut stdin, bg_rgba, &backpressure, &last_error);
            drop(stdin);
        })
        .context("spawn ffmpeg writer thread")?;
    Ok(handle)
}

/// Drains `rx` into `out`. After the first write error the remaining jobs are only released.
fn write_frames<W: Write>(
    rx: Receiver<WriteJob>,
    out: &mut W,
    bg_rgba: [u8; 4],
    backpressure: &Backpressure,
    last_error: &SharedError,
) {
    let mut last_frame = Vec::new();
    let mut broken = false;
    for job in rx {
        if !broken && let Err(e) = write_job(out, &job, bg_rgba, &mut last_frame) {
            record(last_error, format!("failed to write frame to ffmpeg stdin: {e}"));
            broken = true;
        }
        drop(job);
        backpressure.dequeue();
    }
}

fn write_job<W: Write>(
    out: &mut W,
    job: &WriteJob,
    bg_rgba: [u8; 4],
    last_frame: &mut Vec<u8>,
) -> std::io::Result<()> {
    if job.skipped > 0 {
        if last_frame.is_empty() {
            fill_background(&job.buffer, bg_rgba, last_frame);
        }
        for _ in 0..job.skipped {
            out.write_all(last_frame)?;
        }
    }
    pack_opaque(&job.buffer, bg_rgba, last_frame);
    out.write_all(last_frame)
}

/// An opaque `bg_rgba` frame laid out like `buffer`, without padding.
fn fill_background(buffer: &PixelBuffer, bg_rgba: [u8; 4], out: &mut Vec<u8>) {
    let [ro, go, bo, ao] = buffer.format().channel_offsets();
    let mut px = [0u8; 4];
    px[ro] = bg_rgba[0];
    px[go] = bg_rgba[1];
    px[bo] = bg_rgba[2];
    px[ao] = 255;

    let pixels = buffer.width() as usize * buffer.height() as usize;
    out.clear();
    out.reserve(pixels * PixelFormat::BYTES_PER_PIXEL);
    for _ in 0..pixels {
        out.extend_from_slice(&px);
    }
}

/// De-strides `buffer` into `out`, flattening premultiplied alpha over an opaque background.
fn pack_opaque(buffer: &PixelBuffer, bg_rgba: [u8; 4], out: &mut Vec<u8>) {
    out.clear();
    let [ro, go, bo, ao] = buffer.format().channel_offsets();
    let bpp = PixelFormat::BYTES_PER_PIXEL;

    for y in 0..buffer.height() {
        for s in buffer.row(y).chunks_exact(bpp) {
            let px = flatten_premul([s[ro], s[go], s[bo], s[ao]], bg_rgba);
            let mut d = [0u8; 4];
            d[ro] = px[0];
            d[go] = px[1];
            d[bo] = px[2];
            d[ao] = 255;
            out.extend_from_slice(&d);
        }
    }
}

fn flatten_premul(src: [u8; 4], bg_rgba: [u8; 4]) -> [u8; 3] {
    let a = u16::from(src[3]);
    if a == 255 {
        return [src[0], src[1], src[2]];
    }
    let inv = 255u16 - a;
    let mut out = [0u8; 3];
    for i in 0..3 {
        let v = u16::from(src[i]) + mul_div255(u16::from(bg_rgba[i]), inv);
        out[i] = v.min(255) as u8;
    }
    out
}

fn mul_div255(x: u16, y: u16) -> u16 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u16
}
