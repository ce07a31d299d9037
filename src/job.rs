use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context as _;

use crate::{
    compose::ContentMode,
    encode::VideoEncoder,
    foundation::error::{ReelError, ReelResult},
    publish::{LibraryPublisher, NoopPublisher, Publisher},
    session::{Session, SessionConfig, SessionReport},
    source::open_image,
};

/// One input image of a [`ReelJob`].
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FrameSpec {
    pub path: PathBuf,
    /// Overrides the job's content mode for this image.
    #[serde(default)]
    pub mode: Option<ContentMode>,
    /// Number of consecutive frames the image is shown for.
    #[serde(default = "default_hold")]
    pub hold: u32,
}

fn default_hold() -> u32 {
    1
}

/// A complete encode described as JSON: session settings plus the ordered image list.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ReelJob {
    #[serde(flatten)]
    pub session: SessionConfig,
    pub frames: Vec<FrameSpec>,
    /// Background that transparent and letterboxed areas are flattened over.
    #[serde(default = "default_background")]
    pub background_rgba: [u8; 4],
    /// Copy the finished video here when set.
    #[serde(default)]
    pub library_dir: Option<PathBuf>,
}

fn default_background() -> [u8; 4] {
    [0, 0, 0, 255]
}

impl ReelJob {
    /// Reads a job file. Relative image paths are resolved against the file's directory.
    pub fn from_path(path: &Path) -> ReelResult<Self> {
        let f = File::open(path).with_context(|| format!("open job '{}'", path.display()))?;
        let mut job: ReelJob = serde_json::from_reader(BufReader::new(f))
            .with_context(|| format!("parse job JSON '{}'", path.display()))?;

        let root = path.parent().unwrap_or_else(|| Path::new("."));
        for frame in &mut job.frames {
            if frame.path.is_relative() {
                frame.path = root.join(&frame.path);
            }
        }
        Ok(job)
    }

    pub fn validate(&self) -> ReelResult<()> {
        self.session.validate()?;
        if self.frames.is_empty() {
            return Err(ReelError::validation("job has no frames"));
        }
        if let Some(i) = self.frames.iter().position(|f| f.hold == 0) {
            return Err(ReelError::validation(format!(
                "frame {i} has hold 0; each image must be shown for at least one frame"
            )));
        }
        Ok(())
    }

    pub fn total_frames(&self) -> u64 {
        self.frames.iter().map(|f| u64::from(f.hold)).sum()
    }

    pub fn publisher(&self) -> Arc<dyn Publisher> {
        match &self.library_dir {
            Some(dir) => Arc::new(LibraryPublisher::new(dir)),
            None => Arc::new(NoopPublisher),
        }
    }
}

/// Runs `job` to completion on `encoder` and returns the terminal report.
///
/// An image that cannot be read or decoded stops the job: the session is aborted (the encoder
/// releases its output, nothing is published) and the image error is returned.
pub fn run_job<E: VideoEncoder>(job: &ReelJob, encoder: E) -> ReelResult<SessionReport> {
    job.validate()?;

    let mut session = Session::new(
        job.session.clone(),
        encoder,
        |path| tracing::info!(path = %path.display(), "video written"),
        |err| tracing::error!(error = %err, "video failed"),
    )
    .with_publisher(job.publisher());
    let completion = session.completion();

    if session.start().is_err() {
        return Ok(completion.wait());
    }

    for (i, frame) in job.frames.iter().enumerate() {
        let image = match open_image(&frame.path) {
            Ok(img) => img,
            Err(e) => {
                session.abort(ReelError::aborted(format!("image {i} is unusable: {e}")))?;
                let report = completion.wait();
                tracing::debug!(state = %report.state, "job stopped early");
                return Err(e);
            }
        };
        for _ in 0..frame.hold {
            session.add_image(&image, frame.mode)?;
        }
    }

    session.finish()?;
    Ok(completion.wait())
}
