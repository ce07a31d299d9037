//! Encoder contract consumed by [`Session`](crate::Session).

pub mod ffmpeg;

use std::path::PathBuf;

use crate::{
    buffer_pool::PixelBuffer,
    foundation::{
        core::{CanvasSize, Fps, PixelFormat, Timestamp},
        error::{ReelError, ReelResult},
    },
    pacer::ReadyFlag,
};

/// Called once when the encoder has finished writing; `None` means success.
pub type CompletionHandler = Box<dyn FnOnce(Option<ReelError>) + Send + 'static>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Codec {
    #[default]
    H264,
    Hevc,
    ProRes,
}

impl Codec {
    pub fn ffmpeg_encoder(self) -> &'static str {
        match self {
            Codec::H264 => "libx264",
            Codec::Hevc => "libx265",
            Codec::ProRes => "prores_ks",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Container {
    #[default]
    Mp4,
    QuickTime,
}

impl Container {
    pub fn ffmpeg_format(self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::QuickTime => "mov",
        }
    }
}

/// Codec parameters passed through to the encoder untouched.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub codec: Codec,
    pub container: Container,
    pub crf: Option<u8>,
    pub bitrate_kbps: Option<u32>,
    pub preset: Option<String>,
    /// Pixel format of the encoded stream.
    pub output_pix_fmt: String,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            codec: Codec::H264,
            container: Container::Mp4,
            crf: None,
            bitrate_kbps: None,
            preset: None,
            output_pix_fmt: "yuv420p".to_string(),
        }
    }
}

impl CodecConfig {
    pub fn validate(&self, canvas: CanvasSize) -> ReelResult<()> {
        canvas.validate()?;
        let subsampled = self.output_pix_fmt.starts_with("yuv420");
        if subsampled && (!canvas.width.is_multiple_of(2) || !canvas.height.is_multiple_of(2)) {
            return Err(ReelError::validation(format!(
                "canvas {canvas} must have even width/height for {} output",
                self.output_pix_fmt
            )));
        }
        if let Some(crf) = self.crf
            && crf > 51
        {
            return Err(ReelError::validation("crf must be within 0..=51"));
        }
        if self.output_pix_fmt.trim().is_empty() {
            return Err(ReelError::validation("output_pix_fmt must not be empty"));
        }
        Ok(())
    }
}

/// Everything an encoder needs to open its output.
#[derive(Clone, Debug)]
pub struct EncoderSetup {
    pub output: PathBuf,
    pub canvas: CanvasSize,
    pub fps: Fps,
    /// Layout of the buffers that will be submitted.
    pub pixel_format: PixelFormat,
    pub codec: CodecConfig,
}

/// A video encoder/muxer that accepts raw, timestamped pixel buffers.
///
/// Buffers are moved in on [`submit`](VideoEncoder::submit); the caller cannot touch them
/// afterwards.
pub trait VideoEncoder: Send {
    fn initialize(&mut self, setup: &EncoderSetup) -> ReelResult<()>;

    fn begin_session(&mut self, at: Timestamp) -> ReelResult<()>;

    fn ready_flag(&self) -> ReadyFlag;

    fn is_ready_for_more_data(&self) -> bool {
        self.ready_flag().is_ready()
    }

    fn submit(&mut self, buffer: PixelBuffer, pts: Timestamp) -> ReelResult<()>;

    /// The most recent error reported by the encoder itself, if any.
    fn last_error(&self) -> Option<String>;

    fn mark_finished(&mut self);

    /// Completes the output asynchronously; `on_complete` may run on another thread.
    fn finalize(&mut self, on_complete: CompletionHandler);
}

impl<E: VideoEncoder + ?Sized> VideoEncoder for Box<E> {
    fn initialize(&mut self, setup: &EncoderSetup) -> ReelResult<()> {
        (**self).initialize(setup)
    }

    fn begin_session(&mut self, at: Timestamp) -> ReelResult<()> {
        (**self).begin_session(at)
    }

    fn ready_flag(&self) -> ReadyFlag {
        (**self).ready_flag()
    }

    fn is_ready_for_more_data(&self) -> bool {
        (**self).is_ready_for_more_data()
    }

    fn submit(&mut self, buffer: PixelBuffer, pts: Timestamp) -> ReelResult<()> {
        (**self).submit(buffer, pts)
    }

    fn last_error(&self) -> Option<String> {
        (**self).last_error()
    }

    fn mark_finished(&mut self) {
        (**self).mark_finished()
    }

    fn finalize(&mut self, on_complete: CompletionHandler) {
        (**self).finalize(on_complete)
    }
}
