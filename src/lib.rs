//! Stillreel turns an ordered sequence of still images into a timed video.
//!
//! Each image is scaled into a fixed-size canvas (`fit` letterboxes, `fill` crops), written into
//! a pooled pixel buffer, stamped with a presentation time one frame after the previous one and
//! handed to an encoder. A [`Session`] drives this from `start()` through repeated `add_image()`
//! calls to `finish()`, after which the outcome arrives through callbacks or a [`Completion`].
//!
//! The encoder, buffer pool, output location and media-library hand-off are traits and small
//! types at the edges; [`FfmpegEncoder`] streams frames to the system `ffmpeg` binary.
#![forbid(unsafe_code)]

pub mod buffer_pool;
pub mod compose;
pub mod encode;
pub mod foundation;
pub mod job;
pub mod output;
pub mod pacer;
pub mod publish;
pub mod session;
pub mod source;

pub use buffer_pool::{BufferSource, PixelBuffer, PixelBufferPool, PoolConfig, PoolStats};
pub use compose::{ContentMode, Placement, compose_into, placement};
pub use encode::ffmpeg::{FfmpegEncoder, ensure_parent_dir, ffmpeg_args, is_ffmpeg_on_path};
pub use encode::{
    Codec, CodecConfig, CompletionHandler, Container, EncoderSetup, VideoEncoder,
};
pub use foundation::core::{
    CanvasSize, Fps, FrameIndex, PixelFormat, Point, Rect, Size, Timestamp, format_elapsed,
};
pub use foundation::error::{ReelError, ReelResult};
pub use job::{FrameSpec, ReelJob, run_job};
pub use output::{OUTPUT_DIR_ENV, OutputResolver};
pub use pacer::{FramePacer, ReadyFlag, timestamp_for};
pub use publish::{LibraryPublisher, NoopPublisher, Publisher};
pub use session::{
    Completion, FailureCallback, Session, SessionConfig, SessionReport, SessionState,
    SuccessCallback,
};
pub use source::{SourceImage, decode_image, open_image};
