use crate::session::SessionState;

pub type ReelResult<T> = Result<T, ReelError>;

#[derive(thiserror::Error, Debug)]
pub enum ReelError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("invalid state: cannot {op} while session is {state}")]
    InvalidState {
        op: &'static str,
        state: SessionState,
    },

    #[error("failed to start encoder: {0}")]
    FailedToStartEncoder(String),

    #[error(
        "failed to append frame {frame}: {reason} (encoder error: {})",
        .raw.as_deref().unwrap_or("none")
    )]
    FailedToAppendFrame {
        frame: u64,
        reason: String,
        raw: Option<String>,
    },

    #[error("pixel buffer pool exhausted: {0}")]
    PoolExhausted(String),

    #[error("encoder finalize error: {0}")]
    EncoderFinalize(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("session aborted: {0}")]
    Aborted(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ReelError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_state(op: &'static str, state: SessionState) -> Self {
        Self::InvalidState { op, state }
    }

    pub fn start_encoder(msg: impl Into<String>) -> Self {
        Self::FailedToStartEncoder(msg.into())
    }

    pub fn pool_exhausted(msg: impl Into<String>) -> Self {
        Self::PoolExhausted(msg.into())
    }

    pub fn finalize(msg: impl Into<String>) -> Self {
        Self::EncoderFinalize(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn aborted(msg: impl Into<String>) -> Self {
        Self::Aborted(msg.into())
    }

    /// Wraps a per-frame failure together with whatever the encoder last reported.
    pub fn append(frame: u64, cause: &ReelError, raw: Option<String>) -> Self {
        Self::FailedToAppendFrame {
            frame,
            reason: cause.to_string(),
            raw,
        }
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState { .. })
    }
}
