use std::sync::{Arc, Condvar, Mutex, PoisonError};

use crate::foundation::{
    core::{Fps, FrameIndex, Timestamp},
    error::{ReelError, ReelResult},
};

/// Closed form of the presentation time of frame `index`: `index / fps`.
pub fn timestamp_for(index: FrameIndex, fps: Fps) -> ReelResult<Timestamp> {
    let value = i64::try_from(index.0)
        .ok()
        .and_then(|i| i.checked_mul(i64::from(fps.den)))
        .ok_or_else(|| ReelError::validation("frame index overflows the timestamp range"))?;
    Timestamp::new(value, fps.num)
}

/// Hands out presentation timestamps one frame apart.
///
/// Each timestamp is the previous one plus the exact frame duration. The arithmetic is on
/// integers in the `1/fps.num` timescale, so accumulation never drifts from `index / fps`.
#[derive(Clone, Debug)]
pub struct FramePacer {
    fps: Fps,
    step: Timestamp,
    cursor: Timestamp,
    next_index: u64,
}

impl FramePacer {
    pub fn new(fps: Fps) -> Self {
        Self {
            fps,
            step: fps.frame_duration(),
            cursor: Timestamp {
                value: 0,
                timescale: fps.num,
            },
            next_index: 0,
        }
    }

    pub fn fps(&self) -> Fps {
        self.fps
    }

    pub fn next_timestamp(&mut self, index: FrameIndex) -> ReelResult<Timestamp> {
        let ts = if index.0 == 0 {
            Timestamp {
                value: 0,
                timescale: self.fps.num,
            }
        } else if index.0 == self.next_index {
            self.cursor
                .checked_add(self.step)
                .ok_or_else(|| ReelError::validation("timestamp overflow"))?
        } else {
            timestamp_for(index, self.fps)?
        };

        self.cursor = ts;
        self.next_index = index.0.saturating_add(1);
        Ok(ts)
    }
}

/// Encoder readiness, shared between the encoder (which sets it) and the submitting thread
/// (which waits on it).
#[derive(Clone, Debug)]
pub struct ReadyFlag {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ReadyFlag {
    pub fn new(ready: bool) -> Self {
        Self {
            inner: Arc::new((Mutex::new(ready), Condvar::new())),
        }
    }

    pub fn set(&self, ready: bool) {
        let (lock, cvar) = &*self.inner;
        let mut guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = ready;
        if ready {
            cvar.notify_all();
        }
    }

    pub fn is_ready(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until the flag is set.
    ///
    /// There is no timeout: an encoder that never becomes ready blocks the caller forever.
    pub fn await_ready(&self) {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _ready = cvar
            .wait_while(guard, |ready| !*ready)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

impl Default for ReadyFlag {
    fn default() -> Self {
        Self::new(true)
    }
}
