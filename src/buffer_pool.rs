use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::foundation::{
    core::{CanvasSize, PixelFormat},
    error::{ReelError, ReelResult},
};

/// Raw pixel memory for one canvas-sized frame.
///
/// Rows are `stride` bytes apart; `stride` may exceed `width * 4`. A buffer handed out by a
/// [`PixelBufferPool`] returns its memory to that pool when dropped, wherever that happens.
pub struct PixelBuffer {
    width: u32,
    height: u32,
    stride: usize,
    format: PixelFormat,
    data: Vec<u8>,
    home: Option<Weak<Mutex<PoolState>>>,
}

impl PixelBuffer {
    /// Allocates a buffer that belongs to no pool.
    pub fn detached(canvas: CanvasSize, stride: usize, format: PixelFormat) -> ReelResult<Self> {
        canvas.validate()?;
        if stride < canvas.packed_row_bytes() {
            return Err(ReelError::validation(format!(
                "stride {stride} is smaller than a {}-pixel row",
                canvas.width
            )));
        }
        Ok(Self {
            width: canvas.width,
            height: canvas.height,
            stride,
            format,
            data: vec![0u8; frame_bytes(stride, canvas)?],
            home: None,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn canvas(&self) -> CanvasSize {
        CanvasSize {
            width: self.width,
            height: self.height,
        }
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Visible bytes of row `y` (padding excluded).
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.width as usize * PixelFormat::BYTES_PER_PIXEL]
    }

    /// Copies the visible area into a tightly packed vector.
    pub fn to_packed(&self) -> Vec<u8> {
        let row_bytes = self.width as usize * PixelFormat::BYTES_PER_PIXEL;
        let mut out = Vec::with_capacity(row_bytes * self.height as usize);
        for y in 0..self.height {
            out.extend_from_slice(self.row(y));
        }
        out
    }
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("format", &self.format)
            .field("pooled", &self.home.is_some())
            .finish()
    }
}

impl Drop for PixelBuffer {
    fn drop(&mut self) {
        let Some(home) = self.home.take().and_then(|w| w.upgrade()) else {
            return;
        };
        let data = std::mem::take(&mut self.data);
        lock_state(&home).reclaim(data);
    }
}

/// Size of one frame with `stride`-byte rows, refused when it cannot be allocated.
fn frame_bytes(stride: usize, canvas: CanvasSize) -> ReelResult<usize> {
    stride
        .checked_mul(canvas.height as usize)
        .filter(|&len| len <= isize::MAX as usize)
        .ok_or_else(|| {
            ReelError::validation(format!("a {canvas} frame with {stride}-byte rows is too large"))
        })
}

fn lock_state(state: &Mutex<PoolState>) -> MutexGuard<'_, PoolState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Anything that can hand out canvas-sized pixel buffers.
pub trait BufferSource: Send {
    fn acquire_buffer(&self, canvas: CanvasSize) -> ReelResult<PixelBuffer>;
}

/// Pool configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of buffers out of the pool at once; 0 means unbounded.
    pub max_outstanding: usize,
    /// Maximum bytes retained for reuse.
    pub max_retained_bytes: usize,
    /// Row stride is rounded up to a multiple of this many bytes.
    pub row_alignment: usize,
    pub format: PixelFormat,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_outstanding: 8,
            max_retained_bytes: 64 * 1024 * 1024,
            row_alignment: 64,
            format: PixelFormat::Argb8Premul,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> ReelResult<()> {
        if self.row_alignment == 0 || !self.row_alignment.is_power_of_two() {
            return Err(ReelError::validation(
                "pool row_alignment must be a non-zero power of two",
            ));
        }
        Ok(())
    }

    pub fn stride_for(&self, canvas: CanvasSize) -> usize {
        let packed = canvas.packed_row_bytes();
        let align = self.row_alignment.max(1);
        packed.div_ceil(align).saturating_mul(align)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub outstanding: usize,
    pub retained_buffers: usize,
    pub retained_bytes: usize,
    pub alloc_buffers: u64,
    pub reused_buffers: u64,
    pub dropped_on_release: u64,
}

#[derive(Debug)]
struct PoolState {
    cfg: PoolConfig,
    canvas: CanvasSize,
    stride: usize,
    buffer_len: usize,
    free: Vec<Vec<u8>>,
    stats: PoolStats,
}

impl PoolState {
    fn reclaim(&mut self, data: Vec<u8>) {
        self.stats.outstanding = self.stats.outstanding.saturating_sub(1);

        let len = self.buffer_len;
        if data.len() != len || self.stats.retained_bytes.saturating_add(len) > self.cfg.max_retained_bytes
        {
            self.stats.dropped_on_release = self.stats.dropped_on_release.saturating_add(1);
            return;
        }
        self.free.push(data);
        self.stats.retained_buffers = self.free.len();
        self.stats.retained_bytes = self.stats.retained_bytes.saturating_add(len);
    }
}

/// Bounded, recycling allocator for one canvas size.
///
/// Clones share the same underlying pool.
#[derive(Clone, Debug)]
pub struct PixelBufferPool {
    state: Arc<Mutex<PoolState>>,
}

impl PixelBufferPool {
    pub fn new(canvas: CanvasSize, cfg: PoolConfig) -> ReelResult<Self> {
        canvas.validate()?;
        cfg.validate()?;
        let stride = cfg.stride_for(canvas);
        let buffer_len = frame_bytes(stride, canvas)?;
        Ok(Self {
            state: Arc::new(Mutex::new(PoolState {
                cfg,
                canvas,
                stride,
                buffer_len,
                free: Vec::new(),
                stats: PoolStats::default(),
            })),
        })
    }

    pub fn stats(&self) -> PoolStats {
        lock_state(&self.state).stats.clone()
    }

    pub fn stride(&self) -> usize {
        lock_state(&self.state).stride
    }
}

impl BufferSource for PixelBufferPool {
    fn acquire_buffer(&self, canvas: CanvasSize) -> ReelResult<PixelBuffer> {
        let mut st = lock_state(&self.state);

        if canvas != st.canvas {
            return Err(ReelError::validation(format!(
                "pool serves {} buffers, requested {canvas}",
                st.canvas
            )));
        }
        if st.cfg.max_outstanding != 0 && st.stats.outstanding >= st.cfg.max_outstanding {
            return Err(ReelError::pool_exhausted(format!(
                "{} of {} buffers in use",
                st.stats.outstanding, st.cfg.max_outstanding
            )));
        }

        let len = st.buffer_len;
        let data = match st.free.pop() {
            Some(d) => {
                st.stats.retained_buffers = st.free.len();
                st.stats.retained_bytes = st.stats.retained_bytes.saturating_sub(len);
                st.stats.reused_buffers = st.stats.reused_buffers.saturating_add(1);
                d
            }
            None => {
                st.stats.alloc_buffers = st.stats.alloc_buffers.saturating_add(1);
                vec![0u8; len]
            }
        };
        st.stats.outstanding += 1;

        Ok(PixelBuffer {
            width: canvas.width,
            height: canvas.height,
            stride: st.stride,
            format: st.cfg.format,
            data,
            home: Some(Arc::downgrade(&self.state)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canvas(w: u32, h: u32) -> CanvasSize {
        CanvasSize::new(w, h).unwrap()
    }

    #[test]
    fn stride_is_aligned_and_covers_row() {
        let cfg = PoolConfig {
            row_alignment: 64,
            ..PoolConfig::default()
        };
        assert_eq!(cfg.stride_for(canvas(10, 1)), 64);
        assert_eq!(cfg.stride_for(canvas(16, 1)), 64);
        assert_eq!(cfg.stride_for(canvas(17, 1)), 128);
        assert!(
            PoolConfig {
                row_alignment: 3,
                ..PoolConfig::default()
            }
            .validate()
            .is_err()
        );
    }

    #[test]
    fn dropped_buffers_are_reused() {
        let pool = PixelBufferPool::new(canvas(8, 8), PoolConfig::default()).unwrap();
        let a = pool.acquire_buffer(canvas(8, 8)).unwrap();
        assert_eq!(pool.stats().outstanding, 1);
        drop(a);

        let st = pool.stats();
        assert_eq!(st.outstanding, 0);
        assert_eq!(st.retained_buffers, 1);

        let _b = pool.acquire_buffer(canvas(8, 8)).unwrap();
        let st = pool.stats();
        assert_eq!(st.alloc_buffers, 1);
        assert_eq!(st.reused_buffers, 1);
    }

    #[test]
    fn outstanding_cap_reports_exhaustion() {
        let pool = PixelBufferPool::new(
            canvas(4, 4),
            PoolConfig {
                max_outstanding: 1,
                ..PoolConfig::default()
            },
        )
        .unwrap();
        let held = pool.acquire_buffer(canvas(4, 4)).unwrap();
        let err = pool.acquire_buffer(canvas(4, 4)).unwrap_err();
        assert!(matches!(err, ReelError::PoolExhausted(_)));
        drop(held);
        assert!(pool.acquire_buffer(canvas(4, 4)).is_ok());
    }

    #[test]
    fn retained_byte_cap_drops_extra_buffers() {
        let cfg = PoolConfig {
            row_alignment: 1,
            ..PoolConfig::default()
        };
        let one = cfg.stride_for(canvas(8, 8)) * 8;
        let pool = PixelBufferPool::new(
            canvas(8, 8),
            PoolConfig {
                max_retained_bytes: one,
                ..cfg
            },
        )
        .unwrap();
        let a = pool.acquire_buffer(canvas(8, 8)).unwrap();
        let b = pool.acquire_buffer(canvas(8, 8)).unwrap();
        drop(a);
        drop(b);

        let st = pool.stats();
        assert_eq!(st.retained_bytes, one);
        assert_eq!(st.retained_buffers, 1);
        assert_eq!(st.dropped_on_release, 1);
    }

    #[test]
    fn wrong_canvas_is_rejected() {
        let pool = PixelBufferPool::new(canvas(8, 8), PoolConfig::default()).unwrap();
        assert!(pool.acquire_buffer(canvas(8, 9)).is_err());
    }

    #[test]
    fn buffer_outliving_pool_is_fine() {
        let pool = PixelBufferPool::new(canvas(2, 2), PoolConfig::default()).unwrap();
        let buf = pool.acquire_buffer(canvas(2, 2)).unwrap();
        drop(pool);
        assert_eq!(buf.row(1).len(), 8);
        drop(buf);
    }

    #[test]
    fn oversized_canvas_is_rejected_not_wrapped() {
        let huge = canvas(u32::MAX, u32::MAX);
        let err = PixelBufferPool::new(huge, PoolConfig::default()).unwrap_err();
        assert!(err.to_string().contains("too large"));

        let stride = huge.packed_row_bytes();
        assert!(PixelBuffer::detached(huge, stride, PixelFormat::Rgba8Premul).is_err());
    }

    #[test]
    fn poisoned_pool_still_reclaims_buffers() {
        let pool = PixelBufferPool::new(
            canvas(2, 2),
            PoolConfig {
                max_outstanding: 1,
                ..PoolConfig::default()
            },
        )
        .unwrap();
        let held = pool.acquire_buffer(canvas(2, 2)).unwrap();

        let state = Arc::clone(&pool.state);
        let poisoner = std::thread::spawn(move || {
            let _guard = state.lock().unwrap();
            panic!("poison the pool lock");
        });
        assert!(poisoner.join().is_err());
        assert!(pool.state.is_poisoned());

        drop(held);
        assert_eq!(pool.stats().outstanding, 0);
        assert!(pool.acquire_buffer(canvas(2, 2)).is_ok());
    }

    #[test]
    fn packed_copy_strips_row_padding() {
        let mut buf = PixelBuffer::detached(canvas(1, 2), 8, PixelFormat::Rgba8Premul).unwrap();
        buf.data_mut()
            .copy_from_slice(&[1, 2, 3, 4, 9, 9, 9, 9, 5, 6, 7, 8, 9, 9, 9, 9]);
        assert_eq!(buf.to_packed(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(PixelBuffer::detached(canvas(4, 1), 8, PixelFormat::Rgba8Premul).is_err());
    }
}
