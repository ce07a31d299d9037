use std::{cmp::Ordering, fmt};

use crate::foundation::error::{ReelError, ReelResult};

pub use kurbo::{Point, Rect, Size};

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct FrameIndex(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

impl CanvasSize {
    pub fn new(width: u32, height: u32) -> ReelResult<Self> {
        let c = Self { width, height };
        c.validate()?;
        Ok(c)
    }

    pub fn validate(self) -> ReelResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ReelError::validation("canvas width/height must be non-zero"));
        }
        Ok(())
    }

    pub fn as_size(self) -> Size {
        Size::new(f64::from(self.width), f64::from(self.height))
    }

    /// Tightly packed row length for 4-byte pixels.
    pub fn packed_row_bytes(self) -> usize {
        (self.width as usize).saturating_mul(4)
    }
}

impl Default for CanvasSize {
    fn default() -> Self {
        Self {
            width: 320,
            height: 568,
        }
    }
}

impl fmt::Display for CanvasSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Fps {
    pub num: u32,
    pub den: u32, // must be > 0
}

impl Fps {
    pub fn new(num: u32, den: u32) -> ReelResult<Self> {
        if den == 0 {
            return Err(ReelError::validation("Fps den must be > 0"));
        }
        if num == 0 {
            return Err(ReelError::validation("Fps num must be > 0"));
        }
        Ok(Self { num, den })
    }

    pub fn integer(num: u32) -> ReelResult<Self> {
        Self::new(num, 1)
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }

    /// Exact length of one frame, expressed in the `1/num` timescale.
    pub fn frame_duration(self) -> Timestamp {
        Timestamp {
            value: i64::from(self.den),
            timescale: self.num,
        }
    }

    pub fn frame_duration_secs(self) -> f64 {
        f64::from(self.den) / f64::from(self.num)
    }
}

impl Default for Fps {
    fn default() -> Self {
        Self { num: 24, den: 1 }
    }
}

impl fmt::Display for Fps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

/// Rational media time: `value / timescale` seconds.
///
/// Equality and ordering compare the rational value, so `1/24` equals `2/48`.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct Timestamp {
    pub value: i64,
    pub timescale: u32, // must be > 0
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp {
        value: 0,
        timescale: 1,
    };

    pub fn new(value: i64, timescale: u32) -> ReelResult<Self> {
        if timescale == 0 {
            return Err(ReelError::validation("Timestamp timescale must be > 0"));
        }
        Ok(Self { value, timescale })
    }

    pub fn as_secs_f64(self) -> f64 {
        self.value as f64 / f64::from(self.timescale)
    }

    /// Exact sum. Operands on different timescales are brought to the common multiple.
    pub fn checked_add(self, rhs: Timestamp) -> Option<Timestamp> {
        if self.timescale == rhs.timescale {
            return Some(Timestamp {
                value: self.value.checked_add(rhs.value)?,
                timescale: self.timescale,
            });
        }
        let scale = lcm(u64::from(self.timescale), u64::from(rhs.timescale));
        let scale_u32 = u32::try_from(scale).ok()?;
        let a = self
            .value
            .checked_mul(i64::try_from(scale / u64::from(self.timescale)).ok()?)?;
        let b = rhs
            .value
            .checked_mul(i64::try_from(scale / u64::from(rhs.timescale)).ok()?)?;
        Some(Timestamp {
            value: a.checked_add(b)?,
            timescale: scale_u32,
        })
    }

    fn cross(self, other: Timestamp) -> (i128, i128) {
        (
            i128::from(self.value) * i128::from(other.timescale),
            i128::from(other.value) * i128::from(self.timescale),
        )
    }
}

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = self.cross(*other);
        a == b
    }
}

impl Eq for Timestamp {}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = self.cross(*other);
        a.cmp(&b)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.value, self.timescale)
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

fn lcm(a: u64, b: u64) -> u64 {
    a / gcd(a, b) * b
}

/// Byte order of a 4-byte premultiplied pixel.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// Alpha first (`A R G B`), the layout most platform encoders take natively.
    #[default]
    Argb8Premul,
    Rgba8Premul,
}

impl PixelFormat {
    pub const BYTES_PER_PIXEL: usize = 4;

    /// Byte offsets of `(r, g, b, a)` within one pixel.
    pub fn channel_offsets(self) -> [usize; 4] {
        match self {
            PixelFormat::Argb8Premul => [1, 2, 3, 0],
            PixelFormat::Rgba8Premul => [0, 1, 2, 3],
        }
    }

    /// `-pix_fmt` name for ffmpeg's rawvideo demuxer.
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            PixelFormat::Argb8Premul => "argb",
            PixelFormat::Rgba8Premul => "rgba",
        }
    }
}

/// Formats a wall-clock duration as `SS.mmm`, `MM:SS.mmm` or `HH:MM:SS.mmm`.
pub fn format_elapsed(elapsed: std::time::Duration) -> String {
    let total = elapsed.as_secs();
    let ms = elapsed.subsec_millis();
    let seconds = total % 60;
    let minutes = (total / 60) % 60;
    let hours = total / 3600;

    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}.{ms:03}")
    } else if minutes > 0 {
        format!("{minutes:02}:{seconds:02}.{ms:03}")
    } else {
        format!("{seconds:02}.{ms:03}")
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn canvas_rejects_zero_extent() {
        assert!(CanvasSize::new(0, 10).is_err());
        assert!(CanvasSize::new(10, 0).is_err());
        assert_eq!(CanvasSize::new(320, 568).unwrap(), CanvasSize::default());
    }

    #[test]
    fn fps_default_is_24_and_rejects_zero() {
        assert_eq!(Fps::default(), Fps::integer(24).unwrap());
        assert!(Fps::new(0, 1).is_err());
        assert!(Fps::new(30, 0).is_err());
        assert_eq!(Fps::new(30000, 1001).unwrap().to_string(), "30000/1001");
    }

    #[test]
    fn frame_duration_is_exact() {
        let d = Fps::new(30000, 1001).unwrap().frame_duration();
        assert_eq!(d.value, 1001);
        assert_eq!(d.timescale, 30000);
    }

    #[test]
    fn timestamp_compares_by_value() {
        let a = Timestamp::new(1, 24).unwrap();
        let b = Timestamp::new(2, 48).unwrap();
        assert_eq!(a, b);
        assert!(Timestamp::new(1, 25).unwrap() < a);
        assert_eq!(Timestamp::ZERO, Timestamp::new(0, 90000).unwrap());
        assert!(Timestamp::new(1, 0).is_err());
    }

    #[test]
    fn timestamp_add_across_timescales() {
        let a = Timestamp::new(1, 2).unwrap();
        let b = Timestamp::new(1, 3).unwrap();
        let sum = a.checked_add(b).unwrap();
        assert_eq!(sum, Timestamp::new(5, 6).unwrap());
        assert_eq!(sum.timescale, 6);
    }

    #[test]
    fn pixel_format_offsets() {
        assert_eq!(PixelFormat::Argb8Premul.channel_offsets(), [1, 2, 3, 0]);
        assert_eq!(PixelFormat::Rgba8Premul.channel_offsets(), [0, 1, 2, 3]);
    }

    #[test]
    fn elapsed_formatting() {
        assert_eq!(format_elapsed(Duration::from_millis(5_250)), "05.250");
        assert_eq!(format_elapsed(Duration::from_millis(125_007)), "02:05.007");
        assert_eq!(format_elapsed(Duration::from_secs(3_723)), "01:02:03.000");
    }
}
