use image::imageops::{self, FilterType};

use crate::{
    buffer_pool::PixelBuffer,
    foundation::{
        core::{CanvasSize, PixelFormat, Point, Rect, Size},
        error::{ReelError, ReelResult},
    },
    source::SourceImage,
};

/// How a source image is fitted into the canvas.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum ContentMode {
    /// Whole image visible; letterboxed on the short axis.
    #[default]
    Fit,
    /// Canvas fully covered; overflow is cropped.
    Fill,
}

impl ContentMode {
    /// Parses a mode name. Anything that is not a fill spelling falls back to [`ContentMode::Fit`].
    pub fn from_str_lossy(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "fill" | "aspect_fill" | "aspect-fill" | "scale_aspect_fill" | "cover" => Self::Fill,
            _ => Self::Fit,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fit => "fit",
            Self::Fill => "fill",
        }
    }
}

impl From<String> for ContentMode {
    fn from(s: String) -> Self {
        Self::from_str_lossy(&s)
    }
}

impl std::fmt::Display for ContentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a source image lands on the canvas.
///
/// `offset` is measured from the bottom-left corner of the canvas: `offset.y` is the gap below
/// the image. Use [`Placement::rect`] for buffer (top-left origin) coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Placement {
    pub ratio: f64,
    pub scaled: Size,
    pub offset: Point,
}

impl Placement {
    /// The scaled image in buffer coordinates (origin top-left, rows growing downwards).
    ///
    /// A vertically overflowing image starts above row 0.
    pub fn rect(&self, canvas: CanvasSize) -> Rect {
        let top = f64::from(canvas.height) - self.offset.y - self.scaled.height;
        Rect::from_origin_size(Point::new(self.offset.x, top), self.scaled)
    }

    /// True when part of the scaled image falls outside the canvas.
    pub fn overflows(&self, canvas: CanvasSize) -> bool {
        let c = canvas.as_size();
        self.scaled.width > c.width + 1e-9 || self.scaled.height > c.height + 1e-9
    }
}

/// Aspect-preserving scale and centering of a `src_w x src_h` image on `canvas`.
///
/// Offsets are never negative: an axis that overflows (only possible with [`ContentMode::Fill`])
/// is anchored at 0. The excess lies past the right edge horizontally and past the top edge
/// vertically, so the bottom of a tall image stays in view.
pub fn placement(src_w: u32, src_h: u32, canvas: CanvasSize, mode: ContentMode) -> Placement {
    let c = canvas.as_size();
    let sw = f64::from(src_w.max(1));
    let sh = f64::from(src_h.max(1));

    let horizontal = c.width / sw;
    let vertical = c.height / sh;
    let ratio = match mode {
        ContentMode::Fill => horizontal.max(vertical),
        ContentMode::Fit => horizontal.min(vertical),
    };

    let scaled = Size::new(sw * ratio, sh * ratio);
    let x = if scaled.width < c.width {
        (c.width - scaled.width) / 2.0
    } else {
        0.0
    };
    let y = if scaled.height < c.height {
        (c.height - scaled.height) / 2.0
    } else {
        0.0
    };

    Placement {
        ratio,
        scaled,
        offset: Point::new(x, y),
    }
}

/// Clears `buffer` and draws `image` into it according to `mode`.
///
/// Pixels are written premultiplied, in the buffer's channel order, honoring its row stride.
pub fn compose_into(
    image: &SourceImage,
    canvas: CanvasSize,
    mode: ContentMode,
    buffer: &mut PixelBuffer,
) -> ReelResult<Placement> {
    if buffer.canvas() != canvas {
        return Err(ReelError::validation(format!(
            "buffer is {}, canvas is {canvas}",
            buffer.canvas()
        )));
    }
    if image.width == 0 || image.height == 0 {
        return Err(ReelError::validation("source image has zero width or height"));
    }

    buffer.data_mut().fill(0);

    let place = placement(image.width, image.height, canvas, mode);

    let dst_w = (place.scaled.width.round() as u32).max(1);
    let dst_h = (place.scaled.height.round() as u32).max(1);
    let x0 = (place.offset.x.round() as u32).min(canvas.width - 1);
    let gap_below = (place.offset.y.round() as u32).min(canvas.height - 1);

    let visible_w = dst_w.min(canvas.width - x0);
    let visible_h = dst_h.min(canvas.height - gap_below);
    let y0 = canvas.height - gap_below - visible_h;

    // Only the part of the source that maps inside the canvas gets resampled: its left columns
    // and its bottom rows.
    let crop_w = crop_extent(image.width, visible_w, dst_w);
    let crop_h = crop_extent(image.height, visible_h, dst_h);

    let premul = image.to_premul_image()?;
    let visible = if crop_w == image.width && crop_h == image.height {
        premul
    } else {
        imageops::crop_imm(&premul, 0, image.height - crop_h, crop_w, crop_h).to_image()
    };
    let scaled = if visible.dimensions() == (visible_w, visible_h) {
        visible
    } else {
        imageops::resize(&visible, visible_w, visible_h, FilterType::Triangle)
    };

    blit_premul(&scaled, x0, y0, buffer);
    Ok(place)
}

fn crop_extent(src: u32, visible: u32, scaled: u32) -> u32 {
    if visible >= scaled {
        return src;
    }
    let exact = f64::from(src) * f64::from(visible) / f64::from(scaled);
    (exact.ceil() as u32).clamp(1, src)
}

fn blit_premul(src: &image::RgbaImage, x0: u32, y0: u32, buffer: &mut PixelBuffer) {
    let [ro, go, bo, ao] = buffer.format().channel_offsets();
    let stride = buffer.stride();
    let w = src.width();
    let bpp = PixelFormat::BYTES_PER_PIXEL;
    let data = buffer.data_mut();

    for (y, src_row) in src.as_raw().chunks_exact(w as usize * bpp).enumerate() {
        let row_start = (y0 as usize + y) * stride + x0 as usize * bpp;
        let dst_row = &mut data[row_start..row_start + w as usize * bpp];
        for (d, s) in dst_row.chunks_exact_mut(bpp).zip(src_row.chunks_exact(bpp)) {
            d[ro] = s[0];
            d[go] = s[1];
            d[bo] = s[2];
            d[ao] = s[3];
        }
    }
}
