use std::{path::Path, sync::Arc};

use anyhow::Context;

use crate::foundation::error::{ReelError, ReelResult};

/// A decoded still image, held as premultiplied RGBA8.
///
/// Cloning is cheap; pixel memory is shared.
#[derive(Clone, Debug)]
pub struct SourceImage {
    pub width: u32,
    pub height: u32,
    pub rgba8_premul: Arc<Vec<u8>>,
}

impl SourceImage {
    pub fn from_rgba8(img: image::RgbaImage) -> ReelResult<Self> {
        let (width, height) = img.dimensions();
        if width == 0 || height == 0 {
            return Err(ReelError::decode("image has zero width or height"));
        }
        let mut rgba8_premul = img.into_raw();
        premultiply_rgba8_in_place(&mut rgba8_premul);
        Ok(Self {
            width,
            height,
            rgba8_premul: Arc::new(rgba8_premul),
        })
    }

    pub fn from_dynamic(img: image::DynamicImage) -> ReelResult<Self> {
        Self::from_rgba8(img.to_rgba8())
    }

    /// Builds an image that is already premultiplied.
    pub fn from_premul_rgba8(width: u32, height: u32, data: Vec<u8>) -> ReelResult<Self> {
        if width == 0 || height == 0 {
            return Err(ReelError::validation("image has zero width or height"));
        }
        if data.len() != width as usize * height as usize * 4 {
            return Err(ReelError::validation(format!(
                "expected {} bytes for a {width}x{height} rgba8 image, got {}",
                width as usize * height as usize * 4,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            rgba8_premul: Arc::new(data),
        })
    }

    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> ReelResult<Self> {
        let px = image::Rgba(rgba);
        Self::from_rgba8(image::RgbaImage::from_pixel(width, height, px))
    }

    /// Premultiplied pixels as an `image` buffer, for resampling.
    pub(crate) fn to_premul_image(&self) -> ReelResult<image::RgbaImage> {
        image::RgbaImage::from_raw(self.width, self.height, self.rgba8_premul.as_ref().clone())
            .ok_or_else(|| ReelError::validation("image buffer does not match its dimensions"))
    }
}

pub fn decode_image(bytes: &[u8]) -> ReelResult<SourceImage> {
    let dyn_img = image::load_from_memory(bytes)
        .map_err(|e| ReelError::decode(format!("decode image from memory: {e}")))?;
    SourceImage::from_dynamic(dyn_img)
}

pub fn open_image(path: &Path) -> ReelResult<SourceImage> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("read image '{}'", path.display()))?;
    decode_image(&bytes).map_err(|e| match e {
        ReelError::Decode(msg) => ReelError::decode(format!("'{}': {msg}", path.display())),
        other => other,
    })
}

fn premultiply_rgba8_in_place(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = px[3] as u16;
        if a == 0 {
            px[0] = 0;
            px[1] = 0;
            px[2] = 0;
            continue;
        }
        px[0] = ((px[0] as u16 * a + 127) / 255) as u8;
        px[1] = ((px[1] as u16 * a + 127) / 255) as u8;
        px[2] = ((px[2] as u16 * a + 127) / 255) as u8;
    }
}
