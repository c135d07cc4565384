// Core pixel type shared by every stage of the mirror.

use image::RgbaImage;

use crate::error::{Error, Result};

/// Bytes per RGBA pixel.
pub const CHANNELS: usize = 4;

/// Immutable RGBA frame, row-major, 4 bytes per pixel.
///
/// Transforms never write into an existing buffer; they build a new one. That keeps the
/// convolution source and destination from ever aliasing.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Wrap raw RGBA bytes. Fails when `data.len() != width * height * 4`.
    pub fn new(width: usize, height: usize, data: Vec<u8>) -> Result<Self> {
        let expected = byte_len(width, height, CHANNELS)?;
        if data.len() != expected {
            return Err(Error::BufferLength { expected, actual: data.len() });
        }
        Ok(Self { width, height, data })
    }

    /// A frame where every pixel is `rgba`.
    /// Panics with a capacity overflow when `width * height` does not fit in usize.
    pub fn filled(width: usize, height: usize, rgba: [u8; 4]) -> Self {
        let data = rgba.repeat(width.checked_mul(height).unwrap_or(usize::MAX));
        Self { width, height, data }
    }

    /// For bytes built in-crate from a frame of the same shape.
    pub(crate) fn from_parts(width: usize, height: usize, data: Vec<u8>) -> Self {
        debug_assert_eq!(Some(data.len()), width.checked_mul(height).and_then(|n| n.checked_mul(CHANNELS)));
        Self { width, height, data }
    }

    /// Expand tightly packed RGB bytes (what the camera decodes to) into opaque RGBA.
    pub fn from_rgb(width: usize, height: usize, rgb: &[u8]) -> Result<Self> {
        let expected = byte_len(width, height, 3)?;
        if rgb.len() != expected {
            return Err(Error::BufferLength { expected, actual: rgb.len() });
        }
        let mut data = Vec::with_capacity(expected / 3 * CHANNELS);
        for px in rgb.chunks_exact(3) {
            data.extend_from_slice(&[px[0], px[1], px[2], 255]);
        }
        Ok(Self { width, height, data })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// True when there is nothing to filter (zero width or height).
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.width * CHANNELS
    }

    /// RGBA at (x, y). Panics when out of bounds, like slice indexing.
    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> [u8; 4] {
        let i = (y * self.width + x) * CHANNELS;
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }

    /// One row of RGBA bytes.
    #[inline]
    pub fn row(&self, y: usize) -> &[u8] {
        let stride = self.stride();
        &self.data[y * stride..(y + 1) * stride]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// Pack as 0x00RRGGBB per pixel, the layout minifb pushes to the screen.
    /// Alpha is dropped; the window has no transparency.
    pub fn to_0rgb(&self) -> Vec<u32> {
        self.data
            .chunks_exact(CHANNELS)
            .map(|px| ((px[0] as u32) << 16) | ((px[1] as u32) << 8) | px[2] as u32)
            .collect()
    }
}

/// `width * height * bytes_per_pixel`, or `Overflow` when that doesn't fit in usize.
fn byte_len(width: usize, height: usize, bytes_per_pixel: usize) -> Result<usize> {
    width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(bytes_per_pixel))
        .ok_or(Error::Overflow { width, height })
}

impl From<RgbaImage> for PixelBuffer {
    fn from(img: RgbaImage) -> Self {
        let (w, h) = img.dimensions();
        Self { width: w as usize, height: h as usize, data: img.into_raw() }
    }
}

impl PixelBuffer {
    /// Copy into an `image` buffer for saving. None only if a side exceeds u32.
    pub fn to_rgba_image(&self) -> Option<RgbaImage> {
        let w = u32::try_from(self.width).ok()?;
        let h = u32::try_from(self.height).ok()?;
        RgbaImage::from_raw(w, h, self.data.clone())
    }
}

impl std::fmt::Debug for PixelBuffer {
    // Frames are large; print the shape, not the pixels.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}
