//! Pixel buffers exchanged between pipeline steps.
//!
//! [`Image`] is a 16-bit grayscale plane. Clones share storage; the first
//! mutation through [`Image::buffer_mut`] copies the pixels if another handle
//! still references them. [`RgbImage`] is the 8-bit colour canvas used for
//! overlays, thumbnails and control images.

mod io;
mod plane;


use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::buffer2::Buffer2;
use thiserror::Error;

pub use io::{load_gray16, save_gray16_png, save_rgb_png};
pub use plane::{PlaneId, PlaneRef};

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Image size mismatch: {left_width}x{left_height} vs {right_width}x{right_height}")]
    SizeMismatch {
        left_width: usize,
        left_height: usize,
        right_width: usize,
        right_height: usize,
    },
    #[error("Failed to encode image '{path}': {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: ::image::ImageError,
    },
    #[error("Failed to decode image '{path}': {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: ::image::ImageError,
    },
    #[error("IO error for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type ImageResult<T> = Result<T, ImageError>;

/// 16-bit grayscale plane with copy-on-write storage.
#[derive(Debug, Clone)]
pub struct Image {
    pixels: Arc<Buffer2<u16>>,
    plane: PlaneId,
}

impl Image {
    pub fn new_blank(width: usize, height: usize, plane: PlaneId) -> Self {
        Self::from_buffer(Buffer2::new_default(width, height), plane)
    }

    pub fn new_filled(width: usize, height: usize, value: u16, plane: PlaneId) -> Self {
        Self::from_buffer(Buffer2::new_filled(width, height, value), plane)
    }

    pub fn from_buffer(buffer: Buffer2<u16>, plane: PlaneId) -> Self {
        Self {
            pixels: Arc::new(buffer),
            plane,
        }
    }

    pub fn from_vec(width: usize, height: usize, pixels: Vec<u16>, plane: PlaneId) -> Self {
        Self::from_buffer(Buffer2::new(width, height, pixels), plane)
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.pixels.width()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.pixels.height()
    }

    #[inline]
    pub fn plane(&self) -> PlaneId {
        self.plane
    }

    pub fn set_plane(&mut self, plane: PlaneId) {
        self.plane = plane;
    }

    #[inline]
    pub fn buffer(&self) -> &Buffer2<u16> {
        &self.pixels
    }

    /// Mutable access, detaching from any other handle first.
    #[inline]
    pub fn buffer_mut(&mut self) -> &mut Buffer2<u16> {
        Arc::make_mut(&mut self.pixels)
    }

    #[inline]
    pub fn pixels(&self) -> &[u16] {
        self.pixels.pixels()
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u16 {
        *self.pixels.get(x, y)
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: u16) {
        *self.buffer_mut().get_mut(x, y) = value;
    }

    /// Copy with private storage.
    pub fn deep_clone(&self) -> Self {
        Self {
            pixels: Arc::new(Buffer2::clone(&self.pixels)),
            plane: self.plane,
        }
    }

    pub fn shares_storage_with(&self, other: &Image) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }

    pub fn same_size(&self, other: &Image) -> ImageResult<()> {
        if self.width() == other.width() && self.height() == other.height() {
            Ok(())
        } else {
            Err(ImageError::SizeMismatch {
                left_width: self.width(),
                left_height: self.height(),
                right_width: other.width(),
                right_height: other.height(),
            })
        }
    }

    pub fn min_max(&self) -> (u16, u16) {
        self.pixels()
            .iter()
            .fold((u16::MAX, u16::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)))
    }

    /// Full 16-bit histogram.
    pub fn histogram(&self) -> Vec<u64> {
        let mut histogram = vec![0u64; 1 << 16];
        for &v in self.pixels() {
            histogram[v as usize] += 1;
        }
        histogram
    }

    /// 256-bin histogram of `[min, max]` mapped linearly to `[0, 255]`.
    pub fn histogram_8bit(&self, min: u16, max: u16) -> [u64; 256] {
        let mut histogram = [0u64; 256];
        let scale = 256.0 / (max as f64 - min as f64 + 1.0);
        for &v in self.pixels() {
            let scaled = ((v.saturating_sub(min)) as f64 * scale + 0.5) as usize;
            histogram[scaled.min(255)] += 1;
        }
        histogram
    }

    /// Intensity range covering all but `clip` of the pixels at each end.
    pub fn auto_contrast_range(&self, clip: f64) -> (u16, u16) {
        let histogram = self.histogram();
        let total: u64 = histogram.iter().sum();
        if total == 0 {
            return (0, u16::MAX);
        }
        let limit = (total as f64 * clip.clamp(0.0, 0.5)) as u64;

        let mut acc = 0;
        let mut lo = 0usize;
        for (i, &n) in histogram.iter().enumerate() {
            acc += n;
            if acc > limit {
                lo = i;
                break;
            }
        }
        acc = 0;
        let mut hi = u16::MAX as usize;
        for (i, &n) in histogram.iter().enumerate().rev() {
            acc += n;
            if acc > limit {
                hi = i;
                break;
            }
        }
        if hi <= lo {
            hi = (lo + 1).min(u16::MAX as usize);
        }
        (lo as u16, hi as u16)
    }

    pub fn apply(&mut self, mut f: impl FnMut(u16) -> u16) {
        for v in self.buffer_mut().iter_mut() {
            *v = f(*v);
        }
    }

    pub fn zip_apply(
        &mut self,
        other: &Image,
        mut f: impl FnMut(u16, u16) -> u16,
    ) -> ImageResult<()> {
        self.same_size(other)?;
        let rhs = other.pixels();
        for (v, &o) in self.buffer_mut().iter_mut().zip(rhs) {
            *v = f(*v, o);
        }
        Ok(())
    }

    pub fn crop(&self, x: usize, y: usize, width: usize, height: usize) -> Image {
        Image::from_buffer(self.pixels.crop(x, y, width, height), self.plane)
    }

    /// Nearest-neighbour downscale so the longer side is at most `max_side`.
    pub fn thumbnail(&self, max_side: usize) -> Image {
        let longest = self.width().max(self.height());
        if longest <= max_side || longest == 0 {
            return self.clone();
        }
        let scale = max_side as f64 / longest as f64;
        let w = ((self.width() as f64 * scale).round() as usize).max(1);
        let h = ((self.height() as f64 * scale).round() as usize).max(1);
        self.resize_nearest(w, h)
    }

    pub fn resize_nearest(&self, width: usize, height: usize) -> Image {
        let sx = self.width() as f64 / width as f64;
        let sy = self.height() as f64 / height as f64;
        let src = self.buffer();
        let buffer = Buffer2::from_fn(width, height, |x, y| {
            let ox = ((x as f64 + 0.5) * sx) as usize;
            let oy = ((y as f64 + 0.5) * sy) as usize;
            *src.get(ox.min(src.width() - 1), oy.min(src.height() - 1))
        });
        Image::from_buffer(buffer, self.plane)
    }

    /// Linear brightness mapping of `[lo, hi]` to an 8-bit gray canvas.
    pub fn to_rgb(&self, lo: u16, hi: u16) -> RgbImage {
        let span = (hi as f64 - lo as f64).max(1.0);
        let buffer = self.pixels.map(|&v| {
            let g = ((v.saturating_sub(lo)) as f64 / span * 255.0).round().min(255.0) as u8;
            [g, g, g]
        });
        RgbImage { pixels: buffer }
    }

    pub fn save_png(&self, path: &Path) -> ImageResult<()> {
        save_gray16_png(self, path)
    }
}

/// 8-bit RGB canvas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbImage {
    pixels: Buffer2<[u8; 3]>,
}

impl RgbImage {
    pub fn new_filled(width: usize, height: usize, color: [u8; 3]) -> Self {
        Self {
            pixels: Buffer2::new_filled(width, height, color),
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.pixels.width()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.pixels.height()
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> [u8; 3] {
        *self.pixels.get(x, y)
    }

    #[inline]
    pub fn put(&mut self, x: i64, y: i64, color: [u8; 3]) {
        if x >= 0 && y >= 0 && (x as usize) < self.width() && (y as usize) < self.height() {
            *self.pixels.get_mut(x as usize, y as usize) = color;
        }
    }

    pub fn pixels(&self) -> &[[u8; 3]] {
        self.pixels.pixels()
    }

    /// Axis aligned rectangle outline.
    pub fn draw_rect(&mut self, x: i64, y: i64, width: i64, height: i64, color: [u8; 3]) {
        if width <= 0 || height <= 0 {
            return;
        }
        for dx in 0..width {
            self.put(x + dx, y, color);
            self.put(x + dx, y + height - 1, color);
        }
        for dy in 0..height {
            self.put(x, y + dy, color);
            self.put(x + width - 1, y + dy, color);
        }
    }

    /// Bresenham line.
    pub fn draw_line(&mut self, from: (i64, i64), to: (i64, i64), color: [u8; 3]) {
        let (mut x0, mut y0) = from;
        let (x1, y1) = to;
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        loop {
            self.put(x0, y0, color);
            if x0 == x1 && y0 == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x0 += sx;
            }
            if e2 <= dx {
                err += dx;
                y0 += sy;
            }
        }
    }

    pub fn save_png(&self, path: &Path) -> ImageResult<()> {
        save_rgb_png(self, path)
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        self.pixels.iter().flat_map(|p| p.iter().copied()).collect()
    }
}

/// Parses `#RRGGBB` (leading `#` optional). Falls back to white.
pub fn parse_hex_color(hex: &str) -> [u8; 3] {
    let digits = hex.trim().trim_start_matches('#');
    if digits.len() < 6 {
        return [255, 255, 255];
    }
    let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).unwrap_or(255);
    [channel(0), channel(2), channel(4)]
}
