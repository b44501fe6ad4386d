use std::path::Path;

use common::buffer2::Buffer2;
use image as image_lib;

use super::{Image, ImageError, ImageResult, PlaneId, RgbImage};

fn ensure_parent(path: &Path) -> ImageResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ImageError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

pub fn save_rgb_png(image: &RgbImage, path: &Path) -> ImageResult<()> {
    ensure_parent(path)?;
    image_lib::save_buffer_with_format(
        path,
        &image.to_bytes(),
        image.width() as u32,
        image.height() as u32,
        image_lib::ExtendedColorType::Rgb8,
        image_lib::ImageFormat::Png,
    )
    .map_err(|source| ImageError::Encode {
        path: path.to_path_buf(),
        source,
    })
}

pub fn save_gray16_png(image: &Image, path: &Path) -> ImageResult<()> {
    ensure_parent(path)?;
    let buffer: image_lib::ImageBuffer<image_lib::Luma<u16>, Vec<u16>> =
        image_lib::ImageBuffer::from_raw(
            image.width() as u32,
            image.height() as u32,
            image.pixels().to_vec(),
        )
        .ok_or_else(|| ImageError::SizeMismatch {
            left_width: image.width(),
            left_height: image.height(),
            right_width: image.width(),
            right_height: image.pixels().len() / image.width().max(1),
        })?;
    buffer
        .save_with_format(path, image_lib::ImageFormat::Png)
        .map_err(|source| ImageError::Encode {
            path: path.to_path_buf(),
            source,
        })
}

/// Loads a PNG or TIFF file as a single 16-bit gray plane. 8-bit data is scaled to 16 bit.
pub fn load_gray16(path: &Path, plane: PlaneId) -> ImageResult<Image> {
    let decoded = image_lib::open(path).map_err(|source| ImageError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    let gray = decoded.into_luma16();
    let (width, height) = gray.dimensions();
    Ok(Image::from_buffer(
        Buffer2::new(width as usize, height as usize, gray.into_raw()),
        plane,
    ))
}
