//! Photo files: JPEG writing, EXIF orientation correction, down-sampling.

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageDecoder, ImageReader};
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// JPEG quality of the attendance copy handed to identification.
pub const ATTENDANCE_JPEG_QUALITY: u8 = 70;
/// JPEG quality of stored enrollment photos.
pub const ENROLLMENT_JPEG_QUALITY: u8 = 85;
/// Down-sampling target for enrollment photos, per side.
pub const ENROLLMENT_MAX_SIDE: u32 = 800;

#[derive(Error, Debug)]
pub enum PhotoError {
    #[error("file not found or empty: {0}")]
    MissingOrEmpty(PathBuf),
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
}

/// Fail unless `path` exists and has a non-zero length.
pub fn ensure_non_empty(path: &Path) -> Result<(), PhotoError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => Ok(()),
        Ok(_) => Err(PhotoError::MissingOrEmpty(path.to_path_buf())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(PhotoError::MissingOrEmpty(path.to_path_buf())),
        Err(e) => Err(e.into()),
    }
}

/// Decode an image and rotate/flip it upright according to its EXIF orientation.
pub fn load_upright(path: &Path) -> Result<DynamicImage, PhotoError> {
    ensure_non_empty(path)?;
    let mut decoder = ImageReader::open(path)?.with_guessed_format()?.into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);
    Ok(image)
}

/// Encode `image` as JPEG at `quality` (1–100).
pub fn save_jpeg(image: &DynamicImage, path: &Path, quality: u8) -> Result<(), PhotoError> {
    let writer = BufWriter::new(File::create(path)?);
    let encoder = JpegEncoder::new_with_quality(writer, quality);
    match image {
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => image.write_with_encoder(encoder)?,
        other => DynamicImage::ImageRgb8(other.to_rgb8()).write_with_encoder(encoder)?,
    }
    Ok(())
}

/// Copy a captured photo to `dest` with its orientation corrected.
pub fn copy_upright(src: &Path, dest: &Path, quality: u8) -> Result<(), PhotoError> {
    let image = load_upright(src)?;
    save_jpeg(&image, dest, quality)?;
    tracing::info!(src = %src.display(), dest = %dest.display(), quality, "photo copied");
    Ok(())
}

/// Largest power-of-two factor that keeps both half-dimensions above `limit`.
///
/// Images that already fit within `limit` on both sides are not reduced.
pub fn sample_size(width: u32, height: u32, limit: u32) -> u32 {
    let mut sample = 1;
    if width > limit || height > limit {
        let (half_w, half_h) = (width / 2, height / 2);
        while half_h / sample > limit && half_w / sample > limit {
            sample *= 2;
        }
    }
    sample
}

/// Shrink `image` by its [`sample_size`] for `limit`.
pub fn downsample(image: DynamicImage, limit: u32) -> DynamicImage {
    let sample = sample_size(image.width(), image.height(), limit);
    if sample == 1 {
        return image;
    }
    let (w, h) = ((image.width() / sample).max(1), (image.height() / sample).max(1));
    tracing::debug!(sample, width = w, height = h, "down-sampling photo");
    image.resize_exact(w, h, image::imageops::FilterType::Triangle)
}

/// Store an enrollment photo: upright, down-sampled, quality 85.
pub fn save_enrollment_photo(src: &Path, dest: &Path) -> Result<(), PhotoError> {
    let image = downsample(load_upright(src)?, ENROLLMENT_MAX_SIDE);
    save_jpeg(&image, dest, ENROLLMENT_JPEG_QUALITY)?;
    tracing::info!(path = %dest.display(), "enrollment photo saved");
    Ok(())
}
