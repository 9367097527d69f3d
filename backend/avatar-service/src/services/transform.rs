//! Avatar image processor - decode, crop-to-square, resize, re-encode
//!
//! Two entry points with deliberately different contracts:
//! - [`AvatarProcessor::scale`] serves canonical (already square) avatars at
//!   the requested size and never checks squareness.
//! - [`AvatarProcessor::crop_and_scale`] canonicalizes raw uploads: centered
//!   square crop, then a downscale to `max_size` if larger. Never upscales.
//!
//! Uses `spawn_blocking` for the async variants so codec work stays off the
//! async runtime.

use crate::error::{AppError, Result};
use crate::models::{AvatarFormat, MAX_SIZE};
use bytes::Bytes;
use image::codecs::gif::GifEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Frame, GenericImageView, ImageOutputFormat};
use std::io::Cursor;
use std::sync::Arc;
use tracing::debug;

/// Bicubic-equivalent resampling filter
const RESIZE_FILTER: FilterType = FilterType::CatmullRom;

/// Configuration for avatar transformation
#[derive(Clone, Debug)]
pub struct TransformConfig {
    /// Largest side length stored in the canonical store
    pub max_size: u32,
    /// JPEG quality (0-100)
    pub jpeg_quality: u8,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            max_size: MAX_SIZE,
            jpeg_quality: 90,
        }
    }
}

/// A decoded image together with the codec it was read from
#[derive(Debug)]
pub struct DecodedImage {
    pub image: DynamicImage,
    pub format: AvatarFormat,
}

/// Encoded output of a transform
#[derive(Debug, Clone)]
pub struct TransformedImage {
    pub data: Bytes,
    pub format: AvatarFormat,
    /// Side length of the (square) result
    pub size: u32,
}

/// Avatar processor
pub struct AvatarProcessor {
    config: TransformConfig,
}

impl AvatarProcessor {
    pub fn new(config: TransformConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(TransformConfig::default())
    }

    /// Decode bytes as JPEG, PNG or GIF. Other codecs are rejected even if the
    /// `image` crate could read them.
    pub fn decode(&self, data: &[u8]) -> Result<DecodedImage> {
        let detected = image::guess_format(data)
            .map_err(|e| AppError::Decode(format!("Unrecognized image data: {e}")))?;
        let format = AvatarFormat::from_image_format(detected)?;

        let image = image::load_from_memory_with_format(data, detected)
            .map_err(|e| AppError::Decode(format!("Failed to decode {format} image: {e}")))?;

        Ok(DecodedImage { image, format })
    }

    /// Encode an image in the given format
    pub fn encode(&self, image: &DynamicImage, format: AvatarFormat) -> Result<Bytes> {
        let mut buf = Vec::new();
        match format {
            AvatarFormat::Jpeg => {
                // JPEG has no alpha channel
                DynamicImage::ImageRgb8(image.to_rgb8())
                    .write_to(
                        &mut Cursor::new(&mut buf),
                        ImageOutputFormat::Jpeg(self.config.jpeg_quality),
                    )
                    .map_err(|e| AppError::Transform(format!("Failed to encode JPEG: {e}")))?;
            }
            AvatarFormat::Png => {
                image
                    .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
                    .map_err(|e| AppError::Transform(format!("Failed to encode PNG: {e}")))?;
            }
            AvatarFormat::Gif => {
                let mut encoder = GifEncoder::new(&mut buf);
                encoder
                    .encode_frame(Frame::new(image.to_rgba8()))
                    .map_err(|e| AppError::Transform(format!("Failed to encode GIF: {e}")))?;
            }
        }

        if buf.is_empty() {
            return Err(AppError::Transform(format!(
                "Encoder produced no output for {format}"
            )));
        }
        Ok(Bytes::from(buf))
    }

    /// Resize a canonical avatar to exactly `size` x `size`.
    ///
    /// Assumes square input. Returns the input bytes untouched when the size
    /// already matches and no different output format is requested.
    pub fn scale(
        &self,
        data: &Bytes,
        size: u32,
        target_format: Option<AvatarFormat>,
    ) -> Result<TransformedImage> {
        let decoded = self.decode(data)?;
        let actual_size = decoded.image.width();
        let format = target_format.unwrap_or(decoded.format);

        if actual_size == size && format == decoded.format {
            return Ok(TransformedImage {
                data: data.clone(),
                format,
                size,
            });
        }

        debug!(
            from_format = %decoded.format,
            from_size = actual_size,
            to_format = %format,
            to_size = size,
            "Resizing avatar"
        );

        let resized = decoded.image.resize_exact(size, size, RESIZE_FILTER);
        let data = self.encode(&resized, format)?;

        Ok(TransformedImage { data, format, size })
    }

    /// Canonicalize a raw upload: centered square crop, then downscale to
    /// `max_size` if the square is larger. The source format is preserved.
    pub fn crop_and_scale(&self, data: &[u8]) -> Result<TransformedImage> {
        let DecodedImage { mut image, format } = self.decode(data)?;
        let (width, height) = image.dimensions();
        let side = width.min(height);

        if side == 0 {
            return Err(AppError::Transform("Image has no pixels".into()));
        }

        if width != height {
            debug!(width, height, side, "Cropping avatar to centered square");
            image = image.crop_imm((width - side) / 2, (height - side) / 2, side, side);
        }

        let mut size = side;
        if side > self.config.max_size {
            debug!(from = side, to = self.config.max_size, "Downscaling avatar");
            image = image.resize_exact(self.config.max_size, self.config.max_size, RESIZE_FILTER);
            size = self.config.max_size;
        }

        let data = self.encode(&image, format)?;
        Ok(TransformedImage { data, format, size })
    }

    /// [`Self::scale`] on the blocking thread pool
    pub async fn scale_async(
        self: Arc<Self>,
        data: Bytes,
        size: u32,
        target_format: Option<AvatarFormat>,
    ) -> Result<TransformedImage> {
        tokio::task::spawn_blocking(move || self.scale(&data, size, target_format))
            .await
            .map_err(|e| AppError::Internal(format!("Scale task panicked: {e}")))?
    }

    /// [`Self::crop_and_scale`] on the blocking thread pool
    pub async fn crop_and_scale_async(self: Arc<Self>, data: Bytes) -> Result<TransformedImage> {
        tokio::task::spawn_blocking(move || self.crop_and_scale(&data))
            .await
            .map_err(|e| AppError::Internal(format!("Crop task panicked: {e}")))?
    }
}
