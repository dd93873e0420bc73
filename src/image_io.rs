use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{
    codecs::png::PngEncoder, DynamicImage, ImageBuffer, ImageEncoder, ImageFormat, ImageReader,
    PixelWithColorType,
};

use crate::errors::{Result, SegmentationError};

/// Largest accepted width or height of an upload.
pub const MAX_IMAGE_DIMENSION: u32 = 4096;
pub const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

pub fn validate_dimensions(width: u32, height: u32) -> Result<()> {
    if width > MAX_IMAGE_DIMENSION || height > MAX_IMAGE_DIMENSION {
        return Err(SegmentationError::invalid_image(format!(
            "Image too large (max {MAX_IMAGE_DIMENSION}x{MAX_IMAGE_DIMENSION}), got {width}x{height}"
        )));
    }
    Ok(())
}

/// Decodes uploaded bytes, checking dimensions from the header before the full decode.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    let reader = || {
        ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| SegmentationError::invalid_image(format!("unreadable upload: {e}")))
    };

    let (width, height) = reader()?
        .into_dimensions()
        .map_err(|e| SegmentationError::invalid_image(format!("not a decodable image: {e}")))?;
    validate_dimensions(width, height)?;

    reader()?
        .decode()
        .map_err(|e| SegmentationError::invalid_image(format!("not a decodable image: {e}")))
}

pub fn encode_png<P>(image: &ImageBuffer<P, Vec<u8>>) -> Result<Vec<u8>>
where
    P: PixelWithColorType<Subpixel = u8>,
{
    let mut buffer = Vec::new();
    PngEncoder::new(&mut buffer).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        P::COLOR_TYPE.into(),
    )?;
    Ok(buffer)
}

pub fn encode_dynamic_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png)?;
    Ok(buffer.into_inner())
}

pub fn png_data_uri(png: &[u8]) -> String {
    format!("{PNG_DATA_URI_PREFIX}{}", STANDARD.encode(png))
}

/// Accepts either a bare base64 payload or a `data:<mime>;base64,` URI.
pub fn decode_data_uri(data: &str) -> Result<DynamicImage> {
    let payload = data.split_once(',').map_or(data, |(_, payload)| payload);
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| SegmentationError::invalid_image(format!("invalid base64 payload: {e}")))?;
    image::load_from_memory(&bytes)
        .map_err(|e| SegmentationError::invalid_image(format!("not a decodable image: {e}")))
}
