use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;

use crate::errors::{AppError, AppResult};
use crate::security::InputValidator;
use crate::uploader::payload::ImagePayload;

pub const JPEG_MIME_TYPE: &str = "image/jpeg";

/// An in-memory bitmap that can be serialized to JPEG.
///
/// Implemented for [`DynamicImage`]; callers holding their own bitmap type can
/// implement it to feed the upload client directly.
pub trait EncodableImage {
    fn encode_jpeg(&self, quality: u8) -> AppResult<Vec<u8>>;
}

impl EncodableImage for DynamicImage {
    fn encode_jpeg(&self, quality: u8) -> AppResult<Vec<u8>> {
        if self.width() == 0 || self.height() == 0 {
            return Err(AppError::encoding("image has no pixels"));
        }

        // JPEG has no alpha channel
        let rgb = self.to_rgb8();

        let mut output = Vec::new();
        JpegEncoder::new_with_quality(&mut output, quality)
            .encode_image(&rgb)
            .map_err(AppError::encoding)?;

        Ok(output)
    }
}

/// Encode `image` into the payload that gets uploaded.
pub fn to_jpeg_payload<I>(image: &I, quality: u8, file_name: &str) -> AppResult<ImagePayload>
where
    I: EncodableImage + ?Sized,
{
    if quality == 0 || quality > 100 {
        return Err(AppError::encoding(format!(
            "JPEG quality must be between 1 and 100, got {}",
            quality
        )));
    }

    let data = image.encode_jpeg(quality)?;
    if data.is_empty() {
        return Err(AppError::encoding("encoder produced no data"));
    }

    log::debug!(
        "Encoded {} as JPEG (quality: {}, {} bytes)",
        file_name,
        quality,
        data.len()
    );

    Ok(ImagePayload::new(
        data,
        InputValidator::sanitize_filename(file_name),
        JPEG_MIME_TYPE,
    ))
}

/// Open an image file, downscaling it when either side exceeds `max_dimension`.
pub fn load_image(file_path: &str, max_dimension: u32) -> AppResult<DynamicImage> {
    InputValidator::validate_image_file(file_path)?;

    let img = image::open(file_path)?;

    if img.width() > max_dimension || img.height() > max_dimension {
        log::info!(
            "Resizing large image {} from {}x{}",
            file_path,
            img.width(),
            img.height()
        );
        return Ok(img.resize(
            max_dimension,
            max_dimension,
            image::imageops::FilterType::Lanczos3,
        ));
    }

    Ok(img)
}

/// Get image dimensions and file size
pub fn get_image_info(file_path: &str) -> AppResult<(u32, u32, u64)> {
    InputValidator::validate_image_file(file_path)?;

    let file_size = std::fs::metadata(file_path)?.len();

    // Read only the image header for dimensions
    let reader = image::ImageReader::open(file_path)?.with_guessed_format()?;
    let dimensions = reader.into_dimensions()?;

    Ok((dimensions.0, dimensions.1, file_size))
}
