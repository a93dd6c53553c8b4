//! Image encoding: `DynamicImage` → size-bounded base64 JPEG.
//!
//! TOC pages are text-dominated, so a moderately compressed JPEG at a bounded
//! resolution stays legible to the model while keeping the request small.
//! Every selected page travels in one request, which makes payload size
//! matter more here than for page-at-a-time conversion.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use tracing::debug;

/// MIME type of every payload produced here.
pub const PAYLOAD_MIME: &str = "image/jpeg";

/// A page image ready to be embedded in the request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    /// Base64 of the JPEG bytes (no data-URI prefix).
    pub data: String,
    /// Pixel width after downscaling.
    pub width: u32,
    /// Pixel height after downscaling.
    pub height: u32,
}

impl ImagePayload {
    /// `data:` URI for an `image_url` content part.
    pub fn data_url(&self) -> String {
        format!("data:{PAYLOAD_MIME};base64,{}", self.data)
    }
}

/// Encode a rendered page as a bounded base64 JPEG.
///
/// If either side exceeds `max_dimension` the image is shrunk so its longer
/// side equals `max_dimension`, aspect ratio preserved. Smaller images are
/// never upscaled. Alpha is dropped because JPEG cannot carry it.
pub fn encode_page(
    img: &DynamicImage,
    max_dimension: u32,
    quality: u8,
) -> Result<ImagePayload, image::ImageError> {
    let rgb = if img.width() > max_dimension || img.height() > max_dimension {
        img.resize(max_dimension, max_dimension, FilterType::Triangle)
            .to_rgb8()
    } else {
        img.to_rgb8()
    };
    let (width, height) = rgb.dimensions();

    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(rgb)
        .write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))?;

    let data = STANDARD.encode(&buf);
    debug!(
        "Encoded {}x{} → {}x{} JPEG q{} → {} bytes base64",
        img.width(),
        img.height(),
        width,
        height,
        quality,
        data.len()
    );

    Ok(ImagePayload {
        data,
        width,
        height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgba, RgbaImage};

    fn decode(payload: &ImagePayload) -> DynamicImage {
        let bytes = STANDARD.decode(&payload.data).expect("valid base64");
        image::load_from_memory_with_format(&bytes, image::ImageFormat::Jpeg).expect("valid jpeg")
    }

    fn blank(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([255, 255, 255, 128])))
    }

    #[test]
    fn large_image_is_bounded_with_aspect_ratio() {
        let payload = encode_page(&blank(2480, 3508), 1024, 85).unwrap();
        let decoded = decode(&payload);
        let (w, h) = decoded.dimensions();
        assert_eq!(h, 1024);
        assert!(w <= 1024);
        let expected_w = 2480.0 * 1024.0 / 3508.0;
        assert!((w as f64 - expected_w).abs() <= 1.0, "w={w} expected≈{expected_w}");
        assert_eq!((payload.width, payload.height), (w, h));
    }

    #[test]
    fn wide_image_bounds_width() {
        let payload = encode_page(&blank(3000, 500), 1024, 85).unwrap();
        assert_eq!(payload.width, 1024);
        let expected_h = 500.0 * 1024.0 / 3000.0;
        assert!((payload.height as f64 - expected_h).abs() <= 1.0);
    }

    #[test]
    fn small_image_is_not_upscaled() {
        let payload = encode_page(&blank(300, 400), 1024, 85).unwrap();
        assert_eq!(decode(&payload).dimensions(), (300, 400));
    }

    #[test]
    fn exact_bound_is_untouched() {
        let payload = encode_page(&blank(1024, 700), 1024, 85).unwrap();
        assert_eq!((payload.width, payload.height), (1024, 700));
    }

    #[test]
    fn alpha_is_dropped() {
        let payload = encode_page(&blank(16, 16), 1024, 85).unwrap();
        assert_eq!(decode(&payload).color(), image::ColorType::Rgb8);
    }

    #[test]
    fn data_url_prefix() {
        let payload = encode_page(&blank(8, 8), 1024, 85).unwrap();
        assert!(payload.data_url().starts_with("data:image/jpeg;base64,"));
    }
}
