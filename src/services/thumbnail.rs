//! Image previews rendered as `data:` URLs.
//!
//! Previews are best effort. Anything that is not a decodable image yields
//! no preview rather than an error.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use image::ImageFormat;
use std::io::Cursor;
use tracing::debug;

/// Thumbnail box used for share descriptors.
pub const DEFAULT_BOX: (u32, u32) = (50, 50);

pub fn is_previewable(mime_type: &str) -> bool {
    mime_type.starts_with("image/")
}

/// Render `data` as a data URL scaled to fit `width`×`height`, keeping the
/// aspect ratio. A `0×0` box embeds the original bytes unchanged.
pub fn data_url(
    data: &[u8],
    mime_type: &str,
    width: u32,
    height: u32,
) -> Result<String, image::ImageError> {
    if width == 0 && height == 0 {
        // still decode so that non-images are rejected
        image::load_from_memory(data)?;
        return Ok(format!("data:{};base64,{}", mime_type, STANDARD.encode(data)));
    }

    let img = image::load_from_memory(data)?;
    let thumb = img.thumbnail(width.max(1), height.max(1));
    let mut out = Vec::new();
    thumb.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?;
    Ok(format!("data:image/png;base64,{}", STANDARD.encode(&out)))
}

/// Decode and scale off the async runtime. `None` on any failure.
pub async fn preview(data: Bytes, mime_type: String, width: u32, height: u32) -> Option<String> {
    if !is_previewable(&mime_type) {
        return None;
    }
    match tokio::task::spawn_blocking(move || data_url(&data, &mime_type, width, height)).await {
        Ok(Ok(url)) => Some(url),
        Ok(Err(err)) => {
            debug!("preview generation failed: {}", err);
            None
        }
        Err(err) => {
            debug!("preview task panicked: {}", err);
            None
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 10, 10]));
    let mut out = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .unwrap();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thumbnails_fit_the_box() {
        let png = sample_png(200, 100);
        let url = data_url(&png, "image/png", 50, 50).unwrap();
        let encoded = url.strip_prefix("data:image/png;base64,").unwrap();
        let decoded = image::load_from_memory(&STANDARD.decode(encoded).unwrap()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (50, 25));
    }

    #[test]
    fn zero_box_embeds_original_bytes() {
        let png = sample_png(4, 4);
        let url = data_url(&png, "image/png", 0, 0).unwrap();
        assert_eq!(url, format!("data:image/png;base64,{}", STANDARD.encode(&png)));
    }

    #[tokio::test]
    async fn non_images_have_no_preview() {
        assert!(preview(Bytes::from_static(b"hello"), "text/plain".into(), 50, 50).await.is_none());
        assert!(preview(Bytes::from_static(b"hello"), "image/png".into(), 50, 50).await.is_none());
    }
}
