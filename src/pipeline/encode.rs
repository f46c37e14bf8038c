//! Image encoding: `DynamicImage` → base64 PNG for the recognition service.
//!
//! PNG is lossless; JPEG ringing around thin glyph strokes costs recognition
//! accuracy on small print, which contracts are full of.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rasterised page as a base64 PNG string.
pub fn encode_page(img: &DynamicImage) -> Result<String, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded image → {} bytes base64", b64.len());
    Ok(b64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let data = encode_page(&img).expect("encode should succeed");
        let decoded = STANDARD.decode(&data).expect("valid base64");
        assert_eq!(&decoded[1..4], b"PNG");
    }
}
