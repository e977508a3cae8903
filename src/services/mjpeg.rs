use anyhow::{anyhow, Result};
use axum::body::Bytes;
use image::{codecs::jpeg::JpegEncoder, RgbImage};

/// Content type of a multipart MJPEG response
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

const PART_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
const PART_TRAILER: &[u8] = b"\r\n";

/// Wrap one JPEG image as a multipart part
pub fn multipart_chunk(jpeg: &[u8]) -> Bytes {
    let mut payload = Vec::with_capacity(PART_HEADER.len() + jpeg.len() + PART_TRAILER.len());
    payload.extend_from_slice(PART_HEADER);
    payload.extend_from_slice(jpeg);
    payload.extend_from_slice(PART_TRAILER);
    Bytes::from(payload)
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_wraps_payload_between_boundary_and_crlf() {
        let chunk = multipart_chunk(b"JPEG");
        assert_eq!(
            &chunk[..],
            &b"--frame\r\nContent-Type: image/jpeg\r\n\r\nJPEG\r\n"[..]
        );
    }

    #[test]
    fn encoded_frames_are_jpeg() {
        let image = RgbImage::from_pixel(16, 8, image::Rgb([10, 200, 30]));
        let jpeg = encode_jpeg(&image, 80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory_with_format(&jpeg, image::ImageFormat::Jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
    }
}
