// src/engine/encoder.rs
//
// Encoder operations: JPEG via mozjpeg with optional ICC embedding.

use crate::engine::common::{run_with_panic_policy, EngineResult};
use crate::error::ResizeOpError;
use image::DynamicImage;
use img_parts::jpeg::Jpeg;
use mozjpeg::{ColorSpace, Compress, ScanMode};
use std::borrow::Cow;

use crate::engine::MAX_DIMENSION;

/// Derives libjpeg tuning from a 0-100 quality value.
#[derive(Debug, Clone, Copy)]
pub struct QualitySettings {
    quality: f32,
}

impl QualitySettings {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.min(100) as f32,
        }
    }

    pub fn quality(&self) -> f32 {
        self.quality
    }

    /// Smoothing removes blocking artifacts at low quality; it only blurs at high quality.
    pub fn smoothing_factor(&self) -> u8 {
        if self.quality >= 90.0 {
            0
        } else if self.quality >= 70.0 {
            5
        } else if self.quality >= 60.0 {
            10
        } else {
            18
        }
    }

    /// 4:4:4 at top quality, 4:2:0 otherwise.
    pub fn chroma_subsampling(&self) -> (u8, u8) {
        if self.quality >= 95.0 {
            (1, 1)
        } else {
            (2, 2)
        }
    }
}

/// Encode to JPEG using mozjpeg.
///
/// Alpha is discarded. `quality` is on libjpeg's 0-100 scale.
pub fn encode_jpeg(img: &DynamicImage, quality: u8, icc: Option<&[u8]>) -> EngineResult<Vec<u8>> {
    run_with_panic_policy("encode:jpeg", || {
        let settings = QualitySettings::new(quality);

        let rgb: Cow<'_, image::RgbImage> = match img {
            DynamicImage::ImageRgb8(rgb_img) => Cow::Borrowed(rgb_img),
            _ => Cow::Owned(img.to_rgb8()),
        };
        let (w, h) = rgb.dimensions();
        let pixels: &[u8] = rgb.as_raw();

        if w == 0 || h == 0 {
            return Err(ResizeOpError::encode_failed(
                "jpeg",
                "image has a zero dimension",
            ));
        }

        if w > MAX_DIMENSION || h > MAX_DIMENSION {
            return Err(ResizeOpError::dimension_exceeds_limit(
                w.max(h),
                MAX_DIMENSION,
            ));
        }

        let expected_len = (w as usize) * (h as usize) * 3;
        if pixels.len() != expected_len {
            return Err(ResizeOpError::corrupted_image());
        }

        let mut comp = Compress::new(ColorSpace::JCS_RGB);
        comp.set_size(w as usize, h as usize);
        comp.set_color_space(ColorSpace::JCS_YCbCr);
        comp.set_quality(settings.quality());

        let (sx, sy) = settings.chroma_subsampling();
        comp.set_chroma_sampling_pixel_sizes((sx, sy), (sx, sy));
        comp.set_progressive_mode();
        comp.set_optimize_coding(true);
        comp.set_optimize_scans(true);
        comp.set_scan_optimization_mode(ScanMode::AllComponentsTogether);
        comp.set_smoothing_factor(settings.smoothing_factor());

        let estimated_size = (w as usize * h as usize * 3 / 10).max(4096);
        let mut output = Vec::with_capacity(estimated_size);

        let encoded = {
            let mut writer = comp.start_compress(&mut output).map_err(|e| {
                ResizeOpError::encode_failed(
                    "jpeg",
                    format!("mozjpeg: failed to start compress: {e:?}"),
                )
            })?;

            let stride = w as usize * 3;
            for row in pixels.chunks(stride) {
                writer.write_scanlines(row).map_err(|e| {
                    ResizeOpError::encode_failed(
                        "jpeg",
                        format!("mozjpeg: failed to write scanlines: {e:?}"),
                    )
                })?;
            }

            writer.finish().map_err(|e| {
                ResizeOpError::encode_failed("jpeg", format!("mozjpeg: failed to finish: {e:?}"))
            })?;

            output
        };

        match icc {
            Some(icc_data) => embed_icc_jpeg(encoded, icc_data),
            None => Ok(encoded),
        }
    })
}

/// Embed an ICC profile into JPEG bytes as a single APP2 segment.
pub fn embed_icc_jpeg(jpeg_data: Vec<u8>, icc: &[u8]) -> EngineResult<Vec<u8>> {
    use img_parts::jpeg::{markers::APP2, JpegSegment};
    use img_parts::Bytes;

    // APP2 payload is limited to u16::MAX minus marker length and the 14-byte header
    const MAX_SINGLE_SEGMENT_ICC: usize = 65_519;
    if icc.len() > MAX_SINGLE_SEGMENT_ICC {
        tracing::debug!(
            target: "resize_op::engine",
            icc_len = icc.len(),
            "ICC profile too large for a single APP2 segment, skipping"
        );
        return Ok(jpeg_data);
    }

    let mut jpeg = Jpeg::from_bytes(Bytes::from(jpeg_data)).map_err(|e| {
        ResizeOpError::encode_failed("jpeg", format!("failed to parse JPEG for ICC: {e}"))
    })?;

    let mut marker_data = Vec::with_capacity(14 + icc.len());
    marker_data.extend_from_slice(b"ICC_PROFILE\0");
    marker_data.push(1);
    marker_data.push(1);
    marker_data.extend_from_slice(icc);

    let segment = JpegSegment::new_with_contents(APP2, Bytes::from(marker_data));
    jpeg.segments_mut().insert(0, segment);

    let mut output = Vec::new();
    jpeg.encoder().write_to(&mut output).map_err(|e| {
        ResizeOpError::encode_failed("jpeg", format!("failed to write JPEG with ICC: {e}"))
    })?;

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, RgbImage, RgbaImage};
    use img_parts::ImageICC;

    fn create_test_image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        }))
    }

    fn fake_icc(len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        data[..4].copy_from_slice(&(len as u32).to_be_bytes());
        data[4..8].copy_from_slice(b"lcms");
        data[8] = 2;
        data[12..16].copy_from_slice(b"mntr");
        data[16..20].copy_from_slice(b"RGB ");
        data[20..24].copy_from_slice(b"XYZ ");
        data
    }

    #[test]
    fn quality_settings_bands() {
        assert_eq!(QualitySettings::new(100).smoothing_factor(), 0);
        assert_eq!(QualitySettings::new(80).smoothing_factor(), 5);
        assert_eq!(QualitySettings::new(65).smoothing_factor(), 10);
        assert_eq!(QualitySettings::new(10).smoothing_factor(), 18);
        assert_eq!(QualitySettings::new(200).quality(), 100.0);
        assert_eq!(QualitySettings::new(100).chroma_subsampling(), (1, 1));
        assert_eq!(QualitySettings::new(85).chroma_subsampling(), (2, 2));
    }

    #[test]
    fn encode_jpeg_produces_jpeg_magic() {
        let encoded = encode_jpeg(&create_test_image(16, 9), 85, None).unwrap();
        assert_eq!(&encoded[0..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&encoded).unwrap();
        assert_eq!(decoded.dimensions(), (16, 9));
    }

    #[test]
    fn encode_jpeg_accepts_rgba_input() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(5, 3, image::Rgba([1, 2, 3, 4])));
        let encoded = encode_jpeg(&img, 50, None).unwrap();
        let decoded = image::load_from_memory(&encoded).unwrap();
        assert_eq!(decoded.dimensions(), (5, 3));
    }

    #[test]
    fn lower_quality_is_not_larger() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(64, 64, |x, y| {
            image::Rgb([(x * 4) as u8, (y * 4) as u8, ((x * y) % 256) as u8])
        }));
        let high = encode_jpeg(&img, 100, None).unwrap();
        let low = encode_jpeg(&img, 10, None).unwrap();
        assert!(low.len() < high.len());
    }

    #[test]
    fn encode_jpeg_embeds_icc() {
        let icc = fake_icc(256);
        let encoded = encode_jpeg(&create_test_image(4, 4), 80, Some(&icc)).unwrap();
        let jpeg = Jpeg::from_bytes(encoded.into()).unwrap();
        assert_eq!(jpeg.icc_profile().map(|b| b.to_vec()), Some(icc));
    }

    #[test]
    fn oversized_icc_is_skipped() {
        let plain = encode_jpeg(&create_test_image(4, 4), 80, None).unwrap();
        let out = embed_icc_jpeg(plain.clone(), &vec![0u8; 70_000]).unwrap();
        assert_eq!(out, plain);
    }
}
