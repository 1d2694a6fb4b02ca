// src/engine/decoder.rs
//
// Format sniffing and decoding. JPEG, PNG and WebP have native decoders;
// anything else the image crate recognizes goes through it.
//
// Every path checks the declared size before allocating a pixel buffer.

use crate::engine::common::{run_with_panic_policy, EngineResult};
use crate::error::ResizeOpError;
use crate::ops::Orientation;
use image::{
    DynamicImage, GrayAlphaImage, GrayImage, ImageFormat, ImageReader, RgbImage, RgbaImage,
};
use mozjpeg::Decompress;
use std::io::Cursor;
use webp::{BitstreamFeatures, Decoder as WebPDecoder};
use zune_core::bytestream::ZCursor;
use zune_core::colorspace::ColorSpace;
use zune_core::options::DecoderOptions;
use zune_core::result::DecodingResult;
use zune_png::PngDecoder;

use crate::engine::{MAX_DIMENSION, MAX_PIXELS};

/// Decode `bytes` into a bitmap, returning the sniffed format alongside it.
///
/// The header is read first so a hostile size is rejected before any decoder
/// allocates. Codec panics become `InternalPanic`.
pub fn decode_image(bytes: &[u8]) -> EngineResult<(DynamicImage, Option<ImageFormat>)> {
    if bytes.is_empty() {
        return Err(ResizeOpError::decode_failed("empty input buffer"));
    }
    ensure_dimensions_safe(bytes)?;

    let format = detect_format(bytes);
    let (stage, decode): (&'static str, fn(&[u8]) -> EngineResult<DynamicImage>) = match format {
        Some(ImageFormat::Jpeg) => ("decode:jpeg", decode_jpeg),
        Some(ImageFormat::Png) => ("decode:png", decode_png),
        Some(ImageFormat::WebP) => ("decode:webp", decode_webp),
        _ => ("decode:image", decode_with_image_crate),
    };
    let img = run_with_panic_policy(stage, || decode(bytes))?;
    // Decoders that skip the header pre-check still have to land inside the limits
    check_dimensions(img.width(), img.height())?;
    Ok((img, format))
}

/// Detect input format using magic bytes. Returns None if unknown.
pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
    image::guess_format(bytes).ok()
}

fn jpeg_error(step: &str, detail: impl std::fmt::Debug) -> ResizeOpError {
    ResizeOpError::decode_failed(format!("jpeg: {step}: {detail:?}"))
}

/// Baseline or progressive JPEG via libjpeg-turbo, always expanded to RGB.
pub fn decode_jpeg(data: &[u8]) -> EngineResult<DynamicImage> {
    // libjpeg pads a truncated scan with gray instead of failing
    if !data.windows(2).any(|pair| pair == [0xFF, 0xD9]) {
        return Err(ResizeOpError::decode_failed("jpeg: no end-of-image marker"));
    }

    let mut started = Decompress::new_mem(data)
        .map_err(|e| jpeg_error("header", e))?
        .rgb()
        .map_err(|e| jpeg_error("start", e))?;

    let width = u32::try_from(started.width()).unwrap_or(u32::MAX);
    let height = u32::try_from(started.height()).unwrap_or(u32::MAX);
    check_dimensions(width, height)?;

    let rows: Vec<[u8; 3]> = started
        .read_scanlines()
        .map_err(|e| jpeg_error("scanlines", e))?;
    RgbImage::from_raw(width, height, rows.concat())
        .map(DynamicImage::ImageRgb8)
        .ok_or_else(|| ResizeOpError::decode_failed("jpeg: fewer scanlines than the frame height"))
}

/// PNG via zune-png. 16-bit samples are stripped to 8 bits; palette and
/// low-bit-depth images arrive already expanded.
pub fn decode_png(data: &[u8]) -> EngineResult<DynamicImage> {
    let mut decoder =
        PngDecoder::new_with_options(ZCursor::new(data), DecoderOptions::default().png_set_strip_to_8bit(true));
    let samples = match decoder.decode() {
        Ok(DecodingResult::U8(samples)) => samples,
        Ok(_) => return Err(ResizeOpError::decode_failed("png: expected 8-bit samples")),
        Err(e) => return Err(ResizeOpError::decode_failed(format!("png: {e}"))),
    };

    let (width, height) = decoder
        .info()
        .map(|info| (info.width as u32, info.height as u32))
        .ok_or_else(|| ResizeOpError::decode_failed("png: header was not parsed"))?;
    check_dimensions(width, height)?;

    let colorspace = decoder
        .colorspace()
        .ok_or_else(|| ResizeOpError::decode_failed("png: unknown colorspace"))?;
    let img = match colorspace {
        ColorSpace::Luma => GrayImage::from_raw(width, height, samples).map(DynamicImage::ImageLuma8),
        ColorSpace::LumaA => {
            GrayAlphaImage::from_raw(width, height, samples).map(DynamicImage::ImageLumaA8)
        }
        ColorSpace::RGB => RgbImage::from_raw(width, height, samples).map(DynamicImage::ImageRgb8),
        ColorSpace::RGBA => RgbaImage::from_raw(width, height, samples).map(DynamicImage::ImageRgba8),
        other => {
            return Err(ResizeOpError::decode_failed(format!(
                "png: colorspace {other:?} is not supported"
            )))
        }
    };
    img.ok_or_else(|| {
        ResizeOpError::decode_failed(format!("png: {colorspace:?} samples do not fill {width}x{height}"))
    })
}

/// Still WebP via libwebp. Animations go to the image crate, which yields the first frame.
pub fn decode_webp(data: &[u8]) -> EngineResult<DynamicImage> {
    let features = BitstreamFeatures::new(data)
        .ok_or_else(|| ResizeOpError::decode_failed("webp: unreadable bitstream header"))?;
    if features.has_animation() {
        return decode_with_image_crate(data);
    }
    check_dimensions(features.width(), features.height())?;

    WebPDecoder::new(data)
        .decode()
        .map(|webp| webp.to_image())
        .ok_or_else(|| ResizeOpError::decode_failed("webp: libwebp rejected the bitstream"))
}

/// Everything without a native decoder: GIF, BMP, TIFF.
pub fn decode_with_image_crate(data: &[u8]) -> EngineResult<DynamicImage> {
    image::load_from_memory(data).map_err(|e| match e {
        image::ImageError::Unsupported(u) => ResizeOpError::unsupported_format(u.to_string()),
        other => ResizeOpError::decode_failed(other.to_string()),
    })
}

/// Check if image dimensions are within safe limits.
/// Returns an error if the image is too large (potential decompression bomb).
pub fn check_dimensions(width: u32, height: u32) -> EngineResult<()> {
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(ResizeOpError::dimension_exceeds_limit(
            width.max(height),
            MAX_DIMENSION,
        ));
    }
    let pixels = width as u64 * height as u64;
    if pixels > MAX_PIXELS {
        return Err(ResizeOpError::pixel_count_exceeds_limit(pixels, MAX_PIXELS));
    }
    Ok(())
}

/// Read dimensions from the header only. None if the header is unreadable.
pub fn read_header_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

/// Inspect encoded bytes and ensure the image dimensions are safe before decoding.
pub fn ensure_dimensions_safe(bytes: &[u8]) -> EngineResult<()> {
    match read_header_dimensions(bytes) {
        Some((width, height)) => check_dimensions(width, height),
        None => Ok(()),
    }
}

/// Extract the EXIF Orientation tag. Returns None if missing or invalid.
pub fn detect_exif_orientation(bytes: &[u8]) -> Option<Orientation> {
    let mut cursor = Cursor::new(bytes);
    let exif = exif::Reader::new().read_from_container(&mut cursor).ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    // exif crate can represent as Short/Long; use get_uint for safety
    let value = field.value.get_uint(0)?;
    Orientation::from_exif(u16::try_from(value).ok()?)
}
