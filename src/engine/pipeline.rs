// src/engine/pipeline.rs
//
// Pipeline operations: fit-within resize, centered aspect crop, EXIF orientation.
// Geometry helpers are pure; pixel operations consume the working image and return a new one.

use crate::engine::common::EngineResult;
use crate::error::ResizeOpError;
use crate::ops::{CropSpec, Orientation, ResizeSpec, TransformPlan};
use crate::engine::decoder::check_dimensions;
use fast_image_resize::{self as fir, ImageBufferError, MulDiv, PixelType, ResizeOptions};
use image::imageops::FilterType;
use image::{
    DynamicImage, GrayAlphaImage, GrayImage, ImageBuffer, Luma, LumaA, Rgb, RgbImage, Rgba,
    RgbaImage,
};
use tracing::debug;

/// A crop rectangle in pixel coordinates of the working image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Calculate fit-within dimensions.
///
/// `scale = min(box_w / w, box_h / h)`, each side rounded to nearest with a 1px floor.
/// Images smaller than the box are scaled up.
pub fn calc_fit_within_dimensions(orig_w: u32, orig_h: u32, spec: ResizeSpec) -> (u32, u32) {
    if orig_w == 0 || orig_h == 0 {
        return (spec.width.max(1), spec.height.max(1));
    }
    let scale_w = spec.width as f64 / orig_w as f64;
    let scale_h = spec.height as f64 / orig_h as f64;

    // Snap the constraining axis to the bound exactly; only the other axis is rounded.
    if scale_w <= scale_h {
        let h = ((orig_h as f64 * scale_w).round() as u32).clamp(1, spec.height);
        (spec.width, h)
    } else {
        let w = ((orig_w as f64 * scale_h).round() as u32).clamp(1, spec.width);
        (w, spec.height)
    }
}

/// Calculate the largest centered rectangle with the requested aspect ratio.
///
/// The longer axis (relative to the ratio) is trimmed symmetrically; odd remainders
/// leave the extra pixel on the right/bottom.
pub fn calc_aspect_crop(img_w: u32, img_h: u32, spec: CropSpec) -> EngineResult<CropRect> {
    if !spec.is_valid() {
        return Err(ResizeOpError::invalid_crop_ratio(spec.width, spec.height));
    }
    if img_w == 0 || img_h == 0 {
        return Err(ResizeOpError::degenerate_crop(
            (spec.width, spec.height),
            (img_w, img_h),
        ));
    }

    let target = spec.ratio();
    let current = img_w as f64 / img_h as f64;

    let (crop_w, crop_h) = if current > target {
        let w = (img_h as f64 * target).round();
        (w.min(img_w as f64) as u32, img_h)
    } else {
        let h = (img_w as f64 / target).round();
        (img_w, h.min(img_h as f64) as u32)
    };

    if crop_w == 0 || crop_h == 0 {
        return Err(ResizeOpError::degenerate_crop(
            (spec.width, spec.height),
            (img_w, img_h),
        ));
    }

    Ok(CropRect {
        x: (img_w - crop_w) / 2,
        y: (img_h - crop_h) / 2,
        width: crop_w,
        height: crop_h,
    })
}

/// Resize the working image to fit within `spec`, keeping its color type.
///
/// The target size is checked against `MAX_DIMENSION`/`MAX_PIXELS` before any
/// output buffer is allocated.
pub fn apply_resize(img: DynamicImage, spec: ResizeSpec) -> EngineResult<DynamicImage> {
    let (src_w, src_h) = (img.width(), img.height());
    let (dst_w, dst_h) = calc_fit_within_dimensions(src_w, src_h, spec);
    debug!(
        target: "resize_op::pipeline",
        src_w, src_h, dst_w, dst_h, "resize to fit"
    );
    if (dst_w, dst_h) == (src_w, src_h) {
        return Ok(img);
    }
    check_dimensions(dst_w, dst_h)?;
    fast_resize_owned(img, dst_w, dst_h).map_err(ResizeError::into_resize_op_error)
}

/// Center-crop the working image to the aspect ratio in `spec`.
pub fn apply_crop(img: DynamicImage, spec: CropSpec) -> EngineResult<DynamicImage> {
    let rect = calc_aspect_crop(img.width(), img.height(), spec)?;
    debug!(
        target: "resize_op::pipeline",
        x = rect.x, y = rect.y, width = rect.width, height = rect.height,
        "center crop"
    );
    if rect.width == img.width() && rect.height == img.height() {
        return Ok(img);
    }
    Ok(img.crop_imm(rect.x, rect.y, rect.width, rect.height))
}

/// Normalize pixels so that the EXIF orientation becomes `Normal`.
pub fn apply_orientation(img: DynamicImage, orientation: Orientation) -> DynamicImage {
    match orientation {
        Orientation::Normal => img,
        Orientation::FlipH => img.fliph(),
        Orientation::Rotate180 => img.rotate180(),
        Orientation::FlipV => img.flipv(),
        Orientation::Transpose => img.rotate90().fliph(),
        Orientation::Rotate90 => img.rotate90(),
        Orientation::Transverse => img.rotate270().fliph(),
        Orientation::Rotate270 => img.rotate270(),
    }
}

/// Apply the plan in its fixed order: resize, then crop.
pub fn apply_plan(img: DynamicImage, plan: &TransformPlan) -> EngineResult<DynamicImage> {
    let mut img = img;
    if let Some(spec) = plan.resize {
        img = apply_resize(img, spec)?;
    }
    if let Some(spec) = plan.crop {
        img = apply_crop(img, spec)?;
    }
    Ok(img)
}

/// Output dimensions of `plan` without touching pixels.
pub fn project_plan_dimensions(
    dims: (u32, u32),
    plan: &TransformPlan,
) -> EngineResult<(u32, u32)> {
    let mut dims = dims;
    if let Some(spec) = plan.resize {
        dims = calc_fit_within_dimensions(dims.0, dims.1, spec);
    }
    if let Some(spec) = plan.crop {
        let rect = calc_aspect_crop(dims.0, dims.1, spec)?;
        dims = (rect.width, rect.height);
    }
    Ok(dims)
}

#[derive(Debug)]
struct ResizeError {
    source_dims: (u32, u32),
    target_dims: (u32, u32),
    reason: String,
}

impl ResizeError {
    fn new(source_dims: (u32, u32), target_dims: (u32, u32), reason: impl Into<String>) -> Self {
        Self {
            source_dims,
            target_dims,
            reason: reason.into(),
        }
    }

    fn into_resize_op_error(self) -> ResizeOpError {
        ResizeOpError::resize_failed(self.source_dims, self.target_dims, self.reason)
    }
}

/// Owned samples in fast_image_resize's layout. Unsupported images are handed back.
fn into_fir_buffer(img: DynamicImage) -> std::result::Result<(PixelType, Vec<u8>), DynamicImage> {
    Ok(match img {
        DynamicImage::ImageLuma8(buf) => (PixelType::U8, buf.into_raw()),
        DynamicImage::ImageLumaA8(buf) => (PixelType::U8x2, buf.into_raw()),
        DynamicImage::ImageRgb8(buf) => (PixelType::U8x3, buf.into_raw()),
        DynamicImage::ImageRgba8(buf) => (PixelType::U8x4, buf.into_raw()),
        DynamicImage::ImageLuma16(buf) => (PixelType::U16, u16_to_bytes(buf.into_raw())),
        DynamicImage::ImageLumaA16(buf) => (PixelType::U16x2, u16_to_bytes(buf.into_raw())),
        DynamicImage::ImageRgb16(buf) => (PixelType::U16x3, u16_to_bytes(buf.into_raw())),
        DynamicImage::ImageRgba16(buf) => (PixelType::U16x4, u16_to_bytes(buf.into_raw())),
        other => return Err(other),
    })
}

/// Inverse of `into_fir_buffer`: rebuild the matching `DynamicImage` variant.
fn from_fir_buffer(
    pixel_type: PixelType,
    width: u32,
    height: u32,
    bytes: Vec<u8>,
) -> Option<DynamicImage> {
    match pixel_type {
        PixelType::U8 => GrayImage::from_raw(width, height, bytes).map(DynamicImage::ImageLuma8),
        PixelType::U8x2 => {
            GrayAlphaImage::from_raw(width, height, bytes).map(DynamicImage::ImageLumaA8)
        }
        PixelType::U8x3 => RgbImage::from_raw(width, height, bytes).map(DynamicImage::ImageRgb8),
        PixelType::U8x4 => RgbaImage::from_raw(width, height, bytes).map(DynamicImage::ImageRgba8),
        PixelType::U16 => ImageBuffer::<Luma<u16>, _>::from_raw(width, height, bytes_to_u16(&bytes))
            .map(DynamicImage::ImageLuma16),
        PixelType::U16x2 => {
            ImageBuffer::<LumaA<u16>, _>::from_raw(width, height, bytes_to_u16(&bytes))
                .map(DynamicImage::ImageLumaA16)
        }
        PixelType::U16x3 => ImageBuffer::<Rgb<u16>, _>::from_raw(width, height, bytes_to_u16(&bytes))
            .map(DynamicImage::ImageRgb16),
        PixelType::U16x4 => {
            ImageBuffer::<Rgba<u16>, _>::from_raw(width, height, bytes_to_u16(&bytes))
                .map(DynamicImage::ImageRgba16)
        }
        _ => None,
    }
}

fn u16_to_bytes(samples: Vec<u16>) -> Vec<u8> {
    samples.into_iter().flat_map(u16::to_ne_bytes).collect()
}

fn bytes_to_u16(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_ne_bytes([pair[0], pair[1]]))
        .collect()
}

fn has_alpha(pixel_type: PixelType) -> bool {
    matches!(
        pixel_type,
        PixelType::U8x2 | PixelType::U8x4 | PixelType::U16x2 | PixelType::U16x4
    )
}

/// Lanczos3 resize that keeps the color type of `img`.
///
/// 8- and 16-bit images go through fast_image_resize without widening; float
/// images and any fir failure use the image crate.
fn fast_resize_owned(
    img: DynamicImage,
    dst_width: u32,
    dst_height: u32,
) -> std::result::Result<DynamicImage, ResizeError> {
    let (src_width, src_height) = (img.width(), img.height());
    let dims_err = |reason: String| {
        ResizeError::new((src_width, src_height), (dst_width, dst_height), reason)
    };

    if src_width == 0 || src_height == 0 || dst_width == 0 || dst_height == 0 {
        return Err(dims_err("invalid dimensions for resize".to_string()));
    }

    let (pixel_type, mut src_pixels) = match into_fir_buffer(img) {
        Ok(parts) => parts,
        Err(other) => return Ok(other.resize_exact(dst_width, dst_height, FilterType::Lanczos3)),
    };

    let required_bytes = (src_width as usize)
        .checked_mul(src_height as usize)
        .and_then(|px| px.checked_mul(pixel_type.size()))
        .ok_or_else(|| dims_err("source buffer size overflows usize".to_string()))?;
    if src_pixels.len() < required_bytes {
        return Err(dims_err(format!(
            "source buffer holds {} bytes, expected {required_bytes}",
            src_pixels.len()
        )));
    }

    let fir_result = match fir::images::Image::from_slice_u8(
        src_width,
        src_height,
        src_pixels.as_mut_slice(),
        pixel_type,
    ) {
        Ok(src_image) => resize_with_fir(src_image, pixel_type, dst_width, dst_height),
        // u16 samples need 2-byte alignment that a Vec<u8> does not promise
        Err(ImageBufferError::InvalidBufferAlignment) => {
            let mut aligned = fir::images::Image::new(src_width, src_height, pixel_type);
            aligned
                .buffer_mut()
                .copy_from_slice(&src_pixels[..required_bytes]);
            resize_with_fir(aligned, pixel_type, dst_width, dst_height)
        }
        Err(other) => Err(format!("fir source image error: {other:?}")),
    };

    let resized = match fir_result {
        Ok(bytes) => from_fir_buffer(pixel_type, dst_width, dst_height, bytes),
        Err(err) => {
            debug!(target: "resize_op::pipeline", %err, "fir resize failed, using image crate");
            from_fir_buffer(pixel_type, src_width, src_height, src_pixels)
                .map(|src| src.resize_exact(dst_width, dst_height, FilterType::Lanczos3))
        }
    };
    resized.ok_or_else(|| dims_err(format!("{pixel_type:?} buffer does not match its dimensions")))
}

fn resize_with_fir(
    mut src_image: fir::images::Image<'_>,
    pixel_type: PixelType,
    dst_width: u32,
    dst_height: u32,
) -> std::result::Result<Vec<u8>, String> {
    let mut dst_image = fir::images::Image::new(dst_width, dst_height, pixel_type);

    // Alpha must be premultiplied so transparent pixels don't bleed color into edges
    let premultiply = has_alpha(pixel_type);
    let mul_div = MulDiv::default();
    if premultiply {
        mul_div
            .multiply_alpha_inplace(&mut src_image)
            .map_err(|e| format!("failed to premultiply alpha: {e}"))?;
    }

    let options =
        ResizeOptions::new().resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::Lanczos3));
    if let Err(e) = fir::Resizer::new().resize(&src_image, &mut dst_image, &options) {
        // the image crate fallback reads these samples again
        if premultiply {
            let _ = mul_div.divide_alpha_inplace(&mut src_image);
        }
        return Err(format!("fir resize error: {e:?}"));
    }

    if premultiply {
        mul_div
            .divide_alpha_inplace(&mut dst_image)
            .map_err(|e| format!("failed to unpremultiply alpha: {e}"))?;
    }
    Ok(dst_image.into_vec())
}
