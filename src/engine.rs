// src/engine.rs
//
// The core of resize-op. A single-use task that:
// 1. Records a transform plan without executing it
// 2. Runs decode -> resize -> crop -> (encode + write) once on run()
// 3. Can be scheduled on a TaskQueue with memory backpressure
//
// This file is a facade over the modules in engine/

// =============================================================================
// SECURITY LIMITS
// =============================================================================

/// Maximum allowed image dimension (width or height).
/// Images larger than 32768x32768 are rejected to prevent decompression bombs.
pub const MAX_DIMENSION: u32 = 32768;

/// Maximum allowed total pixels (width * height).
/// 100 megapixels = 400MB uncompressed RGBA.
pub const MAX_PIXELS: u64 = 100_000_000;

// =============================================================================
// MODULE DECOMPOSITION
// =============================================================================

pub mod codec;
mod common;
mod decoder;
mod encoder;
mod io;
pub mod limits;
pub mod memory;
mod pipeline;
pub mod pool;
pub mod queue;
pub mod tasks;

pub use codec::{ImageCodec, NativeCodec};
pub use common::{run_with_panic_policy, EngineResult};
pub use decoder::{
    check_dimensions, decode_image, detect_exif_orientation, detect_format,
    read_header_dimensions,
};
pub use encoder::{embed_icc_jpeg, encode_jpeg, QualitySettings};
pub use io::{extract_icc_profile, write_atomic, Source};
pub use limits::{LimitPolicy, TaskLimits};
pub use memory::{MemoryPermit, WeightedSemaphore};
pub use pipeline::{
    apply_crop, apply_orientation, apply_plan, apply_resize, calc_aspect_crop,
    calc_fit_within_dimensions, project_plan_dimensions, CropRect,
};
pub use pool::QueueConfig;
pub use queue::{TaskHandle, TaskQueue};
pub use tasks::{CancellationToken, ResizeTask, TaskMetrics, TaskState, WrittenFile};

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GenericImageView, ImageFormat, RgbImage};
    use std::io::Cursor;

    fn encode_png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 64])
        }));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn limits_are_consistent() {
        assert!((MAX_DIMENSION as u64) * (MAX_DIMENSION as u64) > MAX_PIXELS);
        assert!(check_dimensions(MAX_DIMENSION, 1).is_ok());
        assert!(check_dimensions(MAX_DIMENSION + 1, 1).is_err());
    }

    #[test]
    fn png_bytes_through_task_to_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.jpg");
        let mut task = ResizeTask::from_bytes(encode_png(640, 480));
        task.resize_to_fit_within(320, 320)
            .crop_to_aspect_ratio(16.0, 9.0)
            .set_jpeg_quality(0.9)
            .write_result_to_path(&out);
        task.run().unwrap();

        assert_eq!(task.result().unwrap().dimensions(), (320, 180));
        let written = std::fs::read(&out).unwrap();
        assert_eq!(detect_format(&written), Some(ImageFormat::Jpeg));
        assert_eq!(read_header_dimensions(&written), Some((320, 180)));
        assert_eq!(task.metrics().input_format.as_deref(), Some("png"));
    }
}
