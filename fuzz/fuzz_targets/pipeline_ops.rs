#![no_main]

//! Fuzz target for the resize/crop pipeline on arbitrary bitmaps and plans.

use arbitrary::{Arbitrary, Unstructured};
use image::{DynamicImage, RgbaImage};
use libfuzzer_sys::fuzz_target;
use resize_op::ResizeTask;

#[derive(Arbitrary, Debug)]
struct PlanSeed {
    resize: Option<(u16, u16)>,
    crop: Option<(f64, f64)>,
    quality: f32,
}

fn build_image(data: &[u8]) -> DynamicImage {
    let width = data.first().copied().unwrap_or(0) as u32 % 64 + 1;
    let height = data.get(1).copied().unwrap_or(0) as u32 % 64 + 1;
    let mut buffer = vec![0u8; (width * height * 4) as usize];
    for (i, byte) in buffer.iter_mut().enumerate() {
        *byte = data.get(i % data.len().max(1)).copied().unwrap_or(0);
    }
    match RgbaImage::from_raw(width, height, buffer) {
        Some(rgba) => DynamicImage::ImageRgba8(rgba),
        None => DynamicImage::ImageRgba8(RgbaImage::new(1, 1)),
    }
}

fuzz_target!(|data: &[u8]| {
    let mut u = Unstructured::new(data);
    let seed = match PlanSeed::arbitrary(&mut u) {
        Ok(seed) => seed,
        Err(_) => return,
    };
    let img = build_image(u.take_rest());

    let mut task = ResizeTask::from_image(img);
    if let Some((w, h)) = seed.resize {
        // keep targets small so iterations stay fast
        task.resize_to_fit_within(w as u32 % 512, h as u32 % 512);
    }
    if let Some((w, h)) = seed.crop {
        task.crop_to_aspect_ratio(w, h);
    }
    task.set_jpeg_quality(seed.quality);

    // Errors are expected for degenerate plans; we're interested only in panics.
    if task.run().is_ok() {
        let _ = task.encode_result();
    }
});
