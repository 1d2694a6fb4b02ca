// src/engine/memory.rs
//
// Memory backpressure for queued tasks.
//
// Each task acquires a permit weighted by its estimated peak memory before it
// runs, so a queue never holds more decoded pixels in flight than its budget.

use crate::engine::decoder::{detect_format, read_header_dimensions};
use crate::engine::io::Source;
use crate::engine::pipeline::{calc_fit_within_dimensions, project_plan_dimensions};
use crate::ops::TransformPlan;
use image::{DynamicImage, ImageFormat};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// Used when dimensions can't be read without decoding (path sources, bad headers).
pub const FALLBACK_ESTIMATE_BYTES: u64 = 100 * 1024 * 1024; // 100MB

/// Lower bound for any estimate to avoid zero-ish weights
const MIN_ESTIMATE_BYTES: u64 = 4 * 1024 * 1024; // 4MB

/// Overhead for decode/temporary buffers (heuristic)
const DECODE_OVERHEAD_BYTES: u64 = 8 * 1024 * 1024;
const FILTER_OVERHEAD_BYTES: u64 = 4 * 1024 * 1024;

/// Decoded bytes-per-pixel assumptions per format
const BPP_JPEG: u64 = 3; // YCbCr -> RGB
const BPP_PNG: u64 = 4; // favor safety (alpha)
const BPP_WEBP: u64 = 4;
const BPP_UNKNOWN: u64 = 4;

/// In-memory weighted semaphore for byte-based backpressure
#[derive(Debug)]
pub struct WeightedSemaphore {
    capacity: u64,
    state: Mutex<u64>, // available bytes
    cvar: Condvar,
}

#[derive(Debug)]
pub struct MemoryPermit {
    sem: Arc<WeightedSemaphore>,
    weight: u64,
}

impl MemoryPermit {
    pub fn weight(&self) -> u64 {
        self.weight
    }
}

impl WeightedSemaphore {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            state: Mutex::new(capacity),
            cvar: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn available(&self) -> u64 {
        *self.state.lock()
    }

    /// Block until `weight` bytes are free. Weights above capacity are clamped,
    /// so an oversized task waits for the whole budget instead of deadlocking.
    pub fn acquire(self: &Arc<Self>, weight: u64) -> MemoryPermit {
        let mut available = self.state.lock();
        let need = weight.min(self.capacity);
        while *available < need {
            self.cvar.wait(&mut available);
        }
        *available -= need;
        MemoryPermit {
            sem: Arc::clone(self),
            weight: need,
        }
    }

    /// Non-blocking acquire.
    pub fn try_acquire(self: &Arc<Self>, weight: u64) -> Option<MemoryPermit> {
        let mut available = self.state.lock();
        let need = weight.min(self.capacity);
        if *available < need {
            return None;
        }
        *available -= need;
        Some(MemoryPermit {
            sem: Arc::clone(self),
            weight: need,
        })
    }

    fn release(&self, weight: u64) {
        let mut available = self.state.lock();
        *available = (*available).saturating_add(weight).min(self.capacity);
        // Waiters have heterogeneous weights; notify_one could starve a large one.
        self.cvar.notify_all();
    }
}

impl Drop for MemoryPermit {
    fn drop(&mut self) {
        self.sem.release(self.weight);
    }
}

fn bytes_for_image(width: u32, height: u32, bytes_per_pixel: u64) -> u64 {
    (width as u64 * height as u64).saturating_mul(bytes_per_pixel)
}

fn default_bpp(format: Option<ImageFormat>) -> u64 {
    match format {
        Some(ImageFormat::Jpeg) => BPP_JPEG,
        Some(ImageFormat::Png) => BPP_PNG,
        Some(ImageFormat::WebP) => BPP_WEBP,
        _ => BPP_UNKNOWN,
    }
}

/// Peak bytes for decoding a `width` x `height` image and running `plan` on it.
///
/// The peak is the larger of the decoded buffer and the moment the resize
/// holds both its input and its output.
pub fn estimate_from_dimensions(
    width: u32,
    height: u32,
    format: Option<ImageFormat>,
    plan: &TransformPlan,
) -> u64 {
    let bpp = default_bpp(format);
    let decoded = bytes_for_image(width, height, bpp);
    let mut peak = decoded.saturating_add(DECODE_OVERHEAD_BYTES);

    if let Some(spec) = plan.resize {
        let resized = calc_fit_within_dimensions(width, height, spec);
        let resize_peak = decoded
            .saturating_add(bytes_for_image(resized.0, resized.1, bpp))
            .saturating_add(FILTER_OVERHEAD_BYTES);
        peak = peak.max(resize_peak);
    }

    // Crop copies out of the resized buffer; bounded by the resize peak above
    // unless there is no resize.
    if plan.resize.is_none() && plan.crop.is_some() {
        if let Ok((w, h)) = project_plan_dimensions((width, height), plan) {
            peak = peak.max(decoded.saturating_add(bytes_for_image(w, h, bpp)));
        }
    }

    peak.max(MIN_ESTIMATE_BYTES)
}

/// Estimate from encoded bytes via a header-only parse.
pub fn estimate_from_header(bytes: &[u8], plan: &TransformPlan) -> Option<u64> {
    let (width, height) = read_header_dimensions(bytes)?;
    Some(estimate_from_dimensions(
        width,
        height,
        detect_format(bytes),
        plan,
    ))
}

fn estimate_from_image(image: &DynamicImage, plan: &TransformPlan) -> u64 {
    let bpp = image.color().bytes_per_pixel() as u64;
    let format = if bpp == 3 { Some(ImageFormat::Jpeg) } else { None };
    // Already decoded: the source buffer exists regardless, only count the work.
    estimate_from_dimensions(image.width(), image.height(), format, plan)
        .saturating_sub(DECODE_OVERHEAD_BYTES)
        .max(MIN_ESTIMATE_BYTES)
}

/// Permit weight for a task reading `source`.
pub fn estimate_task_memory(source: &Source, plan: &TransformPlan) -> u64 {
    match source {
        Source::Image(image) => estimate_from_image(image, plan),
        Source::Memory(_) | Source::Mapped(_) => source
            .as_bytes()
            .and_then(|bytes| estimate_from_header(bytes, plan))
            .unwrap_or(FALLBACK_ESTIMATE_BYTES),
        // Reading the header would mean I/O on the submitting thread
        Source::Path(_) => FALLBACK_ESTIMATE_BYTES,
    }
}
