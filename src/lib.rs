// lib.rs
//
// resize-op: single-use image resize/crop tasks
//
// - Construct from a bitmap, encoded bytes, or a file path
// - Configure a fit-within resize, an aspect-ratio center crop, JPEG quality
// - Run once, off the calling thread if scheduled on a TaskQueue
// - Read the in-memory result, optionally written to disk as JPEG

pub mod engine;
pub mod error;
pub mod ops;

pub use engine::{
    CancellationToken, ImageCodec, LimitPolicy, NativeCodec, QueueConfig, ResizeTask, Source,
    TaskHandle, TaskLimits, TaskMetrics, TaskQueue, TaskState, WrittenFile,
};
pub use error::{ErrorKind, ResizeOpError, Result};
pub use ops::{CropSpec, EncodingOptions, JpegQuality, Orientation, ResizeSpec, TransformPlan};
