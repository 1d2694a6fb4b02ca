// src/engine/tasks.rs
//
// ResizeTask: a single-use unit of work.
// construct -> configure -> run once -> read result (and, optionally, the written file).

use crate::engine::codec::{ImageCodec, NativeCodec};
use crate::engine::decoder::{detect_exif_orientation, detect_format};
use crate::engine::io::{extract_icc_profile, write_atomic, Source};
use crate::engine::limits::TaskLimits;
use crate::engine::memory;
use crate::engine::pipeline::{
    apply_crop, apply_orientation, apply_resize, calc_fit_within_dimensions,
};
use crate::error::{ResizeOpError, Result};
use crate::ops::{CropSpec, EncodingOptions, JpegQuality, ResizeSpec, TransformPlan};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Cooperative cancellation flag shared between a task and whoever scheduled it.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Finished,
}

/// A JPEG that was written to disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WrittenFile {
    pub path: PathBuf,
    pub bytes: u64,
}

/// Per-stage timings and I/O sizes for one run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TaskMetrics {
    pub decode_ms: f64,
    pub process_ms: f64,
    pub encode_ms: f64,
    pub total_ms: f64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub input_format: Option<String>,
    pub output_dimensions: Option<(u32, u32)>,
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

pub struct ResizeTask {
    source: Option<Source>,
    plan: TransformPlan,
    options: EncodingOptions,
    output_path: Option<PathBuf>,
    limits: TaskLimits,
    codec: Arc<dyn ImageCodec>,
    cancel: CancellationToken,
    state: TaskState,
    /// Source ICC profile, captured at decode time when preserve_icc is set
    icc_profile: Option<Vec<u8>>,
    result: Option<Arc<DynamicImage>>,
    error: Option<ResizeOpError>,
    write_error: Option<ResizeOpError>,
    written: Option<WrittenFile>,
    metrics: TaskMetrics,
}

impl std::fmt::Debug for ResizeTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResizeTask")
            .field("plan", &self.plan)
            .field("options", &self.options)
            .field("output_path", &self.output_path)
            .field("codec", &self.codec.name())
            .field("state", &self.state)
            .field("has_result", &self.result.is_some())
            .field("error", &self.error)
            .field("write_error", &self.write_error)
            .finish()
    }
}

// Construction
impl ResizeTask {
    fn with_source(source: Source) -> Self {
        Self {
            source: Some(source),
            plan: TransformPlan::default(),
            options: EncodingOptions::default(),
            output_path: None,
            limits: TaskLimits::default(),
            codec: Arc::new(NativeCodec),
            cancel: CancellationToken::new(),
            state: TaskState::Pending,
            icc_profile: None,
            result: None,
            error: None,
            write_error: None,
            written: None,
            metrics: TaskMetrics::default(),
        }
    }

    /// Start from an already-decoded bitmap.
    pub fn from_image(image: DynamicImage) -> Self {
        Self::with_source(Source::Image(Arc::new(image)))
    }

    pub fn from_shared_image(image: Arc<DynamicImage>) -> Self {
        Self::with_source(Source::Image(image))
    }

    /// Start from encoded bytes; decoded when the task runs.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::with_source(Source::Memory(Arc::new(bytes.into())))
    }

    /// Start from a file path; read and decoded when the task runs.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        Self::with_source(Source::Path(path.as_ref().to_path_buf()))
    }

    /// Memory-map `path` now and decode it when the task runs.
    pub fn from_mapped_path(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::with_source(Source::map_path(path.as_ref())?))
    }

    pub fn from_source(source: Source) -> Self {
        Self::with_source(source)
    }
}

// Configuration. Calls after run() has started are ignored.
impl ResizeTask {
    fn configurable(&self, what: &'static str) -> bool {
        if self.state == TaskState::Pending {
            true
        } else {
            warn!(
                target: "resize_op::task",
                setting = what,
                state = ?self.state,
                "configuration ignored: task already started"
            );
            false
        }
    }

    /// Scale uniformly so the image fits within `width` x `height`.
    /// A zero bound means no resize.
    pub fn resize_to_fit_within(&mut self, width: u32, height: u32) -> &mut Self {
        if self.configurable("resize") {
            self.plan.resize = ResizeSpec::new(width, height);
            if self.plan.resize.is_none() {
                debug!(target: "resize_op::task", width, height, "zero resize bound, resize disabled");
            }
        }
        self
    }

    /// Center-crop to `width:height`. Non-positive components fail the run.
    pub fn crop_to_aspect_ratio(&mut self, width: f64, height: f64) -> &mut Self {
        if self.configurable("crop") {
            self.plan.crop = Some(CropSpec::new(width, height));
        }
        self
    }

    /// JPEG quality in [0.0, 1.0]; clamped when encoding.
    pub fn set_jpeg_quality(&mut self, quality: f32) -> &mut Self {
        if self.configurable("jpeg_quality") {
            self.options.quality = JpegQuality::new(quality);
        }
        self
    }

    /// Write the result as JPEG to `path` at the end of the run.
    pub fn write_result_to_path(&mut self, path: impl AsRef<Path>) -> &mut Self {
        if self.configurable("output_path") {
            self.output_path = Some(path.as_ref().to_path_buf());
        }
        self
    }

    pub fn set_preserve_icc(&mut self, preserve: bool) -> &mut Self {
        if self.configurable("preserve_icc") {
            self.options.preserve_icc = preserve;
        }
        self
    }

    pub fn set_auto_orient(&mut self, auto_orient: bool) -> &mut Self {
        if self.configurable("auto_orient") {
            self.options.auto_orient = auto_orient;
        }
        self
    }

    pub fn set_limits(&mut self, limits: TaskLimits) -> &mut Self {
        if self.configurable("limits") {
            self.limits = limits;
        }
        self
    }

    pub fn with_codec(&mut self, codec: Arc<dyn ImageCodec>) -> &mut Self {
        if self.configurable("codec") {
            self.codec = codec;
        }
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

// Execution
impl ResizeTask {
    /// Run the task. Only the first call does any work.
    ///
    /// Returns the transform error, or the write error if only the on-disk
    /// output failed. A write error leaves `result()` populated.
    pub fn run(&mut self) -> Result<()> {
        if self.state != TaskState::Pending {
            return Err(ResizeOpError::already_run());
        }
        self.state = TaskState::Running;
        let start = Instant::now();
        debug!(target: "resize_op::task", plan = ?self.plan, codec = self.codec.name(), "task started");

        let outcome = self.execute(start);

        self.metrics.total_ms = elapsed_ms(start);
        self.state = TaskState::Finished;
        debug!(
            target: "resize_op::task",
            ok = outcome.is_ok(),
            total_ms = self.metrics.total_ms,
            "task finished"
        );
        outcome
    }

    fn execute(&mut self, start: Instant) -> Result<()> {
        let image = match self.produce(start) {
            Ok(image) => Arc::new(image),
            Err(err) => {
                debug!(target: "resize_op::task", error = %err, kind = %err.kind(), "task failed");
                self.error = Some(err.clone());
                return Err(err);
            }
        };
        self.metrics.output_dimensions = Some((image.width(), image.height()));
        self.result = Some(Arc::clone(&image));

        if let Some(path) = self.output_path.clone() {
            let encode_start = Instant::now();
            match self.encode_to_path(&image, &path) {
                Ok(written) => {
                    self.metrics.encode_ms = elapsed_ms(encode_start);
                    self.metrics.bytes_out = written.bytes;
                    self.written = Some(written);
                }
                Err(err) => {
                    warn!(
                        target: "resize_op::task",
                        path = %path.display(),
                        error = %err,
                        "failed to write result"
                    );
                    self.write_error = Some(err.clone());
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn check_progress(&self, start: Instant, stage: &'static str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ResizeOpError::cancelled(stage));
        }
        self.limits.enforce_timeout(start, stage)
    }

    /// Steps 0-3: validate, decode, resize, crop.
    fn produce(&mut self, start: Instant) -> Result<DynamicImage> {
        if let Some(crop) = self.plan.crop {
            if !crop.is_valid() {
                return Err(ResizeOpError::invalid_crop_ratio(crop.width, crop.height));
            }
        }
        self.check_progress(start, "decode")?;

        let decode_start = Instant::now();
        let mut image = self.obtain_image()?;
        self.metrics.decode_ms = elapsed_ms(decode_start);
        self.limits.enforce_pixels(image.width(), image.height())?;

        let process_start = Instant::now();
        if let Some(spec) = self.plan.resize {
            self.check_progress(start, "resize")?;
            let (dst_w, dst_h) = calc_fit_within_dimensions(image.width(), image.height(), spec);
            self.limits.enforce_pixels(dst_w, dst_h)?;
            image = apply_resize(image, spec)?;
        }
        if let Some(spec) = self.plan.crop {
            self.check_progress(start, "crop")?;
            image = apply_crop(image, spec)?;
        }
        self.metrics.process_ms = elapsed_ms(process_start);

        self.check_progress(start, "publish")?;
        Ok(image)
    }

    /// Step 1: the working image, decoded from the source if necessary.
    fn obtain_image(&mut self) -> Result<DynamicImage> {
        let source = self
            .source
            .take()
            .ok_or_else(|| ResizeOpError::decode_failed("task source already consumed"))?;

        if let Source::Image(image) = source {
            return Ok(Arc::try_unwrap(image).unwrap_or_else(|shared| (*shared).clone()));
        }

        if let Some(len) = source.known_len() {
            self.limits.enforce_source_len(len)?;
        }
        let bytes = source
            .load()?
            .ok_or_else(|| ResizeOpError::decode_failed("source has no encoded data"))?;
        self.limits.enforce_source_len(bytes.len() as u64)?;

        self.metrics.bytes_in = bytes.len() as u64;
        self.metrics.input_format =
            detect_format(&bytes).map(|f| format!("{f:?}").to_lowercase());

        if self.options.preserve_icc {
            self.icc_profile = extract_icc_profile(&bytes);
        }
        let orientation = if self.options.auto_orient {
            detect_exif_orientation(&bytes)
        } else {
            None
        };

        let image = self.codec.decode(&bytes)?;
        Ok(match orientation {
            Some(o) => {
                debug!(target: "resize_op::task", orientation = ?o, "applying EXIF orientation");
                apply_orientation(image, o)
            }
            None => image,
        })
    }

    fn encode_to_path(&self, image: &DynamicImage, path: &Path) -> Result<WrittenFile> {
        let icc = self.icc_profile.as_deref().filter(|_| self.options.preserve_icc);
        let data = self
            .codec
            .encode(image, self.options.quality.as_percent(), icc)?;
        let bytes = write_atomic(path, &data)?;
        Ok(WrittenFile {
            path: path.to_path_buf(),
            bytes,
        })
    }
}

// Outcome
impl ResizeTask {
    /// Record a panic caught by the worker. A run that already published its
    /// result only lost the write, so the result stays.
    pub(crate) fn record_failure(&mut self, err: ResizeOpError) {
        if self.result.is_some() {
            self.write_error = Some(err);
        } else {
            self.error = Some(err);
        }
        self.state = TaskState::Finished;
    }

    /// Encode the finished result and write it to `path`, independent of any
    /// destination configured before the run.
    pub fn write_result(&self, path: impl AsRef<Path>) -> Result<WrittenFile> {
        let image = self.result.as_ref().ok_or_else(ResizeOpError::result_unavailable)?;
        self.encode_to_path(image, path.as_ref())
    }

    /// Encode the finished result as JPEG bytes.
    pub fn encode_result(&self) -> Result<Vec<u8>> {
        let image = self.result.as_ref().ok_or_else(ResizeOpError::result_unavailable)?;
        let icc = self.icc_profile.as_deref().filter(|_| self.options.preserve_icc);
        self.codec
            .encode(image, self.options.quality.as_percent(), icc)
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state == TaskState::Finished
    }

    pub fn result(&self) -> Option<&Arc<DynamicImage>> {
        self.result.as_ref()
    }

    pub fn into_result(self) -> Option<Arc<DynamicImage>> {
        self.result
    }

    /// Why no result was produced.
    pub fn error(&self) -> Option<&ResizeOpError> {
        self.error.as_ref()
    }

    /// Why the configured destination was not written.
    pub fn write_error(&self) -> Option<&ResizeOpError> {
        self.write_error.as_ref()
    }

    pub fn written(&self) -> Option<&WrittenFile> {
        self.written.as_ref()
    }

    pub fn metrics(&self) -> &TaskMetrics {
        &self.metrics
    }

    pub fn plan(&self) -> &TransformPlan {
        &self.plan
    }

    pub fn options(&self) -> &EncodingOptions {
        &self.options
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }

    /// Bytes of memory this task is expected to need while running.
    pub fn estimated_memory(&self) -> u64 {
        match &self.source {
            Some(source) => memory::estimate_task_memory(source, &self.plan),
            None => 0,
        }
    }
}
