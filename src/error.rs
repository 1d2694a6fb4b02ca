// src/error.rs
//
// Unified error handling for resize-op
// Uses thiserror for simple, type-safe error handling
//
// Error Taxonomy:
// - Decode: input could not be turned into a bitmap
// - InvalidSpec: degenerate crop/resize configuration
// - Encode / Write: the on-disk output failed (in-memory result survives)
// - ResourceLimit: byte/pixel/time limits
// - Cancelled: cooperative cancellation observed between steps
// - Internal: library bugs (should not happen)

use std::borrow::Cow;
use thiserror::Error;

/// Coarse error kind surfaced to schedulers alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Input buffer or file is not a readable, recognized image
    Decode,
    /// A crop or resize specification cannot be satisfied
    InvalidSpec,
    /// JPEG encoding failed
    Encode,
    /// The destination path could not be written
    Write,
    /// Byte, pixel or time limits
    ResourceLimit,
    /// Cancellation was requested before the task finished
    Cancelled,
    /// Library bugs (should not happen)
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Decode => "decode",
            ErrorKind::InvalidSpec => "invalid_spec",
            ErrorKind::Encode => "encode",
            ErrorKind::Write => "write",
            ErrorKind::ResourceLimit => "resource_limit",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// resize-op error types
#[derive(Debug, Error)]
pub enum ResizeOpError {
    // File I/O Errors
    #[error("File not found: {path}")]
    FileNotFound { path: Cow<'static, str> },

    #[error("Failed to read file '{path}': {source}")]
    FileReadFailed {
        path: Cow<'static, str>,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to memory-map file '{path}': {source}")]
    MmapFailed {
        path: Cow<'static, str>,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWriteFailed {
        path: Cow<'static, str>,
        #[source]
        source: std::io::Error,
    },

    // Decode Errors
    #[error("Unsupported image format: {format}")]
    UnsupportedFormat { format: Cow<'static, str> },

    #[error("Failed to decode image: {message}")]
    DecodeFailed { message: Cow<'static, str> },

    #[error("Corrupted image data")]
    CorruptedImage,

    // Limit Errors
    #[error("Image dimension {dimension} exceeds maximum {max}")]
    DimensionExceedsLimit { dimension: u32, max: u32 },

    #[error("Image pixel count {pixels} exceeds max {max}")]
    PixelCountExceedsLimit { pixels: u64, max: u64 },

    #[error("Input size {bytes} bytes exceeds limit of {max} bytes")]
    InputTooLarge { bytes: u64, max: u64 },

    #[error("Task exceeded its time limit of {limit_ms}ms during {stage}")]
    TimeLimitExceeded {
        stage: Cow<'static, str>,
        limit_ms: u64,
    },

    // Specification Errors
    #[error("Invalid crop aspect ratio {width}:{height}. Both components must be positive and finite")]
    InvalidCropRatio { width: f64, height: f64 },

    #[error("Crop to {ratio_width}:{ratio_height} is degenerate for a {img_width}x{img_height} image")]
    DegenerateCrop {
        ratio_width: f64,
        ratio_height: f64,
        img_width: u32,
        img_height: u32,
    },

    #[error("Resize failed ({source_width}x{source_height} -> {target_width}x{target_height}): {message}")]
    ResizeFailed {
        source_width: u32,
        source_height: u32,
        target_width: u32,
        target_height: u32,
        message: Cow<'static, str>,
    },

    // Encode Errors
    #[error("Failed to encode as {format}: {message}")]
    EncodeFailed {
        format: Cow<'static, str>,
        message: Cow<'static, str>,
    },

    #[error("Invalid value for {name}: {value}. {reason}")]
    InvalidArgument {
        name: Cow<'static, str>,
        value: Cow<'static, str>,
        reason: Cow<'static, str>,
    },

    // State Errors
    #[error("Task has already run; a task runs at most once")]
    AlreadyRun,

    #[error("No result available: the task has not produced an image")]
    ResultUnavailable,

    #[error("Task was cancelled before {stage}")]
    Cancelled { stage: Cow<'static, str> },

    // Internal Errors
    #[error("Internal error: {message}")]
    InternalPanic { message: Cow<'static, str> },
}

fn clone_io(source: &std::io::Error) -> std::io::Error {
    std::io::Error::new(source.kind(), source.to_string())
}

impl Clone for ResizeOpError {
    fn clone(&self) -> Self {
        match self {
            Self::FileNotFound { path } => Self::FileNotFound { path: path.clone() },
            Self::FileReadFailed { path, source } => Self::FileReadFailed {
                path: path.clone(),
                source: clone_io(source),
            },
            Self::MmapFailed { path, source } => Self::MmapFailed {
                path: path.clone(),
                source: clone_io(source),
            },
            Self::FileWriteFailed { path, source } => Self::FileWriteFailed {
                path: path.clone(),
                source: clone_io(source),
            },
            Self::UnsupportedFormat { format } => Self::UnsupportedFormat {
                format: format.clone(),
            },
            Self::DecodeFailed { message } => Self::DecodeFailed {
                message: message.clone(),
            },
            Self::CorruptedImage => Self::CorruptedImage,
            Self::DimensionExceedsLimit { dimension, max } => Self::DimensionExceedsLimit {
                dimension: *dimension,
                max: *max,
            },
            Self::PixelCountExceedsLimit { pixels, max } => Self::PixelCountExceedsLimit {
                pixels: *pixels,
                max: *max,
            },
            Self::InputTooLarge { bytes, max } => Self::InputTooLarge {
                bytes: *bytes,
                max: *max,
            },
            Self::TimeLimitExceeded { stage, limit_ms } => Self::TimeLimitExceeded {
                stage: stage.clone(),
                limit_ms: *limit_ms,
            },
            Self::InvalidCropRatio { width, height } => Self::InvalidCropRatio {
                width: *width,
                height: *height,
            },
            Self::DegenerateCrop {
                ratio_width,
                ratio_height,
                img_width,
                img_height,
            } => Self::DegenerateCrop {
                ratio_width: *ratio_width,
                ratio_height: *ratio_height,
                img_width: *img_width,
                img_height: *img_height,
            },
            Self::ResizeFailed {
                source_width,
                source_height,
                target_width,
                target_height,
                message,
            } => Self::ResizeFailed {
                source_width: *source_width,
                source_height: *source_height,
                target_width: *target_width,
                target_height: *target_height,
                message: message.clone(),
            },
            Self::EncodeFailed { format, message } => Self::EncodeFailed {
                format: format.clone(),
                message: message.clone(),
            },
            Self::InvalidArgument {
                name,
                value,
                reason,
            } => Self::InvalidArgument {
                name: name.clone(),
                value: value.clone(),
                reason: reason.clone(),
            },
            Self::AlreadyRun => Self::AlreadyRun,
            Self::ResultUnavailable => Self::ResultUnavailable,
            Self::Cancelled { stage } => Self::Cancelled {
                stage: stage.clone(),
            },
            Self::InternalPanic { message } => Self::InternalPanic {
                message: message.clone(),
            },
        }
    }
}

// Constructor Helpers
impl ResizeOpError {
    pub fn file_not_found(path: impl Into<Cow<'static, str>>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    pub fn file_read_failed(path: impl Into<Cow<'static, str>>, source: std::io::Error) -> Self {
        Self::FileReadFailed {
            path: path.into(),
            source,
        }
    }

    pub fn mmap_failed(path: impl Into<Cow<'static, str>>, source: std::io::Error) -> Self {
        Self::MmapFailed {
            path: path.into(),
            source,
        }
    }

    pub fn file_write_failed(path: impl Into<Cow<'static, str>>, source: std::io::Error) -> Self {
        Self::FileWriteFailed {
            path: path.into(),
            source,
        }
    }

    pub fn unsupported_format(format: impl Into<Cow<'static, str>>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }

    pub fn decode_failed(message: impl Into<Cow<'static, str>>) -> Self {
        Self::DecodeFailed {
            message: message.into(),
        }
    }

    pub fn corrupted_image() -> Self {
        Self::CorruptedImage
    }

    pub fn dimension_exceeds_limit(dimension: u32, max: u32) -> Self {
        Self::DimensionExceedsLimit { dimension, max }
    }

    pub fn pixel_count_exceeds_limit(pixels: u64, max: u64) -> Self {
        Self::PixelCountExceedsLimit { pixels, max }
    }

    pub fn input_too_large(bytes: u64, max: u64) -> Self {
        Self::InputTooLarge { bytes, max }
    }

    pub fn time_limit_exceeded(stage: impl Into<Cow<'static, str>>, limit_ms: u64) -> Self {
        Self::TimeLimitExceeded {
            stage: stage.into(),
            limit_ms,
        }
    }

    pub fn invalid_crop_ratio(width: f64, height: f64) -> Self {
        Self::InvalidCropRatio { width, height }
    }

    pub fn degenerate_crop(ratio: (f64, f64), img_dims: (u32, u32)) -> Self {
        Self::DegenerateCrop {
            ratio_width: ratio.0,
            ratio_height: ratio.1,
            img_width: img_dims.0,
            img_height: img_dims.1,
        }
    }

    pub fn resize_failed(
        source_dims: (u32, u32),
        target_dims: (u32, u32),
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::ResizeFailed {
            source_width: source_dims.0,
            source_height: source_dims.1,
            target_width: target_dims.0,
            target_height: target_dims.1,
            message: message.into(),
        }
    }

    pub fn encode_failed(
        format: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::EncodeFailed {
            format: format.into(),
            message: message.into(),
        }
    }

    pub fn invalid_argument(
        name: impl Into<Cow<'static, str>>,
        value: impl Into<Cow<'static, str>>,
        reason: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn already_run() -> Self {
        Self::AlreadyRun
    }

    pub fn result_unavailable() -> Self {
        Self::ResultUnavailable
    }

    pub fn cancelled(stage: impl Into<Cow<'static, str>>) -> Self {
        Self::Cancelled {
            stage: stage.into(),
        }
    }

    pub fn internal_panic(message: impl Into<Cow<'static, str>>) -> Self {
        Self::InternalPanic {
            message: message.into(),
        }
    }

    /// Check if this error is recoverable (caller can fix input or environment and retry)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidSpec | ErrorKind::Write | ErrorKind::ResourceLimit
        )
    }

    /// Get the error kind for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            // A missing or unreadable input is indistinguishable from an undecodable one
            // for the caller: no bitmap could be produced.
            Self::FileNotFound { .. }
            | Self::FileReadFailed { .. }
            | Self::MmapFailed { .. }
            | Self::UnsupportedFormat { .. }
            | Self::DecodeFailed { .. }
            | Self::CorruptedImage => ErrorKind::Decode,

            Self::InvalidCropRatio { .. }
            | Self::DegenerateCrop { .. }
            | Self::InvalidArgument { .. } => ErrorKind::InvalidSpec,

            Self::EncodeFailed { .. } => ErrorKind::Encode,

            Self::FileWriteFailed { .. } => ErrorKind::Write,

            Self::DimensionExceedsLimit { .. }
            | Self::PixelCountExceedsLimit { .. }
            | Self::InputTooLarge { .. }
            | Self::TimeLimitExceeded { .. } => ErrorKind::ResourceLimit,

            Self::Cancelled { .. } => ErrorKind::Cancelled,

            // ResizeFailed means both resize backends rejected valid dimensions
            Self::ResizeFailed { .. }
            | Self::AlreadyRun
            | Self::ResultUnavailable
            | Self::InternalPanic { .. } => ErrorKind::Internal,
        }
    }
}

// Result type alias
pub type Result<T> = std::result::Result<T, ResizeOpError>;
