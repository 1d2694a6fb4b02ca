// src/engine/limits.rs
//
// Per-task resource limits and enforcement helpers.

use crate::error::ResizeOpError;
use std::time::Instant;

const STRICT_MAX_PIXELS: u64 = 40_000_000; // ~8K x 5K
const LENIENT_MAX_PIXELS: u64 = 75_000_000; // generous but below global MAX_PIXELS
const STRICT_MAX_BYTES: u64 = 32 * 1024 * 1024;
const LENIENT_MAX_BYTES: u64 = 48 * 1024 * 1024;
const STRICT_TIMEOUT_MS: u64 = 5_000;
const LENIENT_TIMEOUT_MS: u64 = 30_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LimitPolicy {
    Disabled,
    Strict,
    Lenient,
    Custom,
}

/// Limits checked while a task runs. The global MAX_DIMENSION/MAX_PIXELS
/// checks apply regardless of policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskLimits {
    pub policy: LimitPolicy,
    pub max_pixels: Option<u64>,
    pub max_bytes: Option<u64>,
    pub timeout_ms: Option<u64>,
}

impl Default for TaskLimits {
    fn default() -> Self {
        Self::disabled()
    }
}

impl TaskLimits {
    pub fn disabled() -> Self {
        Self {
            policy: LimitPolicy::Disabled,
            max_pixels: None,
            max_bytes: None,
            timeout_ms: None,
        }
    }

    pub fn strict() -> Self {
        Self {
            policy: LimitPolicy::Strict,
            max_pixels: Some(STRICT_MAX_PIXELS),
            max_bytes: Some(STRICT_MAX_BYTES),
            timeout_ms: Some(STRICT_TIMEOUT_MS),
        }
    }

    pub fn lenient() -> Self {
        Self {
            policy: LimitPolicy::Lenient,
            max_pixels: Some(LENIENT_MAX_PIXELS),
            max_bytes: Some(LENIENT_MAX_BYTES),
            timeout_ms: Some(LENIENT_TIMEOUT_MS),
        }
    }

    /// Start from no limits and set fields individually.
    pub fn custom() -> Self {
        Self {
            policy: LimitPolicy::Custom,
            ..Self::disabled()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.policy != LimitPolicy::Disabled
    }

    pub fn enforce_source_len(&self, len: u64) -> Result<(), ResizeOpError> {
        if !self.is_enabled() {
            return Ok(());
        }
        match self.max_bytes {
            Some(limit) if len > limit => Err(ResizeOpError::input_too_large(len, limit)),
            _ => Ok(()),
        }
    }

    pub fn enforce_pixels(&self, width: u32, height: u32) -> Result<(), ResizeOpError> {
        if !self.is_enabled() {
            return Ok(());
        }
        let pixels = width as u64 * height as u64;
        match self.max_pixels {
            Some(limit) if pixels > limit => {
                Err(ResizeOpError::pixel_count_exceeds_limit(pixels, limit))
            }
            _ => Ok(()),
        }
    }

    pub fn enforce_timeout(&self, start: Instant, stage: &'static str) -> Result<(), ResizeOpError> {
        if !self.is_enabled() {
            return Ok(());
        }
        match self.timeout_ms {
            Some(limit) if start.elapsed().as_millis() > limit as u128 => {
                Err(ResizeOpError::time_limit_exceeded(stage, limit))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::time::Duration;

    #[test]
    fn disabled_enforces_nothing() {
        let limits = TaskLimits::disabled();
        assert!(limits.enforce_source_len(u64::MAX).is_ok());
        assert!(limits.enforce_pixels(u32::MAX, u32::MAX).is_ok());
        let start = Instant::now();
        std::thread::sleep(Duration::from_millis(2));
        assert!(limits.enforce_timeout(start, "decode").is_ok());
    }

    #[test]
    fn strict_rejects_large_inputs() {
        let limits = TaskLimits::strict();
        let err = limits.enforce_source_len(STRICT_MAX_BYTES + 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceLimit);
        assert!(limits.enforce_pixels(10_000, 10_000).is_err());
        assert!(limits.enforce_pixels(4_000, 3_000).is_ok());
    }

    #[test]
    fn custom_limits_apply_individually() {
        let mut limits = TaskLimits::custom();
        assert!(limits.enforce_source_len(1 << 40).is_ok());
        limits.max_bytes = Some(10);
        assert!(matches!(
            limits.enforce_source_len(11),
            Err(ResizeOpError::InputTooLarge { bytes: 11, max: 10 })
        ));
    }

    #[test]
    fn timeout_is_reported_with_stage() {
        let mut limits = TaskLimits::custom();
        limits.timeout_ms = Some(1);
        let start = Instant::now();
        std::thread::sleep(Duration::from_millis(10));
        let err = limits.enforce_timeout(start, "resize").unwrap_err();
        assert!(err.to_string().contains("resize"));
    }

    #[test]
    fn default_is_disabled() {
        assert_eq!(TaskLimits::default(), TaskLimits::disabled());
        assert!(!TaskLimits::default().is_enabled());
        assert_eq!(TaskLimits::lenient().policy, LimitPolicy::Lenient);
    }
}
