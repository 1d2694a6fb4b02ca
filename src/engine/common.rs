// src/engine/common.rs
//
// Common utilities shared across engine modules.

use crate::error::ResizeOpError;
use std::panic::{catch_unwind, AssertUnwindSafe};

pub type EngineResult<T> = std::result::Result<T, ResizeOpError>;

/// Run a native codec call, converting any panic into `InternalPanic`.
///
/// libjpeg reports fatal errors by unwinding through mozjpeg, and a few pure-Rust
/// decoders still panic on hostile input. Neither may take down a worker thread.
pub fn run_with_panic_policy<T, F>(stage: &'static str, f: F) -> EngineResult<T>
where
    F: FnOnce() -> EngineResult<T>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            tracing::warn!(target: "resize_op::engine", stage, %detail, "codec panicked");
            Err(ResizeOpError::internal_panic(format!("{stage}: {detail}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn passes_through_ok_and_err() {
        assert_eq!(run_with_panic_policy("test", || Ok(7)).unwrap(), 7);
        let err = run_with_panic_policy::<(), _>("test", || {
            Err(ResizeOpError::decode_failed("nope"))
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }

    #[test]
    fn converts_panic_into_internal_error() {
        let err = run_with_panic_policy::<(), _>("decode:test", || panic!("boom")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.to_string().contains("decode:test"));
        assert!(err.to_string().contains("boom"));
    }
}
