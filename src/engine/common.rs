// src/engine/common.rs
//
// Panic containment shared by the codec paths and the worker pool.

use crate::error::{CompressError, Result};
use std::any::Any;
use std::borrow::Cow;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Run a codec stage, converting a panic inside it into `InternalPanic`.
///
/// The native codecs (libjpeg-turbo through mozjpeg, libwebp) report some
/// failures by unwinding. Those must surface as a `Failed` outcome for the
/// one file, not as a crash of the worker that happened to run it.
pub fn run_with_panic_policy<T, F>(stage: &'static str, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(CompressError::internal_panic(
            stage,
            panic_message(payload.as_ref()),
        )),
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> Cow<'static, str> {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        Cow::Borrowed(*msg)
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        Cow::Owned(msg.clone())
    } else {
        Cow::Borrowed("non-string panic payload")
    }
}
