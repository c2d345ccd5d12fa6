//! Isolation of plugin callbacks.
//!
//! Plugin errors and panics are turned into `anyhow::Error` values so a
//! faulty task, check or aggregator never unwinds into its runner.

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Run a synchronous plugin callback, converting panics into errors.
pub fn guarded<T>(callback: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(result) => result,
        Err(panic) => Err(anyhow::anyhow!("panicked: {}", panic_message(panic.as_ref()))),
    }
}

/// Await an asynchronous plugin callback, converting panics into errors.
pub async fn guarded_async<T, F>(callback: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match AssertUnwindSafe(callback).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(anyhow::anyhow!("panicked: {}", panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
