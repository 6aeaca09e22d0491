//! Async runtime helpers for blocking callers.
//!
//! The run controller executes steps on a plain worker thread, while process
//! management is async. This module bridges the two.

use anyhow::anyhow;
use std::future::Future;
use tokio::{
    runtime::{Handle, RuntimeFlavor},
    task,
};

/// Execute an async future from synchronous code.
///
/// Reuses the current multi-threaded runtime when called from inside one;
/// otherwise (the usual case on a run worker thread) a single-threaded runtime
/// is built for the duration of the call.
pub fn block_on_future<F, T>(future: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    if let Ok(handle) = Handle::try_current()
        && handle.runtime_flavor() == RuntimeFlavor::MultiThread
    {
        return task::block_in_place(|| handle.block_on(future));
    }
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|error| anyhow!(error))?
        .block_on(future)
}
