use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shared cancellation flag threaded through every awaiting call of a run.
pub type CancelSignal = Arc<AtomicBool>;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Marker returned when a cancellable await observed the cancel flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("operation was cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// Creates a fresh, unset cancellation flag.
#[must_use]
pub fn cancel_signal() -> CancelSignal {
    Arc::new(AtomicBool::new(false))
}

#[must_use]
pub fn is_cancelled(cancel: &CancelSignal) -> bool {
    cancel.load(Ordering::Acquire)
}

pub fn cancel(cancel: &CancelSignal) {
    cancel.store(true, Ordering::Release);
}

/// Awaits `future` while polling `cancel`; returns `Err(Cancelled)` as soon as
/// the flag is observed, dropping the in-flight future.
pub async fn await_or_cancel<F>(future: F, cancel: &CancelSignal) -> Result<F::Output, Cancelled>
where
    F: Future,
{
    let mut future = Box::pin(future);

    loop {
        if is_cancelled(cancel) {
            return Err(Cancelled);
        }

        if let Ok(output) = tokio::time::timeout(CANCEL_POLL_INTERVAL, &mut future).await {
            if is_cancelled(cancel) {
                return Err(Cancelled);
            }
            return Ok(output);
        }
    }
}
