//! Async test helpers
//!
//! Bounded waits for channels, futures and state cells.

use std::future::Future;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

use crate::core_state::StateCell;

/// Default timeout duration for tests (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Short timeout for tests asserting that nothing arrives (100ms)
pub const SHORT_TEST_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvTimeoutError {
    Timeout,
    Closed,
}

impl std::fmt::Display for RecvTimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecvTimeoutError::Timeout => write!(f, "receive operation timed out"),
            RecvTimeoutError::Closed => write!(f, "channel closed"),
        }
    }
}

impl std::error::Error for RecvTimeoutError {}

/// Receive from an unbounded channel with a timeout
pub async fn recv_timeout<T>(
    rx: &mut mpsc::UnboundedReceiver<T>,
    duration: Duration,
) -> Result<T, RecvTimeoutError> {
    timeout(duration, rx.recv())
        .await
        .map_err(|_| RecvTimeoutError::Timeout)?
        .ok_or(RecvTimeoutError::Closed)
}

/// Drain everything currently queued without waiting
pub fn try_drain<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut results = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        results.push(msg);
    }
    results
}

/// Panics if `future` does not finish within `duration`
pub async fn assert_completes_within<F, T>(duration: Duration, future: F) -> T
where
    F: Future<Output = T>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => panic!("Future did not complete within {:?}", duration),
    }
}

/// Wait until `cell` holds a value satisfying `predicate`, returning that value
pub async fn wait_for_state<T, P>(cell: &StateCell<T>, duration: Duration, predicate: P) -> T
where
    T: Clone + Send + Sync + 'static,
    P: FnMut(&T) -> bool,
{
    let mut rx = cell.watch();
    let value = match timeout(duration, rx.wait_for(predicate)).await {
        Ok(Ok(value)) => value.clone(),
        Ok(Err(_)) => panic!("state cell dropped while waiting"),
        Err(_) => panic!("state did not match within {:?}; last value differs", duration),
    };
    value
}
