//! # Lazy Cells
//!
//! A `LazyCell<T>` is a one-time-initialization slot that caches either a
//! value or an error. Every component owns four of them.
//!
//! ## Protocol
//!
//! - A cached result is returned immediately; the initializer never runs twice.
//! - While an initializer is running, every other caller waits for it.
//! - Errors are cached exactly like values. There is no retry.
//!
//! An initializer must not resolve its own cell; that deadlocks and is not
//! detected.

use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tokio::sync::OnceCell;

use crate::error::Result;

/// Observable state of a lazy cell.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CellState {
    Unstarted,
    InProgress,
    Done,
}

pub struct LazyCell<T> {
    cell: OnceCell<Result<T>>,
    started: AtomicBool,
}

impl<T: Clone> LazyCell<T> {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::const_new(),
            started: AtomicBool::new(false),
        }
    }

    /// Returns the cached result, running `init` if no caller has yet.
    pub async fn get_or_init<F, Fut>(&self, init: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(result) = self.cell.get() {
            return result.clone();
        }

        self.cell
            .get_or_init(|| async {
                self.started.store(true, Ordering::Release);
                init().await
            })
            .await
            .clone()
    }

    /// Non-blocking peek at the cached result.
    pub fn get(&self) -> Option<Result<T>> {
        self.cell.get().cloned()
    }

    pub fn state(&self) -> CellState {
        if self.cell.initialized() {
            CellState::Done
        } else if self.started.load(Ordering::Acquire) {
            CellState::InProgress
        } else {
            CellState::Unstarted
        }
    }
}

impl<T: Clone> Default for LazyCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for LazyCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyCell")
            .field("initialized", &self.cell.initialized())
            .finish()
    }
}
