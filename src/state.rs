//! Module for tracking the operational state of the crawler workers.
//!
//! `CrawlerState` uses atomics to keep track of:
//! - The number of worker tasks currently running their dispatch loop.
//! - The number of resources currently being fetched.
//! - Whether a shutdown has been requested, either because the crawl is
//!   complete or because of an external signal.
//!
//! Request capacity itself is accounted for by the admission controller; this
//! state only reflects what the workers are doing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Represents the shared state of the crawler's worker tasks.
#[derive(Debug, Default)]
pub struct CrawlerState {
    /// The number of workers in their dispatch loop.
    pub active_workers: AtomicUsize,
    /// The number of resources currently handed to the fetcher.
    pub fetching: AtomicUsize,
    shutting_down: AtomicBool,
}

impl CrawlerState {
    /// Creates a new, atomically reference-counted `CrawlerState`.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Asks every worker to stop after its current iteration.
    pub fn request_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Checks if no worker is fetching anything.
    pub fn is_idle(&self) -> bool {
        self.fetching.load(Ordering::SeqCst) == 0
    }
}
