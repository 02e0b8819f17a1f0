//! # Queue Module
//!
//! The work queue is where discovered resources are persisted until scraped.
//!
//! The admission controller only ever calls `resources_to_scrape`; the other
//! operations are driven by the crawler around each fetch. `MemoryQueue` is an
//! in-process implementation suitable for single-run crawls and tests; durable
//! storage engines implement the same trait.

mod memory;

pub use memory::MemoryQueue;

use crate::error::ScrapeError;
use crate::proxy::Proxy;
use crate::resource::{Resource, ResourceStatus};
use async_trait::async_trait;

/// Storage of to-be-scraped resources.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Returns a small batch of not yet scraped resources and marks them in
    /// progress. An empty batch means nothing is ready right now.
    ///
    /// `proxy` is advisory: it is the proxy picked for this attempt, and it is
    /// `None` when a session limit is configured (the proxy is then chosen per
    /// host after the lookup) even if the pool holds real proxies.
    async fn resources_to_scrape(&self, proxy: Option<&Proxy>) -> Result<Vec<Resource>, ScrapeError>;

    /// Records the outcome of processing `resource`.
    async fn update_status(&self, resource: &Resource, status: ResourceStatus) -> Result<(), ScrapeError>;

    /// Adds resources, skipping already known ones. Returns how many were new.
    async fn add(&self, resources: Vec<Resource>) -> Result<usize, ScrapeError>;

    /// Number of entries still pending or in progress.
    async fn pending(&self) -> Result<usize, ScrapeError>;
}
