//! # scrape-core
//!
//! Core engine of a crawler that respects per-project, per-proxy, per-domain
//! and per-session concurrency and rate limits.
//!
//! Provides the main components: the `AdmissionController`, which decides
//! whether a resource may be scraped right now and through which proxy, the
//! `WorkQueue` it pulls resources from, and a `Crawler` that runs a worker pool
//! on top of both.
//!
//! ## Example
//!
//! ```rust,ignore
//! use scrape_core::prelude::*;
//! use std::sync::Arc;
//!
//! struct MyFetcher;
//!
//! #[async_trait]
//! impl Fetcher for MyFetcher {
//!     async fn fetch(&self, resource: &Resource) -> Result<FetchOutput, ScrapeError> {
//!         todo!()
//!     }
//! }
//!
//! async fn run_crawler() -> Result<(), ScrapeError> {
//!     let crawler = CrawlerBuilder::new("sitea.com", Arc::new(MemoryQueue::new()), Arc::new(MyFetcher))
//!         .seed(Resource::parse("https://sitea.com/")?)
//!         .build()?;
//!     crawler.start_crawl().await
//! }
//! ```

pub mod admission;
pub mod buffer;
pub mod builder;
pub mod config;
pub mod crawler;
pub mod error;
pub mod fetcher;
pub mod prelude;
pub mod proxy;
pub mod queue;
pub mod resource;
pub mod state;
pub mod stats;
pub mod status;

pub use admission::AdmissionController;
pub use buffer::ResourceBuffer;
pub use builder::{CrawlerBuilder, CrawlerConfig};
pub use config::{ConcurrencyConfig, ConcurrencyOptions, LevelConfig, LevelLimit};
pub use crawler::Crawler;
pub use error::{ConcurrencyError, Level, ScrapeError};
pub use fetcher::{FetchOutput, Fetcher};
pub use proxy::{Proxy, ProxyLookup, ProxySelector};
pub use queue::{MemoryQueue, WorkQueue};
pub use resource::{Resource, ResourceStatus};
pub use stats::StatCollector;
pub use status::{LevelStatus, StatusTable};

pub use async_trait::async_trait;
pub use dashmap::DashMap;
pub use tokio;
