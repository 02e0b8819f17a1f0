//! A "prelude" for users of the `scrape-core` crate.
//!
//! This prelude re-exports the most commonly used traits, structs, and macros
//! so that they can be easily imported.
//!
//! # Example
//!
//! ```
//! use scrape_core::prelude::*;
//! ```

pub use crate::{
    // Core structs
    AdmissionController,
    ConcurrencyConfig,
    ConcurrencyOptions,
    Crawler,
    CrawlerBuilder,
    LevelLimit,
    MemoryQueue,
    Proxy,
    Resource,
    ResourceStatus,
    // Core traits
    Fetcher,
    WorkQueue,
    FetchOutput,
    // Errors
    ConcurrencyError,
    Level,
    ScrapeError,
    // Essential re-exports for trait implementation
    async_trait,
};
