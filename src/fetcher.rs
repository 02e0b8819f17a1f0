//! # Fetcher Module
//!
//! Defines the `Fetcher` trait, the seam between the crawl engine and whatever
//! actually retrieves and processes a resource.
//!
//! ## Overview
//!
//! The crawler hands every admitted resource to a `Fetcher`. The resource
//! carries the proxy chosen by the admission controller; the fetcher is
//! expected to route its request through it. Whatever the fetcher discovers
//! (links to follow) is returned in a `FetchOutput` and added to the work queue
//! one level deeper than the resource it came from.
//!
//! ## Example
//!
//! ```rust,ignore
//! use scrape_core::{Fetcher, FetchOutput, Resource, ScrapeError, async_trait};
//!
//! struct LinkFetcher { client: reqwest::Client }
//!
//! #[async_trait]
//! impl Fetcher for LinkFetcher {
//!     async fn fetch(&self, resource: &Resource) -> Result<FetchOutput, ScrapeError> {
//!         let body = self.client.get(resource.url.clone()).send().await
//!             .map_err(|e| ScrapeError::FetchError(e.to_string()))?
//!             .text().await
//!             .map_err(|e| ScrapeError::FetchError(e.to_string()))?;
//!         Ok(FetchOutput::new().with_links(extract_links(&resource.url, &body)))
//!     }
//! }
//! ```

use crate::error::ScrapeError;
use crate::resource::Resource;
use async_trait::async_trait;
use url::Url;

/// Result of processing one resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOutput {
    /// URLs discovered while processing the resource.
    pub links: Vec<Url>,
}

impl FetchOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_links(mut self, links: Vec<Url>) -> Self {
        self.links = links;
        self
    }

    pub fn add_link(&mut self, link: Url) {
        self.links.push(link);
    }
}

/// Retrieves and processes admitted resources.
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    /// Processes `resource`. An error marks the resource as failed; it never
    /// stops the crawl.
    async fn fetch(&self, resource: &Resource) -> Result<FetchOutput, ScrapeError>;
}
