//! # Builder Module
//!
//! Provides the `CrawlerBuilder`, a fluent API for constructing and configuring
//! `Crawler` instances.
//!
//! ## Overview
//!
//! The builder assembles a work queue, a fetcher and the admission limits into
//! a crawler. Limits can be given either as already resolved
//! `ConcurrencyOptions` or as a partial `ConcurrencyConfig` (for example read
//! from a JSON file) that is merged over the defaults when building.
//!
//! ## Example
//!
//! ```rust,ignore
//! use scrape_core::prelude::*;
//!
//! async fn run(fetcher: MyFetcher) -> Result<(), ScrapeError> {
//!     let crawler = CrawlerBuilder::new("sitea.com", Arc::new(MemoryQueue::new()), Arc::new(fetcher))
//!         .concurrency_config(ConcurrencyConfig::from_path("./concurrency.json")?)
//!         .workers(8)
//!         .max_depth(3)
//!         .seed(Resource::parse("https://sitea.com/")?)
//!         .build()?;
//!
//!     crawler.start_crawl().await
//! }
//! ```

use crate::admission::AdmissionController;
use crate::config::{ConcurrencyConfig, ConcurrencyOptions};
use crate::error::ScrapeError;
use crate::fetcher::Fetcher;
use crate::queue::WorkQueue;
use crate::resource::Resource;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::Crawler;

/// Configuration for the crawler's worker pool.
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// The number of concurrent worker tasks.
    pub workers: usize,
    /// Links discovered deeper than this are not queued.
    pub max_depth: Option<u32>,
    /// First backoff when no resource is ready.
    pub empty_backoff_min: Duration,
    /// Upper bound for the exponential empty-queue backoff.
    pub empty_backoff_max: Duration,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        CrawlerConfig {
            workers: num_cpus::get().max(4),
            max_depth: None,
            empty_backoff_min: Duration::from_millis(50),
            empty_backoff_max: Duration::from_secs(2),
        }
    }
}

enum Limits {
    Resolved(ConcurrencyOptions),
    Partial(ConcurrencyConfig),
}

pub struct CrawlerBuilder<Q: WorkQueue + ?Sized, F: Fetcher> {
    project: String,
    crawler_config: CrawlerConfig,
    limits: Limits,
    queue: Arc<Q>,
    fetcher: Arc<F>,
    seeds: Vec<Resource>,
}

impl<Q, F> CrawlerBuilder<Q, F>
where
    Q: WorkQueue + ?Sized + 'static,
    F: Fetcher,
{
    /// Creates a new `CrawlerBuilder` for `project` with default limits.
    pub fn new(project: impl Into<String>, queue: Arc<Q>, fetcher: Arc<F>) -> Self {
        Self {
            project: project.into(),
            crawler_config: CrawlerConfig::default(),
            limits: Limits::Resolved(ConcurrencyOptions::default()),
            queue,
            fetcher,
            seeds: Vec::new(),
        }
    }

    /// Sets fully resolved admission limits.
    pub fn concurrency(mut self, options: ConcurrencyOptions) -> Self {
        self.limits = Limits::Resolved(options);
        self
    }

    /// Sets partial admission limits, merged over the defaults on `build`.
    pub fn concurrency_config(mut self, config: ConcurrencyConfig) -> Self {
        self.limits = Limits::Partial(config);
        self
    }

    /// Sets the number of concurrent worker tasks.
    pub fn workers(mut self, workers: usize) -> Self {
        self.crawler_config.workers = workers;
        self
    }

    /// Stops queueing links found deeper than `depth`. Seeds are depth 0.
    pub fn max_depth(mut self, depth: u32) -> Self {
        self.crawler_config.max_depth = Some(depth);
        self
    }

    /// Sets the bounds of the backoff used while no resource is ready.
    pub fn empty_queue_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.crawler_config.empty_backoff_min = min;
        self.crawler_config.empty_backoff_max = max;
        self
    }

    /// Adds a resource to queue before the workers start.
    pub fn seed(mut self, resource: Resource) -> Self {
        self.seeds.push(resource);
        self
    }

    pub fn seeds(mut self, resources: impl IntoIterator<Item = Resource>) -> Self {
        self.seeds.extend(resources);
        self
    }

    /// Builds the `Crawler` instance.
    pub fn build(self) -> Result<Crawler<Q, F>, ScrapeError> {
        self.validate()?;

        let options = match self.limits {
            Limits::Resolved(options) => options,
            Limits::Partial(config) => config.resolve()?,
        };
        debug!("Admission limits for {}: {:?}", self.project, options);

        Ok(Crawler::new(
            self.project,
            Arc::new(AdmissionController::new(options)),
            self.queue,
            self.fetcher,
            self.seeds,
            self.crawler_config.workers,
            self.crawler_config.max_depth,
            self.crawler_config.empty_backoff_min,
            self.crawler_config.empty_backoff_max,
        ))
    }

    fn validate(&self) -> Result<(), ScrapeError> {
        if self.project.is_empty() {
            return Err(ScrapeError::ConfigurationError(
                "project name must not be empty.".to_string(),
            ));
        }
        if self.crawler_config.workers == 0 {
            return Err(ScrapeError::ConfigurationError(
                "workers must be greater than 0.".to_string(),
            ));
        }
        if self.crawler_config.empty_backoff_min.is_zero()
            || self.crawler_config.empty_backoff_min > self.crawler_config.empty_backoff_max
        {
            return Err(ScrapeError::ConfigurationError(
                "empty queue backoff must satisfy 0 < min <= max.".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Level;
    use crate::fetcher::FetchOutput;
    use crate::queue::MemoryQueue;
    use async_trait::async_trait;

    struct NoopFetcher;

    #[async_trait]
    impl Fetcher for NoopFetcher {
        async fn fetch(&self, _resource: &Resource) -> Result<FetchOutput, ScrapeError> {
            Ok(FetchOutput::new())
        }
    }

    fn builder() -> CrawlerBuilder<MemoryQueue, NoopFetcher> {
        CrawlerBuilder::new("sitea.com", Arc::new(MemoryQueue::new()), Arc::new(NoopFetcher))
    }

    #[test]
    fn zero_workers_is_rejected() {
        let err = builder().workers(0).build().err().unwrap();
        assert!(matches!(err, ScrapeError::ConfigurationError(_)));
    }

    #[test]
    fn inverted_backoff_is_rejected() {
        let err = builder()
            .empty_queue_backoff(Duration::from_secs(1), Duration::from_millis(10))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ScrapeError::ConfigurationError(_)));
    }

    #[test]
    fn partial_config_is_merged_over_defaults() {
        let config = ConcurrencyConfig::from_json_str(r#"{"domain": {"maxRequests": 3}}"#).unwrap();
        let crawler = builder().concurrency_config(config).build().unwrap();

        let controller = crawler.controller();
        let domain = controller.options().limit(Level::Domain).unwrap();
        assert_eq!(domain.max_requests, 3);
        assert_eq!(domain.delay_ms(), 1000);
        assert_eq!(controller.options().proxy.max_requests, 1);
    }

    #[test]
    fn invalid_partial_config_fails_the_build() {
        let config = ConcurrencyConfig::from_json_str(r#"{"proxy": {"maxRequests": 0}}"#).unwrap();
        let err = builder().concurrency_config(config).build().err().unwrap();
        assert!(matches!(err, ScrapeError::ConfigurationError(_)));
    }
}
