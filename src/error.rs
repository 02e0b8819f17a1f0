//! Error types shared across the crate.
//!
//! `ScrapeError` is the single error enum returned by every fallible operation.
//! Its `ConcurrencyError` variant is not a failure: it tells the caller that a
//! resource cannot be admitted *yet* and that the dispatch should be retried
//! after `AdmissionController::check_interval`.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A scope at which concurrency and rate limits are enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// The whole scraping job.
    Project,
    /// A single outbound proxy (or the direct connection).
    Proxy,
    /// A single target host.
    Domain,
    /// A proxy + target host pairing.
    Session,
}

impl Level {
    /// All levels, in gate evaluation order.
    pub const ALL: [Level; 4] = [Level::Project, Level::Proxy, Level::Domain, Level::Session];

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Project => "project",
            Level::Proxy => "proxy",
            Level::Domain => "domain",
            Level::Session => "session",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signals which limit blocked admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("concurrency conditions not met at {level} level")]
pub struct ConcurrencyError {
    pub level: Level,
}

impl ConcurrencyError {
    pub fn new(level: Level) -> Self {
        Self { level }
    }
}

/// The main error type of the crate.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error(transparent)]
    ConcurrencyError(#[from] ConcurrencyError),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Queue error: {0}")]
    QueueError(String),

    #[error("Fetch error: {0}")]
    FetchError(String),

    #[error("General error: {0}")]
    GeneralError(String),

    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ScrapeError {
    /// Returns the blocking level when this is a soft admission block.
    pub fn concurrency_level(&self) -> Option<Level> {
        match self {
            ScrapeError::ConcurrencyError(e) => Some(e.level),
            _ => None,
        }
    }

    #[inline]
    pub fn is_concurrency(&self) -> bool {
        self.concurrency_level().is_some()
    }
}
