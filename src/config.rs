//! # Configuration Module
//!
//! Concurrency and rate limit settings for a scraping job.
//!
//! ## Overview
//!
//! Limits are configured independently for four levels: the whole project, each
//! outbound proxy, each target domain and each proxy + domain session. Every
//! level takes a maximum number of in-flight requests and a minimum delay
//! between two consecutive request starts.
//!
//! `ConcurrencyConfig` is the raw, partially specified form (what a user writes
//! in a JSON config file). `ConcurrencyConfig::resolve` merges it onto the
//! defaults and validates it, producing the `ConcurrencyOptions` consumed by the
//! admission controller.
//!
//! ## Defaults
//!
//! - `project`: absent (no project-wide limit)
//! - `proxy`: 1 request, 500 ms delay
//! - `domain`: 1 request, 1000 ms delay
//! - `session`: absent (no per proxy + domain limit)
//! - `proxyPool`: `[null]`, direct connections only
//!
//! ## Example
//!
//! ```rust,ignore
//! use scrape_core::config::ConcurrencyConfig;
//!
//! let options = ConcurrencyConfig::from_json_str(
//!     r#"{ "project": { "maxRequests": 10, "delayMs": 100 },
//!          "proxyPool": [ { "host": "10.0.0.1", "port": 8080 } ] }"#,
//! )?
//! .resolve()?;
//! ```

use crate::error::{Level, ScrapeError};
use crate::proxy::Proxy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

const DEFAULT_MAX_REQUESTS: u32 = 1;
const DEFAULT_PROXY_DELAY_MS: u64 = 500;
const DEFAULT_DOMAIN_DELAY_MS: u64 = 1000;

/// A resolved limit for one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelLimit {
    /// Maximum number of in-flight requests.
    pub max_requests: u32,
    /// Minimum time between two request starts.
    pub delay: Duration,
}

impl LevelLimit {
    pub fn new(max_requests: u32, delay_ms: u64) -> Self {
        Self {
            max_requests,
            delay: Duration::from_millis(delay_ms),
        }
    }

    pub fn delay_ms(&self) -> u64 {
        self.delay.as_millis() as u64
    }
}

/// A partially specified level limit, as found in configuration files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LevelConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_requests: Option<u32>,
    #[serde(default, alias = "delay", skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

impl LevelConfig {
    fn merge(self, level: Level, defaults: Option<LevelLimit>) -> Result<LevelLimit, ScrapeError> {
        let max_requests = self
            .max_requests
            .or(defaults.map(|d| d.max_requests))
            .unwrap_or(DEFAULT_MAX_REQUESTS);
        if max_requests == 0 {
            return Err(ScrapeError::ConfigurationError(format!(
                "{} maxRequests must be greater than 0.",
                level
            )));
        }
        let delay_ms = self
            .delay_ms
            .or(defaults.map(|d| d.delay_ms()))
            .unwrap_or(0);
        Ok(LevelLimit::new(max_requests, delay_ms))
    }
}

/// Raw concurrency configuration. Absent fields fall back to the defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConcurrencyConfig {
    #[serde(default)]
    pub project: Option<LevelConfig>,
    #[serde(default)]
    pub proxy: Option<LevelConfig>,
    #[serde(default)]
    pub domain: Option<LevelConfig>,
    #[serde(default)]
    pub session: Option<LevelConfig>,
    /// `null` entries stand for "no proxy".
    #[serde(default)]
    pub proxy_pool: Option<Vec<Option<Proxy>>>,
}

impl ConcurrencyConfig {
    /// Parses a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ScrapeError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON config file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ScrapeError> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Merges the configuration onto the defaults and validates it.
    pub fn resolve(self) -> Result<ConcurrencyOptions, ScrapeError> {
        let defaults = ConcurrencyOptions::default();

        let project = self
            .project
            .map(|c| c.merge(Level::Project, None))
            .transpose()?;
        let proxy = self
            .proxy
            .unwrap_or_default()
            .merge(Level::Proxy, Some(defaults.proxy))?;
        let domain = self
            .domain
            .unwrap_or_default()
            .merge(Level::Domain, Some(defaults.domain))?;
        let session = self
            .session
            .map(|c| c.merge(Level::Session, None))
            .transpose()?;

        let proxy_pool = match self.proxy_pool {
            Some(pool) if pool.is_empty() => {
                warn!("Empty proxy pool configured, falling back to direct connections.");
                defaults.proxy_pool
            }
            Some(pool) => pool,
            None => defaults.proxy_pool,
        };

        Ok(ConcurrencyOptions {
            project,
            proxy,
            domain,
            session,
            proxy_pool,
        })
    }
}

/// Resolved concurrency options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcurrencyOptions {
    pub project: Option<LevelLimit>,
    pub proxy: LevelLimit,
    pub domain: LevelLimit,
    pub session: Option<LevelLimit>,
    pub proxy_pool: Vec<Option<Proxy>>,
}

impl Default for ConcurrencyOptions {
    fn default() -> Self {
        Self {
            project: None,
            proxy: LevelLimit::new(DEFAULT_MAX_REQUESTS, DEFAULT_PROXY_DELAY_MS),
            domain: LevelLimit::new(DEFAULT_MAX_REQUESTS, DEFAULT_DOMAIN_DELAY_MS),
            session: None,
            proxy_pool: vec![None],
        }
    }
}

impl ConcurrencyOptions {
    pub fn with_project(mut self, limit: LevelLimit) -> Self {
        self.project = Some(limit);
        self
    }

    pub fn with_proxy(mut self, limit: LevelLimit) -> Self {
        self.proxy = limit;
        self
    }

    pub fn with_domain(mut self, limit: LevelLimit) -> Self {
        self.domain = limit;
        self
    }

    pub fn with_session(mut self, limit: LevelLimit) -> Self {
        self.session = Some(limit);
        self
    }

    /// Replaces the proxy pool. An empty pool means direct connections only.
    pub fn with_proxy_pool(mut self, pool: Vec<Option<Proxy>>) -> Self {
        self.proxy_pool = if pool.is_empty() { vec![None] } else { pool };
        self
    }

    /// The limit enforced at `level`, `None` when the level is disabled.
    pub fn limit(&self, level: Level) -> Option<&LevelLimit> {
        match level {
            Level::Project => self.project.as_ref(),
            Level::Proxy => Some(&self.proxy),
            Level::Domain => Some(&self.domain),
            Level::Session => self.session.as_ref(),
        }
    }

    /// Smallest delay among the enabled levels.
    ///
    /// Advisory pacing for callers retrying after a `ConcurrencyError`; admission
    /// itself is always re-evaluated against the live status.
    pub fn check_interval(&self) -> Duration {
        Level::ALL
            .iter()
            .filter_map(|level| self.limit(*level))
            .map(|limit| limit.delay)
            .min()
            .unwrap_or(self.proxy.delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let options = ConcurrencyConfig::default().resolve().unwrap();
        assert_eq!(options, ConcurrencyOptions::default());
        assert_eq!(options.project, None);
        assert_eq!(options.proxy, LevelLimit::new(1, 500));
        assert_eq!(options.domain, LevelLimit::new(1, 1000));
        assert_eq!(options.session, None);
        assert_eq!(options.proxy_pool, vec![None]);
    }

    #[test]
    fn partial_levels_merge_onto_defaults() {
        let options = ConcurrencyConfig::from_json_str(
            r#"{
                "project": { "delay": 300 },
                "proxy": { "maxRequests": 5 },
                "domain": { "delayMs": 7000 },
                "session": { "maxRequests": 11 }
            }"#,
        )
        .unwrap()
        .resolve()
        .unwrap();

        assert_eq!(options.project, Some(LevelLimit::new(1, 300)));
        assert_eq!(options.proxy, LevelLimit::new(5, 500));
        assert_eq!(options.domain, LevelLimit::new(1, 7000));
        assert_eq!(options.session, Some(LevelLimit::new(11, 0)));
        assert_eq!(options.proxy_pool, vec![None]);
    }

    #[test]
    fn proxy_pool_accepts_null_entries() {
        let options = ConcurrencyConfig::from_json_str(
            r#"{ "proxyPool": [ { "host": "proxyA", "port": 80 }, null ] }"#,
        )
        .unwrap()
        .resolve()
        .unwrap();

        assert_eq!(
            options.proxy_pool,
            vec![Some(Proxy::new("proxyA", 80)), None]
        );
    }

    #[test]
    fn empty_proxy_pool_falls_back_to_direct() {
        let options = ConcurrencyConfig::from_json_str(r#"{ "proxyPool": [] }"#)
            .unwrap()
            .resolve()
            .unwrap();
        assert_eq!(options.proxy_pool, vec![None]);
    }

    #[test]
    fn zero_max_requests_is_rejected() {
        let err = ConcurrencyConfig::from_json_str(r#"{ "domain": { "maxRequests": 0 } }"#)
            .unwrap()
            .resolve()
            .unwrap_err();
        assert!(matches!(err, ScrapeError::ConfigurationError(_)));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(ConcurrencyConfig::from_json_str(r#"{ "domian": {} }"#).is_err());
    }

    #[test]
    fn check_interval_uses_smallest_enabled_delay() {
        let options = ConcurrencyOptions::default().with_project(LevelLimit::new(1, 100));
        assert_eq!(options.check_interval(), Duration::from_millis(100));

        let options = ConcurrencyOptions::default()
            .with_project(LevelLimit::new(1, 300))
            .with_session(LevelLimit::new(1, 500));
        assert_eq!(options.check_interval(), Duration::from_millis(300));

        assert_eq!(
            ConcurrencyOptions::default().check_interval(),
            Duration::from_millis(500)
        );
    }
}
