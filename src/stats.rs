//! # Statistics Module
//!
//! Collects counters about a crawl run.
//!
//! ## Overview
//!
//! The `StatCollector` tracks what happened to resources (enqueued, dispatched,
//! scraped, failed), how often dispatch attempts were turned away and at which
//! level, and how long fetches took. Counters are atomics so worker tasks can
//! update them without coordination.
//!
//! ## Example
//!
//! ```rust,ignore
//! let crawler = CrawlerBuilder::new("sitea.com", queue, fetcher).build()?;
//! let stats = crawler.get_stats();
//! crawler.start_crawl().await?;
//!
//! println!("{}", stats);
//! println!("{}", stats.to_json_string_pretty()?);
//! println!("{}", stats.to_markdown_string());
//! ```

use crate::error::{Level, ScrapeError};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

// A snapshot of the current statistics, used for reporting.
struct StatsSnapshot {
    resources_enqueued: usize,
    resources_dispatched: usize,
    resources_scraped: usize,
    resources_failed: usize,
    links_discovered: usize,
    empty_polls: usize,
    blocked: HashMap<Level, usize>,
    total_fetch_time: Duration,
    elapsed_duration: Duration,
}

impl StatsSnapshot {
    fn formatted_duration(&self) -> String {
        format!("{:?}", self.elapsed_duration)
    }

    fn resources_per_second(&self) -> f64 {
        let total_seconds = self.elapsed_duration.as_secs();
        if total_seconds > 0 {
            self.resources_scraped as f64 / total_seconds as f64
        } else {
            0.0
        }
    }

    fn average_fetch_time(&self) -> Duration {
        let fetched = self.resources_scraped + self.resources_failed;
        if fetched > 0 {
            self.total_fetch_time / fetched as u32
        } else {
            Duration::ZERO
        }
    }

    fn blocked_at(&self, level: Level) -> usize {
        self.blocked.get(&level).copied().unwrap_or(0)
    }
}

/// Collects and stores various statistics about a crawl run.
#[derive(Debug, serde::Serialize)]
pub struct StatCollector {
    #[serde(skip)]
    pub start_time: Instant,

    // Resource-related metrics
    pub resources_enqueued: AtomicUsize,
    pub resources_dispatched: AtomicUsize,
    pub resources_scraped: AtomicUsize,
    pub resources_failed: AtomicUsize,
    pub links_discovered: AtomicUsize,

    // Admission-related metrics
    pub empty_polls: AtomicUsize,
    pub blocked: Arc<dashmap::DashMap<Level, usize>>,

    // Timing metrics
    pub fetch_times: Arc<dashmap::DashMap<String, Duration>>,
}

impl StatCollector {
    /// Creates a new `StatCollector` with all counters initialized to zero.
    pub fn new() -> Self {
        StatCollector {
            start_time: Instant::now(),
            resources_enqueued: AtomicUsize::new(0),
            resources_dispatched: AtomicUsize::new(0),
            resources_scraped: AtomicUsize::new(0),
            resources_failed: AtomicUsize::new(0),
            links_discovered: AtomicUsize::new(0),
            empty_polls: AtomicUsize::new(0),
            blocked: Arc::new(dashmap::DashMap::new()),
            fetch_times: Arc::new(dashmap::DashMap::new()),
        }
    }

    fn snapshot(&self) -> StatsSnapshot {
        let mut blocked = HashMap::new();
        for entry in self.blocked.iter() {
            let (key, value) = entry.pair();
            blocked.insert(*key, *value);
        }

        StatsSnapshot {
            resources_enqueued: self.resources_enqueued.load(Ordering::SeqCst),
            resources_dispatched: self.resources_dispatched.load(Ordering::SeqCst),
            resources_scraped: self.resources_scraped.load(Ordering::SeqCst),
            resources_failed: self.resources_failed.load(Ordering::SeqCst),
            links_discovered: self.links_discovered.load(Ordering::SeqCst),
            empty_polls: self.empty_polls.load(Ordering::SeqCst),
            blocked,
            total_fetch_time: self.fetch_times.iter().map(|e| *e.value()).sum(),
            elapsed_duration: self.start_time.elapsed(),
        }
    }

    pub(crate) fn add_resources_enqueued(&self, count: usize) {
        self.resources_enqueued.fetch_add(count, Ordering::SeqCst);
    }

    pub(crate) fn increment_resources_dispatched(&self) {
        self.resources_dispatched.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_resources_scraped(&self) {
        self.resources_scraped.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_resources_failed(&self) {
        self.resources_failed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn add_links_discovered(&self, count: usize) {
        self.links_discovered.fetch_add(count, Ordering::SeqCst);
    }

    pub(crate) fn increment_empty_polls(&self) {
        self.empty_polls.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_blocked(&self, level: Level) {
        *self.blocked.entry(level).or_insert(0) += 1;
    }

    pub(crate) fn record_fetch_time(&self, url: &str, duration: Duration) {
        self.fetch_times.insert(url.to_string(), duration);
    }

    /// How many dispatch attempts were turned away at `level`.
    pub fn blocked_at(&self, level: Level) -> usize {
        self.blocked.get(&level).map(|v| *v.value()).unwrap_or(0)
    }

    pub fn to_json_string(&self) -> Result<String, ScrapeError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_string_pretty(&self) -> Result<String, ScrapeError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Exports the current statistics to a Markdown formatted string.
    pub fn to_markdown_string(&self) -> String {
        let snapshot = self.snapshot();

        format!(
            r#"# Crawl Statistics Report

- **Duration**: {}
- **Average Speed**: {:.2} resources/s
- **Average Fetch Time**: {:?}

## Resources
| Metric     | Count |
|------------|-------|
| Enqueued   | {}     |
| Dispatched | {}     |
| Scraped    | {}     |
| Failed     | {}     |
| Links      | {}     |

## Admission
| Level      | Blocked |
|------------|---------|
| Project    | {}       |
| Proxy      | {}       |
| Domain     | {}       |
| Session    | {}       |
| Empty poll | {}       |
"#,
            snapshot.formatted_duration(),
            snapshot.resources_per_second(),
            snapshot.average_fetch_time(),
            snapshot.resources_enqueued,
            snapshot.resources_dispatched,
            snapshot.resources_scraped,
            snapshot.resources_failed,
            snapshot.links_discovered,
            snapshot.blocked_at(Level::Project),
            snapshot.blocked_at(Level::Proxy),
            snapshot.blocked_at(Level::Domain),
            snapshot.blocked_at(Level::Session),
            snapshot.empty_polls,
        )
    }
}

impl Default for StatCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StatCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();

        writeln!(f, "\nCrawl Statistics")?;
        writeln!(f, "----------------")?;
        writeln!(f, "  duration  : {}", snapshot.formatted_duration())?;
        writeln!(
            f,
            "  speed     : resources/s: {:.2}, avg fetch: {:?}",
            snapshot.resources_per_second(),
            snapshot.average_fetch_time()
        )?;
        writeln!(
            f,
            "  resources : enqueued: {}, dispatched: {}, ok: {}, fail: {}, links: {}",
            snapshot.resources_enqueued,
            snapshot.resources_dispatched,
            snapshot.resources_scraped,
            snapshot.resources_failed,
            snapshot.links_discovered
        )?;
        writeln!(
            f,
            "  blocked   : project: {}, proxy: {}, domain: {}, session: {}, empty: {}\n",
            snapshot.blocked_at(Level::Project),
            snapshot.blocked_at(Level::Proxy),
            snapshot.blocked_at(Level::Domain),
            snapshot.blocked_at(Level::Session),
            snapshot.empty_polls
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_and_exports() {
        let stats = StatCollector::new();
        stats.add_resources_enqueued(3);
        stats.increment_resources_dispatched();
        stats.increment_resources_scraped();
        stats.record_blocked(Level::Domain);
        stats.record_blocked(Level::Domain);
        stats.record_fetch_time("http://sitea.com/", Duration::from_millis(20));

        assert_eq!(stats.blocked_at(Level::Domain), 2);
        assert_eq!(stats.blocked_at(Level::Project), 0);

        let json: serde_json::Value = serde_json::from_str(&stats.to_json_string().unwrap()).unwrap();
        assert_eq!(json["resources_enqueued"], 3);
        assert_eq!(json["blocked"]["domain"], 2);

        let markdown = stats.to_markdown_string();
        assert!(markdown.contains("| Scraped    | 1     |"));
        assert!(stats.to_string().contains("domain: 2"));
    }
}
