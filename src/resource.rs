//! The unit of work handed out by the work queue.

use crate::proxy::Proxy;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// A resource to scrape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Id of the backing queue entry, assigned by the queue.
    pub queue_entry_id: Option<u64>,
    pub url: Url,
    /// Link distance from the seed resources.
    pub depth: u32,
    /// Proxy assigned on admission. `None` means a direct connection.
    pub proxy: Option<Proxy>,
}

impl Resource {
    pub fn new(url: Url) -> Self {
        Self {
            queue_entry_id: None,
            url,
            depth: 0,
            proxy: None,
        }
    }

    pub fn parse(url: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new(Url::parse(url)?))
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    /// The target host, lower-cased. Empty for host-less URLs.
    pub fn host(&self) -> String {
        self.url
            .host_str()
            .map(|host| host.to_ascii_lowercase())
            .unwrap_or_default()
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

/// Scrape status of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Pending,
    InProgress,
    Complete,
    Failed,
}

impl ResourceStatus {
    /// Pending and in-progress entries may still produce work.
    pub fn is_open(&self) -> bool {
        matches!(self, ResourceStatus::Pending | ResourceStatus::InProgress)
    }
}
