//! In-memory work queue.
//!
//! Pending resources sit in a lock-free FIFO while a concurrent map tracks the
//! status of every URL ever added, which doubles as the de-duplication set.
//! URLs are keyed without their fragment.

use super::WorkQueue;
use crate::error::ScrapeError;
use crate::proxy::Proxy;
use crate::resource::{Resource, ResourceStatus};
use async_trait::async_trait;
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace, warn};

const DEFAULT_BATCH_SIZE: usize = 10;

#[derive(Debug, Clone, Copy)]
struct QueueEntry {
    id: u64,
    status: ResourceStatus,
    retries: u32,
}

pub struct MemoryQueue {
    pending_queue: SegQueue<Resource>,
    entries: DashMap<String, QueueEntry>,
    next_id: AtomicU64,
    batch_size: usize,
    max_retries: u32,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self {
            pending_queue: SegQueue::new(),
            entries: DashMap::new(),
            next_id: AtomicU64::new(1),
            batch_size: DEFAULT_BATCH_SIZE,
            max_retries: 0,
        }
    }

    /// Maximum number of resources handed out per lookup.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// How many times a failed resource is put back to pending.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn key(resource: &Resource) -> String {
        let mut url = resource.url.clone();
        url.set_fragment(None);
        url.into()
    }

    /// Status of the entry for `resource`, if the queue knows it.
    pub fn status_of(&self, resource: &Resource) -> Option<ResourceStatus> {
        self.entries.get(&Self::key(resource)).map(|e| e.status)
    }

    pub fn entry_id(&self, resource: &Resource) -> Option<u64> {
        self.entries.get(&Self::key(resource)).map(|e| e.id)
    }

    /// Number of entries with the given status.
    pub fn count(&self, status: ResourceStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    /// Number of known entries, whatever their status.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn resources_to_scrape(&self, proxy: Option<&Proxy>) -> Result<Vec<Resource>, ScrapeError> {
        let mut batch = Vec::new();
        while batch.len() < self.batch_size {
            let Some(mut resource) = self.pending_queue.pop() else {
                break;
            };
            if let Some(mut entry) = self.entries.get_mut(&Self::key(&resource)) {
                entry.status = ResourceStatus::InProgress;
            }
            resource.proxy = proxy.cloned();
            batch.push(resource);
        }
        trace!("Handing out {} resources", batch.len());
        Ok(batch)
    }

    async fn update_status(&self, resource: &Resource, status: ResourceStatus) -> Result<(), ScrapeError> {
        let key = Self::key(resource);
        let Some(mut entry) = self.entries.get_mut(&key) else {
            return Err(ScrapeError::QueueError(format!(
                "Unknown resource {}",
                resource.url
            )));
        };

        if status == ResourceStatus::Failed && entry.retries < self.max_retries {
            entry.retries += 1;
            entry.status = ResourceStatus::Pending;
            debug!(
                "Re-queueing failed resource {} (retry {} of {})",
                key, entry.retries, self.max_retries
            );
            let mut retry = resource.clone();
            retry.proxy = None;
            self.pending_queue.push(retry);
            return Ok(());
        }

        if status == ResourceStatus::Failed {
            warn!("Resource {} failed after {} retries", key, entry.retries);
        }
        entry.status = status;
        Ok(())
    }

    async fn add(&self, resources: Vec<Resource>) -> Result<usize, ScrapeError> {
        let mut added = 0;
        for mut resource in resources {
            resource.url.set_fragment(None);
            match self.entries.entry(Self::key(&resource)) {
                Entry::Occupied(_) => {
                    trace!("Resource already queued, skipping: {}", resource.url);
                }
                Entry::Vacant(vacant) => {
                    let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                    vacant.insert(QueueEntry {
                        id,
                        status: ResourceStatus::Pending,
                        retries: 0,
                    });
                    resource.queue_entry_id = Some(id);
                    resource.proxy = None;
                    trace!("Queued resource {} as entry {}", resource.url, id);
                    self.pending_queue.push(resource);
                    added += 1;
                }
            }
        }
        Ok(added)
    }

    async fn pending(&self) -> Result<usize, ScrapeError> {
        Ok(self.entries.iter().filter(|e| e.status.is_open()).count())
    }
}

impl std::fmt::Debug for MemoryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryQueue")
            .field("entries", &self.entries.len())
            .field("queued", &self.pending_queue.len())
            .field("batch_size", &self.batch_size)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resources(urls: &[&str]) -> Vec<Resource> {
        urls.iter().map(|u| Resource::parse(u).unwrap()).collect()
    }

    #[tokio::test]
    async fn add_skips_duplicates() {
        let queue = MemoryQueue::new();
        let added = queue
            .add(resources(&[
                "http://sitea.com/a.html",
                "http://sitea.com/a.html#section",
                "http://sitea.com/b.html",
            ]))
            .await
            .unwrap();
        assert_eq!(added, 2);
        assert_eq!(queue.len(), 2);
        let b = Resource::parse("http://sitea.com/b.html").unwrap();
        assert_eq!(queue.entry_id(&b), Some(2));

        let added = queue.add(resources(&["http://sitea.com/b.html"])).await.unwrap();
        assert_eq!(added, 0);
        assert_eq!(queue.pending().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn batches_are_marked_in_progress() {
        let queue = MemoryQueue::new().with_batch_size(2);
        queue
            .add(resources(&[
                "http://sitea.com/1",
                "http://sitea.com/2",
                "http://sitea.com/3",
            ]))
            .await
            .unwrap();

        let proxy = Proxy::new("proxyA", 80);
        let batch = queue.resources_to_scrape(Some(&proxy)).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].url.path(), "/1");
        assert_eq!(batch[0].queue_entry_id, Some(1));
        assert_eq!(batch[1].proxy, Some(proxy));
        assert_eq!(queue.count(ResourceStatus::InProgress), 2);
        assert_eq!(queue.count(ResourceStatus::Pending), 1);
        // in-progress entries still count as open work
        assert_eq!(queue.pending().await.unwrap(), 3);

        let batch = queue.resources_to_scrape(None).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert!(queue.resources_to_scrape(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_status_closes_entries() {
        let queue = MemoryQueue::new();
        queue.add(resources(&["http://sitea.com/"])).await.unwrap();
        let resource = queue.resources_to_scrape(None).await.unwrap().remove(0);

        queue
            .update_status(&resource, ResourceStatus::Complete)
            .await
            .unwrap();
        assert_eq!(queue.status_of(&resource), Some(ResourceStatus::Complete));
        assert_eq!(queue.pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_resources_are_retried() {
        let queue = MemoryQueue::new().with_max_retries(1);
        queue.add(resources(&["http://sitea.com/"])).await.unwrap();

        let resource = queue.resources_to_scrape(None).await.unwrap().remove(0);
        queue
            .update_status(&resource, ResourceStatus::Failed)
            .await
            .unwrap();
        assert_eq!(queue.status_of(&resource), Some(ResourceStatus::Pending));

        let resource = queue.resources_to_scrape(None).await.unwrap().remove(0);
        queue
            .update_status(&resource, ResourceStatus::Failed)
            .await
            .unwrap();
        assert_eq!(queue.status_of(&resource), Some(ResourceStatus::Failed));
        assert!(queue.resources_to_scrape(None).await.unwrap().is_empty());
        assert_eq!(queue.pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_resource_update_fails() {
        let queue = MemoryQueue::new();
        let resource = Resource::parse("http://sitea.com/").unwrap();
        let err = queue
            .update_status(&resource, ResourceStatus::Complete)
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::QueueError(_)));
    }
}
