//! Contains the worker loop that drives admission and fetching.
//!
//! Every worker repeatedly asks the admission controller for the next resource:
//!
//! - **Admitted**: the resource is fetched, discovered links are queued, the
//!   queue status is updated and the reserved capacity is released.
//! - **Blocked**: the worker sleeps for the controller's check interval.
//! - **Nothing ready**: if nothing is in flight and the queue has no open
//!   entries the crawl is complete; otherwise the worker backs off
//!   exponentially.
//!
//! Queue errors during dispatch end the worker with that error. Fetch errors
//! only fail the resource at hand.

use crate::admission::AdmissionController;
use crate::error::ScrapeError;
use crate::fetcher::Fetcher;
use crate::queue::WorkQueue;
use crate::resource::{Resource, ResourceStatus};
use crate::state::CrawlerState;
use crate::stats::StatCollector;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, trace};

const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(1);

/// Everything a worker needs, shared between all workers of a crawl.
pub(crate) struct WorkerContext<Q: ?Sized, F> {
    pub(crate) project: String,
    pub(crate) controller: Arc<AdmissionController>,
    pub(crate) queue: Arc<Q>,
    pub(crate) fetcher: Arc<F>,
    pub(crate) state: Arc<CrawlerState>,
    pub(crate) stats: Arc<StatCollector>,
    pub(crate) max_depth: Option<u32>,
    pub(crate) empty_backoff_min: Duration,
    pub(crate) empty_backoff_max: Duration,
}

impl<Q: ?Sized, F> Clone for WorkerContext<Q, F> {
    fn clone(&self) -> Self {
        Self {
            project: self.project.clone(),
            controller: Arc::clone(&self.controller),
            queue: Arc::clone(&self.queue),
            fetcher: Arc::clone(&self.fetcher),
            state: Arc::clone(&self.state),
            stats: Arc::clone(&self.stats),
            max_depth: self.max_depth,
            empty_backoff_min: self.empty_backoff_min,
            empty_backoff_max: self.empty_backoff_max,
        }
    }
}

pub(crate) async fn run_worker<Q, F>(id: usize, ctx: WorkerContext<Q, F>) -> Result<(), ScrapeError>
where
    Q: WorkQueue + ?Sized,
    F: Fetcher,
{
    trace!("Worker {} started", id);
    ctx.state.active_workers.fetch_add(1, Ordering::SeqCst);
    let result = worker_loop(id, &ctx).await;
    ctx.state.active_workers.fetch_sub(1, Ordering::SeqCst);
    trace!("Worker {} finished", id);
    result
}

async fn worker_loop<Q, F>(id: usize, ctx: &WorkerContext<Q, F>) -> Result<(), ScrapeError>
where
    Q: WorkQueue + ?Sized,
    F: Fetcher,
{
    let mut empty_backoff = ctx.empty_backoff_min;

    while !ctx.state.is_shutting_down() {
        match ctx.controller.resource_to_scrape(&*ctx.queue).await {
            Ok(Some(resource)) => {
                empty_backoff = ctx.empty_backoff_min;
                process_resource(ctx, resource).await;
            }
            Ok(None) => {
                ctx.stats.increment_empty_polls();
                if ctx.controller.in_flight() == 0 && ctx.queue.pending().await? == 0 {
                    info!("Project {} scraping complete", ctx.project);
                    ctx.state.request_shutdown();
                    break;
                }
                trace!(
                    "Worker {}: no resource ready, backing off {:?}",
                    id, empty_backoff
                );
                tokio::time::sleep(empty_backoff).await;
                empty_backoff = (empty_backoff * 2).min(ctx.empty_backoff_max);
            }
            Err(ScrapeError::ConcurrencyError(e)) => {
                ctx.stats.record_blocked(e.level);
                trace!("Worker {}: blocked at {} level", id, e.level);
                tokio::time::sleep(ctx.controller.check_interval().max(MIN_CHECK_INTERVAL)).await;
            }
            Err(e) => {
                error!("Worker {}: dispatch failed: {}", id, e);
                ctx.state.request_shutdown();
                return Err(e);
            }
        }
    }

    Ok(())
}

/// Fetches an admitted resource and reports the outcome. Capacity is always
/// released, after discovered links have been queued so that a drained queue
/// with nothing in flight really means the crawl is done.
async fn process_resource<Q, F>(ctx: &WorkerContext<Q, F>, resource: Resource)
where
    Q: WorkQueue + ?Sized,
    F: Fetcher,
{
    ctx.stats.increment_resources_dispatched();
    ctx.state.fetching.fetch_add(1, Ordering::SeqCst);

    trace!("Fetching {} via {:?}", resource.url, resource.proxy);
    let start_time = Instant::now();
    let outcome = ctx.fetcher.fetch(&resource).await;
    ctx.stats
        .record_fetch_time(resource.url.as_str(), start_time.elapsed());

    let status = match outcome {
        Ok(output) => {
            if let Err(e) = enqueue_links(ctx, &resource, output.links).await {
                error!("Failed to queue links found on {}: {}", resource.url, e);
            }
            info!("Resource {} successfully scraped", resource.url);
            ctx.stats.increment_resources_scraped();
            ResourceStatus::Complete
        }
        Err(e) => {
            error!("Fetch error for {}: {}", resource.url, e);
            ctx.stats.increment_resources_failed();
            ResourceStatus::Failed
        }
    };

    if let Err(e) = ctx.queue.update_status(&resource, status).await {
        error!("Failed to update queue status of {}: {}", resource.url, e);
    }

    match status {
        ResourceStatus::Complete => ctx.controller.resource_scraped(&resource),
        _ => ctx.controller.resource_error(&resource),
    }
    ctx.state.fetching.fetch_sub(1, Ordering::SeqCst);
}

async fn enqueue_links<Q, F>(
    ctx: &WorkerContext<Q, F>,
    parent: &Resource,
    links: Vec<url::Url>,
) -> Result<(), ScrapeError>
where
    Q: WorkQueue + ?Sized,
    F: Fetcher,
{
    if links.is_empty() {
        return Ok(());
    }

    let depth = parent.depth + 1;
    if ctx.max_depth.is_some_and(|max| depth > max) {
        debug!(
            "Dropping {} links from {}: max depth reached",
            links.len(),
            parent.url
        );
        return Ok(());
    }

    ctx.stats.add_links_discovered(links.len());
    let resources = links
        .into_iter()
        .map(|url| Resource::new(url).with_depth(depth))
        .collect();
    let added = ctx.queue.add(resources).await?;
    ctx.stats.add_resources_enqueued(added);
    trace!("Queued {} new resources from {}", added, parent.url);
    Ok(())
}
