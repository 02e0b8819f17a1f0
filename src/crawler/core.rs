//! The core Crawler implementation.
//!
//! This module defines the `Crawler` struct, which drives one scraping job. It
//! ties together the admission controller, the work queue and the fetcher,
//! runs a bounded pool of worker tasks, handles graceful shutdown on Ctrl-C and
//! collects statistics for monitoring.

use super::worker::{WorkerContext, run_worker};
use crate::admission::AdmissionController;
use crate::error::ScrapeError;
use crate::fetcher::Fetcher;
use crate::queue::WorkQueue;
use crate::resource::Resource;
use crate::state::CrawlerState;
use crate::stats::StatCollector;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace, warn};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Drives a scraping job: dispatches admitted resources to the fetcher with a
/// bounded number of concurrent workers until the queue is drained.
pub struct Crawler<Q: WorkQueue + ?Sized, F: Fetcher> {
    project: String,
    controller: Arc<AdmissionController>,
    queue: Arc<Q>,
    fetcher: Arc<F>,
    stats: Arc<StatCollector>,
    state: Arc<CrawlerState>,
    seeds: Vec<Resource>,
    workers: usize,
    max_depth: Option<u32>,
    empty_backoff_min: Duration,
    empty_backoff_max: Duration,
}

impl<Q, F> Crawler<Q, F>
where
    Q: WorkQueue + ?Sized + 'static,
    F: Fetcher,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        project: String,
        controller: Arc<AdmissionController>,
        queue: Arc<Q>,
        fetcher: Arc<F>,
        seeds: Vec<Resource>,
        workers: usize,
        max_depth: Option<u32>,
        empty_backoff_min: Duration,
        empty_backoff_max: Duration,
    ) -> Self {
        Crawler {
            project,
            controller,
            queue,
            fetcher,
            stats: Arc::new(StatCollector::new()),
            state: CrawlerState::new(),
            seeds,
            workers,
            max_depth,
            empty_backoff_min,
            empty_backoff_max,
        }
    }

    /// Runs the crawl to completion, or until Ctrl-C.
    ///
    /// Returns the first work queue error a worker ran into, or
    /// `ScrapeError::GeneralError` when a worker task panicked.
    pub async fn start_crawl(self) -> Result<(), ScrapeError> {
        info!(
            "Project {} starting crawl with {} workers, check interval {:?}",
            self.project,
            self.workers,
            self.controller.check_interval()
        );

        let Crawler {
            project,
            controller,
            queue,
            fetcher,
            stats,
            state,
            seeds,
            workers,
            max_depth,
            empty_backoff_min,
            empty_backoff_max,
        } = self;

        if !seeds.is_empty() {
            let added = queue.add(seeds).await?;
            stats.add_resources_enqueued(added);
            debug!("Queued {} seed resources", added);
        }

        let ctx = WorkerContext {
            project: project.clone(),
            controller,
            queue,
            fetcher,
            state: Arc::clone(&state),
            stats: Arc::clone(&stats),
            max_depth,
            empty_backoff_min,
            empty_backoff_max,
        };

        trace!("Spawning {} workers", workers);
        let mut task_set = JoinSet::new();
        for id in 0..workers {
            task_set.spawn(run_worker(id, ctx.clone()));
        }

        let mut first_error = None;
        let interrupted = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, initiating graceful shutdown.");
                true
            }
            _ = join_workers(&mut task_set, &state, &mut first_error) => false,
        };

        if interrupted {
            state.request_shutdown();
            if !state.is_idle() {
                info!(
                    "Waiting for {} workers to finish {} in-flight fetches...",
                    state.active_workers.load(Ordering::SeqCst),
                    state.fetching.load(Ordering::SeqCst)
                );
            }
            let drained = tokio::time::timeout(
                SHUTDOWN_TIMEOUT,
                join_workers(&mut task_set, &state, &mut first_error),
            )
            .await;
            if drained.is_err() {
                warn!(
                    "Workers did not complete within timeout ({}s), aborting remaining tasks...",
                    SHUTDOWN_TIMEOUT.as_secs()
                );
                task_set.abort_all();
            }
        }

        info!(
            "Crawl of {} finished. Stats: resources_dispatched={}, resources_scraped={}, resources_failed={}",
            project,
            stats.resources_dispatched.load(Ordering::SeqCst),
            stats.resources_scraped.load(Ordering::SeqCst),
            stats.resources_failed.load(Ordering::SeqCst)
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Returns a cloned Arc to the `StatCollector` instance used by this crawler.
    pub fn get_stats(&self) -> Arc<StatCollector> {
        Arc::clone(&self.stats)
    }

    /// Returns the admission controller shared by the workers.
    pub fn controller(&self) -> Arc<AdmissionController> {
        Arc::clone(&self.controller)
    }

    /// Returns a handle that stops the crawl when `request_shutdown` is called.
    pub fn state(&self) -> Arc<CrawlerState> {
        Arc::clone(&self.state)
    }
}

/// Joins every worker, keeping the first error. A panicked worker leaves its
/// reserved capacity behind, so the remaining workers are stopped as well.
async fn join_workers(
    task_set: &mut JoinSet<Result<(), ScrapeError>>,
    state: &CrawlerState,
    first_error: &mut Option<ScrapeError>,
) {
    while let Some(result) = task_set.join_next().await {
        let err = match result {
            Ok(Ok(())) => {
                trace!("Worker completed successfully");
                continue;
            }
            Ok(Err(e)) => e,
            Err(e) => {
                error!("Worker task failed: {}", e);
                state.request_shutdown();
                ScrapeError::GeneralError(format!("worker task failed: {}", e))
            }
        };
        if first_error.is_none() {
            *first_error = Some(err);
        }
    }
}
