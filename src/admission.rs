//! # Admission Module
//!
//! Decides, for every dispatch attempt, whether the next resource may be
//! scraped right now.
//!
//! ## Overview
//!
//! `AdmissionController` owns the per-level status table, the proxy selector
//! cursor and the resource buffer of one scraping job. `resource_to_scrape`
//! runs the gates in order:
//!
//! 1. **Project**: job-wide capacity, checked before anything else.
//! 2. **Proxy**: a pool entry with spare capacity must exist.
//! 3. **Candidate**: the oldest buffered resource, or a fresh batch from the
//!    work queue. An empty queue yields `Ok(None)`.
//! 4. **Domain**, then **Session**: capacity for the candidate's host, and for
//!    the proxy + host pairing.
//! 5. **Reserve**: one slot is taken at every level and the resource is
//!    returned with its proxy assigned.
//!
//! A failing gate returns `ScrapeError::ConcurrencyError` tagged with the
//! blocking level. That is a "try again later" signal, not a failure. A
//! candidate blocked at the domain or session gate goes back to the buffer so
//! the next attempt replays it without another queue lookup.
//!
//! ## Concurrency
//!
//! All state sits behind one mutex that is never held across an `.await`. The
//! work queue lookup runs unlocked, so once it returns every gate is evaluated
//! again against fresh status in the same lock section that reserves capacity.
//! A buffered candidate is popped and admitted without releasing the lock.
//!
//! ## Example
//!
//! ```rust,ignore
//! let controller = AdmissionController::new(ConcurrencyOptions::default());
//! loop {
//!     match controller.resource_to_scrape(&queue).await {
//!         Ok(Some(resource)) => { /* fetch, then */ controller.resource_scraped(&resource) }
//!         Ok(None) => break,
//!         Err(e) if e.is_concurrency() => tokio::time::sleep(controller.check_interval()).await,
//!         Err(e) => return Err(e),
//!     }
//! }
//! ```

use crate::buffer::ResourceBuffer;
use crate::config::ConcurrencyOptions;
use crate::error::{ConcurrencyError, Level, ScrapeError};
use crate::proxy::{Proxy, ProxyLookup, ProxySelector, proxy_id, session_id};
use crate::queue::WorkQueue;
use crate::resource::Resource;
use crate::status::StatusTable;
use parking_lot::Mutex;
use std::time::Duration;
use tracing::{debug, trace};

#[derive(Debug)]
struct AdmissionState {
    status: StatusTable,
    selector: ProxySelector,
    buffer: ResourceBuffer,
}

/// Multi-level admission control for one scraping job.
#[derive(Debug)]
pub struct AdmissionController {
    options: ConcurrencyOptions,
    state: Mutex<AdmissionState>,
}

impl AdmissionController {
    pub fn new(options: ConcurrencyOptions) -> Self {
        let selector = ProxySelector::new(options.proxy_pool.clone());
        Self {
            options,
            state: Mutex::new(AdmissionState {
                status: StatusTable::default(),
                selector,
                buffer: ResourceBuffer::new(),
            }),
        }
    }

    pub fn options(&self) -> &ConcurrencyOptions {
        &self.options
    }

    /// Suggested wait before retrying after a `ConcurrencyError`.
    pub fn check_interval(&self) -> Duration {
        self.options.check_interval()
    }

    /// Requests currently dispatched and not yet released.
    pub fn in_flight(&self) -> u32 {
        self.state.lock().status.project().requests
    }

    /// Number of candidates waiting in the resource buffer.
    pub fn buffered(&self) -> usize {
        self.state.lock().buffer.len()
    }

    /// Returns the next resource to scrape with capacity reserved for it.
    ///
    /// `Ok(None)` means the queue has nothing ready right now. Errors other than
    /// `ScrapeError::ConcurrencyError` come from the work queue, unchanged.
    pub async fn resource_to_scrape<Q>(&self, queue: &Q) -> Result<Option<Resource>, ScrapeError>
    where
        Q: WorkQueue + ?Sized,
    {
        let proxy = {
            let mut state = self.state.lock();
            self.check_project(&state)?;
            let proxy = self.select_proxy(&mut state)?;
            if let Some(resource) = state.buffer.pop() {
                trace!("Replaying buffered resource {}", resource.url);
                return self.admit(&mut state, resource, proxy).map(Some);
            }
            proxy
        };

        let mut batch = queue.resources_to_scrape(proxy.as_ref()).await?.into_iter();
        let Some(candidate) = batch.next() else {
            trace!("Work queue has no resources ready");
            return Ok(None);
        };

        let mut state = self.state.lock();
        let rest: Vec<Resource> = batch.collect();
        if !rest.is_empty() {
            debug!("Buffering {} extra resources from the queue batch", rest.len());
            state.buffer.extend(rest);
        }
        self.admit(&mut state, candidate, proxy).map(Some)
    }

    /// Releases the capacity held by a successfully scraped resource.
    pub fn resource_scraped(&self, resource: &Resource) {
        trace!("Releasing capacity for scraped resource {}", resource.url);
        self.release(resource);
    }

    /// Releases the capacity held by a resource whose scrape failed.
    pub fn resource_error(&self, resource: &Resource) {
        trace!("Releasing capacity for failed resource {}", resource.url);
        self.release(resource);
    }

    /// Reserves a slot at every level without checking any limit.
    pub fn add_resource(&self, proxy: Option<&Proxy>, host: &str) {
        self.state.lock().status.add_resource(proxy, host);
    }

    /// Releases a slot at every level.
    pub fn remove_resource(&self, proxy: Option<&Proxy>, host: &str) {
        self.state.lock().status.remove_resource(proxy, host);
    }

    /// Plain round robin over the proxy pool.
    pub fn next_proxy(&self) -> Option<Proxy> {
        self.state.lock().selector.next_proxy()
    }

    /// Next pool entry with spare proxy-level capacity.
    pub fn next_available_proxy(&self) -> ProxyLookup {
        let mut state = self.state.lock();
        let AdmissionState {
            status, selector, ..
        } = &mut *state;
        selector.next_available_proxy(status, &self.options.proxy)
    }

    /// Next pool entry with spare session-level capacity for `host`.
    pub fn next_available_session_proxy(&self, host: &str) -> ProxyLookup {
        let mut state = self.state.lock();
        let AdmissionState {
            status, selector, ..
        } = &mut *state;
        selector.next_available_session_proxy(status, self.options.session.as_ref(), host)
    }

    fn release(&self, resource: &Resource) {
        self.remove_resource(resource.proxy.as_ref(), &resource.host());
    }

    fn check_project(&self, state: &AdmissionState) -> Result<(), ConcurrencyError> {
        if state.status.project().conditions_met(self.options.project.as_ref()) {
            Ok(())
        } else {
            trace!("Project level capacity exhausted");
            Err(ConcurrencyError::new(Level::Project))
        }
    }

    /// Picks the proxy for this attempt. With a session limit the proxy depends
    /// on the target host, so only proxy-level availability is verified here and
    /// the actual pick happens in `admit`.
    fn select_proxy(&self, state: &mut AdmissionState) -> Result<Option<Proxy>, ConcurrencyError> {
        let AdmissionState {
            status, selector, ..
        } = state;

        if self.options.session.is_some() {
            let limit = &self.options.proxy;
            let available = selector.any_available(|proxy| {
                status.proxy(&proxy_id(proxy)).conditions_met(Some(limit))
            });
            return if available {
                Ok(None)
            } else {
                trace!("No proxy with spare capacity");
                Err(ConcurrencyError::new(Level::Proxy))
            };
        }

        let proxy = selector
            .next_available_proxy(status, &self.options.proxy)
            .into_result()?;
        trace!("Selected proxy {}", proxy_id(proxy.as_ref()));
        Ok(proxy)
    }

    /// Runs every gate against the current status and reserves capacity for
    /// `candidate`. The project and proxy gates are evaluated again here since
    /// other dispatches may have reserved capacity while the queue was queried.
    fn admit(
        &self,
        state: &mut AdmissionState,
        mut candidate: Resource,
        proxy: Option<Proxy>,
    ) -> Result<Resource, ScrapeError> {
        let host = candidate.host();
        let AdmissionState {
            status,
            selector,
            buffer,
        } = state;
        let proxy_limit = &self.options.proxy;

        if !status.project().conditions_met(self.options.project.as_ref()) {
            debug!("Project at capacity, buffering {}", candidate.url);
            buffer.requeue(candidate);
            return Err(ConcurrencyError::new(Level::Project).into());
        }

        let proxy = match &self.options.session {
            None if status.proxy(&proxy_id(proxy.as_ref())).conditions_met(Some(proxy_limit)) => proxy,
            None => match selector.next_available_proxy(status, proxy_limit) {
                ProxyLookup::Unneeded => None,
                ProxyLookup::Found(proxy) => Some(proxy),
                ProxyLookup::Blocked(level) => {
                    debug!("Proxies at capacity, buffering {}", candidate.url);
                    buffer.requeue(candidate);
                    return Err(ConcurrencyError::new(level).into());
                }
            },
            Some(_) => proxy,
        };

        if !status.domain(&host).conditions_met(Some(&self.options.domain)) {
            debug!("Domain {} at capacity, buffering {}", host, candidate.url);
            buffer.requeue(candidate);
            return Err(ConcurrencyError::new(Level::Domain).into());
        }

        let proxy = match &self.options.session {
            None => proxy,
            Some(session_limit) => {
                let proxy_free = |entry: Option<&Proxy>| {
                    status.proxy(&proxy_id(entry)).conditions_met(Some(proxy_limit))
                };
                let lookup = selector.scan(Level::Session, |entry| {
                    status
                        .session(&session_id(entry, &host))
                        .conditions_met(Some(session_limit))
                        && proxy_free(entry)
                });
                match lookup {
                    ProxyLookup::Unneeded => None,
                    ProxyLookup::Found(proxy) => Some(proxy),
                    ProxyLookup::Blocked(_) => {
                        let level = if selector.any_available(proxy_free) {
                            Level::Session
                        } else {
                            Level::Proxy
                        };
                        debug!("No {} capacity for {}, buffering {}", level, host, candidate.url);
                        buffer.requeue(candidate);
                        return Err(ConcurrencyError::new(level).into());
                    }
                }
            }
        };

        status.add_resource(proxy.as_ref(), &host);
        trace!(
            "Admitted {} via {}",
            candidate.url,
            proxy_id(proxy.as_ref())
        );
        candidate.proxy = proxy;
        Ok(candidate)
    }
}
