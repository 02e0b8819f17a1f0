//! Per-level request accounting.
//!
//! `StatusTable` tracks, for every level, how many requests are in flight and
//! when the most recent one started. Entries are created lazily with zero
//! requests and no start time, which guarantees the very first request at any
//! level is admitted regardless of the configured delay.

use crate::config::LevelLimit;
use crate::proxy::{Proxy, ProxyKey, SessionKey, proxy_id, session_id};
use std::collections::HashMap;
use tokio::time::Instant;

/// In-flight counter and last start time for one level entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LevelStatus {
    pub requests: u32,
    pub last_start_time: Option<Instant>,
}

impl LevelStatus {
    /// Whether a new request may start now under `limit`. A `None` limit means
    /// the level is disabled and always admits.
    pub fn conditions_met(&self, limit: Option<&LevelLimit>) -> bool {
        self.conditions_met_at(limit, Instant::now())
    }

    pub fn conditions_met_at(&self, limit: Option<&LevelLimit>, now: Instant) -> bool {
        let Some(limit) = limit else {
            return true;
        };
        if self.requests >= limit.max_requests {
            return false;
        }
        match self.last_start_time {
            None => true,
            Some(start) => now.saturating_duration_since(start) >= limit.delay,
        }
    }

    fn reserve(&mut self, now: Instant) {
        self.requests += 1;
        self.last_start_time = Some(now);
    }

    fn release(&mut self) {
        self.requests = self.requests.saturating_sub(1);
    }
}

/// Status entries for all four levels.
#[derive(Debug, Default)]
pub struct StatusTable {
    project: LevelStatus,
    proxy: HashMap<ProxyKey, LevelStatus>,
    domain: HashMap<String, LevelStatus>,
    session: HashMap<SessionKey, LevelStatus>,
}

impl StatusTable {
    pub fn project(&self) -> LevelStatus {
        self.project
    }

    pub fn proxy(&self, key: &ProxyKey) -> LevelStatus {
        self.proxy.get(key).copied().unwrap_or_default()
    }

    pub fn domain(&self, host: &str) -> LevelStatus {
        self.domain.get(host).copied().unwrap_or_default()
    }

    pub fn session(&self, key: &SessionKey) -> LevelStatus {
        self.session.get(key).copied().unwrap_or_default()
    }

    pub(crate) fn project_mut(&mut self) -> &mut LevelStatus {
        &mut self.project
    }

    pub(crate) fn proxy_mut(&mut self, key: ProxyKey) -> &mut LevelStatus {
        self.proxy.entry(key).or_default()
    }

    pub(crate) fn domain_mut(&mut self, host: &str) -> &mut LevelStatus {
        self.domain.entry(host.to_string()).or_default()
    }

    pub(crate) fn session_mut(&mut self, key: SessionKey) -> &mut LevelStatus {
        self.session.entry(key).or_default()
    }

    /// Reserves one request slot at every level. Does not check any limit.
    pub fn add_resource(&mut self, proxy: Option<&Proxy>, host: &str) {
        let now = Instant::now();
        self.project_mut().reserve(now);
        self.proxy_mut(proxy_id(proxy)).reserve(now);
        self.domain_mut(host).reserve(now);
        self.session_mut(session_id(proxy, host)).reserve(now);
    }

    /// Releases one request slot at every level. Start times are kept so the
    /// delay keeps counting from the last dispatch.
    pub fn remove_resource(&mut self, proxy: Option<&Proxy>, host: &str) {
        self.project_mut().release();
        self.proxy_mut(proxy_id(proxy)).release();
        self.domain_mut(host).release();
        self.session_mut(session_id(proxy, host)).release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn first_request_is_always_admitted() {
        let status = LevelStatus::default();
        assert!(status.conditions_met(None));
        assert!(status.conditions_met(Some(&LevelLimit::new(1, 0))));
        assert!(status.conditions_met(Some(&LevelLimit::new(1, 60_000))));
    }

    #[test]
    fn disabled_level_always_admits() {
        let status = LevelStatus {
            requests: 1000,
            last_start_time: Some(Instant::now()),
        };
        assert!(status.conditions_met(None));
    }

    #[test]
    fn max_requests_then_delay() {
        let limit = LevelLimit::new(2, 1000);
        let start = Instant::now();
        let mut status = LevelStatus::default();

        status.reserve(start);
        status.reserve(start);
        assert!(!status.conditions_met_at(Some(&limit), start + Duration::from_secs(10)));

        status.release();
        assert!(!status.conditions_met_at(Some(&limit), start + Duration::from_millis(999)));
        assert!(status.conditions_met_at(Some(&limit), start + Duration::from_millis(1000)));
    }

    #[test]
    fn add_remove_resource() {
        let proxy = Proxy::new("proxyA", 80);
        let mut table = StatusTable::default();

        table.add_resource(Some(&proxy), "hostA");
        let started = table.project().last_start_time;
        assert!(started.is_some());

        assert_eq!(table.project().requests, 1);
        assert_eq!(table.proxy(&proxy_id(Some(&proxy))).requests, 1);
        assert_eq!(table.domain("hostA").requests, 1);
        assert_eq!(table.session(&session_id(Some(&proxy), "hostA")).requests, 1);
        assert_eq!(table.proxy(&proxy_id(Some(&proxy))).last_start_time, started);

        table.remove_resource(Some(&proxy), "hostA");
        assert_eq!(table.project().requests, 0);
        assert_eq!(table.proxy(&proxy_id(Some(&proxy))).requests, 0);
        assert_eq!(table.domain("hostA").requests, 0);
        assert_eq!(table.session(&session_id(Some(&proxy), "hostA")).requests, 0);
        // start times survive the release
        assert_eq!(table.project().last_start_time, started);
        assert_eq!(table.domain("hostA").last_start_time, started);
    }

    #[test]
    fn remove_resource_never_goes_negative() {
        let mut table = StatusTable::default();
        table.remove_resource(None, "hostA");
        table.remove_resource(None, "hostA");
        assert_eq!(table.project().requests, 0);
        assert_eq!(table.proxy(&proxy_id(None)).requests, 0);
        assert_eq!(table.domain("hostA").requests, 0);
        assert_eq!(table.session(&session_id(None, "hostA")).requests, 0);
        assert_eq!(table.project().last_start_time, None);
    }

    #[tokio::test(start_paused = true)]
    async fn project_delay_after_release() {
        let limit = LevelLimit::new(1, 300);
        let mut table = StatusTable::default();

        assert!(table.project().conditions_met(Some(&limit)));
        table.add_resource(None, "hostA");
        assert!(!table.project().conditions_met(Some(&limit)));

        table.remove_resource(None, "hostA");
        assert!(!table.project().conditions_met(Some(&limit)));

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(table.project().conditions_met(Some(&limit)));
    }
}
