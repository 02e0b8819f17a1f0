//! # Proxy Module
//!
//! Proxy descriptors, proxy/session identities and round-robin proxy selection.
//!
//! ## Overview
//!
//! A proxy pool is an ordered list where each entry is either a proxy or `None`,
//! the latter standing for a direct connection. `ProxySelector` walks the pool
//! with a cursor:
//!
//! - `next_proxy` is plain round robin, without any capacity check.
//! - `next_available_proxy` and `next_available_session_proxy` scan the pool
//!   once, starting at the cursor, for the first entry with spare capacity. The
//!   cursor then moves past the selected entry so later entries are not starved.
//!
//! The outcome of a scan is a `ProxyLookup`, which keeps "no proxy needed" and
//! "no proxy available" apart.

use crate::config::LevelLimit;
use crate::error::{ConcurrencyError, Level};
use crate::status::StatusTable;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::trace;

/// An outbound proxy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Proxy {
    pub host: String,
    pub port: u16,
}

impl Proxy {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Identity of a proxy pool entry. Renders as `host-port`, or `none` for a
/// direct connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyKey(Option<(String, u16)>);

impl fmt::Display for ProxyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some((host, port)) => write!(f, "{}-{}", host, port),
            None => f.write_str("none"),
        }
    }
}

/// Identity of a proxy + target host pairing. Renders as `{proxy_id}-{host}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub proxy: ProxyKey,
    pub host: String,
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.proxy, self.host)
    }
}

pub fn proxy_id(proxy: Option<&Proxy>) -> ProxyKey {
    ProxyKey(proxy.map(|p| (p.host.clone(), p.port)))
}

pub fn session_id(proxy: Option<&Proxy>, host: &str) -> SessionKey {
    SessionKey {
        proxy: proxy_id(proxy),
        host: host.to_string(),
    }
}

/// Outcome of an availability scan over the proxy pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyLookup {
    /// The selected entry is a direct connection: proceed without a proxy.
    Unneeded,
    /// The selected proxy.
    Found(Proxy),
    /// No pool entry has spare capacity at the given level.
    Blocked(Level),
}

impl ProxyLookup {
    /// `Ok(None)` for `Unneeded`, `Ok(Some(proxy))` for `Found`.
    pub fn into_result(self) -> Result<Option<Proxy>, ConcurrencyError> {
        match self {
            ProxyLookup::Unneeded => Ok(None),
            ProxyLookup::Found(proxy) => Ok(Some(proxy)),
            ProxyLookup::Blocked(level) => Err(ConcurrencyError::new(level)),
        }
    }
}

/// Round-robin cursor over a proxy pool.
#[derive(Debug, Clone)]
pub struct ProxySelector {
    pool: Vec<Option<Proxy>>,
    cursor: usize,
}

impl ProxySelector {
    /// Creates a selector. An empty pool is treated as a single direct connection.
    pub fn new(pool: Vec<Option<Proxy>>) -> Self {
        let pool = if pool.is_empty() { vec![None] } else { pool };
        Self { pool, cursor: 0 }
    }

    pub fn pool(&self) -> &[Option<Proxy>] {
        &self.pool
    }

    /// Index of the entry the next scan starts from.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub(crate) fn set_cursor(&mut self, cursor: usize) {
        self.cursor = cursor % self.pool.len();
    }

    /// Returns the entry under the cursor and advances it.
    pub fn next_proxy(&mut self) -> Option<Proxy> {
        let proxy = self.pool[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.pool.len();
        proxy
    }

    /// First entry, from the cursor on, with spare proxy-level capacity.
    pub fn next_available_proxy(&mut self, status: &StatusTable, limit: &LevelLimit) -> ProxyLookup {
        self.scan(Level::Proxy, |proxy| {
            status.proxy(&proxy_id(proxy)).conditions_met(Some(limit))
        })
    }

    /// First entry, from the cursor on, with spare session-level capacity for `host`.
    pub fn next_available_session_proxy(
        &mut self,
        status: &StatusTable,
        limit: Option<&LevelLimit>,
        host: &str,
    ) -> ProxyLookup {
        self.scan(Level::Session, |proxy| {
            status.session(&session_id(proxy, host)).conditions_met(limit)
        })
    }

    /// Walks the pool once from the cursor and returns the first entry accepted
    /// by `available`, moving the cursor past it.
    pub(crate) fn scan<P>(&mut self, level: Level, mut available: P) -> ProxyLookup
    where
        P: FnMut(Option<&Proxy>) -> bool,
    {
        let len = self.pool.len();
        for offset in 0..len {
            let idx = (self.cursor + offset) % len;
            let entry = self.pool[idx].as_ref();
            if available(entry) {
                self.cursor = (idx + 1) % len;
                trace!("Selected {} at pool index {}", proxy_id(entry), idx);
                return match entry {
                    Some(proxy) => ProxyLookup::Found(proxy.clone()),
                    None => ProxyLookup::Unneeded,
                };
            }
        }
        trace!("No pool entry available at {} level", level);
        ProxyLookup::Blocked(level)
    }

    /// Whether any entry is accepted by `available`. Leaves the cursor alone.
    pub(crate) fn any_available<P>(&self, mut available: P) -> bool
    where
        P: FnMut(Option<&Proxy>) -> bool,
    {
        self.pool.iter().any(|entry| available(entry.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::Instant;

    fn pool_abc() -> Vec<Option<Proxy>> {
        vec![
            Some(Proxy::new("proxyA", 80)),
            Some(Proxy::new("proxyB", 81)),
            Some(Proxy::new("proxyC", 82)),
        ]
    }

    fn set_proxy_requests(status: &mut StatusTable, proxy: &Proxy, requests: u32) {
        let entry = status.proxy_mut(proxy_id(Some(proxy)));
        entry.requests = requests;
        entry.last_start_time = Some(Instant::now() - Duration::from_secs(5));
    }

    fn set_session_requests(status: &mut StatusTable, proxy: Option<&Proxy>, requests: u32) {
        let entry = status.session_mut(session_id(proxy, "hostA"));
        entry.requests = requests;
        entry.last_start_time = Some(Instant::now() - Duration::from_secs(5));
    }

    #[test]
    fn identities() {
        assert_eq!(proxy_id(None).to_string(), "none");
        assert_eq!(proxy_id(Some(&Proxy::new("p", 80))).to_string(), "p-80");
        assert_eq!(
            proxy_id(Some(&Proxy::new("proxyA", 80))).to_string(),
            "proxyA-80"
        );
        assert_eq!(session_id(None, "h").to_string(), "none-h");
        assert_eq!(
            session_id(Some(&Proxy::new("proxyA", 80)), "hostA").to_string(),
            "proxyA-80-hostA"
        );
    }

    #[test]
    fn structured_keys_do_not_collide() {
        // Both render as "a-1-2-h" but are different sessions.
        let first = session_id(Some(&Proxy::new("a-1", 2)), "h");
        let second = session_id(Some(&Proxy::new("a", 1)), "2-h");
        assert_ne!(first, second);
    }

    #[test]
    fn next_proxy_is_round_robin() {
        let mut selector = ProxySelector::new(pool_abc());
        assert_eq!(selector.next_proxy(), Some(Proxy::new("proxyA", 80)));
        assert_eq!(selector.next_proxy(), Some(Proxy::new("proxyB", 81)));
        assert_eq!(selector.next_proxy(), Some(Proxy::new("proxyC", 82)));
        assert_eq!(selector.next_proxy(), Some(Proxy::new("proxyA", 80)));
    }

    #[test]
    fn next_available_proxy_in_pool() {
        let limit = LevelLimit::new(2, 500);
        let pool = pool_abc();
        let (a, b, c) = (
            pool[0].clone().unwrap(),
            pool[1].clone().unwrap(),
            pool[2].clone().unwrap(),
        );
        let mut selector = ProxySelector::new(pool);

        // only B has spare capacity
        let mut status = StatusTable::default();
        set_proxy_requests(&mut status, &a, 5);
        set_proxy_requests(&mut status, &b, 1);
        set_proxy_requests(&mut status, &c, 2);
        assert_eq!(
            selector.next_available_proxy(&status, &limit),
            ProxyLookup::Found(b.clone())
        );
        assert_eq!(selector.cursor(), 2);

        // cursor on B, only A free: the scan wraps past C
        selector.set_cursor(1);
        let mut status = StatusTable::default();
        set_proxy_requests(&mut status, &a, 1);
        set_proxy_requests(&mut status, &b, 3);
        set_proxy_requests(&mut status, &c, 5);
        assert_eq!(
            selector.next_available_proxy(&status, &limit),
            ProxyLookup::Found(a.clone())
        );
        assert_eq!(selector.cursor(), 1);

        // nothing free
        let mut status = StatusTable::default();
        set_proxy_requests(&mut status, &a, 5);
        set_proxy_requests(&mut status, &b, 2);
        set_proxy_requests(&mut status, &c, 2);
        assert_eq!(
            selector.next_available_proxy(&status, &limit),
            ProxyLookup::Blocked(Level::Proxy)
        );
        assert_eq!(selector.cursor(), 1);
    }

    #[test]
    fn next_available_proxy_without_pool() {
        let limit = LevelLimit::new(2, 500);
        let mut selector = ProxySelector::new(vec![None]);

        let mut status = StatusTable::default();
        let entry = status.proxy_mut(proxy_id(None));
        entry.requests = 1;
        entry.last_start_time = Some(Instant::now() - Duration::from_secs(5));
        assert_eq!(
            selector.next_available_proxy(&status, &limit),
            ProxyLookup::Unneeded
        );

        status.proxy_mut(proxy_id(None)).requests = 5;
        assert_eq!(
            selector.next_available_proxy(&status, &limit),
            ProxyLookup::Blocked(Level::Proxy)
        );
    }

    #[test]
    fn next_available_session_proxy_in_pool() {
        let limit = LevelLimit::new(2, 500);
        let pool = pool_abc();
        let (a, b, c) = (
            pool[0].clone().unwrap(),
            pool[1].clone().unwrap(),
            pool[2].clone().unwrap(),
        );
        let mut selector = ProxySelector::new(pool);

        let mut status = StatusTable::default();
        set_session_requests(&mut status, Some(&a), 5);
        set_session_requests(&mut status, Some(&b), 1);
        set_session_requests(&mut status, Some(&c), 0);
        // proxy-level saturation is irrelevant for the session scan
        set_proxy_requests(&mut status, &b, 10);
        assert_eq!(
            selector.next_available_session_proxy(&status, Some(&limit), "hostA"),
            ProxyLookup::Found(b.clone())
        );

        selector.set_cursor(1);
        let mut status = StatusTable::default();
        set_session_requests(&mut status, Some(&a), 1);
        set_session_requests(&mut status, Some(&b), 3);
        set_session_requests(&mut status, Some(&c), 5);
        assert_eq!(
            selector.next_available_session_proxy(&status, Some(&limit), "hostA"),
            ProxyLookup::Found(a.clone())
        );

        selector.set_cursor(1);
        let mut status = StatusTable::default();
        set_session_requests(&mut status, Some(&a), 5);
        set_session_requests(&mut status, Some(&b), 2);
        set_session_requests(&mut status, Some(&c), 2);
        assert_eq!(
            selector.next_available_session_proxy(&status, Some(&limit), "hostA"),
            ProxyLookup::Blocked(Level::Session)
        );
    }

    #[test]
    fn next_available_session_proxy_without_pool() {
        let limit = LevelLimit::new(2, 500);
        let mut selector = ProxySelector::new(vec![None]);

        let mut status = StatusTable::default();
        set_session_requests(&mut status, None, 1);
        assert_eq!(
            selector.next_available_session_proxy(&status, Some(&limit), "hostA"),
            ProxyLookup::Unneeded
        );

        set_session_requests(&mut status, None, 5);
        assert_eq!(
            selector.next_available_session_proxy(&status, Some(&limit), "hostA"),
            ProxyLookup::Blocked(Level::Session)
        );
        // other hosts are unaffected
        assert_eq!(
            selector.next_available_session_proxy(&status, Some(&limit), "hostB"),
            ProxyLookup::Unneeded
        );
    }

    #[test]
    fn lookup_into_result() {
        assert_eq!(ProxyLookup::Unneeded.into_result(), Ok(None));
        assert_eq!(
            ProxyLookup::Found(Proxy::new("p", 1)).into_result(),
            Ok(Some(Proxy::new("p", 1)))
        );
        assert_eq!(
            ProxyLookup::Blocked(Level::Proxy).into_result(),
            Err(ConcurrencyError::new(Level::Proxy))
        );
    }
}
