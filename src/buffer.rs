//! Holding area for queue-fetched resources that could not be admitted yet.
//!
//! Work queue lookups are storage round trips that also mark entries as in
//! progress, so a resource blocked only by host or session capacity is kept
//! here and replayed on the next dispatch instead of being fetched again.

use crate::resource::Resource;
use std::collections::VecDeque;

/// FIFO of admission candidates.
#[derive(Debug, Default)]
pub struct ResourceBuffer {
    resources: VecDeque<Resource>,
}

impl ResourceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the oldest candidate.
    pub fn pop(&mut self) -> Option<Resource> {
        self.resources.pop_front()
    }

    /// Appends newly fetched candidates.
    pub fn extend<I: IntoIterator<Item = Resource>>(&mut self, resources: I) {
        self.resources.extend(resources);
    }

    /// Puts a candidate that was just taken and blocked back in first position.
    pub fn requeue(&mut self, resource: Resource) {
        self.resources.push_front(resource);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }
}
