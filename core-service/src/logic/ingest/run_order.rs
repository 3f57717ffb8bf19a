//! Run Order Tracker
//!
//! hostname → next run order, kept for the lifetime of an ingestion stream.
//! Owned by exactly one chunker; downstream workers never see it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunOrderTracker {
    next: HashMap<String, u32>,
}

impl RunOrderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next run order for this host (0 on first sight)
    pub fn assign(&mut self, hostname: &str) -> u32 {
        match self.next.get_mut(hostname) {
            Some(n) => {
                let run = *n;
                *n += 1;
                run
            }
            None => {
                self.next.insert(hostname.to_string(), 1);
                0
            }
        }
    }

    /// Last run order handed out for this host
    pub fn last_assigned(&self, hostname: &str) -> Option<u32> {
        self.next.get(hostname).map(|n| n - 1)
    }

    pub fn hosts_seen(&self) -> usize {
        self.next.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_is_contiguous_per_host() {
        let mut tracker = RunOrderTracker::new();
        assert_eq!(tracker.assign("a"), 0);
        assert_eq!(tracker.assign("b"), 0);
        assert_eq!(tracker.assign("a"), 1);
        assert_eq!(tracker.assign("a"), 2);
        assert_eq!(tracker.last_assigned("a"), Some(2));
        assert_eq!(tracker.last_assigned("b"), Some(0));
        assert_eq!(tracker.last_assigned("c"), None);
        assert_eq!(tracker.hosts_seen(), 2);
    }
}
