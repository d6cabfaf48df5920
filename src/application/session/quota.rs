//! Per-source-IP connection quota

use std::net::IpAddr;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Counts live connections per source address.
///
/// Counting happens under the address's shard lock so two concurrent
/// handshakes from one address cannot both take the last slot.
#[derive(Debug)]
pub struct IpQuota {
    limit: usize,
    counts: DashMap<IpAddr, usize>,
}

impl IpQuota {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            counts: DashMap::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Take a slot for `ip`. Returns `false` when the address is at its limit.
    pub fn try_acquire(&self, ip: IpAddr) -> bool {
        let mut count = self.counts.entry(ip).or_insert(0);
        if *count >= self.limit {
            return false;
        }
        *count += 1;
        true
    }

    /// Give a slot back. Extra releases are ignored.
    pub fn release(&self, ip: IpAddr) {
        if let Entry::Occupied(mut entry) = self.counts.entry(ip) {
            if *entry.get() <= 1 {
                entry.remove();
            } else {
                *entry.get_mut() -= 1;
            }
        }
    }

    pub fn in_use(&self, ip: IpAddr) -> usize {
        self.counts.get(&ip).map(|c| *c).unwrap_or(0)
    }
}
