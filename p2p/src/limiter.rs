//! Per-IP inbound connection counting.

use {
    lru::LruCache,
    parking_lot::Mutex,
    std::{net::IpAddr, sync::Arc},
};

/// Counts inbound connections per remote IP and refuses new ones past the
/// configured limit. The table is a bounded LRU; when it overflows, the
/// least recently seen IP is forgotten.
#[derive(Clone)]
pub struct ConnectionLimiter {
    counts: Arc<Mutex<LruCache<IpAddr, usize>>>,
    max_per_ip: usize,
}

impl ConnectionLimiter {
    pub fn new(max_per_ip: usize, capacity: usize) -> Self {
        Self {
            counts: Arc::new(Mutex::new(LruCache::new(capacity.max(1)))),
            max_per_ip,
        }
    }

    /// Take a slot for `ip`. The slot is released when the permit drops.
    pub fn acquire(&self, ip: IpAddr) -> Option<InboundPermit> {
        let mut counts = self.counts.lock();
        let current = counts.get(&ip).copied().unwrap_or(0);
        if current >= self.max_per_ip {
            return None;
        }
        counts.put(ip, current.saturating_add(1));
        Some(InboundPermit {
            limiter: self.clone(),
            ip,
        })
    }

    /// Connections currently held for `ip`.
    pub fn count(&self, ip: &IpAddr) -> usize {
        self.counts.lock().peek(ip).copied().unwrap_or(0)
    }

    fn release(&self, ip: &IpAddr) {
        let mut counts = self.counts.lock();
        match counts.peek(ip).copied() {
            Some(n) if n > 1 => {
                counts.put(*ip, n.saturating_sub(1));
            }
            Some(_) => {
                counts.pop(ip);
            }
            None => {}
        }
    }
}

/// Held for the lifetime of an inbound connection.
pub struct InboundPermit {
    limiter: ConnectionLimiter,
    ip: IpAddr,
}

impl Drop for InboundPermit {
    fn drop(&mut self) {
        self.limiter.release(&self.ip);
    }
}
