use dashmap::DashMap;
use log::trace;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// State tracked between a client's OCR1 and its matching OCR2.
#[derive(Clone, Copy, Debug)]
pub struct PendingConnection {
    pub protocol_version: u8,
    pub cookie: u32,
    created_at: Instant,
}

impl PendingConnection {
    pub fn new(protocol_version: u8, cookie: u32) -> Self {
        Self {
            protocol_version,
            cookie,
            created_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() >= ttl
    }
}

/// Concurrent `client_addr -> PendingConnection` map with a TTL from
/// insertion. Backed by `DashMap`, matching the sharded-lock connection
/// table already used by the rest of this workspace.
pub struct PendingTable {
    entries: DashMap<SocketAddr, PendingConnection>,
    ttl: Duration,
}

impl PendingTable {
    pub fn new(ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            ttl,
        })
    }

    /// Inserts a pending entry, overwriting any existing one for the same
    /// address — a duplicate OCR1 is a valid retransmit, and the newest
    /// cookie is the one the client is expected to use.
    pub fn insert(&self, addr: SocketAddr, entry: PendingConnection) {
        if self.entries.insert(addr, entry).is_some() {
            trace!("replaced pending connection entry for {addr} (retransmit)");
        }
    }

    /// Atomically takes the entry for `addr`, if present and not expired.
    /// An expired entry is treated as absent and removed on the way out.
    pub fn remove(&self, addr: &SocketAddr) -> Option<PendingConnection> {
        let (_, entry) = self.entries.remove(addr)?;
        if entry.is_expired(self.ttl) {
            trace!("pending connection entry for {addr} expired before OCR2 arrived");
            return None;
        }
        Some(entry)
    }

    /// Sweeps entries older than the configured TTL. Runs on a background
    /// interval rather than on every table access, so lookups stay O(1)
    /// without paying for a full scan.
    pub fn spawn_expiry_task(self: &Arc<Self>, sweep_interval: Duration) -> JoinHandle<()> {
        let table = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            loop {
                interval.tick().await;
                table.entries.retain(|addr, entry| {
                    let keep = !entry.is_expired(table.ttl);
                    if !keep {
                        trace!("expiring pending connection entry for {addr}");
                    }
                    keep
                });
            }
        })
    }

    #[cfg(test)]
    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.entries.contains_key(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    #[test]
    fn insert_then_remove_round_trips() {
        let table = PendingTable::new(Duration::from_secs(10));
        table.insert(addr(1), PendingConnection::new(11, 42));
        let entry = table.remove(&addr(1)).expect("entry present");
        assert_eq!(entry.protocol_version, 11);
        assert_eq!(entry.cookie, 42);
        assert!(table.remove(&addr(1)).is_none());
    }

    #[test]
    fn expired_entry_is_treated_as_absent() {
        let table = PendingTable::new(Duration::from_millis(1));
        table.insert(addr(2), PendingConnection::new(11, 7));
        std::thread::sleep(Duration::from_millis(5));
        assert!(table.remove(&addr(2)).is_none());
    }

    #[test]
    fn duplicate_insert_overwrites() {
        let table = PendingTable::new(Duration::from_secs(10));
        table.insert(addr(3), PendingConnection::new(11, 1));
        table.insert(addr(3), PendingConnection::new(11, 2));
        let entry = table.remove(&addr(3)).expect("entry present");
        assert_eq!(entry.cookie, 2);
    }
}
