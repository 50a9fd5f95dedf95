//! Connection identity management for the quiz server
//!
//! This module handles the server-side view of connected clients:
//! - Explicit per-connection identity tokens issued at connect time
//! - The binding from connection to logged-in account name
//! - Connection health monitoring and automatic timeout cleanup
//! - Server capacity enforcement and address tracking
//!
//! Player identity is never ambient: every command is resolved through this
//! table from the sender's address to a `ConnectionId` before the session
//! engine sees it.

use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Opaque identity token for one client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u32);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// One connected client.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    /// Network address for routing responses.
    pub addr: SocketAddr,
    /// Account this connection authenticated as.
    pub username: String,
    /// Last time any datagram arrived from this address.
    pub last_seen: Instant,
}

impl Connection {
    pub fn new(id: ConnectionId, addr: SocketAddr, username: String) -> Self {
        Self {
            id,
            addr,
            username,
            last_seen: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Tracks all live connections, enforces the capacity limit, and detects
/// silent disconnects. Ids start from 1 and increment per connection.
pub struct ConnectionTable {
    connections: HashMap<ConnectionId, Connection>,
    next_id: u32,
    max_connections: usize,
}

impl ConnectionTable {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: HashMap::new(),
            next_id: 1,
            max_connections,
        }
    }

    /// Registers a connection for a logged-in user. Returns None at capacity.
    pub fn add(&mut self, addr: SocketAddr, username: &str) -> Option<ConnectionId> {
        if self.connections.len() >= self.max_connections {
            return None;
        }

        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        info!("{} connected from {} as {}", id, addr, username);
        self.connections
            .insert(id, Connection::new(id, addr, username.to_string()));
        Some(id)
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let removed = self.connections.remove(&id);
        if let Some(conn) = &removed {
            info!("{} ({}) disconnected", id, conn.username);
        }
        removed
    }

    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<ConnectionId> {
        self.connections
            .iter()
            .find(|(_, c)| c.addr == addr)
            .map(|(id, _)| *id)
    }

    pub fn addr_of(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.connections.get(&id).map(|c| c.addr)
    }

    pub fn username_of(&self, id: ConnectionId) -> Option<String> {
        self.connections.get(&id).map(|c| c.username.clone())
    }

    /// Refreshes the activity timestamp for whoever owns `addr`.
    pub fn touch_addr(&mut self, addr: SocketAddr) {
        if let Some(id) = self.find_by_addr(addr) {
            if let Some(conn) = self.connections.get_mut(&id) {
                conn.touch();
            }
        }
    }

    /// Removes connections silent for longer than `timeout` and returns
    /// their ids so the session engine can run its leave path for each.
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<ConnectionId> {
        let timed_out: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, c)| c.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        for id in &timed_out {
            self.remove(*id);
        }

        timed_out
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    #[test]
    fn test_add_and_lookup() {
        let mut table = ConnectionTable::new(4);
        let id = table.add(test_addr(), "alice").unwrap();
        assert_eq!(id, ConnectionId(1));
        assert_eq!(table.find_by_addr(test_addr()), Some(id));
        assert_eq!(table.addr_of(id), Some(test_addr()));
        assert_eq!(table.username_of(id).as_deref(), Some("alice"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_ids_increment() {
        let mut table = ConnectionTable::new(4);
        let a = table.add(test_addr(), "alice").unwrap();
        let b = table.add(test_addr2(), "bob").unwrap();
        assert_eq!(a, ConnectionId(1));
        assert_eq!(b, ConnectionId(2));
    }

    #[test]
    fn test_capacity_enforced() {
        let mut table = ConnectionTable::new(1);
        assert!(table.add(test_addr(), "alice").is_some());
        assert!(table.add(test_addr2(), "bob").is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_remove() {
        let mut table = ConnectionTable::new(4);
        let id = table.add(test_addr(), "alice").unwrap();
        let removed = table.remove(id).unwrap();
        assert_eq!(removed.username, "alice");
        assert!(table.is_empty());
        assert!(table.remove(id).is_none());
    }

    #[test]
    fn test_timeout_detection() {
        let mut table = ConnectionTable::new(4);
        let id = table.add(test_addr(), "alice").unwrap();

        assert!(table.check_timeouts(Duration::from_secs(5)).is_empty());

        table
            .connections
            .get_mut(&id)
            .unwrap()
            .last_seen = Instant::now() - Duration::from_secs(10);

        let timed_out = table.check_timeouts(Duration::from_secs(5));
        assert_eq!(timed_out, vec![id]);
        assert!(table.is_empty());
    }

    #[test]
    fn test_touch_resets_timeout() {
        let mut table = ConnectionTable::new(4);
        let id = table.add(test_addr(), "alice").unwrap();
        table
            .connections
            .get_mut(&id)
            .unwrap()
            .last_seen = Instant::now() - Duration::from_secs(10);

        table.touch_addr(test_addr());
        assert!(table.check_timeouts(Duration::from_secs(5)).is_empty());
    }
}
