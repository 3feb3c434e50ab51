//! Connection tracking for the transport adapter
//!
//! The server has no connection-oriented transport underneath it, so player
//! liveness is tracked here: every joined address gets a row with the game
//! it belongs to and the last time it was heard from. A periodic checker
//! sweeps rows that have gone silent and routes a disconnect to their
//! session. Rows are inserted when a session accepts a join and removed
//! when the session drops the player or expires.

use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// How long a joined connection may stay silent before it is considered
/// gone. Clients idle between commands are expected to send heartbeats.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// One joined connection.
#[derive(Debug)]
pub struct Connection {
    pub addr: SocketAddr,
    pub game_code: String,
    pub last_seen: Instant,
}

impl Connection {
    pub fn new(addr: SocketAddr, game_code: String) -> Self {
        Self {
            addr,
            game_code,
            last_seen: Instant::now(),
        }
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Maps joined addresses to their game membership and liveness.
pub struct ConnectionTable {
    connections: HashMap<SocketAddr, Connection>,
    timeout: Duration,
}

impl ConnectionTable {
    pub fn new(timeout: Duration) -> Self {
        Self {
            connections: HashMap::new(),
            timeout,
        }
    }

    /// Records a join accepted by a session. Re-registering an address
    /// (e.g. after its previous game expired) replaces the old row.
    pub fn register(&mut self, addr: SocketAddr, game_code: String) {
        info!("Connection {} registered to game {}", addr, game_code);
        self.connections.insert(addr, Connection::new(addr, game_code));
    }

    /// Removes a row. Idempotent; returns whether it existed.
    pub fn unregister(&mut self, addr: SocketAddr) -> bool {
        if let Some(connection) = self.connections.remove(&addr) {
            info!(
                "Connection {} unregistered from game {}",
                addr, connection.game_code
            );
            true
        } else {
            false
        }
    }

    /// Refreshes a row's liveness. Returns false for unknown addresses.
    pub fn touch(&mut self, addr: SocketAddr) -> bool {
        if let Some(connection) = self.connections.get_mut(&addr) {
            connection.last_seen = Instant::now();
            true
        } else {
            false
        }
    }

    pub fn game_code_of(&self, addr: SocketAddr) -> Option<String> {
        self.connections.get(&addr).map(|c| c.game_code.clone())
    }

    /// Removes every silent connection and returns them with the game they
    /// belonged to, so the caller can route disconnects.
    pub fn check_timeouts(&mut self) -> Vec<(SocketAddr, String)> {
        let timed_out: Vec<SocketAddr> = self
            .connections
            .values()
            .filter(|c| c.is_timed_out(self.timeout))
            .map(|c| c.addr)
            .collect();

        timed_out
            .into_iter()
            .filter_map(|addr| {
                self.connections
                    .remove(&addr)
                    .map(|connection| (addr, connection.game_code))
            })
            .collect()
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
    fn test_register_and_lookup() {
        let mut table = ConnectionTable::new(CONNECTION_TIMEOUT);
        assert!(table.is_empty());

        table.register(test_addr(), "AB12CD".to_string());
        assert_eq!(table.len(), 1);
        assert_eq!(table.game_code_of(test_addr()), Some("AB12CD".to_string()));
        assert_eq!(table.game_code_of(test_addr2()), None);
    }

    #[test]
    fn test_reregister_replaces_game() {
        let mut table = ConnectionTable::new(CONNECTION_TIMEOUT);

        table.register(test_addr(), "AB12CD".to_string());
        table.register(test_addr(), "ZZ99XX".to_string());

        assert_eq!(table.len(), 1);
        assert_eq!(table.game_code_of(test_addr()), Some("ZZ99XX".to_string()));
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let mut table = ConnectionTable::new(CONNECTION_TIMEOUT);

        table.register(test_addr(), "AB12CD".to_string());
        assert!(table.unregister(test_addr()));
        assert!(!table.unregister(test_addr()));
        assert!(table.is_empty());
    }

    #[test]
    fn test_touch_unknown_address() {
        let mut table = ConnectionTable::new(CONNECTION_TIMEOUT);
        assert!(!table.touch(test_addr()));

        table.register(test_addr(), "AB12CD".to_string());
        assert!(table.touch(test_addr()));
    }

    #[test]
    fn test_check_timeouts_removes_silent_connections() {
        let mut table = ConnectionTable::new(Duration::from_secs(1));

        table.register(test_addr(), "AB12CD".to_string());
        table.register(test_addr2(), "AB12CD".to_string());

        // Backdate one row past the timeout.
        if let Some(connection) = table.connections.get_mut(&test_addr()) {
            connection.last_seen = Instant::now() - Duration::from_secs(2);
        }

        let timed_out = table.check_timeouts();
        assert_eq!(timed_out, vec![(test_addr(), "AB12CD".to_string())]);
        assert_eq!(table.len(), 1);
        assert!(table.game_code_of(test_addr2()).is_some());
    }
}
