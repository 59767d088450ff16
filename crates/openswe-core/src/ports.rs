//! Host port probing and per-sandbox port allocation.
//!
//! Availability is tested by binding a listener on all interfaces and
//! dropping it immediately. The probe is not a reservation: another process
//! can take the port between the probe and the provider's own bind.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::net::TcpListener;

/// Default number of consecutive ports scanned before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 100;

/// A container port published on a host port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    /// Port inside the sandbox.
    pub container_port: u16,
    /// Externally reachable port on the host.
    pub host_port: u16,
}

/// Finds free TCP ports on the host.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    max_attempts: u32,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PortAllocator {
    /// Create an allocator scanning up to [`DEFAULT_MAX_ATTEMPTS`] ports.
    pub fn new() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Set the scan length used by [`allocate_mappings`](Self::allocate_mappings).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Check whether `port` can currently be bound on all interfaces.
    pub async fn is_available(&self, port: u16) -> bool {
        if port == 0 {
            return false;
        }
        match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => {
                drop(listener);
                true
            }
            Err(e) => {
                tracing::trace!(port, error = %e, "Port unavailable");
                false
            }
        }
    }

    /// Scan `preferred, preferred + 1, ...` for a bindable port.
    ///
    /// Returns `None` if none of the `max_attempts` candidates is free.
    pub async fn find_available(&self, preferred: u16, max_attempts: u32) -> Option<u16> {
        self.scan(preferred, max_attempts, &HashSet::new()).await
    }

    /// Resolve one host port per container port.
    ///
    /// Each container port first tries the same number on the host, then
    /// scans upward. Host ports already handed out in this batch are
    /// skipped. Repeated container ports are collapsed to one mapping.
    /// Ports that cannot be placed are dropped from the result.
    pub async fn allocate_mappings(&self, container_ports: &[u16]) -> Vec<PortMapping> {
        let mut claimed = HashSet::new();
        let mut seen = HashSet::new();
        let mut mappings = Vec::with_capacity(container_ports.len());

        for &container_port in container_ports {
            if !seen.insert(container_port) {
                tracing::debug!(container_port, "Duplicate container port ignored");
                continue;
            }
            match self.scan(container_port, self.max_attempts, &claimed).await {
                Some(host_port) => {
                    claimed.insert(host_port);
                    mappings.push(PortMapping {
                        container_port,
                        host_port,
                    });
                }
                None => {
                    tracing::warn!(
                        container_port,
                        max_attempts = self.max_attempts,
                        "No free host port found, dropping mapping"
                    );
                }
            }
        }

        mappings
    }

    async fn scan(&self, preferred: u16, max_attempts: u32, excluded: &HashSet<u16>) -> Option<u16> {
        for offset in 0..max_attempts {
            let candidate = u32::from(preferred) + offset;
            if candidate > u32::from(u16::MAX) {
                break;
            }
            let candidate = candidate as u16;
            if candidate == 0 || excluded.contains(&candidate) {
                continue;
            }
            if self.is_available(candidate).await {
                return Some(candidate);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn occupied_port() -> (TcpListener, u16) {
        let listener = TcpListener::bind(("0.0.0.0", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[tokio::test]
    async fn test_bound_port_is_unavailable() {
        let (_listener, port) = occupied_port().await;
        assert!(!PortAllocator::new().is_available(port).await);
    }

    #[tokio::test]
    async fn test_released_port_is_available() {
        let (listener, port) = occupied_port().await;
        drop(listener);
        assert!(PortAllocator::new().is_available(port).await);
    }

    #[tokio::test]
    async fn test_port_zero_is_never_available() {
        assert!(!PortAllocator::new().is_available(0).await);
    }

    #[tokio::test]
    async fn test_find_available_single_attempt_on_occupied_port() {
        let (_listener, port) = occupied_port().await;
        assert_eq!(PortAllocator::new().find_available(port, 1).await, None);
    }

    #[tokio::test]
    async fn test_find_available_scans_upward() {
        let (_listener, port) = occupied_port().await;
        let found = PortAllocator::new().find_available(port, 50).await;
        let found = found.expect("some port above an ephemeral port should be free");
        assert!(found > port);
    }

    #[tokio::test]
    async fn test_find_available_stops_at_range_end() {
        let allocator = PortAllocator::new();
        if let Some(found) = allocator.find_available(u16::MAX, 10).await {
            assert_eq!(found, u16::MAX);
        }
    }

    #[tokio::test]
    async fn test_duplicate_container_ports_never_share_host_port() {
        let mappings = PortAllocator::new().allocate_mappings(&[3000, 3000]).await;
        assert!(mappings.len() <= 1);
        let hosts: HashSet<u16> = mappings.iter().map(|m| m.host_port).collect();
        assert_eq!(hosts.len(), mappings.len());
    }

    #[tokio::test]
    async fn test_batch_exclusion_avoids_collisions() {
        // Occupy p so that p falls back to p+1, which p+1 then may not reuse.
        let (_listener, port) = occupied_port().await;
        if port >= u16::MAX - 10 {
            return;
        }
        let mappings = PortAllocator::new()
            .allocate_mappings(&[port, port + 1])
            .await;

        let hosts: HashSet<u16> = mappings.iter().map(|m| m.host_port).collect();
        assert_eq!(hosts.len(), mappings.len());
        assert!(mappings.iter().all(|m| m.host_port != port));
    }

    #[tokio::test]
    async fn test_unplaceable_port_is_dropped() {
        let (_listener, port) = occupied_port().await;
        let mappings = PortAllocator::new()
            .with_max_attempts(1)
            .allocate_mappings(&[port])
            .await;
        assert!(mappings.is_empty());
    }
}
