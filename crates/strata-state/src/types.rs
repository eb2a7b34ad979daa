//! Persisted record types for the reservation store.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Ownership of one address on one network.
///
/// `(address, network_name)` is unique across the store; the whole
/// allocator depends on that invariant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IpAddressRecord {
    pub address: IpAddr,
    pub network_name: String,
    pub instance_id: String,
    /// True when the address came from the static pool.
    pub static_ip: bool,
    /// Deployment task that claimed the address.
    pub task_id: String,
    /// Unix timestamp (seconds) of the claim.
    pub created_at: u64,
}

/// Composite key `{network_name}/{address}`.
pub fn address_key(network_name: &str, address: IpAddr) -> String {
    format!("{network_name}/{address}")
}

/// Key prefix shared by every entry of `network_name`.
pub fn network_prefix(network_name: &str) -> String {
    format!("{network_name}/")
}

/// Result of an atomic insert-if-absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The key was taken; carries the entry found inside the transaction.
    Conflict(IpAddressRecord),
}
