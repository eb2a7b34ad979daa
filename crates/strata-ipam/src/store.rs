//! The storage seam under [`DatabaseIpRepo`](crate::repo::DatabaseIpRepo).
//!
//! The repository only needs a handful of primitives, of which
//! `insert_if_absent` must be atomic: it is the unique-constraint authority
//! the optimistic retry loops are keyed to.

use std::net::IpAddr;

use strata_state::{InsertOutcome, IpAddressRecord, StateResult, StateStore};

/// Minimal persistence contract for address records.
pub trait AddressStore: Send + Sync {
    fn get(&self, network_name: &str, address: IpAddr) -> StateResult<Option<IpAddressRecord>>;

    /// Atomically insert unless `(network, address)` is already taken.
    fn insert_if_absent(&self, record: &IpAddressRecord) -> StateResult<InsertOutcome>;

    /// Atomically replace the entry while it is owned by `record.instance_id`.
    fn update_if_owned(&self, record: &IpAddressRecord) -> StateResult<bool>;

    fn remove(&self, network_name: &str, address: IpAddr) -> StateResult<bool>;

    fn list_for_network(&self, network_name: &str) -> StateResult<Vec<IpAddressRecord>>;

    /// Released addresses, least recently released first.
    fn releases_for_network(&self, network_name: &str) -> StateResult<Vec<IpAddr>>;
}

impl AddressStore for StateStore {
    fn get(&self, network_name: &str, address: IpAddr) -> StateResult<Option<IpAddressRecord>> {
        self.get_ip(network_name, address)
    }

    fn insert_if_absent(&self, record: &IpAddressRecord) -> StateResult<InsertOutcome> {
        self.insert_ip_if_absent(record)
    }

    fn update_if_owned(&self, record: &IpAddressRecord) -> StateResult<bool> {
        self.update_ip_if_owned(record)
    }

    fn remove(&self, network_name: &str, address: IpAddr) -> StateResult<bool> {
        self.delete_ip(network_name, address)
    }

    fn list_for_network(&self, network_name: &str) -> StateResult<Vec<IpAddressRecord>> {
        self.list_ips_for_network(network_name)
    }

    fn releases_for_network(&self, network_name: &str) -> StateResult<Vec<IpAddr>> {
        self.list_releases_for_network(network_name)
    }
}
