//! Network reservations: typed claims binding an instance to a network.
//!
//! A reservation moves through three states: *unresolved* (no address),
//! *resolved* (address chosen, not yet persisted) and *reserved*
//! (persisted by the repository). Existing reservations describe prior
//! state and are created already resolved.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::network::Network;

/// What kind of claim a reservation represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationKind {
    /// Address chosen from the subnet's free pool.
    Dynamic,
    /// Address declared by the operator.
    Static,
    /// Address the instance already holds from a previous deploy.
    Existing,
}

impl fmt::Display for ReservationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReservationKind::Dynamic => f.write_str("dynamic"),
            ReservationKind::Static => f.write_str("static"),
            ReservationKind::Existing => f.write_str("existing"),
        }
    }
}

/// A claim of `instance_id` on `network`, optionally carrying an address.
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub kind: ReservationKind,
    pub instance_id: String,
    /// AZ of the owning instance, used to pick subnets for dynamic allocation.
    pub az: Option<String>,
    pub network: Arc<Network>,
    address: Option<IpAddr>,
    reserved: bool,
}

impl Reservation {
    fn build(
        kind: ReservationKind,
        instance_id: impl Into<String>,
        az: Option<String>,
        network: Arc<Network>,
        address: Option<IpAddr>,
    ) -> Self {
        Self {
            kind,
            instance_id: instance_id.into(),
            az,
            network,
            address,
            reserved: false,
        }
    }

    /// An unresolved dynamic reservation.
    pub fn dynamic(instance_id: impl Into<String>, az: Option<String>, network: Arc<Network>) -> Self {
        Self::build(ReservationKind::Dynamic, instance_id, az, network, None)
    }

    /// A static reservation for an operator-declared address.
    pub fn new_static(
        instance_id: impl Into<String>,
        az: Option<String>,
        network: Arc<Network>,
        address: IpAddr,
    ) -> Self {
        Self::build(ReservationKind::Static, instance_id, az, network, Some(address))
    }

    /// A reservation describing an address the instance already holds.
    pub fn existing(
        instance_id: impl Into<String>,
        az: Option<String>,
        network: Arc<Network>,
        address: IpAddr,
    ) -> Self {
        Self::build(ReservationKind::Existing, instance_id, az, network, Some(address))
    }

    pub fn address(&self) -> Option<IpAddr> {
        self.address
    }

    pub fn network_name(&self) -> &str {
        &self.network.name
    }

    pub fn is_resolved(&self) -> bool {
        self.address.is_some()
    }

    /// Attach a chosen address.
    pub fn resolve(&mut self, address: IpAddr) {
        self.address = Some(address);
    }

    pub fn is_reserved(&self) -> bool {
        self.reserved
    }

    /// Record that the repository persisted this reservation.
    pub fn mark_reserved(&mut self) {
        self.reserved = true;
    }

    /// Dynamic reservation whose address will be chosen when applied.
    pub fn is_deferred(&self) -> bool {
        self.kind == ReservationKind::Dynamic && self.address.is_none()
    }

    /// Whether the stored record should carry the static flag.
    pub fn is_static_claim(&self) -> bool {
        match self.kind {
            ReservationKind::Static => true,
            ReservationKind::Dynamic => false,
            ReservationKind::Existing => self
                .address
                .is_some_and(|address| self.network.in_static_pool(address)),
        }
    }
}

impl fmt::Display for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address {
            Some(address) => write!(
                f,
                "{{type={}, ip={}, network={}, instance={}}}",
                self.kind, address, self.network.name, self.instance_id
            ),
            None => write!(
                f,
                "{{type={}, network={}, instance={}}}",
                self.kind, self.network.name, self.instance_id
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::AddressSet;
    use crate::network::Subnet;

    fn network() -> Arc<Network> {
        let subnet = Subnet::new("192.168.1.0/24".parse().unwrap())
            .with_static(AddressSet::parse(&["192.168.1.10"]).unwrap());
        Arc::new(Network::manual("a", vec![subnet]).unwrap())
    }

    #[test]
    fn dynamic_starts_unresolved() {
        let mut r = Reservation::dynamic("web/0", None, network());
        assert!(r.is_deferred());
        assert!(!r.is_resolved());

        r.resolve("192.168.1.20".parse().unwrap());
        assert!(r.is_resolved());
        assert!(!r.is_deferred());
        assert!(!r.is_reserved());

        r.mark_reserved();
        assert!(r.is_reserved());
    }

    #[test]
    fn existing_static_flag_follows_pool() {
        let in_static = Reservation::existing("web/0", None, network(), "192.168.1.10".parse().unwrap());
        let in_dynamic = Reservation::existing("web/0", None, network(), "192.168.1.20".parse().unwrap());
        assert!(in_static.is_static_claim());
        assert!(!in_dynamic.is_static_claim());
    }

    #[test]
    fn display_includes_address_when_resolved() {
        let r = Reservation::new_static("web/1", Some("z1".into()), network(), "192.168.1.10".parse().unwrap());
        assert_eq!(r.to_string(), "{type=static, ip=192.168.1.10, network=a, instance=web/1}");
    }
}
