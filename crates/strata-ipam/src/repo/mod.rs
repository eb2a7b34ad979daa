//! Address repositories: the durable record of who owns which address.

mod database;
mod in_memory;

pub use database::DatabaseIpRepo;
pub use in_memory::InMemoryIpRepo;

use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use strata_core::{Network, Reservation, Subnet};
use strata_state::IpAddressRecord;

use crate::error::{IpamError, IpamResult};

/// Store of committed address reservations.
///
/// Implementations must keep `(address, network)` unique, including under
/// concurrent callers.
pub trait IpRepository: Send + Sync {
    /// Persist a resolved reservation for its instance.
    ///
    /// Fails with [`IpamError::AlreadyInUse`] when another instance owns the
    /// address. An entry of the same instance with a different kind is
    /// updated in place.
    fn add(&self, reservation: &Reservation) -> IpamResult<()>;

    /// Remove the entry for `address`, if any.
    fn delete(&self, address: IpAddr, network: &Network) -> IpamResult<()>;

    /// Claim the first free dynamic-pool address of `subnet`, or `None`
    /// when the subnet is exhausted.
    fn allocate_dynamic_ip(&self, reservation: &Reservation, subnet: &Subnet) -> IpamResult<Option<IpAddr>>;

    /// Claim the first free address of a VIP subnet's list.
    fn allocate_vip_ip(&self, reservation: &Reservation, subnet: &Subnet) -> IpamResult<Option<IpAddr>>;

    /// Entries of one network, ordered by address.
    fn list(&self, network_name: &str) -> IpamResult<Vec<IpAddressRecord>>;
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn new_record(reservation: &Reservation, address: IpAddr, task_id: &str) -> IpAddressRecord {
    IpAddressRecord {
        address,
        network_name: reservation.network_name().to_string(),
        instance_id: reservation.instance_id.clone(),
        static_ip: reservation.is_static_claim(),
        task_id: task_id.to_string(),
        created_at: epoch_secs(),
    }
}

fn resolved_address(reservation: &Reservation) -> IpamResult<IpAddr> {
    reservation
        .address()
        .ok_or_else(|| IpamError::Unresolved(reservation.to_string()))
}

fn check_owned(address: IpAddr, network: &Network) -> IpamResult<()> {
    if network.owns(address) {
        Ok(())
    } else {
        Err(IpamError::IpNotOwned {
            address,
            network: network.name.clone(),
        })
    }
}

fn already_in_use(reservation: &Reservation, address: IpAddr, owner: &str) -> IpamError {
    IpamError::AlreadyInUse {
        address,
        network: reservation.network_name().to_string(),
        instance: reservation.instance_id.clone(),
        owner: owner.to_string(),
    }
}
