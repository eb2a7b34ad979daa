//! IpProvider: validates reservations and dispatches them to a repository.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use strata_core::{Network, NetworkKind, Reservation, ReservationKind};
use tracing::{debug, info};

use crate::error::{IpamError, IpamResult};
use crate::repo::IpRepository;

/// Facade over an [`IpRepository`] for a fixed set of networks.
pub struct IpProvider<R> {
    repo: R,
    networks: BTreeMap<String, Arc<Network>>,
}

impl<R: IpRepository> IpProvider<R> {
    pub fn new(repo: R, networks: impl IntoIterator<Item = Arc<Network>>) -> Self {
        Self {
            repo,
            networks: networks
                .into_iter()
                .map(|network| (network.name.clone(), network))
                .collect(),
        }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn network(&self, name: &str) -> IpamResult<&Arc<Network>> {
        self.networks
            .get(name)
            .ok_or_else(|| IpamError::UnknownNetwork(name.to_string()))
    }

    /// Persist `reservation`, choosing an address first when it has none.
    ///
    /// Explicit addresses are checked against the network's subnets unless
    /// the reservation is `Existing`. On success the reservation is resolved
    /// and marked reserved.
    pub fn reserve(&self, reservation: &mut Reservation) -> IpamResult<()> {
        match reservation.address() {
            Some(address) => {
                check_explicit(reservation, address)?;
                self.repo.add(reservation)?;
                reservation.mark_reserved();
                debug!(%reservation, "reserved explicit address");
                Ok(())
            }
            None => self.reserve_any(reservation),
        }
    }

    fn reserve_any(&self, reservation: &mut Reservation) -> IpamResult<()> {
        let network = reservation.network.clone();
        if network.kind == NetworkKind::Dynamic {
            debug!(network = %network.name, instance = %reservation.instance_id, "address assigned by infrastructure");
            return Ok(());
        }

        let az = reservation.az.clone();
        for subnet in network.subnets_for_az(az.as_deref()) {
            let allocated = match network.kind {
                NetworkKind::Vip => self.repo.allocate_vip_ip(reservation, subnet)?,
                _ => self.repo.allocate_dynamic_ip(reservation, subnet)?,
            };
            if let Some(address) = allocated {
                reservation.resolve(address);
                self.repo.add(reservation)?;
                reservation.mark_reserved();
                info!(%reservation, "allocated address");
                return Ok(());
            }
        }

        Err(IpamError::NotEnoughCapacity {
            network: network.name.clone(),
            instance: reservation.instance_id.clone(),
        })
    }

    /// Release the address a reservation holds.
    pub fn release(&self, reservation: &Reservation) -> IpamResult<()> {
        match reservation.address() {
            Some(address) => self.repo.delete(address, &reservation.network),
            None if reservation.network.kind == NetworkKind::Dynamic => Ok(()),
            None => Err(IpamError::IpMissing(reservation.to_string())),
        }
    }

    /// Release by address alone.
    pub fn delete(&self, address: IpAddr, network_name: &str) -> IpamResult<()> {
        let network = self.network(network_name)?;
        self.repo.delete(address, network)
    }
}

fn check_explicit(reservation: &Reservation, address: IpAddr) -> IpamResult<()> {
    if reservation.kind == ReservationKind::Existing {
        return Ok(());
    }
    let network = reservation.network_name();
    let Some(subnet) = reservation.network.subnet_containing(address) else {
        return Err(IpamError::IpOutsideSubnet {
            address,
            network: network.to_string(),
        });
    };
    if subnet.is_reserved(address) {
        return Err(IpamError::IpReserved {
            address,
            network: network.to_string(),
        });
    }
    let expected = match reservation.kind {
        ReservationKind::Dynamic if subnet.is_static(address) => Some("dynamic"),
        ReservationKind::Static if !subnet.is_static(address) => Some("static"),
        _ => None,
    };
    match expected {
        Some(expected) => Err(IpamError::WrongType {
            address,
            network: network.to_string(),
            instance: reservation.instance_id.clone(),
            kind: reservation.kind.to_string(),
            expected,
        }),
        None => Ok(()),
    }
}
