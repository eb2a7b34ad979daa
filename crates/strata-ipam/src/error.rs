//! Address management error types.

use std::net::IpAddr;

use thiserror::Error;

/// Errors raised by the repository and the provider.
#[derive(Debug, Error)]
pub enum IpamError {
    #[error(
        "Failed to reserve IP '{address}' for instance '{instance}': already reserved by instance '{owner}' on network '{network}'"
    )]
    AlreadyInUse {
        address: IpAddr,
        network: String,
        instance: String,
        owner: String,
    },

    #[error("IP '{address}' does not belong to any subnet of network '{network}'")]
    IpOutsideSubnet { address: IpAddr, network: String },

    #[error("Failed to reserve IP '{address}' for network '{network}': IP belongs to reserved range")]
    IpReserved { address: IpAddr, network: String },

    #[error("Failed to reserve IP '{address}' for instance '{instance}' on network '{network}': {kind} reservations must come from the {expected} pool")]
    WrongType {
        address: IpAddr,
        network: String,
        instance: String,
        kind: String,
        expected: &'static str,
    },

    #[error("Can't release reservation without an IP: {0}")]
    IpMissing(String),

    #[error("IP '{address}' does not belong to the static or dynamic pool of network '{network}'")]
    IpNotOwned { address: IpAddr, network: String },

    #[error("Failed to reserve IP for instance '{instance}' on network '{network}': no more available")]
    NotEnoughCapacity { network: String, instance: String },

    #[error("reservation {reservation} could not be persisted after {attempts} attempts")]
    ReservationConflict { reservation: String, attempts: u32 },

    #[error("reservation has no address: {0}")]
    Unresolved(String),

    #[error("unknown network: {0}")]
    UnknownNetwork(String),

    #[error("state store error: {0}")]
    State(#[from] strata_state::StateError),
}

pub type IpamResult<T> = Result<T, IpamError>;
