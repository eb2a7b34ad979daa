//! Placement error types.

use std::net::IpAddr;

use thiserror::Error;

/// Errors raised while planning an instance group.
#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("invalid network definition: {0}")]
    Core(#[from] strata_core::CoreError),

    #[error("Instance group '{group}' must specify availability zones that match availability zones of network '{network}'")]
    InvalidAvailabilityZone { group: String, network: String },

    #[error("Instance group '{group}' references unknown availability zone '{az}'")]
    UnknownAvailabilityZone { group: String, az: String },

    #[error("Instance group '{group}' declares static ip '{address}' which does not belong to any of the instance group's availability zones")]
    StaticIpsFromInvalidAvailabilityZone { group: String, address: IpAddr },

    #[error("Instance group '{group}' declares static ip '{address}', which belongs to no subnet of network '{network}'")]
    StaticIpNotInSubnet {
        group: String,
        network: String,
        address: IpAddr,
    },

    #[error("Instance group '{group}' has {instances} instances but was allocated {declared} static IPs in network '{network}'")]
    StaticIpCountMismatch {
        group: String,
        network: String,
        instances: usize,
        declared: usize,
    },

    #[error("{0}")]
    IgnoredInstancesModification(String),

    #[error("Failed to evenly distribute static IPs between zones for instance group '{group}'")]
    NoSolution { group: String },

    #[error("Existing instance '{instance}' is using IP '{address}' in availability zone '{az}'")]
    ExistingInstanceAzMismatch {
        instance: String,
        address: IpAddr,
        az: String,
    },

    #[error("Failed to distribute static IPs to satisfy existing instance reservations")]
    StaticIpsExhausted,

    #[error("unknown network: {0}")]
    UnknownNetwork(String),
}

pub type PlacementResult<T> = Result<T, PlacementError>;
