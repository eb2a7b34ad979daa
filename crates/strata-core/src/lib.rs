//! strata-core: shared types for address allocation and placement.
//!
//! Addresses, subnets, networks and reservations used by the repository
//! (`strata-ipam`) and the placement planner (`strata-placement`), plus
//! the `strata.toml` config parser.

pub mod address;
pub mod config;
pub mod error;
pub mod network;
pub mod reservation;

pub use address::{AddressSet, Family, from_numeric, parse_address, to_numeric};
pub use config::{StrataConfig, TieStrategyName};
pub use error::{CoreError, CoreResult};
pub use network::{AvailabilityZone, Network, NetworkKind, Subnet};
pub use reservation::{Reservation, ReservationKind};
