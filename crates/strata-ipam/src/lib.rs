//! strata-ipam: address reservation for Strata.
//!
//! An [`IpRepository`] is the durable record of which instance owns which
//! address on which network; [`IpProvider`] validates reservations and
//! dispatches them to it. Two repositories are provided:
//!
//! - [`DatabaseIpRepo`] over any [`AddressStore`] (a redb `StateStore` in
//!   production). Lock-free; relies on the store's atomic insert-if-absent
//!   and retries on conflict.
//! - [`InMemoryIpRepo`] for simulation, serialising each network through
//!   its own mutex.

pub mod candidates;
pub mod error;
pub mod provider;
pub mod repo;
pub mod store;

pub use error::{IpamError, IpamResult};
pub use provider::IpProvider;
pub use repo::{DatabaseIpRepo, InMemoryIpRepo, IpRepository};
pub use store::AddressStore;
