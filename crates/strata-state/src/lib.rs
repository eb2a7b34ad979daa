//! strata-state: embedded reservation store for Strata.
//!
//! Backed by [redb](https://docs.rs/redb), persists which instance owns
//! which address on which network, and in what order addresses were
//! released. Supports on-disk and in-memory backends.
//!
//! # Architecture
//!
//! Records are JSON-serialized into redb's `&[u8]` value columns under
//! `{network}/{address}` keys. Check-and-write operations run inside a
//! single write transaction; redb serialises writers, which makes
//! [`StateStore::insert_ip_if_absent`] the unique-constraint authority
//! the allocator relies on.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across worker threads.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
