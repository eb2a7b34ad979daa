//! redb table definitions for the reservation store.
//!
//! Address keys follow `{network_name}/{address}`, so every entry of one
//! network shares a key prefix.

use redb::TableDefinition;

/// Repository entries (JSON `IpAddressRecord`), unique per network and address.
pub const IP_ADDRESSES: TableDefinition<&str, &[u8]> = TableDefinition::new("ip_addresses");

/// Release sequence number of each released address, keyed like `IP_ADDRESSES`.
pub const IP_RELEASES: TableDefinition<&str, u64> = TableDefinition::new("ip_releases");

/// Monotonic counters keyed by name.
pub const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");

/// Counter backing `IP_RELEASES` sequence numbers.
pub const RELEASE_SEQ: &str = "release_seq";
