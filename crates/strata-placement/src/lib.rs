//! strata-placement: AZ placement for an instance group.
//!
//! Given the desired instance count, the group's AZs and networks, and the
//! instances that already exist, [`StaticIpsAvailabilityZonePicker`]
//! decides which existing instances are kept, which become obsolete, and
//! which AZ and static IP every instance gets.
//!
//! # Components
//!
//! - **`balancer`**: least-loaded choice with `MinWins` / `RandomWins` tie-breaks
//! - **`static_ips`**: declared static IPs mapped to candidate AZs
//! - **`brute_force`**: backtracking search that fixes ambiguous IPs to AZs
//! - **`picker`**: the placement pass itself
//! - **`convert`**: building placement inputs from `strata.toml`

pub mod balancer;
pub mod brute_force;
pub mod convert;
pub mod error;
pub mod picker;
pub mod plan;
pub mod static_ips;

pub use balancer::{Balancer, MinWins, RandomWins, TieStrategy};
pub use brute_force::BruteForceIpAllocation;
pub use convert::{GroupInput, tie_strategy};
pub use error::{PlacementError, PlacementResult};
pub use picker::StaticIpsAvailabilityZonePicker;
pub use plan::{DesiredInstance, ExistingInstance, ExistingIp, InstancePlan, JobNetwork, NetworkPlan};
pub use static_ips::{NetworkStaticIps, NetworksToStaticIps, StaticIpToAzs};
