//! Instance and network plans produced by a placement pass.

use std::net::IpAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strata_core::{Network, Reservation};

/// One instance the group should run. `az` is filled in by placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredInstance {
    pub index: u32,
    pub az: Option<String>,
}

impl DesiredInstance {
    pub fn new(index: u32) -> Self {
        Self { index, az: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingIp {
    pub network_name: String,
    pub address: IpAddr,
}

/// An instance recorded by the previous deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingInstance {
    pub id: String,
    pub index: u32,
    pub az: Option<String>,
    pub ip_addresses: Vec<ExistingIp>,
    /// Frozen by the operator; must never be recreated or torn down.
    pub ignore: bool,
}

/// A network as used by one instance group.
#[derive(Debug, Clone)]
pub struct JobNetwork {
    pub network: Arc<Network>,
    /// Declared static addresses; empty for a dynamic network.
    pub static_ips: Vec<IpAddr>,
}

impl JobNetwork {
    pub fn dynamic(network: Arc<Network>) -> Self {
        Self {
            network,
            static_ips: Vec::new(),
        }
    }

    pub fn with_static(network: Arc<Network>, static_ips: Vec<IpAddr>) -> Self {
        Self { network, static_ips }
    }

    pub fn name(&self) -> &str {
        &self.network.name
    }

    pub fn is_static(&self) -> bool {
        !self.static_ips.is_empty()
    }
}

/// The reservation an instance will hold on one network. Dynamic plans
/// carry an unresolved reservation applied later through the provider.
#[derive(Debug, Clone)]
pub struct NetworkPlan {
    pub reservation: Reservation,
}

impl NetworkPlan {
    pub fn network_name(&self) -> &str {
        self.reservation.network_name()
    }

    pub fn address(&self) -> Option<IpAddr> {
        self.reservation.address()
    }

    pub fn is_deferred(&self) -> bool {
        self.reservation.is_deferred()
    }
}

/// Pairing of a desired slot with an existing instance.
///
/// Desired only: new instance. Both: existing instance reused.
/// Existing only: obsolete, to be torn down.
#[derive(Debug, Clone)]
pub struct InstancePlan {
    pub instance_id: String,
    pub desired: Option<DesiredInstance>,
    pub existing: Option<ExistingInstance>,
    pub network_plans: Vec<NetworkPlan>,
}

impl InstancePlan {
    pub fn new_instance(group: &str, desired: DesiredInstance) -> Self {
        Self {
            instance_id: format!("{group}/{}", desired.index),
            desired: Some(desired),
            existing: None,
            network_plans: Vec::new(),
        }
    }

    pub fn existing(existing: ExistingInstance, desired: Option<DesiredInstance>) -> Self {
        Self {
            instance_id: existing.id.clone(),
            desired,
            existing: Some(existing),
            network_plans: Vec::new(),
        }
    }

    pub fn is_new(&self) -> bool {
        self.existing.is_none()
    }

    pub fn is_obsolete(&self) -> bool {
        self.desired.is_none()
    }

    pub fn should_be_ignored(&self) -> bool {
        self.existing.as_ref().is_some_and(|existing| existing.ignore)
    }

    /// AZ the instance will run in, once assigned.
    pub fn az(&self) -> Option<&str> {
        self.desired.as_ref().and_then(|desired| desired.az.as_deref())
    }

    pub fn set_az(&mut self, az: Option<String>) {
        if let Some(desired) = self.desired.as_mut() {
            desired.az = az;
        }
    }

    pub fn network_plan_for(&self, network_name: &str) -> Option<&NetworkPlan> {
        self.network_plans
            .iter()
            .find(|plan| plan.network_name() == network_name)
    }
}
