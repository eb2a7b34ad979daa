//! StaticIpsAvailabilityZonePicker: one placement pass for an instance group.
//!
//! Order of a pass:
//! 1. validate AZ and static IP declarations and ignored instances
//! 2. bind existing instances that still hold a declared static IP
//! 3. reuse the other existing instances in their AZ, or mark them obsolete
//! 4. fix the remaining ambiguous static IPs to AZs
//! 5. place the remaining desired instances
//!
//! The order decides which existing VMs are kept and must not change.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::net::IpAddr;

use strata_core::Reservation;
use tracing::{debug, info};

use crate::balancer::{Balancer, TieStrategy};
use crate::error::{PlacementError, PlacementResult};
use crate::plan::{DesiredInstance, ExistingInstance, InstancePlan, JobNetwork, NetworkPlan};
use crate::static_ips::NetworksToStaticIps;

pub struct StaticIpsAvailabilityZonePicker {
    group: String,
    job_networks: Vec<JobNetwork>,
    desired_azs: Vec<String>,
    static_ips: NetworksToStaticIps,
    tie: Box<dyn TieStrategy + Send>,
}

impl StaticIpsAvailabilityZonePicker {
    pub fn new(
        group: impl Into<String>,
        job_networks: Vec<JobNetwork>,
        desired_azs: Vec<String>,
        tie: Box<dyn TieStrategy + Send>,
    ) -> PlacementResult<Self> {
        let group = group.into();
        let static_ips = NetworksToStaticIps::create(&job_networks, &desired_azs, &group)?;
        Ok(Self {
            group,
            job_networks,
            desired_azs,
            static_ips,
            tie,
        })
    }

    /// Match desired instances against existing ones and plan every
    /// instance's AZ and network reservations.
    pub fn place_and_match_in(
        &mut self,
        desired: Vec<DesiredInstance>,
        existing: Vec<ExistingInstance>,
    ) -> PlacementResult<Vec<InstancePlan>> {
        let mut pass = Pass {
            group: &self.group,
            job_networks: &self.job_networks,
            desired_azs: &self.desired_azs,
            tie: &mut *self.tie,
            ips: self.static_ips.clone(),
        };

        pass.ips.validate_azs_declared(pass.desired_azs, pass.group)?;
        pass.ips.validate_ips_in_desired_azs(pass.desired_azs, pass.group)?;
        pass.validate_ignored_instances(&existing)?;

        let mut desired: VecDeque<DesiredInstance> = desired.into();
        let mut plans = pass.place_existing(&mut desired, existing)?;
        pass.place_new(desired, &mut plans)?;

        if plans.iter().any(|plan| plan.is_obsolete() && plan.should_be_ignored()) {
            return Err(removed_static_ip(pass.group));
        }
        for plan in &mut plans {
            pass.sort_network_plans(plan);
        }

        info!(
            group = %self.group,
            new = plans.iter().filter(|p| p.is_new()).count(),
            reused = plans.iter().filter(|p| !p.is_new() && !p.is_obsolete()).count(),
            obsolete = plans.iter().filter(|p| p.is_obsolete()).count(),
            "placement complete"
        );
        Ok(plans)
    }
}

fn removed_static_ip(group: &str) -> PlacementError {
    PlacementError::IgnoredInstancesModification(format!(
        "In instance group '{group}', an attempt was made to remove a static ip that is used by an ignored instance. This operation is not allowed."
    ))
}

/// Instances per AZ among the plans that will keep running.
fn az_counts(plans: &[InstancePlan]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for az in plans.iter().filter_map(|plan| plan.az()) {
        *counts.entry(az.to_string()).or_default() += 1;
    }
    counts
}

/// Working state of a single placement pass.
struct Pass<'a> {
    group: &'a str,
    job_networks: &'a [JobNetwork],
    desired_azs: &'a [String],
    tie: &'a mut (dyn TieStrategy + Send),
    ips: NetworksToStaticIps,
}

fn static_networks(networks: &[JobNetwork]) -> impl Iterator<Item = &JobNetwork> {
    networks.iter().filter(|jn| jn.is_static())
}

impl Pass<'_> {
    fn validate_ignored_instances(&self, existing: &[ExistingInstance]) -> PlacementResult<()> {
        let declared: BTreeSet<&str> = self.job_networks.iter().map(JobNetwork::name).collect();
        for instance in existing.iter().filter(|instance| instance.ignore) {
            let current: BTreeSet<&str> = instance
                .ip_addresses
                .iter()
                .map(|ip| ip.network_name.as_str())
                .collect();
            if declared != current {
                return Err(PlacementError::IgnoredInstancesModification(format!(
                    "In instance group '{}', which contains ignored vms, an attempt was made to modify the networks. This operation is not allowed.",
                    self.group
                )));
            }
            for ip in &instance.ip_addresses {
                let removed = self
                    .job_networks
                    .iter()
                    .find(|jn| jn.name() == ip.network_name)
                    .is_some_and(|jn| {
                        !jn.static_ips.contains(&ip.address)
                            && (jn.is_static() || jn.network.in_static_pool(ip.address))
                    });
                if removed {
                    return Err(removed_static_ip(self.group));
                }
            }
        }
        Ok(())
    }

    fn place_existing(
        &mut self,
        desired: &mut VecDeque<DesiredInstance>,
        existing: Vec<ExistingInstance>,
    ) -> PlacementResult<Vec<InstancePlan>> {
        let mut plans = Vec::new();
        let mut unmatched = Vec::new();
        for instance in existing {
            match self.plan_from_existing_ips(desired, &instance)? {
                Some(plan) => plans.push(plan),
                None => unmatched.push(instance),
            }
        }

        for instance in unmatched {
            let plan = self.reuse_or_obsolete(desired, instance, &plans)?;
            plans.push(plan);
        }

        let job_networks = self.job_networks;
        for idx in 0..plans.len() {
            if plans[idx].is_obsolete() {
                continue;
            }
            for jn in job_networks {
                if !jn.is_static() {
                    let plan = &mut plans[idx];
                    let reservation =
                        Reservation::dynamic(plan.instance_id.clone(), plan.az().map(str::to_string), jn.network.clone());
                    plan.network_plans.push(NetworkPlan { reservation });
                } else if plans[idx].network_plan_for(jn.name()).is_none() {
                    let counts = az_counts(&plans);
                    self.create_network_plan_with_az(&mut plans[idx], jn, &counts)?;
                }
            }
        }
        Ok(plans)
    }

    /// Sticky matching: an existing instance holding a declared static IP
    /// keeps it and takes the next desired slot.
    fn plan_from_existing_ips(
        &mut self,
        desired: &mut VecDeque<DesiredInstance>,
        existing: &ExistingInstance,
    ) -> PlacementResult<Option<InstancePlan>> {
        let mut plan: Option<InstancePlan> = None;
        let job_networks = self.job_networks;

        for jn in static_networks(job_networks) {
            let held: Vec<IpAddr> = existing
                .ip_addresses
                .iter()
                .filter(|ip| ip.network_name == jn.name() && jn.static_ips.contains(&ip.address))
                .map(|ip| ip.address)
                .collect();
            let mut planned = false;

            for address in held {
                debug!(instance = %existing.id, %address, network = jn.name(), "existing instance holds static ip");
                if plan.is_none() {
                    let mut created = InstancePlan::existing(existing.clone(), desired.pop_front());
                    if !created.is_obsolete() {
                        self.assign_az_based_on_ip(&mut created, existing, jn, address)?;
                    }
                    plan = Some(created);
                }
                let Some(current) = plan.as_mut() else {
                    continue;
                };

                if !planned && !current.is_obsolete() {
                    let allowed = self
                        .ips
                        .find_by_network_and_ip(jn.name(), address)
                        .is_some_and(|entry| entry.allows(current.az()));
                    if allowed {
                        let reservation = Reservation::new_static(
                            current.instance_id.clone(),
                            current.az().map(str::to_string),
                            jn.network.clone(),
                            address,
                        );
                        current.network_plans.push(NetworkPlan { reservation });
                        planned = true;
                    }
                }

                if current.is_obsolete() {
                    // Obsolete instances must not skew the distribution.
                    self.ips.delete(jn.name(), address);
                } else {
                    self.ips.claim_in_az(jn.name(), address, current.az());
                }
            }
        }
        Ok(plan)
    }

    fn assign_az_based_on_ip(
        &self,
        plan: &mut InstancePlan,
        existing: &ExistingInstance,
        jn: &JobNetwork,
        address: IpAddr,
    ) -> PlacementResult<()> {
        let allowed = self
            .ips
            .find_by_network_and_ip(jn.name(), address)
            .is_some_and(|entry| entry.allows(existing.az.as_deref()));
        if !allowed {
            return Err(PlacementError::ExistingInstanceAzMismatch {
                instance: existing.id.clone(),
                address,
                az: existing.az.clone().unwrap_or_default(),
            });
        }
        debug!(instance = %existing.id, az = ?existing.az, "reusing instance az, it is in the subnet az list");
        plan.set_az(existing.az.clone());
        Ok(())
    }

    /// An existing instance without a declared static IP is reused in its
    /// own AZ when a slot is left and every static network still has an
    /// address there; otherwise it becomes obsolete.
    fn reuse_or_obsolete(
        &mut self,
        desired: &mut VecDeque<DesiredInstance>,
        existing: ExistingInstance,
        plans: &[InstancePlan],
    ) -> PlacementResult<InstancePlan> {
        if desired.is_empty() {
            debug!(instance = %existing.id, "marking instance as obsolete");
            return Ok(InstancePlan::existing(existing, None));
        }

        let az = existing.az.clone();
        // AZ-less instances cannot stay in a zoned group.
        let az_dropped =
            !self.desired_azs.is_empty() && az.as_ref().is_none_or(|az| !self.desired_azs.contains(az));
        if az_dropped {
            debug!(instance = %existing.id, az = ?az, "marking instance as obsolete, az no longer desired");
            return Ok(InstancePlan::existing(existing, None));
        }
        let job_networks = self.job_networks;
        for jn in static_networks(job_networks) {
            if self.ips.find_by_network_and_az(jn.name(), az.as_deref()).is_none() {
                debug!(instance = %existing.id, network = jn.name(), "marking instance as obsolete, not enough IPs in instance az");
                return Ok(InstancePlan::existing(existing, None));
            }
        }

        let Some(mut slot) = desired.pop_front() else {
            return Ok(InstancePlan::existing(existing, None));
        };
        debug!(instance = %existing.id, az = ?az, "reusing instance with new IPs");
        slot.az = az;
        let mut plan = InstancePlan::existing(existing, Some(slot));
        let counts = az_counts(plans);
        for jn in static_networks(job_networks) {
            self.create_network_plan_with_az(&mut plan, jn, &counts)?;
        }
        Ok(plan)
    }

    fn place_new(&mut self, desired: VecDeque<DesiredInstance>, plans: &mut Vec<InstancePlan>) -> PlacementResult<()> {
        self.ips.distribute_evenly_per_zone(self.group)?;

        let mut desired: Vec<DesiredInstance> = desired.into();
        let job_networks = self.job_networks;
        let has_static = static_networks(job_networks).next().is_some();
        if !has_static && !self.desired_azs.is_empty() {
            self.balance_dynamic(&mut desired, plans);
        }

        for slot in desired {
            let mut plan = InstancePlan::new_instance(self.group, slot);
            for jn in static_networks(job_networks) {
                let counts = az_counts(plans);
                self.create_network_plan_with_az(&mut plan, jn, &counts)?;
            }
            for jn in job_networks.iter().filter(|jn| !jn.is_static()) {
                let reservation =
                    Reservation::dynamic(plan.instance_id.clone(), plan.az().map(str::to_string), jn.network.clone());
                plan.network_plans.push(NetworkPlan { reservation });
            }
            debug!(instance = %plan.instance_id, az = ?plan.az(), "placed new instance");
            plans.push(plan);
        }
        Ok(())
    }

    /// AZs for groups without static networks: least loaded first, zones
    /// of obsolete instances winning ties.
    fn balance_dynamic(&mut self, desired: &mut [DesiredInstance], plans: &[InstancePlan]) {
        let counts = az_counts(plans);
        let weights = self
            .desired_azs
            .iter()
            .map(|az| (az.clone(), counts.get(az).copied().unwrap_or(0)));
        let preferred: Vec<String> = plans
            .iter()
            .filter(|plan| plan.is_obsolete())
            .filter_map(|plan| plan.existing.as_ref()?.az.clone())
            .filter(|az| self.desired_azs.contains(az))
            .collect();
        let mut balancer = Balancer::new(weights, preferred, &mut *self.tie);
        for slot in desired.iter_mut() {
            slot.az = balancer.pop();
        }
    }

    /// Claim a static IP on `jn` for `plan`, assigning the plan an AZ first
    /// when it has none.
    fn create_network_plan_with_az(
        &mut self,
        plan: &mut InstancePlan,
        jn: &JobNetwork,
        counts: &BTreeMap<String, usize>,
    ) -> PlacementResult<()> {
        let address = match plan.az() {
            None => {
                let entry = self
                    .ips
                    .next_ip_for_network(jn.name())
                    .ok_or(PlacementError::StaticIpsExhausted)?;
                let address = entry.ip;
                let candidates = entry.az_names.clone();
                let az = if candidates.len() == 1 {
                    debug!(instance = %plan.instance_id, az = ?candidates[0], "assigning az");
                    candidates[0].clone()
                } else {
                    let az = self.least_loaded(&candidates, counts);
                    debug!(instance = %plan.instance_id, az = ?az, "assigning az based on least number of instances");
                    az
                };
                plan.set_az(az);
                address
            }
            Some(az) => {
                self.ips
                    .find_by_network_and_az(jn.name(), Some(az))
                    .ok_or(PlacementError::StaticIpsExhausted)?
                    .ip
            }
        };

        debug!(%address, network = jn.name(), az = ?plan.az(), instance = %plan.instance_id, "claiming static ip");
        self.ips.claim_in_az(jn.name(), address, plan.az());
        let reservation = Reservation::new_static(
            plan.instance_id.clone(),
            plan.az().map(str::to_string),
            jn.network.clone(),
            address,
        );
        plan.network_plans.push(NetworkPlan { reservation });
        Ok(())
    }

    fn least_loaded(&mut self, candidates: &[Option<String>], counts: &BTreeMap<String, usize>) -> Option<String> {
        if candidates.iter().any(Option::is_none) {
            return None;
        }
        let weights = candidates
            .iter()
            .flatten()
            .map(|az| (az.clone(), counts.get(az).copied().unwrap_or(0)));
        Balancer::new(weights, Vec::new(), &mut *self.tie).pop()
    }

    fn sort_network_plans(&self, plan: &mut InstancePlan) {
        plan.network_plans.sort_by_key(|np| {
            self.job_networks
                .iter()
                .position(|jn| jn.name() == np.network_name())
                .unwrap_or(usize::MAX)
        });
    }
}
