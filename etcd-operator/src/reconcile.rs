//! Membership reconciliation.
//!
//! A pass asks etcd who its members are, resolves each reported member to
//! a canonical name and replaces the cluster's tracked member set with the
//! result. The pass is all or nothing: if any member fails to resolve, the
//! tracked set is left exactly as it was.
//!
//! # Exclusivity
//!
//! [`MembershipReconciler::reconcile`] takes the cluster's [`ClusterState`]
//! by `&mut`. Callers must run at most one pass per cluster at a time; the
//! controller does this by keeping each cluster's state behind its own lock.
//! Different clusters reconcile independently.

use crate::config::ReconcilerConfig;
use crate::error::{NameFormatError, OperatorError, OperatorResult};
use crate::etcd::{EtcdTlsConfig, MemberLister};
use crate::identity::{BootstrapPolicy, RawMember, ResolveIdentity};
use crate::member::{Member, MemberSet};
use crate::naming;
use crate::workload::{PodIpIndex, WorkloadLister};
use std::sync::Arc;

/// Cluster-wide facts every member inherits.
#[derive(Debug, Clone, Default)]
pub struct ClusterProfile {
    /// Cluster name; prefix of every member name.
    pub name: String,
    /// Namespace the cluster lives in.
    pub namespace: String,
    /// Peer traffic uses TLS.
    pub secure_peer: bool,
    /// Client traffic uses TLS.
    pub secure_client: bool,
    /// How the cluster was bootstrapped.
    pub bootstrap: BootstrapPolicy,
}

impl ClusterProfile {
    /// Whether the cluster is self-hosted.
    pub fn is_self_hosted(&self) -> bool {
        self.bootstrap.is_self_hosted()
    }

    /// Describe a member that etcd does not know about yet.
    ///
    /// Pure: performs no I/O and touches no state. Callers pick the counter,
    /// normally via [`ClusterState::next_member`].
    pub fn new_member(&self, counter: u64) -> Member {
        Member {
            name: naming::member_name(&self.name, counter),
            namespace: self.namespace.clone(),
            secure_peer: self.secure_peer,
            secure_client: self.secure_client,
            self_hosted: self.is_self_hosted(),
            ..Default::default()
        }
    }
}

/// What the operator tracks about one cluster between passes.
#[derive(Debug, Clone, Default)]
pub struct ClusterState {
    members: MemberSet,
    member_counter: u64,
    boot_member_deferrals: u32,
}

impl ClusterState {
    /// State of a cluster the operator has not reconciled yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// State resumed from a previously recorded counter, e.g. after an
    /// operator restart.
    pub fn with_member_counter(member_counter: u64) -> Self {
        Self {
            member_counter,
            ..Self::default()
        }
    }

    /// Members installed by the last successful pass.
    pub fn members(&self) -> &MemberSet {
        &self.members
    }

    /// Counter the next new member will be named with.
    pub fn member_counter(&self) -> u64 {
        self.member_counter
    }

    /// Consecutive passes that stopped at the boot member.
    pub fn boot_member_deferrals(&self) -> u32 {
        self.boot_member_deferrals
    }

    /// Describe the next new member and reserve its counter.
    ///
    /// Fails once the counter space is used up; the counter is left as is.
    pub fn next_member(&mut self, profile: &ClusterProfile) -> OperatorResult<Member> {
        let member = profile.new_member(self.member_counter);
        self.member_counter = successor(&member.name, self.member_counter)?;
        Ok(member)
    }

    fn observe_counter(&mut self, name: &str, counter: u64) -> Result<(), NameFormatError> {
        let next = successor(name, counter)?;
        if next > self.member_counter {
            self.member_counter = next;
        }
        Ok(())
    }
}

fn successor(name: &str, counter: u64) -> Result<u64, NameFormatError> {
    counter.checked_add(1).ok_or_else(|| NameFormatError {
        name: name.to_string(),
        reason: format!("has counter {} with no successor", counter),
    })
}

/// Runs membership reconciliation passes.
#[derive(Clone)]
pub struct MembershipReconciler {
    store: Arc<dyn MemberLister>,
    workloads: Arc<dyn WorkloadLister>,
    config: ReconcilerConfig,
}

impl MembershipReconciler {
    /// Create a reconciler over the given etcd and pod listers.
    pub fn new(
        store: Arc<dyn MemberLister>,
        workloads: Arc<dyn WorkloadLister>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            workloads,
            config,
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Replace `state`'s members with etcd's current view.
    ///
    /// `known` is only used to address etcd: its client URLs are the
    /// endpoints queried. On success the tracked set is replaced wholesale.
    /// On any error it is left untouched; the member counter may still have
    /// risen, since it only ever moves up.
    ///
    /// # Errors
    ///
    /// - Transport errors from etcd or the Kubernetes API, unchanged.
    /// - [`OperatorError::BootMemberPending`] while a self-hosted cluster
    ///   still contains its boot member.
    /// - Fatal errors for members that can never be resolved.
    pub async fn reconcile(
        &self,
        profile: &ClusterProfile,
        state: &mut ClusterState,
        known: &MemberSet,
        tls: Option<&EtcdTlsConfig>,
    ) -> OperatorResult<()> {
        let reported = self.store.list_members(&known.client_urls(), tls).await?;

        let pod_ips = if profile.is_self_hosted() {
            let selector = self.config.cluster_selector(&profile.name);
            let workloads = self
                .workloads
                .list_workloads(&profile.namespace, &selector)
                .await?;
            Some(PodIpIndex::build(&workloads))
        } else {
            None
        };

        let mut members = MemberSet::new();
        for raw in &reported {
            let member = match self.resolve_member(profile, state, raw, pod_ips.as_ref()) {
                Ok(member) => member,
                Err(OperatorError::BootMemberPending { name, endpoint }) => {
                    return Err(self.defer_on_boot_member(profile, state, name, endpoint));
                }
                Err(e) => {
                    if e.is_fatal() {
                        tracing::error!(
                            cluster = %profile.name,
                            member_id = raw.id,
                            error = %e,
                            "Member cannot be resolved"
                        );
                    }
                    return Err(e);
                }
            };
            members.add(member);
        }

        tracing::info!(
            cluster = %profile.name,
            members = %members,
            member_counter = state.member_counter,
            "Reconciled cluster membership"
        );

        state.boot_member_deferrals = 0;
        state.members = members;
        Ok(())
    }

    fn resolve_member(
        &self,
        profile: &ClusterProfile,
        state: &mut ClusterState,
        raw: &RawMember,
        pod_ips: Option<&PodIpIndex>,
    ) -> OperatorResult<Member> {
        let name = profile.bootstrap.resolve(raw, &profile.name)?;
        let counter = naming::counter_from_member_name(&name)?;
        state.observe_counter(&name, counter)?;

        let mut member = Member {
            name,
            namespace: profile.namespace.clone(),
            id: raw.id,
            secure_peer: profile.secure_peer,
            secure_client: profile.secure_client,
            ..Default::default()
        };

        if let Some(index) = pod_ips {
            let ip = index
                .lookup(&member.name)
                .ok_or_else(|| OperatorError::MissingPodIp {
                    name: member.name.clone(),
                    id: raw.id,
                })?;
            member.pod_ip = Some(ip.to_string());
            member.self_hosted = true;
        }

        tracing::debug!(
            cluster = %profile.name,
            member = %member.name,
            member_id = member.id,
            counter,
            "Resolved member"
        );
        Ok(member)
    }

    fn defer_on_boot_member(
        &self,
        profile: &ClusterProfile,
        state: &mut ClusterState,
        name: String,
        endpoint: String,
    ) -> OperatorError {
        state.boot_member_deferrals += 1;
        let passes = state.boot_member_deferrals;

        if let Some(max) = self.config.max_boot_member_deferrals {
            if passes > max {
                tracing::error!(
                    cluster = %profile.name,
                    boot_member = %name,
                    passes,
                    "Boot member was never removed"
                );
                return OperatorError::BootMemberNotRemoved { name, passes };
            }
        }

        tracing::warn!(
            cluster = %profile.name,
            boot_member = %name,
            endpoint = %endpoint,
            passes,
            "Waiting for boot member removal"
        );
        OperatorError::BootMemberPending { name, endpoint }
    }
}
