//! EtcdCluster controller.
//!
//! Feeds the running pods of each cluster into a membership reconciliation
//! pass and records the outcome in the cluster's status.

use super::{cluster_key, ControllerContext, ReconcileAction};
use crate::crd::{ClusterCondition, ClusterPhase, EtcdCluster, EtcdClusterStatus, MembersStatus};
use crate::error::{ErrorKind, OperatorError, OperatorResult};
use crate::etcd::EtcdTlsConfig;
use crate::member::{pods_to_member_set, Member, MemberSet};
use crate::reconcile::ClusterProfile;
use crate::workload::{is_pod_ready, is_pod_running};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, ResourceExt};
use std::sync::Arc;

/// Controller for EtcdCluster resources.
#[derive(Clone)]
pub struct ClusterController {
    ctx: Arc<ControllerContext>,
}

impl ClusterController {
    /// Create a new cluster controller.
    pub fn new(ctx: Arc<ControllerContext>) -> Self {
        Self { ctx }
    }

    /// Reconcile an EtcdCluster resource.
    ///
    /// 1. Lists the cluster's running pods and uses them to address etcd
    /// 2. Runs a membership reconciliation pass against the cluster's state
    /// 3. Records members, counter and phase in the status
    ///
    /// Fatal reconciliation errors move the cluster to `Failed` and stop
    /// further reconciliation. Everything else is retried.
    pub async fn reconcile(&self, cluster: Arc<EtcdCluster>) -> OperatorResult<ReconcileAction> {
        let name = cluster.name_any();
        let namespace = cluster
            .namespace()
            .ok_or_else(|| OperatorError::InvalidConfig("Cluster must be namespaced".into()))?;

        let key = cluster_key(&namespace, &name);

        if cluster.metadata.deletion_timestamp.is_some() {
            tracing::info!(name = %name, "Cluster is being deleted, dropping its state");
            self.ctx.forget_cluster(&key);
            return Ok(ReconcileAction::Done);
        }

        let status = cluster.status.clone().unwrap_or_default();
        if status.phase == ClusterPhase::Failed {
            tracing::debug!(name = %name, reason = ?status.reason, "Cluster has failed, skipping");
            return Ok(ReconcileAction::Done);
        }
        if cluster.spec.paused {
            tracing::info!(name = %name, "Cluster is paused, skipping");
            return Ok(ReconcileAction::requeue_medium());
        }

        tracing::info!(
            name = %name,
            namespace = %namespace,
            size = cluster.spec.size,
            self_hosted = cluster.spec.self_hosted.is_some(),
            skip_boot_member_removal = cluster.spec.skips_boot_member_removal(),
            server_secret = ?cluster.spec.server_secret(),
            "Reconciling EtcdCluster"
        );

        let profile = ClusterProfile {
            name: name.clone(),
            namespace: namespace.clone(),
            secure_peer: cluster.spec.is_secure_peer(),
            secure_client: cluster.spec.is_secure_client(),
            bootstrap: cluster.spec.bootstrap_policy(),
        };

        let pods = self.list_pods(&profile).await?;
        let running: Vec<Pod> = pods.iter().filter(|p| is_pod_running(p)).cloned().collect();
        if running.is_empty() {
            tracing::info!(name = %name, "No running pods yet, waiting");
            return Ok(ReconcileAction::requeue_short());
        }
        let known = self.known_members(&profile, &running);

        let tls = match cluster.spec.operator_secret() {
            Some(secret) => {
                Some(EtcdTlsConfig::from_secret(self.ctx.client.clone(), &namespace, secret).await?)
            }
            None => None,
        };

        let state = self
            .ctx
            .states
            .get_or_create(&key, cluster.uid().as_deref(), status.member_counter);
        let mut state = state.lock().await;

        let api: Api<EtcdCluster> = Api::namespaced(self.ctx.client.clone(), &namespace);
        match self
            .ctx
            .reconciler
            .reconcile(&profile, &mut state, &known, tls.as_ref())
            .await
        {
            Ok(()) => {
                let node_label = &self.ctx.reconciler.config().node_label;
                let members = members_status(state.members(), &pods, node_label);
                let conditions = ready_condition(
                    &status.conditions,
                    true,
                    "MembersReconciled",
                    format!(
                        "{} members ({} ready)",
                        state.members().size(),
                        members.ready.len()
                    ),
                );
                self.update_status(
                    &api,
                    &name,
                    EtcdClusterStatus {
                        phase: ClusterPhase::Running,
                        reason: None,
                        members,
                        conditions,
                        member_counter: state.member_counter(),
                        last_updated: Some(chrono::Utc::now().to_rfc3339()),
                        ..status
                    },
                )
                .await?;
                Ok(ReconcileAction::requeue_long())
            }
            Err(e) if e.kind() == ErrorKind::Fatal => {
                tracing::error!(name = %name, error = %e, "Cluster failed, stopping reconciliation");
                self.update_status(
                    &api,
                    &name,
                    EtcdClusterStatus {
                        phase: ClusterPhase::Failed,
                        reason: Some(e.to_string()),
                        conditions: ready_condition(
                            &status.conditions,
                            false,
                            "ReconcileFailed",
                            e.to_string(),
                        ),
                        member_counter: state.member_counter(),
                        last_updated: Some(chrono::Utc::now().to_rfc3339()),
                        ..status
                    },
                )
                .await?;
                self.ctx.forget_cluster(&key);
                Ok(ReconcileAction::Done)
            }
            Err(e) => {
                tracing::warn!(
                    name = %name,
                    kind = %e.kind(),
                    error = %e,
                    "Membership reconciliation failed, will retry"
                );
                Ok(ReconcileAction::requeue_short())
            }
        }
    }

    /// Pods labelled as belonging to the cluster.
    async fn list_pods(&self, profile: &ClusterProfile) -> OperatorResult<Vec<Pod>> {
        let pods: Api<Pod> = Api::namespaced(self.ctx.client.clone(), &profile.namespace);
        let selector = self.ctx.reconciler.config().cluster_selector(&profile.name);
        let pod_list = pods.list(&ListParams::default().labels(&selector)).await?;
        Ok(pod_list.items)
    }

    /// Members addressable through the given pods.
    fn known_members(&self, profile: &ClusterProfile, running: &[Pod]) -> MemberSet {
        let known = pods_to_member_set(running, profile.secure_client);
        if !profile.is_self_hosted() {
            return known;
        }
        known
            .iter()
            .cloned()
            .map(|m| Member {
                self_hosted: true,
                ..m
            })
            .collect()
    }

    /// Update the cluster status.
    async fn update_status(
        &self,
        api: &Api<EtcdCluster>,
        name: &str,
        status: EtcdClusterStatus,
    ) -> OperatorResult<()> {
        let patch = serde_json::json!({
            "status": status
        });

        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;

        Ok(())
    }
}

/// Split members by whether a ready pod backs them.
///
/// A pod backs a member when it carries the member's name, or, for
/// self-hosted members, when its `node_label` carries it.
pub fn members_status(members: &MemberSet, pods: &[Pod], node_label: &str) -> MembersStatus {
    let ready_pod_for = |member: &str| {
        pods.iter().filter(|p| is_pod_ready(p)).any(|p| {
            p.name_any() == member || p.labels().get(node_label).is_some_and(|n| n == member)
        })
    };

    let (ready, unready): (Vec<String>, Vec<String>) = members
        .names()
        .map(str::to_string)
        .partition(|name| ready_pod_for(name.as_str()));

    MembersStatus { ready, unready }
}

/// Conditions with the `Ready` condition set to `ready`.
///
/// The transition time is kept when the status does not change. Other
/// conditions are carried over untouched.
pub fn ready_condition(
    previous: &[ClusterCondition],
    ready: bool,
    reason: &str,
    message: String,
) -> Vec<ClusterCondition> {
    let status = if ready { "True" } else { "False" }.to_string();
    let last_transition_time = previous
        .iter()
        .find(|c| c.condition_type == "Ready" && c.status == status)
        .and_then(|c| c.last_transition_time.clone())
        .or_else(|| Some(chrono::Utc::now().to_rfc3339()));

    let mut conditions: Vec<ClusterCondition> = previous
        .iter()
        .filter(|c| c.condition_type != "Ready")
        .cloned()
        .collect();
    conditions.push(ClusterCondition {
        condition_type: "Ready".to_string(),
        status,
        last_transition_time,
        reason: Some(reason.to_string()),
        message: Some(message),
    });
    conditions
}

/// Handle errors during reconciliation.
pub fn error_policy(
    _cluster: Arc<EtcdCluster>,
    error: &OperatorError,
    _ctx: Arc<ControllerContext>,
) -> kube::runtime::controller::Action {
    tracing::error!(error = %error, kind = %error.kind(), "Reconciliation error");
    if error.is_fatal() {
        return kube::runtime::controller::Action::await_change();
    }
    kube::runtime::controller::Action::requeue(std::time::Duration::from_secs(30))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{PodCondition, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn pod(name: &str, node: Option<&str>, ready: bool) -> Pod {
        let labels: BTreeMap<String, String> = node
            .map(|n| ("etcd_node".to_string(), n.to_string()))
            .into_iter()
            .collect();
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                conditions: Some(vec![PodCondition {
                    type_: "Ready".to_string(),
                    status: if ready { "True" } else { "False" }.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn member(name: &str) -> Member {
        Member {
            name: name.to_string(),
            namespace: "default".to_string(),
            ..Default::default()
        }
    }

    fn condition(type_: &str, status: &str, at: &str) -> ClusterCondition {
        ClusterCondition {
            condition_type: type_.to_string(),
            status: status.to_string(),
            last_transition_time: Some(at.to_string()),
            reason: None,
            message: None,
        }
    }

    #[test]
    fn ready_condition_keeps_transition_time_while_unchanged() {
        let previous = vec![
            condition("Ready", "True", "2024-01-01T00:00:00+00:00"),
            condition("Degraded", "False", "2024-01-01T00:00:00+00:00"),
        ];

        let conditions = ready_condition(&previous, true, "MembersReconciled", "3 members".into());
        assert_eq!(conditions.len(), 2);
        let ready = conditions
            .iter()
            .find(|c| c.condition_type == "Ready")
            .unwrap();
        assert_eq!(
            ready.last_transition_time.as_deref(),
            Some("2024-01-01T00:00:00+00:00")
        );
        assert_eq!(ready.message.as_deref(), Some("3 members"));
        assert!(conditions.iter().any(|c| c.condition_type == "Degraded"));
    }

    #[test]
    fn ready_condition_records_failure() {
        let previous = vec![condition("Ready", "True", "2024-01-01T00:00:00+00:00")];

        let conditions = ready_condition(&previous, false, "ReconcileFailed", "boom".into());
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, "False");
        assert_eq!(conditions[0].reason.as_deref(), Some("ReconcileFailed"));
        assert_ne!(
            conditions[0].last_transition_time.as_deref(),
            Some("2024-01-01T00:00:00+00:00")
        );
    }

    #[test]
    fn members_split_by_pod_readiness() {
        let members: MemberSet = ["foo-0000", "foo-0001", "foo-0002", "foo-0003"]
            .into_iter()
            .map(member)
            .collect();
        let pods = vec![
            pod("foo-0000", None, true),
            pod("foo-0001", None, false),
            pod("etcd-self-hosted-abc", Some("foo-0002"), true),
        ];

        let status = members_status(&members, &pods, "etcd_node");
        assert_eq!(status.ready, vec!["foo-0000", "foo-0002"]);
        assert_eq!(status.unready, vec!["foo-0001", "foo-0003"]);
    }
}
