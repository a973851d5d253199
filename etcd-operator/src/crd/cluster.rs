//! EtcdCluster Custom Resource Definition.

use crate::identity::BootstrapPolicy;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// EtcdCluster is the Schema for the etcdclusters API.
///
/// An EtcdCluster describes an etcd cluster whose members run as pods. The
/// operator keeps its view of the members in sync with etcd's own member
/// list and reports it in the status.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "etcd.database.coreos.com",
    version = "v1beta2",
    kind = "EtcdCluster",
    plural = "etcdclusters",
    shortname = "etcd",
    namespaced,
    status = "EtcdClusterStatus",
    printcolumn = r#"{"name":"Size", "type":"integer", "jsonPath":".spec.size"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct EtcdClusterSpec {
    /// Expected number of members.
    #[serde(default = "default_size")]
    pub size: i32,

    /// etcd version, e.g. "3.5.9".
    #[serde(default = "default_version")]
    pub version: String,

    /// Container image repository.
    #[serde(default = "default_repository")]
    pub repository: String,

    /// Stop reconciling while true.
    #[serde(default)]
    pub paused: bool,

    /// TLS configuration. Absent means plain-text peer and client traffic.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsPolicy>,

    /// Self-hosting policy. Absent means a normally bootstrapped cluster.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub self_hosted: Option<SelfHostedPolicy>,
}

fn default_size() -> i32 {
    3
}

fn default_version() -> String {
    "3.5.9".to_string()
}

fn default_repository() -> String {
    "quay.io/coreos/etcd".to_string()
}

/// TLS policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TlsPolicy {
    /// Certificates provided up front in secrets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_tls: Option<StaticTls>,
}

/// Statically provisioned TLS secrets.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StaticTls {
    /// Member certificates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member: Option<MemberSecret>,

    /// Secret holding the operator's etcd client certificate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator_secret: Option<String>,
}

/// Member certificate secrets.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemberSecret {
    /// Secret with the peer certificate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_secret: Option<String>,

    /// Secret with the client-facing server certificate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_secret: Option<String>,
}

/// Self-hosted bootstrap policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SelfHostedPolicy {
    /// Client endpoint of the temporary boot member, if it may still exist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_member_client_endpoint: Option<String>,

    /// Leave boot member removal to someone else.
    #[serde(default)]
    pub skip_boot_member_removal: bool,
}

impl EtcdClusterSpec {
    fn static_tls(&self) -> Option<&StaticTls> {
        self.tls.as_ref().and_then(|t| t.static_tls.as_ref())
    }

    /// Peer traffic is TLS-secured.
    pub fn is_secure_peer(&self) -> bool {
        self.static_tls()
            .and_then(|s| s.member.as_ref())
            .is_some_and(|m| m.peer_secret.is_some())
    }

    /// Client traffic is TLS-secured.
    pub fn is_secure_client(&self) -> bool {
        self.static_tls()
            .and_then(|s| s.operator_secret.as_ref())
            .is_some()
    }

    /// Secret with the operator's etcd client certificate, if any.
    pub fn operator_secret(&self) -> Option<&str> {
        self.static_tls()
            .and_then(|s| s.operator_secret.as_deref())
    }

    /// Secret with the members' client-facing server certificate, if any.
    pub fn server_secret(&self) -> Option<&str> {
        self.static_tls()
            .and_then(|s| s.member.as_ref())
            .and_then(|m| m.server_secret.as_deref())
    }

    /// Boot member removal is left to someone other than the operator.
    pub fn skips_boot_member_removal(&self) -> bool {
        self.self_hosted
            .as_ref()
            .is_some_and(|sh| sh.skip_boot_member_removal)
    }

    /// Bootstrap policy implied by the spec.
    pub fn bootstrap_policy(&self) -> BootstrapPolicy {
        match &self.self_hosted {
            Some(sh) => BootstrapPolicy::self_hosted(sh.boot_member_client_endpoint.clone()),
            None => BootstrapPolicy::normal(),
        }
    }
}

/// EtcdCluster status.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EtcdClusterStatus {
    /// Current phase of the cluster.
    #[serde(default)]
    pub phase: ClusterPhase,

    /// Why the cluster is in its phase; set when it failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Members as of the last successful reconciliation.
    #[serde(default)]
    pub members: MembersStatus,

    /// High-water mark of member counters, kept across operator restarts.
    #[serde(default)]
    pub member_counter: u64,

    /// Conditions representing the current state.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ClusterCondition>,

    /// Last time the status was updated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

/// Member names split by pod readiness.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MembersStatus {
    /// Members whose pod is ready.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ready: Vec<String>,

    /// Members whose pod is missing or not ready.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unready: Vec<String>,
}

/// Cluster phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub enum ClusterPhase {
    /// Not reconciled yet.
    #[default]
    Creating,
    /// Membership is reconciled.
    Running,
    /// An unrecoverable condition was hit; reconciliation has stopped.
    Failed,
}

/// Condition representing cluster state.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCondition {
    /// Type of condition.
    #[serde(rename = "type")]
    pub condition_type: String,

    /// Status of the condition (True, False, Unknown).
    pub status: String,

    /// Last time the condition transitioned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,

    /// Reason for the condition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
