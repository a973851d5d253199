//! Pods backing etcd members.
//!
//! Self-hosted members are addressed by pod IP rather than DNS. The
//! [`PodIpIndex`] maps each member's node label to the IP of its pod and is
//! rebuilt on every reconciliation pass.

use crate::error::OperatorResult;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};
use std::collections::HashMap;

/// What the reconciler needs to know about a pod.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadInfo {
    /// Pod name.
    pub name: String,
    /// Value of the node label, i.e. the etcd member name it hosts.
    pub node_label: Option<String>,
    /// Pod IP; empty until the pod is scheduled.
    pub address: String,
}

impl WorkloadInfo {
    /// Extract workload info from a pod, reading the node label `node_label_key`.
    pub fn from_pod(pod: &Pod, node_label_key: &str) -> Self {
        Self {
            name: pod.name_any(),
            node_label: pod.labels().get(node_label_key).cloned(),
            address: pod
                .status
                .as_ref()
                .and_then(|s| s.pod_ip.clone())
                .unwrap_or_default(),
        }
    }
}

/// Lists the pods of a cluster.
#[async_trait]
pub trait WorkloadLister: Send + Sync {
    /// Pods in `namespace` matching `label_selector`.
    async fn list_workloads(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> OperatorResult<Vec<WorkloadInfo>>;
}

/// [`WorkloadLister`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeWorkloadLister {
    client: Client,
    node_label_key: String,
}

impl KubeWorkloadLister {
    /// Create a lister reading member names from `node_label_key`.
    pub fn new(client: Client, node_label_key: impl Into<String>) -> Self {
        Self {
            client,
            node_label_key: node_label_key.into(),
        }
    }
}

#[async_trait]
impl WorkloadLister for KubeWorkloadLister {
    async fn list_workloads(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> OperatorResult<Vec<WorkloadInfo>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod_list = pods
            .list(&ListParams::default().labels(label_selector))
            .await?;

        Ok(pod_list
            .items
            .iter()
            .map(|pod| WorkloadInfo::from_pod(pod, &self.node_label_key))
            .collect())
    }
}

/// Pod IPs keyed by node label.
#[derive(Debug, Clone, Default)]
pub struct PodIpIndex {
    by_node: HashMap<String, String>,
}

impl PodIpIndex {
    /// Index the given workloads. Workloads without a node label are skipped.
    pub fn build<'a>(workloads: impl IntoIterator<Item = &'a WorkloadInfo>) -> Self {
        let by_node = workloads
            .into_iter()
            .filter_map(|w| Some((w.node_label.clone()?, w.address.clone())))
            .collect();
        Self { by_node }
    }

    /// Pod IP of the member with this node label.
    pub fn lookup(&self, node_label: &str) -> Option<&str> {
        self.by_node.get(node_label).map(String::as_str)
    }

    /// Number of indexed pods.
    pub fn len(&self) -> usize {
        self.by_node.len()
    }

    /// True if no pod was indexed.
    pub fn is_empty(&self) -> bool {
        self.by_node.is_empty()
    }
}

/// Whether the pod reports the `Ready` condition as `True`.
pub fn is_pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

/// Whether the pod is in the `Running` phase.
pub fn is_pod_running(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|phase| phase == "Running")
}
