//! Kubernetes controller for EtcdCluster resources.
//!
//! - [`ClusterController`]: drives membership reconciliation for EtcdCluster
//!   resources and reports the result in their status
//!
//! # Usage with kube-runtime
//!
//! ```ignore
//! use etcd_operator::controller::{ClusterController, cluster_error_policy};
//!
//! Controller::new(clusters, watcher_config)
//!     .run(|cluster, ctx| async move {
//!         let controller = ClusterController::new(ctx.clone());
//!         controller.reconcile(cluster).await
//!     }, cluster_error_policy, context)
//!     .for_each(|_| futures::future::ready(()))
//!     .await;
//! ```

mod cluster;

pub use cluster::{
    ClusterController, error_policy as cluster_error_policy, members_status, ready_condition,
};

use crate::config::ReconcilerConfig;
use crate::etcd::EtcdGatewayClient;
use crate::reconcile::{ClusterState, MembershipReconciler};
use crate::workload::KubeWorkloadLister;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Key the controller tracks a cluster under.
pub fn cluster_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

struct TrackedCluster {
    uid: Option<String>,
    state: Arc<tokio::sync::Mutex<ClusterState>>,
}

/// Per-cluster reconciliation state, one lock per cluster.
///
/// Entries remember the UID of the resource they were created for. A
/// cluster recreated under the same name starts from fresh state.
#[derive(Default)]
pub struct ClusterStates {
    inner: Mutex<HashMap<String, TrackedCluster>>,
}

impl ClusterStates {
    /// Tracked state of the cluster `key`, created from `member_counter`
    /// on first use or when `uid` no longer matches.
    pub fn get_or_create(
        &self,
        key: &str,
        uid: Option<&str>,
        member_counter: u64,
    ) -> Arc<tokio::sync::Mutex<ClusterState>> {
        let mut states = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tracked) = states.get(key) {
            if tracked.uid.as_deref() == uid {
                return tracked.state.clone();
            }
            tracing::debug!(cluster = %key, "Cluster was recreated, dropping old state");
        }

        let state = Arc::new(tokio::sync::Mutex::new(ClusterState::with_member_counter(
            member_counter,
        )));
        states.insert(
            key.to_string(),
            TrackedCluster {
                uid: uid.map(str::to_string),
                state: state.clone(),
            },
        );
        state
    }

    /// Drop the tracked state of the cluster `key`.
    pub fn remove(&self, key: &str) -> bool {
        let mut states = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        states.remove(key).is_some()
    }

    /// Number of tracked clusters.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// True if no cluster is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared context for controllers.
pub struct ControllerContext {
    /// Kubernetes client.
    pub client: kube::Client,
    /// Membership reconciler shared by all clusters.
    pub reconciler: MembershipReconciler,
    /// Tracked state of every reconciled cluster.
    pub states: ClusterStates,
}

impl ControllerContext {
    /// Create a context reconciling through the Kubernetes API and the
    /// etcd JSON gateway.
    pub fn new(client: kube::Client, config: ReconcilerConfig) -> Self {
        let store = Arc::new(EtcdGatewayClient::new(config.store_timeout()));
        let workloads = Arc::new(KubeWorkloadLister::new(
            client.clone(),
            config.node_label.clone(),
        ));
        Self::with_reconciler(client, MembershipReconciler::new(store, workloads, config))
    }

    /// Create a context around an existing reconciler.
    pub fn with_reconciler(client: kube::Client, reconciler: MembershipReconciler) -> Self {
        Self {
            client,
            reconciler,
            states: ClusterStates::default(),
        }
    }

    /// Drop the tracked state of the cluster `key`.
    pub fn forget_cluster(&self, key: &str) {
        if self.states.remove(key) {
            tracing::debug!(cluster = %key, "Dropped cluster state");
        }
    }
}

/// Result type for reconciliation actions.
#[derive(Debug)]
pub enum ReconcileAction {
    /// Requeue after the specified duration.
    Requeue(std::time::Duration),
    /// Don't requeue (reconciliation complete).
    Done,
}

impl ReconcileAction {
    /// Requeue after 5 seconds (default for transient errors).
    pub fn requeue_short() -> Self {
        Self::Requeue(std::time::Duration::from_secs(5))
    }

    /// Requeue after 30 seconds (default for waiting on external resources).
    pub fn requeue_medium() -> Self {
        Self::Requeue(std::time::Duration::from_secs(30))
    }

    /// Requeue after 5 minutes (default for periodic reconciliation).
    pub fn requeue_long() -> Self {
        Self::Requeue(std::time::Duration::from_secs(300))
    }
}
