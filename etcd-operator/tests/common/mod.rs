//! Common test utilities for etcd-operator tests.

use async_trait::async_trait;
use etcd_operator::error::{OperatorError, OperatorResult};
use etcd_operator::etcd::{EtcdTlsConfig, MemberLister};
use etcd_operator::identity::{BootstrapPolicy, RawMember};
use etcd_operator::member::{Member, MemberSet};
use etcd_operator::naming;
use etcd_operator::reconcile::{ClusterProfile, MembershipReconciler};
use etcd_operator::workload::{WorkloadInfo, WorkloadLister};
use etcd_operator::ReconcilerConfig;
use std::sync::{Arc, Mutex};

/// Client endpoint of the boot member in self-hosted tests.
#[allow(dead_code)]
pub const BOOT_ENDPOINT: &str = "http://10.0.0.100:2379";

/// In-memory etcd member list.
#[derive(Default)]
pub struct FakeStore {
    response: Mutex<Option<Result<Vec<RawMember>, String>>>,
    calls: Mutex<Vec<Vec<String>>>,
}

#[allow(dead_code)]
impl FakeStore {
    /// Report these members on the next calls.
    pub fn set_members(&self, members: Vec<RawMember>) {
        *self.response.lock().unwrap() = Some(Ok(members));
    }

    /// Fail the next calls with a transport error.
    pub fn set_unreachable(&self, message: &str) {
        *self.response.lock().unwrap() = Some(Err(message.to_string()));
    }

    /// Endpoints each call was addressed to.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MemberLister for FakeStore {
    async fn list_members(
        &self,
        endpoints: &[String],
        _tls: Option<&EtcdTlsConfig>,
    ) -> OperatorResult<Vec<RawMember>> {
        self.calls.lock().unwrap().push(endpoints.to_vec());
        match self.response.lock().unwrap().clone() {
            Some(Ok(members)) => Ok(members),
            Some(Err(message)) => Err(OperatorError::Store {
                endpoints: endpoints.to_vec(),
                message,
            }),
            None => Ok(Vec::new()),
        }
    }
}

/// In-memory pod listing.
#[derive(Default)]
pub struct FakeWorkloads {
    workloads: Mutex<Vec<WorkloadInfo>>,
    failing: Mutex<bool>,
    selectors: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl FakeWorkloads {
    /// Report these pods.
    pub fn set_workloads(&self, workloads: Vec<WorkloadInfo>) {
        *self.workloads.lock().unwrap() = workloads;
    }

    /// Fail listing with a Kubernetes API error.
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    /// Label selectors the listing was called with.
    pub fn selectors(&self) -> Vec<String> {
        self.selectors.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkloadLister for FakeWorkloads {
    async fn list_workloads(
        &self,
        _namespace: &str,
        label_selector: &str,
    ) -> OperatorResult<Vec<WorkloadInfo>> {
        self.selectors.lock().unwrap().push(label_selector.to_string());
        if *self.failing.lock().unwrap() {
            return Err(OperatorError::KubeError(kube::Error::Api(
                kube::error::ErrorResponse {
                    status: "Failure".to_string(),
                    message: "the server is currently unable to handle the request".to_string(),
                    reason: "ServiceUnavailable".to_string(),
                    code: 503,
                },
            )));
        }
        Ok(self.workloads.lock().unwrap().clone())
    }
}

/// Reconciler plus handles to its fakes.
pub struct Harness {
    /// Fake etcd.
    pub store: Arc<FakeStore>,
    /// Fake pod listing.
    pub workloads: Arc<FakeWorkloads>,
    /// Reconciler under test.
    pub reconciler: MembershipReconciler,
}

impl Harness {
    /// Harness with default configuration.
    pub fn new() -> Self {
        Self::with_config(ReconcilerConfig::default())
    }

    /// Harness with the given configuration.
    pub fn with_config(config: ReconcilerConfig) -> Self {
        let store = Arc::new(FakeStore::default());
        let workloads = Arc::new(FakeWorkloads::default());
        let reconciler = MembershipReconciler::new(store.clone(), workloads.clone(), config);
        Self {
            store,
            workloads,
            reconciler,
        }
    }
}

/// Profile of a normally bootstrapped cluster.
pub fn normal_profile(name: &str) -> ClusterProfile {
    ClusterProfile {
        name: name.to_string(),
        namespace: "default".to_string(),
        secure_peer: false,
        secure_client: false,
        bootstrap: BootstrapPolicy::normal(),
    }
}

/// Profile of a self-hosted cluster whose boot member is at [`BOOT_ENDPOINT`].
#[allow(dead_code)]
pub fn self_hosted_profile(name: &str) -> ClusterProfile {
    ClusterProfile {
        bootstrap: BootstrapPolicy::self_hosted(Some(BOOT_ENDPOINT.to_string())),
        ..normal_profile(name)
    }
}

/// A member of a normal cluster as etcd reports it.
pub fn normal_raw(cluster: &str, counter: u64) -> RawMember {
    let name = naming::member_name(cluster, counter);
    RawMember {
        id: 1000 + counter,
        name: name.clone(),
        peer_urls: vec![format!("http://{}.{}.default.svc:2380", name, cluster)],
        client_urls: vec![format!("http://{}.{}.default.svc:2379", name, cluster)],
    }
}

/// A member of a self-hosted cluster as etcd reports it.
#[allow(dead_code)]
pub fn self_hosted_raw(name: &str, ip: &str) -> RawMember {
    RawMember {
        id: 2000,
        name: name.to_string(),
        peer_urls: vec![format!("http://{}:2380", ip)],
        client_urls: vec![format!("http://{}:2379", ip)],
    }
}

/// A pod hosting the self-hosted member `node`.
#[allow(dead_code)]
pub fn workload(node: &str, ip: &str) -> WorkloadInfo {
    WorkloadInfo {
        name: format!("etcd-{}", node),
        node_label: Some(node.to_string()),
        address: ip.to_string(),
    }
}

/// Known set addressing the given members.
pub fn known(cluster: &str, counters: &[u64]) -> MemberSet {
    counters
        .iter()
        .map(|c| Member {
            name: naming::member_name(cluster, *c),
            namespace: "default".to_string(),
            ..Default::default()
        })
        .collect()
}
