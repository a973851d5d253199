//! etcd Kubernetes Operator
//!
//! Keeps the operator's view of an etcd cluster's members in sync with the
//! member list etcd itself reports, names new members deterministically and
//! classifies failures so the control loop knows whether to retry or give
//! up on a cluster.
//!
//! # Pieces
//!
//! - [`naming`]: member names and the per-cluster counter encoded in them
//! - [`identity`]: resolving a reported member to its canonical name
//! - [`workload`]: pod IP lookup for self-hosted members
//! - [`reconcile`]: the all-or-nothing membership reconciliation pass
//! - [`controller`]: the kube-runtime controller driving passes
//!
//! # Example
//!
//! ```yaml
//! apiVersion: etcd.database.coreos.com/v1beta2
//! kind: EtcdCluster
//! metadata:
//!   name: example
//! spec:
//!   size: 3
//!   version: 3.5.9
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod etcd;
pub mod identity;
pub mod member;
pub mod naming;
pub mod reconcile;
pub mod workload;

pub use config::ReconcilerConfig;
pub use crd::{EtcdCluster, EtcdClusterSpec};
pub use error::{ErrorKind, OperatorError, OperatorResult};
pub use member::{Member, MemberSet};
pub use reconcile::{ClusterProfile, ClusterState, MembershipReconciler};
