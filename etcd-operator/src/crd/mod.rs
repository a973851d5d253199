//! Custom Resource Definitions for the etcd operator.
//!
//! - [`EtcdCluster`]: an etcd cluster whose members run as pods

mod cluster;

pub use cluster::{
    ClusterCondition, ClusterPhase, EtcdCluster, EtcdClusterSpec, EtcdClusterStatus,
    MemberSecret, MembersStatus, SelfHostedPolicy, StaticTls, TlsPolicy,
};
