//! Member identity resolution.
//!
//! etcd reports members by ID and URLs. This module turns one reported
//! member into the operator's canonical member name. How that works depends
//! on how the cluster was bootstrapped, so each mode is its own rule:
//!
//! - [`NormalRule`]: the name is encoded in the advertised peer URL.
//! - [`SelfHostedRule`]: the member already carries its name, but the
//!   temporary boot member has to be waited out first.
//!
//! [`BootstrapPolicy`] picks the rule for a cluster.

use crate::error::{OperatorError, OperatorResult};
use crate::naming;

/// A member as reported by etcd's member list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawMember {
    /// etcd member ID.
    pub id: u64,
    /// Name the member advertises; empty until it has started.
    pub name: String,
    /// Advertised peer URLs.
    pub peer_urls: Vec<String>,
    /// Advertised client URLs; empty until it has started.
    pub client_urls: Vec<String>,
}

impl RawMember {
    fn first_peer_url(&self) -> &str {
        self.peer_urls.first().map(String::as_str).unwrap_or_default()
    }
}

/// A rule mapping a reported member to its canonical name.
pub trait ResolveIdentity {
    /// Canonical name of `member` in cluster `cluster_name`.
    fn resolve(&self, member: &RawMember, cluster_name: &str) -> OperatorResult<String>;
}

/// Members of normally bootstrapped clusters are named by their peer URL.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalRule;

impl ResolveIdentity for NormalRule {
    fn resolve(&self, member: &RawMember, _cluster_name: &str) -> OperatorResult<String> {
        let url = member.first_peer_url();
        if url.is_empty() {
            return Err(OperatorError::InvalidPeerUrl {
                url: String::new(),
                reason: format!("member {} advertises no peer URL", member.id),
            });
        }
        naming::member_name_from_peer_url(url).map_err(|reason| OperatorError::InvalidPeerUrl {
            url: url.to_string(),
            reason,
        })
    }
}

/// Members of self-hosted clusters name themselves.
#[derive(Debug, Clone, Default)]
pub struct SelfHostedRule {
    /// Client URL of the boot member, while it may still be around.
    pub boot_member_client_endpoint: Option<String>,
}

impl ResolveIdentity for SelfHostedRule {
    fn resolve(&self, member: &RawMember, cluster_name: &str) -> OperatorResult<String> {
        let client_url = member.client_urls.first();

        // The boot member is removed externally. Defer on it regardless of
        // what else it reports.
        if let (Some(boot), Some(url)) = (self.boot_member_client_endpoint.as_deref(), client_url) {
            if url == boot {
                return Err(OperatorError::BootMemberPending {
                    name: member.name.clone(),
                    endpoint: boot.to_string(),
                });
            }
        }

        // Bootstrap is over by the time reconciliation runs.
        if member.name.is_empty() || client_url.is_none() {
            return Err(OperatorError::UnreadySelfHostedMember {
                peer_url: member.first_peer_url().to_string(),
            });
        }

        if !naming::is_owned_by(&member.name, cluster_name) {
            return Err(OperatorError::ForeignMember {
                name: member.name.clone(),
                cluster: cluster_name.to_string(),
            });
        }

        Ok(member.name.clone())
    }
}

/// How a cluster was bootstrapped.
#[derive(Debug, Clone)]
pub enum BootstrapPolicy {
    /// Created and seeded by the operator.
    Normal(NormalRule),
    /// Bootstrapped by etcd itself through a boot member.
    SelfHosted(SelfHostedRule),
}

impl BootstrapPolicy {
    /// Policy for a normally bootstrapped cluster.
    pub fn normal() -> Self {
        BootstrapPolicy::Normal(NormalRule)
    }

    /// Policy for a self-hosted cluster.
    pub fn self_hosted(boot_member_client_endpoint: Option<String>) -> Self {
        BootstrapPolicy::SelfHosted(SelfHostedRule {
            boot_member_client_endpoint: boot_member_client_endpoint.filter(|e| !e.is_empty()),
        })
    }

    /// Whether members are self-hosted.
    pub fn is_self_hosted(&self) -> bool {
        matches!(self, BootstrapPolicy::SelfHosted(_))
    }
}

impl Default for BootstrapPolicy {
    fn default() -> Self {
        BootstrapPolicy::normal()
    }
}

impl ResolveIdentity for BootstrapPolicy {
    fn resolve(&self, member: &RawMember, cluster_name: &str) -> OperatorResult<String> {
        match self {
            BootstrapPolicy::Normal(rule) => rule.resolve(member, cluster_name),
            BootstrapPolicy::SelfHosted(rule) => rule.resolve(member, cluster_name),
        }
    }
}
