//! Members of an etcd cluster as tracked by the operator.

use crate::naming;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::fmt;

/// Port etcd serves clients on.
pub const CLIENT_PORT: u16 = 2379;

/// Port etcd members talk to each other on.
pub const PEER_PORT: u16 = 2380;

/// One etcd member.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Member {
    /// Unique within the cluster. Never changes once assigned.
    pub name: String,
    /// Kubernetes namespace, inherited from the cluster.
    pub namespace: String,
    /// ID assigned by etcd once the member joined; zero before that.
    pub id: u64,
    /// Pod IP, when known.
    pub pod_ip: Option<String>,
    /// Peer traffic uses TLS.
    pub secure_peer: bool,
    /// Client traffic uses TLS.
    pub secure_client: bool,
    /// Member of a self-hosted cluster.
    pub self_hosted: bool,
}

impl Member {
    /// Network address of the member.
    ///
    /// Self-hosted members are reached by pod IP; everyone else through the
    /// per-member DNS name `<name>.<cluster>.<namespace>.svc`.
    pub fn addr(&self) -> String {
        if self.self_hosted {
            return self.pod_ip.clone().unwrap_or_default();
        }
        format!(
            "{}.{}.{}.svc",
            self.name,
            naming::cluster_name_from_member_name(&self.name),
            self.namespace
        )
    }

    /// URL clients use to reach this member.
    pub fn client_url(&self) -> String {
        format!("{}://{}:{}", self.client_scheme(), self.addr(), CLIENT_PORT)
    }

    /// URL the member listens on for clients.
    pub fn listen_client_url(&self) -> String {
        format!("{}://0.0.0.0:{}", self.client_scheme(), CLIENT_PORT)
    }

    /// URL other members use to reach this member.
    pub fn peer_url(&self) -> String {
        format!("{}://{}:{}", self.peer_scheme(), self.addr(), PEER_PORT)
    }

    /// URL the member listens on for peers.
    pub fn listen_peer_url(&self) -> String {
        format!("{}://0.0.0.0:{}", self.peer_scheme(), PEER_PORT)
    }

    fn client_scheme(&self) -> &'static str {
        if self.secure_client {
            "https"
        } else {
            "http"
        }
    }

    fn peer_scheme(&self) -> &'static str {
        if self.secure_peer {
            "https"
        } else {
            "http"
        }
    }
}

/// Members keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberSet {
    members: BTreeMap<String, Member>,
}

impl MemberSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a member, replacing any member with the same name.
    pub fn add(&mut self, member: Member) {
        self.members.insert(member.name.clone(), member);
    }

    /// Remove a member by name.
    pub fn remove(&mut self, name: &str) -> Option<Member> {
        self.members.remove(name)
    }

    /// Look up a member by name.
    pub fn get(&self, name: &str) -> Option<&Member> {
        self.members.get(name)
    }

    /// Whether a member with this name is present.
    pub fn contains(&self, name: &str) -> bool {
        self.members.contains_key(name)
    }

    /// Number of members.
    pub fn size(&self) -> usize {
        self.members.len()
    }

    /// True if there are no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Same member names in both sets.
    pub fn is_equal(&self, other: &MemberSet) -> bool {
        self.size() == other.size() && self.members.keys().all(|n| other.contains(n))
    }

    /// Members in `self` whose names are not in `other`.
    pub fn diff(&self, other: &MemberSet) -> MemberSet {
        self.members
            .values()
            .filter(|m| !other.contains(&m.name))
            .cloned()
            .collect()
    }

    /// Any one member, if the set is non-empty.
    pub fn pick_one(&self) -> Option<&Member> {
        self.members.values().next()
    }

    /// Member names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }

    /// Iterate members in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    /// Client URLs of all members.
    pub fn client_urls(&self) -> Vec<String> {
        self.members.values().map(Member::client_url).collect()
    }

    /// `name=peerURL` pairs, as used for `--initial-cluster`.
    pub fn peer_url_pairs(&self) -> Vec<String> {
        self.members
            .values()
            .map(|m| format!("{}={}", m.name, m.peer_url()))
            .collect()
    }
}

impl FromIterator<Member> for MemberSet {
    fn from_iter<I: IntoIterator<Item = Member>>(iter: I) -> Self {
        let mut set = MemberSet::new();
        for m in iter {
            set.add(m);
        }
        set
    }
}

impl<'a> IntoIterator for &'a MemberSet {
    type Item = &'a Member;
    type IntoIter = std::collections::btree_map::Values<'a, String, Member>;

    fn into_iter(self) -> Self::IntoIter {
        self.members.values()
    }
}

impl fmt::Display for MemberSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.names().collect();
        write!(f, "[{}]", names.join(","))
    }
}

/// Build the set of members backed by the given pods.
///
/// The result is addressing information only: IDs are unknown and peer
/// security is not inferred from pods.
pub fn pods_to_member_set(pods: &[Pod], secure_client: bool) -> MemberSet {
    pods.iter()
        .map(|pod| Member {
            name: pod.name_any(),
            namespace: pod.namespace().unwrap_or_default(),
            pod_ip: pod.status.as_ref().and_then(|s| s.pod_ip.clone()),
            secure_client,
            ..Default::default()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn member(name: &str) -> Member {
        Member {
            name: name.to_string(),
            namespace: "default".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn urls_follow_security_flags() {
        let mut m = member("foo-0001");
        assert_eq!(m.client_url(), "http://foo-0001.foo.default.svc:2379");
        assert_eq!(m.peer_url(), "http://foo-0001.foo.default.svc:2380");

        m.secure_client = true;
        m.secure_peer = true;
        assert_eq!(m.client_url(), "https://foo-0001.foo.default.svc:2379");
        assert_eq!(m.peer_url(), "https://foo-0001.foo.default.svc:2380");
        assert_eq!(m.listen_peer_url(), "https://0.0.0.0:2380");
        assert_eq!(m.listen_client_url(), "https://0.0.0.0:2379");
    }

    #[test]
    fn self_hosted_members_use_pod_ip() {
        let m = Member {
            self_hosted: true,
            pod_ip: Some("10.2.0.7".to_string()),
            ..member("foo-0003")
        };
        assert_eq!(m.addr(), "10.2.0.7");
        assert_eq!(m.client_url(), "http://10.2.0.7:2379");
    }

    #[test]
    fn set_operations() {
        let a: MemberSet = ["foo-0000", "foo-0001", "foo-0002"]
            .into_iter()
            .map(member)
            .collect();
        let b: MemberSet = ["foo-0001", "foo-0002"].into_iter().map(member).collect();

        assert_eq!(a.size(), 3);
        assert!(!a.is_equal(&b));

        let d = a.diff(&b);
        assert_eq!(d.names().collect::<Vec<_>>(), vec!["foo-0000"]);
        assert!(b.diff(&a).is_empty());

        let mut c = a.clone();
        c.remove("foo-0000");
        assert!(c.is_equal(&b));
        assert_eq!(c.to_string(), "[foo-0001,foo-0002]");
    }

    #[test]
    fn add_replaces_same_name() {
        let mut set = MemberSet::new();
        set.add(member("foo-0000"));
        set.add(Member {
            id: 9,
            ..member("foo-0000")
        });
        assert_eq!(set.size(), 1);
        assert_eq!(set.get("foo-0000").map(|m| m.id), Some(9));
    }

    #[test]
    fn peer_url_pairs_are_sorted_by_name() {
        let set: MemberSet = ["foo-0001", "foo-0000"].into_iter().map(member).collect();
        assert_eq!(
            set.peer_url_pairs(),
            vec![
                "foo-0000=http://foo-0000.foo.default.svc:2380".to_string(),
                "foo-0001=http://foo-0001.foo.default.svc:2380".to_string(),
            ]
        );
    }

    #[test]
    fn members_from_pods() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("foo-0000".to_string()),
                namespace: Some("prod".to_string()),
                ..Default::default()
            },
            status: Some(PodStatus {
                pod_ip: Some("10.0.0.4".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let set = pods_to_member_set(&[pod], true);
        let m = set.get("foo-0000").expect("member from pod");
        assert_eq!(m.namespace, "prod");
        assert_eq!(m.pod_ip.as_deref(), Some("10.0.0.4"));
        assert!(m.secure_client);
        assert_eq!(set.client_urls(), vec!["https://foo-0000.foo.prod.svc:2379"]);
    }
}
