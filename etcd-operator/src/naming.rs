//! Member naming.
//!
//! Members of a normally bootstrapped cluster are named `<cluster>-<counter>`
//! with the counter zero-padded to four digits. The counter is per cluster
//! and only ever grows, so two members of one cluster never share a name.

use crate::error::NameFormatError;

/// Build the canonical name of the member with the given counter.
pub fn member_name(cluster_name: &str, counter: u64) -> String {
    format!("{}-{:04}", cluster_name, counter)
}

/// Recover the counter from a member name.
pub fn counter_from_member_name(name: &str) -> Result<u64, NameFormatError> {
    let suffix = match name.rfind('-') {
        Some(i) if i + 1 < name.len() => &name[i + 1..],
        _ => {
            return Err(NameFormatError {
                name: name.to_string(),
                reason: "does not contain '-' or anything after '-'".to_string(),
            });
        }
    };

    suffix.parse::<u64>().map_err(|e| NameFormatError {
        name: name.to_string(),
        reason: format!("has an invalid counter suffix ({}): {}", suffix, e),
    })
}

/// Whether `name` was generated for `cluster_name`.
///
/// The cluster name must be followed by `-`; `foobar-0001` is not owned by
/// `foo` even though it starts with it.
pub fn is_owned_by(name: &str, cluster_name: &str) -> bool {
    name.strip_prefix(cluster_name)
        .is_some_and(|rest| rest.starts_with('-'))
}

/// Cluster part of a member name, i.e. everything before the last `-`.
pub fn cluster_name_from_member_name(name: &str) -> &str {
    name.rfind('-').map_or(name, |i| &name[..i])
}

/// Derive the member name from an advertised peer URL.
///
/// Peer URLs look like `https://foo-0001.foo.default.svc:2380`; the member
/// name is the first DNS label of the host.
pub fn member_name_from_peer_url(peer_url: &str) -> Result<String, String> {
    let url = reqwest::Url::parse(peer_url).map_err(|e| e.to_string())?;
    let host = url
        .host_str()
        .ok_or_else(|| "peer URL has no host".to_string())?;
    let name = host.split('.').next().unwrap_or_default();
    if name.is_empty() {
        return Err("peer URL host has an empty first label".to_string());
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_name_is_zero_padded() {
        assert_eq!(member_name("foo", 0), "foo-0000");
        assert_eq!(member_name("foo", 42), "foo-0042");
        assert_eq!(member_name("foo", 12345), "foo-12345");
    }

    #[test]
    fn counter_round_trips() {
        for counter in [0, 1, 9, 10, 999, 1000, 10_000, u32::MAX as u64] {
            let name = member_name("my-cluster", counter);
            assert_eq!(counter_from_member_name(&name).unwrap(), counter);
        }
    }

    #[test]
    fn distinct_counters_give_distinct_names() {
        let names: std::collections::HashSet<_> =
            (0..500).map(|c| member_name("foo", c)).collect();
        assert_eq!(names.len(), 500);
    }

    #[test]
    fn counter_rejects_malformed_names() {
        assert!(counter_from_member_name("foo").is_err());
        assert!(counter_from_member_name("foo-").is_err());
        assert!(counter_from_member_name("foo-abc").is_err());

        let err = counter_from_member_name("nodash").unwrap_err();
        assert_eq!(err.name, "nodash");
    }

    #[test]
    fn ownership_requires_cluster_prefix() {
        assert!(is_owned_by("foo-0001", "foo"));
        assert!(is_owned_by("my-cluster-0003", "my-cluster"));
        assert!(!is_owned_by("bar-0001", "foo"));
        assert!(!is_owned_by("foobar-0001", "foo"));
        assert!(!is_owned_by("foo", "foo"));
    }

    #[test]
    fn cluster_name_strips_counter() {
        assert_eq!(cluster_name_from_member_name("my-cluster-0003"), "my-cluster");
        assert_eq!(cluster_name_from_member_name("plain"), "plain");
    }

    #[test]
    fn name_from_peer_url() {
        assert_eq!(
            member_name_from_peer_url("https://foo-0001.foo.default.svc:2380").unwrap(),
            "foo-0001"
        );
        assert_eq!(
            member_name_from_peer_url("http://foo-0002:2380").unwrap(),
            "foo-0002"
        );
        assert!(member_name_from_peer_url("not a url").is_err());
        assert!(member_name_from_peer_url("").is_err());
    }
}
