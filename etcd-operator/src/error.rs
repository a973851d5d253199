//! Error types for the etcd operator.
//!
//! Every [`OperatorError`] variant belongs to exactly one [`ErrorKind`]. The
//! kind is fixed where the error is constructed, so the control loop can
//! branch on [`OperatorError::kind`] instead of looking at messages.

use thiserror::Error;

/// How the control loop should treat an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The cluster cannot recover; stop reconciling and surface it.
    Fatal,
    /// An expected, self-resolving condition. Retry later.
    Transient,
    /// The store or the Kubernetes API could not be queried. Retry later.
    Transport,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Fatal => "fatal",
            ErrorKind::Transient => "transient",
            ErrorKind::Transport => "transport",
        };
        f.write_str(s)
    }
}

/// A member name without a parseable trailing counter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("member name ({name}) {reason}")]
pub struct NameFormatError {
    /// The offending name.
    pub name: String,
    /// What is wrong with it.
    pub reason: String,
}

/// Errors that can occur during operator operations.
#[derive(Debug, Error)]
pub enum OperatorError {
    /// Kubernetes API error.
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// The etcd member list could not be fetched from any endpoint.
    #[error("etcd request to {endpoints:?} failed: {message}")]
    Store {
        /// Client URLs that were tried.
        endpoints: Vec<String>,
        /// Last failure reported.
        message: String,
    },

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Self-hosted boot member is still part of the cluster.
    #[error(
        "skipping for self hosted cluster: waiting for the boot member ({name}) at {endpoint} to be removed"
    )]
    BootMemberPending {
        /// Name reported by the boot member.
        name: String,
        /// Client endpoint of the boot member.
        endpoint: String,
    },

    /// Self-hosted boot member outlived the configured number of passes.
    #[error("boot member ({name}) was not removed after {passes} reconciliation passes")]
    BootMemberNotRemoved {
        /// Name reported by the boot member.
        name: String,
        /// Consecutive passes that deferred on it.
        passes: u32,
    },

    /// A member advertised a peer URL that does not name a member.
    #[error("invalid member peerURL ({url}): {reason}")]
    InvalidPeerUrl {
        /// The advertised URL, empty when none was advertised.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A resolved member name carries no counter.
    #[error("get counter from member name failed: {0}")]
    InvalidMemberName(#[from] NameFormatError),

    /// Self-hosted member without a name or client URLs.
    #[error("unready self-hosted member (peerURL: {peer_url})")]
    UnreadySelfHostedMember {
        /// First advertised peer URL, if any.
        peer_url: String,
    },

    /// Member belongs to a different cluster.
    #[error("member ({name}) does not belong to cluster {cluster}")]
    ForeignMember {
        /// Reported member name.
        name: String,
        /// Cluster being reconciled.
        cluster: String,
    },

    /// Self-hosted member whose pod cannot be located.
    #[error("could not get podIP for {name} member (ID {id})")]
    MissingPodIp {
        /// Reported member name.
        name: String,
        /// etcd member ID.
        id: u64,
    },

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl OperatorError {
    /// Classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            OperatorError::KubeError(_)
            | OperatorError::Store { .. }
            | OperatorError::Http(_)
            | OperatorError::SerializationError(_) => ErrorKind::Transport,
            OperatorError::BootMemberPending { .. } => ErrorKind::Transient,
            OperatorError::BootMemberNotRemoved { .. }
            | OperatorError::InvalidPeerUrl { .. }
            | OperatorError::InvalidMemberName(_)
            | OperatorError::UnreadySelfHostedMember { .. }
            | OperatorError::ForeignMember { .. }
            | OperatorError::MissingPodIp { .. }
            | OperatorError::InvalidConfig(_) => ErrorKind::Fatal,
        }
    }

    /// True if the cluster should be treated as unrecoverable.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }

    /// True if the caller should retry the pass on its own schedule.
    pub fn is_retryable(&self) -> bool {
        !self.is_fatal()
    }
}

/// Result type for operator operations.
pub type OperatorResult<T> = Result<T, OperatorError>;

impl From<serde_json::Error> for OperatorError {
    fn from(err: serde_json::Error) -> Self {
        OperatorError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for OperatorError {
    fn from(err: serde_yaml::Error) -> Self {
        OperatorError::SerializationError(err.to_string())
    }
}
