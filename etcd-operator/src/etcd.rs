//! Access to etcd's own membership list.
//!
//! [`MemberLister`] is the only thing reconciliation needs from etcd.
//! [`EtcdGatewayClient`] implements it over the v3 JSON gateway
//! (`POST /v3/cluster/member/list`), trying client URLs in order until one
//! answers.

use crate::error::{OperatorError, OperatorResult};
use crate::identity::RawMember;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::Api;
use serde::Deserialize;
use std::time::Duration;

/// Secret key holding the client certificate.
pub const CLIENT_CERT_FILE: &str = "etcd-client.crt";
/// Secret key holding the client private key.
pub const CLIENT_KEY_FILE: &str = "etcd-client.key";
/// Secret key holding the CA bundle used to verify etcd.
pub const CLIENT_CA_FILE: &str = "etcd-client-ca.crt";

/// Client TLS material for talking to a secure etcd cluster.
#[derive(Clone)]
pub struct EtcdTlsConfig {
    /// CA certificate, PEM.
    pub ca_pem: Vec<u8>,
    /// Client certificate, PEM.
    pub cert_pem: Vec<u8>,
    /// Client private key, PEM.
    pub key_pem: Vec<u8>,
}

impl std::fmt::Debug for EtcdTlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtcdTlsConfig")
            .field("ca_pem", &format!("<{} bytes>", self.ca_pem.len()))
            .field("cert_pem", &format!("<{} bytes>", self.cert_pem.len()))
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

impl EtcdTlsConfig {
    /// Load the operator's etcd client credentials from a secret.
    pub async fn from_secret(
        client: kube::Client,
        namespace: &str,
        secret_name: &str,
    ) -> OperatorResult<Self> {
        tracing::debug!(
            secret = %secret_name,
            namespace = %namespace,
            "Loading etcd client TLS from secret"
        );

        let secrets: Api<Secret> = Api::namespaced(client, namespace);
        let secret = secrets.get(secret_name).await?;
        Self::from_secret_data(secret_name, &secret)
    }

    fn from_secret_data(secret_name: &str, secret: &Secret) -> OperatorResult<Self> {
        let data = secret.data.as_ref().ok_or_else(|| {
            OperatorError::InvalidConfig(format!("Secret '{}' has no data field", secret_name))
        })?;
        let field = |key: &str| {
            data.get(key).map(|v| v.0.clone()).ok_or_else(|| {
                OperatorError::InvalidConfig(format!(
                    "Secret '{}' is missing '{}'",
                    secret_name, key
                ))
            })
        };

        Ok(Self {
            ca_pem: field(CLIENT_CA_FILE)?,
            cert_pem: field(CLIENT_CERT_FILE)?,
            key_pem: field(CLIENT_KEY_FILE)?,
        })
    }
}

/// Lists the members of an etcd cluster.
#[async_trait]
pub trait MemberLister: Send + Sync {
    /// Member list as seen by whichever of `endpoints` answers first.
    async fn list_members(
        &self,
        endpoints: &[String],
        tls: Option<&EtcdTlsConfig>,
    ) -> OperatorResult<Vec<RawMember>>;
}

/// [`MemberLister`] speaking to etcd's gRPC JSON gateway.
#[derive(Debug, Clone)]
pub struct EtcdGatewayClient {
    timeout: Duration,
}

impl EtcdGatewayClient {
    /// Create a client bounding each request by `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn http_client(&self, tls: Option<&EtcdTlsConfig>) -> OperatorResult<reqwest::Client> {
        let mut builder = reqwest::Client::builder().timeout(self.timeout);
        if let Some(tls) = tls {
            let identity = [tls.cert_pem.as_slice(), tls.key_pem.as_slice()].concat();
            builder = builder
                .add_root_certificate(reqwest::Certificate::from_pem(&tls.ca_pem)?)
                .identity(reqwest::Identity::from_pem(&identity)?);
        }
        Ok(builder.build()?)
    }

    async fn list_from(
        &self,
        http: &reqwest::Client,
        endpoint: &str,
    ) -> Result<Vec<RawMember>, String> {
        let url = format!("{}/v3/cluster/member/list", endpoint.trim_end_matches('/'));
        let resp = http
            .post(&url)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("member list failed ({}): {}", status, body));
        }

        let list: MemberListResponse = resp.json().await.map_err(|e| e.to_string())?;
        list.members.into_iter().map(RawMember::try_from).collect()
    }
}

impl Default for EtcdGatewayClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl MemberLister for EtcdGatewayClient {
    async fn list_members(
        &self,
        endpoints: &[String],
        tls: Option<&EtcdTlsConfig>,
    ) -> OperatorResult<Vec<RawMember>> {
        let http = self.http_client(tls)?;
        let mut last_error = "no endpoints to query".to_string();

        for endpoint in endpoints {
            match self.list_from(&http, endpoint).await {
                Ok(members) => return Ok(members),
                Err(e) => {
                    tracing::debug!(endpoint = %endpoint, error = %e, "etcd member list failed");
                    last_error = e;
                }
            }
        }

        Err(OperatorError::Store {
            endpoints: endpoints.to_vec(),
            message: last_error,
        })
    }
}

#[derive(Debug, Deserialize)]
struct MemberListResponse {
    #[serde(default)]
    members: Vec<WireMember>,
}

#[derive(Debug, Deserialize)]
struct WireMember {
    /// uint64 fields are rendered as strings by the gateway.
    #[serde(rename = "ID", default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    name: String,
    #[serde(rename = "peerURLs", default)]
    peer_urls: Vec<String>,
    #[serde(rename = "clientURLs", default)]
    client_urls: Vec<String>,
}

impl TryFrom<WireMember> for RawMember {
    type Error = String;

    fn try_from(m: WireMember) -> Result<Self, Self::Error> {
        let id: u64 = match &m.id {
            None => 0,
            Some(serde_json::Value::String(s)) => s
                .parse::<u64>()
                .map_err(|e| format!("invalid member ID {:?}: {}", s, e))?,
            Some(serde_json::Value::Number(n)) => n
                .as_u64()
                .ok_or_else(|| format!("invalid member ID {}", n))?,
            Some(other) => return Err(format!("invalid member ID {}", other)),
        };

        Ok(RawMember {
            id,
            name: m.name,
            peer_urls: m.peer_urls,
            client_urls: m.client_urls,
        })
    }
}
