//! The upstream client boundary: an mTLS HTTP client exposing two
//! idempotent reads against the platform policy service.
//! Everything about the wire schema, TLS dialing, and pagination cursor
//! lives here; callers only see `PolicyServerClient`.

mod types;

pub use types::{Destination, Policy, Ports, SecurityGroup, SecurityGroupRule, Source};

use async_trait::async_trait;
use reqwest::{Certificate, Client, Identity};
use serde::Deserialize;

use crate::config::Config;
use crate::error::ClientError;

#[async_trait]
pub trait PolicyServerClient: Send + Sync {
    async fn list_c2c_policies(&self) -> Result<Vec<Policy>, ClientError>;

    async fn list_security_groups_for_spaces(
        &self,
        space_guids: &[String],
    ) -> Result<Vec<SecurityGroup>, ClientError>;
}

/// Production implementation: mTLS HTTPS via `reqwest`, paginating security
/// group lookups by following the `next` link the upstream returns.
pub struct HttpPolicyServerClient {
    http: Client,
    base_url: String,
    per_page: u32,
}

impl HttpPolicyServerClient {
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        let identity = build_identity(&config.tls_cert_path, &config.tls_key_path)?;
        let ca = read_file(&config.tls_ca_path)?;
        let ca_cert = Certificate::from_pem(&ca).map_err(ClientError::Tls)?;

        let http = Client::builder()
            .identity(identity)
            .add_root_certificate(ca_cert)
            .build()
            .map_err(ClientError::Tls)?;

        Ok(Self {
            http,
            base_url: config.policy_server_url.trim_end_matches('/').to_string(),
            per_page: config.per_page_security_groups,
        })
    }
}

fn build_identity(cert_path: &str, key_path: &str) -> Result<Identity, ClientError> {
    let mut bundle = read_file(cert_path)?;
    bundle.extend_from_slice(&read_file(key_path)?);
    Identity::from_pem(&bundle).map_err(ClientError::Tls)
}

fn read_file(path: &str) -> Result<Vec<u8>, ClientError> {
    std::fs::read(path).map_err(|source| ClientError::ReadTlsMaterial {
        path: path.to_string(),
        source,
    })
}

#[derive(Debug, Deserialize)]
struct PoliciesResponse {
    #[serde(default)]
    policies: Vec<Policy>,
}

#[derive(Debug, Deserialize)]
struct SecurityGroupsPage {
    #[serde(default)]
    resources: Vec<SecurityGroup>,
    #[serde(default)]
    pagination: Pagination,
}

#[derive(Debug, Default, Deserialize)]
struct Pagination {
    next: Option<PageLink>,
}

#[derive(Debug, Deserialize)]
struct PageLink {
    href: String,
}

#[async_trait]
impl PolicyServerClient for HttpPolicyServerClient {
    async fn list_c2c_policies(&self) -> Result<Vec<Policy>, ClientError> {
        let url = format!("{}/policies", self.base_url);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(ClientError::Request)?
            .error_for_status()
            .map_err(ClientError::Request)?
            .json::<PoliciesResponse>()
            .await
            .map_err(ClientError::Decode)?;
        Ok(response.policies)
    }

    async fn list_security_groups_for_spaces(
        &self,
        space_guids: &[String],
    ) -> Result<Vec<SecurityGroup>, ClientError> {
        if space_guids.is_empty() {
            return Ok(Vec::new());
        }

        let mut security_groups = Vec::new();
        let mut next_url = Some(format!(
            "{}/security-groups?spaces={}&per_page={}",
            self.base_url,
            space_guids.join(","),
            self.per_page
        ));

        while let Some(url) = next_url {
            let page = self
                .http
                .get(url)
                .send()
                .await
                .map_err(ClientError::Request)?
                .error_for_status()
                .map_err(ClientError::Request)?
                .json::<SecurityGroupsPage>()
                .await
                .map_err(ClientError::Decode)?;

            security_groups.extend(page.resources);
            next_url = page.pagination.next.map(|link| link.href);
        }

        Ok(security_groups)
    }
}
