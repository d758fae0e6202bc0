//! Blocking client for the Run:ai REST API.
//!
//! Authentication posts the application credentials to `/api/v1/token` and
//! keeps the returned bearer token; every later request carries it in the
//! `Authorization` header.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::credentials::Credentials;

const USER_AGENT: &str = concat!("gpuops/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("not authenticated; call authenticate() first")]
    NotAuthenticated,

    #[error("no clusters visible to this application")]
    NoClusters,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest<'a> {
    pub grant_type: &'a str,
    pub client_id: &'a str,
    pub client_secret: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClusterInfo {
    pub uuid: String,
    #[serde(default)]
    pub name: String,
}

pub struct ApiClient {
    base_url: String,
    http: Client,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(ApiClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            token: None,
        })
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub fn authenticate(&mut self, client_id: &str, client_secret: &str) -> Result<(), ApiError> {
        let url = self.endpoint("api/v1/token");
        let body = TokenRequest {
            grant_type: "client_credentials",
            client_id,
            client_secret,
        };
        debug!(url = %url, "requesting token");
        let resp = self.http.post(&url).json(&body).send()?;
        let token: TokenResponse = decode(resp, &url)?;
        self.token = Some(token.access_token);
        Ok(())
    }

    /// GET `path` with the bearer token and decode the JSON body.
    pub fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let token = self.token.as_deref().ok_or(ApiError::NotAuthenticated)?;
        let url = self.endpoint(path);
        debug!(url = %url, "GET");
        let resp = self.http.get(&url).bearer_auth(token).send()?;
        decode(resp, &url)
    }

    pub fn clusters(&self) -> Result<Vec<ClusterInfo>, ApiError> {
        self.get_json("api/v1/clusters")
    }
}

fn decode<T: DeserializeOwned>(resp: reqwest::blocking::Response, url: &str) -> Result<T, ApiError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().unwrap_or_default();
        return Err(ApiError::Status {
            endpoint: url.to_string(),
            status: status.as_u16(),
            body: body.trim().to_string(),
        });
    }
    Ok(resp.json()?)
}

/// The first cluster's id.
pub fn first_cluster_id(clusters: &[ClusterInfo]) -> Result<&ClusterInfo, ApiError> {
    clusters.first().ok_or(ApiError::NoClusters)
}

/// Authenticate with the stored credentials and return the first cluster.
pub fn discover_cluster(creds: &Credentials, timeout: Duration) -> Result<ClusterInfo, ApiError> {
    let mut client = ApiClient::new(&creds.api_url, timeout)?;
    client.authenticate(&creds.client_id, &creds.client_secret)?;
    let clusters = client.clusters()?;
    first_cluster_id(&clusters).cloned()
}
