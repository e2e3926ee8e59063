//! Dashboard client
//!
//! The orchestrator never calls the dashboard itself; the client is handed
//! to setup and post-upgrade hooks, which typically install or tweak
//! integration packages through it.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use tracing::instrument;
use url::Url;

use crate::clients::error::{ClientError, check_status};
use crate::clients::handle::Credentials;

#[async_trait]
pub trait DashboardClient: Send + Sync {
    /// Arbitrary JSON request against the dashboard API
    async fn perform(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ClientError>;
}

/// [`DashboardClient`] over the Kibana REST API
#[derive(Clone)]
pub struct KibanaClient {
    base: Url,
    credentials: Credentials,
    http: reqwest::Client,
}

impl KibanaClient {
    pub fn new(
        base: Url,
        credentials: Credentials,
        tls_skip_verify: bool,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(tls_skip_verify)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            base,
            credentials,
            http,
        })
    }
}

#[async_trait]
impl DashboardClient for KibanaClient {
    #[instrument(skip(self, body))]
    async fn perform(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ClientError> {
        let url = self.base.join(path.trim_start_matches('/'))?;
        let mut builder = self
            .http
            .request(method, url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .header("kbn-xsrf", "true");
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        let response = check_status(builder.send().await?).await?;
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode(e.to_string()))
    }
}
