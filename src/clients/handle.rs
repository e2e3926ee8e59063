//! Provisioned cluster identity and endpoints

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

/// Names of the provisioning outputs a cluster handle is built from
pub mod outputs {
    pub const DEPLOYMENT_ID: &str = "deployment_id";
    pub const INGEST_URL: &str = "apm_url";
    pub const SEARCH_URL: &str = "es_url";
    pub const DASHBOARD_URL: &str = "kb_url";
    pub const USERNAME: &str = "username";
    pub const PASSWORD: &str = "password";
    pub const API_KEY: &str = "apm_api_key";
}

/// Errors building a [`ClusterHandle`] from provisioning outputs
#[derive(Error, Debug)]
pub enum HandleError {
    #[error("provisioning output '{0}' is missing")]
    MissingOutput(&'static str),

    #[error("provisioning output '{name}' has an unexpected shape: {source}")]
    InvalidOutput {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("provisioning output '{name}' is not a valid url: {source}")]
    InvalidUrl {
        name: &'static str,
        #[source]
        source: url::ParseError,
    },
}

/// Values produced by a provisioning apply, keyed by output name
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProvisionOutputs(BTreeMap<String, serde_json::Value>);

impl ProvisionOutputs {
    pub fn new(values: BTreeMap<String, serde_json::Value>) -> Self {
        Self(values)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Decode one output into `T`; `Ok(None)` when it was not produced
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, HandleError> {
        match self.0.get(name) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|source| HandleError::InvalidOutput {
                    name: name.to_string(),
                    source,
                }),
        }
    }

    fn require_string(&self, name: &'static str) -> Result<String, HandleError> {
        self.get::<String>(name)?
            .filter(|s| !s.is_empty())
            .ok_or(HandleError::MissingOutput(name))
    }

    fn require_url(&self, name: &'static str) -> Result<Url, HandleError> {
        let raw = self.require_string(name)?;
        Url::parse(&raw).map_err(|source| HandleError::InvalidUrl { name, source })
    }
}

impl FromIterator<(String, serde_json::Value)> for ProvisionOutputs {
    fn from_iter<I: IntoIterator<Item = (String, serde_json::Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Basic-auth credentials of the cluster superuser
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A live cluster: identifier, endpoints and credentials
///
/// Created from the outputs of the provisioning apply and never mutated;
/// the URLs stay the same across the in-place upgrade.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterHandle {
    pub deployment_id: String,
    pub ingest_url: Url,
    pub search_url: Url,
    pub dashboard_url: Url,
    pub credentials: Credentials,
    /// Ingestion API key, when provisioning already created one
    pub api_key: Option<String>,
}

impl ClusterHandle {
    pub fn from_outputs(outputs: &ProvisionOutputs) -> Result<Self, HandleError> {
        Ok(Self {
            deployment_id: outputs.require_string(outputs::DEPLOYMENT_ID)?,
            ingest_url: outputs.require_url(outputs::INGEST_URL)?,
            search_url: outputs.require_url(outputs::SEARCH_URL)?,
            dashboard_url: outputs.require_url(outputs::DASHBOARD_URL)?,
            credentials: Credentials {
                username: outputs.require_string(outputs::USERNAME)?,
                password: outputs.require_string(outputs::PASSWORD)?,
            },
            api_key: outputs
                .get::<String>(outputs::API_KEY)?
                .filter(|k| !k.is_empty()),
        })
    }
}
