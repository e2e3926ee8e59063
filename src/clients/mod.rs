//! Collaborators the orchestrator drives: provisioning, the search engine,
//! the dashboard and the telemetry generator.

pub mod elasticsearch;
pub mod error;
pub mod handle;
pub mod kibana;
pub mod provisioner;
pub mod telemetry;

pub use elasticsearch::{
    Auth, DataStreamInfo, ElasticsearchClient, LogEntries, LogEntry, LogFilter, LogQuery,
    SearchClient,
};
pub use error::{ApiError, ClientError};
pub use handle::{ClusterHandle, Credentials, HandleError, ProvisionOutputs};
pub use kibana::{DashboardClient, KibanaClient};
pub use provisioner::{ProvisionError, ProvisionVars, Provisioner, TerraformRunner};
pub use telemetry::{
    GeneratorAdapter, GeneratorError, IngestTarget, ProcessGenerator, TelemetryGenerator,
};

use std::sync::Arc;
use std::time::Duration;

use crate::config::HarnessConfig;

/// Authenticated clients for one cluster
#[derive(Clone)]
pub struct ClientBundle {
    pub search: Arc<dyn SearchClient>,
    pub dashboard: Arc<dyn DashboardClient>,
}

/// Builds the client bundle for a freshly provisioned cluster
pub trait ClientFactory: Send + Sync {
    fn connect(&self, handle: &ClusterHandle) -> Result<ClientBundle, ClientError>;
}

/// [`ClientFactory`] producing REST clients authenticated as the cluster superuser
#[derive(Clone, Debug)]
pub struct RestClientFactory {
    pub tls_skip_verify: bool,
    pub request_timeout: Duration,
}

impl RestClientFactory {
    /// Requests use the per-request deadline, never the whole query phase
    /// budget, so transient timeouts leave room for a retry.
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            tls_skip_verify: config.tls_skip_verify,
            request_timeout: config.request_timeout,
        }
    }
}

impl ClientFactory for RestClientFactory {
    fn connect(&self, handle: &ClusterHandle) -> Result<ClientBundle, ClientError> {
        let search = ElasticsearchClient::new(
            handle.search_url.clone(),
            Auth::Basic {
                username: handle.credentials.username.clone(),
                password: handle.credentials.password.clone(),
            },
            self.tls_skip_verify,
            self.request_timeout,
        )?;
        let dashboard = KibanaClient::new(
            handle.dashboard_url.clone(),
            handle.credentials.clone(),
            self.tls_skip_verify,
            self.request_timeout,
        )?;
        Ok(ClientBundle {
            search: Arc::new(search),
            dashboard: Arc::new(dashboard),
        })
    }
}
