//! Upgrade test case definition
//!
//! A test case is built declaratively before a run, handed to the
//! orchestrator by value, and never mutated while the run executes.
//!
//! ```rust,ignore
//! let case = UpgradeTestCase::new("upgrade_8_15_4_to_8_16_0", from, to)
//!     .with_after_first_ingest(policy_a, Some(DataStreamsExpectation::managed_by_dsl(8, 1)))
//!     .with_post_upgrade(hook(|ctx| async move { /* ... */ Ok(()) }));
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::clients::elasticsearch::LogFilter;
use crate::model::expectation::{DataStreamsExpectation, DeltaPolicy};
use crate::model::version::StackVersion;
use crate::orchestrator::context::HookContext;

/// Error type a hook may return
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Caller-supplied mutation of cluster state, run at a fixed point of the workflow
pub type UpgradeHook =
    Arc<dyn Fn(HookContext) -> BoxFuture<'static, Result<(), HookError>> + Send + Sync>;

/// Wrap an async closure as an [`UpgradeHook`]
pub fn hook<F, Fut>(f: F) -> UpgradeHook
where
    F: Fn(HookContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HookError>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// How the ingestion service is deployed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeployMode {
    /// Ingestion runs as a managed integration (default)
    #[default]
    Managed,
    /// Ingestion runs as a standalone service
    Standalone,
}

impl DeployMode {
    /// Value of the `integrations_server` provisioning variable
    pub fn enable_integrations(&self) -> bool {
        matches!(self, DeployMode::Managed)
    }
}

/// Expectations evaluated at one checkpoint of the workflow
#[derive(Clone, Debug, Default)]
pub struct Checkpoint {
    /// Rules for the delta from the previous checkpoint
    pub delta: DeltaPolicy,
    /// Optional absolute shape of the snapshot
    pub data_streams: Option<DataStreamsExpectation>,
}

/// A single upgrade test: provision `from_version`, upgrade to `to_version`,
/// and verify the observable state at three checkpoints.
#[derive(Clone)]
pub struct UpgradeTestCase {
    pub name: String,
    pub from_version: StackVersion,
    pub to_version: StackVersion,
    pub deploy_mode: DeployMode,
    /// Namespace suffix of the expected data stream names
    pub data_stream_namespace: String,
    /// Pattern every snapshot is taken with
    pub data_stream_pattern: String,

    pub setup: Option<UpgradeHook>,
    pub post_upgrade: Option<UpgradeHook>,

    /// Checked after the pre-upgrade ingest, against the baseline
    pub after_first_ingest: Checkpoint,
    /// Checked after the upgrade, against the pre-upgrade assertion snapshot
    pub across_upgrade: Checkpoint,
    /// Checked after the post-upgrade ingest, against the no-drift snapshot
    pub after_second_ingest: Checkpoint,

    /// Engine error logs matching any of these are ignored
    pub ignored_engine_logs: Vec<LogFilter>,
    /// Ingestion service error logs matching any of these are ignored
    pub ignored_ingest_logs: Vec<LogFilter>,
}

impl UpgradeTestCase {
    pub fn new(name: impl Into<String>, from_version: StackVersion, to_version: StackVersion) -> Self {
        Self {
            name: name.into(),
            from_version,
            to_version,
            deploy_mode: DeployMode::default(),
            data_stream_namespace: "default".to_string(),
            data_stream_pattern: "*apm*".to_string(),
            setup: None,
            post_upgrade: None,
            after_first_ingest: Checkpoint::default(),
            across_upgrade: Checkpoint::default(),
            after_second_ingest: Checkpoint::default(),
            ignored_engine_logs: Vec::new(),
            ignored_ingest_logs: Vec::new(),
        }
    }

    pub fn with_deploy_mode(mut self, mode: DeployMode) -> Self {
        self.deploy_mode = mode;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.data_stream_namespace = namespace.into();
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.data_stream_pattern = pattern.into();
        self
    }

    pub fn with_setup(mut self, setup: UpgradeHook) -> Self {
        self.setup = Some(setup);
        self
    }

    pub fn with_post_upgrade(mut self, post_upgrade: UpgradeHook) -> Self {
        self.post_upgrade = Some(post_upgrade);
        self
    }

    pub fn with_after_first_ingest(
        mut self,
        delta: DeltaPolicy,
        data_streams: Option<DataStreamsExpectation>,
    ) -> Self {
        self.after_first_ingest = Checkpoint {
            delta,
            data_streams,
        };
        self
    }

    pub fn with_across_upgrade(
        mut self,
        delta: DeltaPolicy,
        data_streams: Option<DataStreamsExpectation>,
    ) -> Self {
        self.across_upgrade = Checkpoint {
            delta,
            data_streams,
        };
        self
    }

    pub fn with_after_second_ingest(
        mut self,
        delta: DeltaPolicy,
        data_streams: Option<DataStreamsExpectation>,
    ) -> Self {
        self.after_second_ingest = Checkpoint {
            delta,
            data_streams,
        };
        self
    }

    pub fn ignore_engine_logs(mut self, filters: impl IntoIterator<Item = LogFilter>) -> Self {
        self.ignored_engine_logs.extend(filters);
        self
    }

    pub fn ignore_ingest_logs(mut self, filters: impl IntoIterator<Item = LogFilter>) -> Self {
        self.ignored_ingest_logs.extend(filters);
        self
    }

    /// Check the case is runnable before anything is provisioned
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("test case name must not be empty".to_string());
        }
        if self.from_version >= self.to_version {
            return Err(format!(
                "from version {} must be lower than to version {}",
                self.from_version, self.to_version
            ));
        }
        if self.data_stream_pattern.trim().is_empty() {
            return Err("data stream pattern must not be empty".to_string());
        }
        if self.data_stream_namespace.trim().is_empty() {
            return Err("data stream namespace must not be empty".to_string());
        }
        Ok(())
    }
}

impl fmt::Debug for UpgradeTestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpgradeTestCase")
            .field("name", &self.name)
            .field("from_version", &self.from_version)
            .field("to_version", &self.to_version)
            .field("deploy_mode", &self.deploy_mode)
            .field("data_stream_namespace", &self.data_stream_namespace)
            .field("data_stream_pattern", &self.data_stream_pattern)
            .field("setup", &self.setup.is_some())
            .field("post_upgrade", &self.post_upgrade.is_some())
            .finish_non_exhaustive()
    }
}
