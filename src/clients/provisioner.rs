//! Cluster provisioning through an infrastructure-as-code tool
//!
//! [`TerraformRunner`] drives the `terraform` CLI: a lazy, idempotent
//! `init -upgrade` on first use, `apply` followed by `output -json` to read
//! the produced values, and `destroy` with the variables of the last apply.
//! Every runner gets its own workspace and data directory so concurrent runs
//! sharing a module directory never touch each other's state.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, instrument, warn};

use crate::clients::handle::ProvisionOutputs;

/// Variables passed to a provisioning apply, e.g. `stack_version=8.16.0`
pub type ProvisionVars = BTreeMap<String, String>;

/// Standard provisioning variable names
pub mod vars {
    pub const STACK_VERSION: &str = "stack_version";
    pub const INTEGRATIONS_SERVER: &str = "integrations_server";
    pub const DEPLOYMENT_NAME: &str = "name";
    pub const REGION: &str = "ec_region";
    pub const EC_TARGET: &str = "ec_target";
}

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("failed to spawn {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("cannot decode provisioning outputs: {0}")]
    Outputs(#[from] serde_json::Error),

    /// Apply failed; outputs that were nevertheless produced are attached so
    /// the caller can decide whether something needs to be destroyed
    #[error("apply failed: {message}")]
    Apply {
        message: String,
        partial_outputs: ProvisionOutputs,
    },

    /// Apply exited successfully but its outputs could not be read back;
    /// the resources exist and must still be destroyed
    #[error("apply succeeded but its outputs are unavailable: {source}")]
    OutputsUnavailable {
        #[source]
        source: Box<ProvisionError>,
    },

    #[error("destroy requested before any apply")]
    NothingApplied,
}

impl ProvisionError {
    /// Outputs produced by a failed apply, if any
    pub fn partial_outputs(&self) -> Option<&ProvisionOutputs> {
        match self {
            ProvisionError::Apply {
                partial_outputs, ..
            } if !partial_outputs.is_empty() => Some(partial_outputs),
            _ => None,
        }
    }

    /// Whether a failed apply may have left resources behind
    pub fn resources_may_exist(&self) -> bool {
        matches!(self, ProvisionError::OutputsUnavailable { .. })
            || self.partial_outputs().is_some()
    }
}

/// Creates, updates and destroys one cluster
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Converge the cluster to `vars` and return the resulting outputs.
    ///
    /// Applying again with a different `stack_version` upgrades the same
    /// cluster in place.
    async fn apply(&self, vars: &ProvisionVars) -> Result<ProvisionOutputs, ProvisionError>;

    /// Destroy everything created by previous applies
    async fn destroy(&self) -> Result<(), ProvisionError>;
}

/// Single entry of `terraform output -json`
#[derive(Deserialize)]
struct OutputMeta {
    value: serde_json::Value,
}

/// [`Provisioner`] backed by the `terraform` CLI
pub struct TerraformRunner {
    binary: PathBuf,
    working_dir: PathBuf,
    workspace: String,
    env: Vec<(String, String)>,
    initialized: OnceCell<()>,
    last_vars: Mutex<Option<ProvisionVars>>,
}

impl TerraformRunner {
    pub fn new(
        binary: impl Into<PathBuf>,
        working_dir: impl Into<PathBuf>,
        workspace: impl Into<String>,
    ) -> Self {
        Self {
            binary: binary.into(),
            working_dir: working_dir.into(),
            workspace: workspace.into(),
            env: Vec::new(),
            initialized: OnceCell::new(),
            last_vars: Mutex::new(None),
        }
    }

    /// Extra environment passed to every terraform invocation
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn data_dir(&self) -> PathBuf {
        self.working_dir
            .join(".terraform-runs")
            .join(&self.workspace)
    }

    async fn run(&self, args: &[String]) -> Result<Vec<u8>, ProvisionError> {
        let command = format!("{} {}", self.binary.display(), args.join(" "));
        debug!(%command, "running terraform");

        let output = Command::new(&self.binary)
            .args(args)
            .current_dir(&self.working_dir)
            .env("TF_IN_AUTOMATION", "1")
            .env("TF_WORKSPACE", &self.workspace)
            .env("TF_DATA_DIR", self.data_dir())
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ProvisionError::Spawn {
                binary: self.binary.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(ProvisionError::Command {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    async fn ensure_initialized(&self) -> Result<(), ProvisionError> {
        self.initialized
            .get_or_try_init(|| async {
                info!(working_dir = %self.working_dir.display(), "running terraform init");
                self.run(&args(["init", "-upgrade", "-input=false", "-no-color"]))
                    .await
                    .map(|_| ())
            })
            .await
            .map(|_| ())
    }

    async fn outputs(&self) -> Result<ProvisionOutputs, ProvisionError> {
        let stdout = self.run(&args(["output", "-json", "-no-color"])).await?;
        parse_outputs(&stdout)
    }
}

#[async_trait]
impl Provisioner for TerraformRunner {
    #[instrument(skip(self, vars), fields(workspace = %self.workspace))]
    async fn apply(&self, vars: &ProvisionVars) -> Result<ProvisionOutputs, ProvisionError> {
        self.ensure_initialized().await?;
        *self.last_vars.lock().await = Some(vars.clone());

        let mut cmd = args(["apply", "-auto-approve", "-input=false", "-no-color"]);
        cmd.extend(var_args(vars));

        if let Err(e) = self.run(&cmd).await {
            let partial_outputs = self.outputs().await.unwrap_or_else(|oe| {
                warn!(error = %oe, "cannot read outputs after failed apply");
                ProvisionOutputs::default()
            });
            return Err(ProvisionError::Apply {
                message: e.to_string(),
                partial_outputs,
            });
        }

        self.outputs().await.map_err(|e| {
            warn!(error = %e, "apply succeeded but outputs cannot be read");
            ProvisionError::OutputsUnavailable {
                source: Box::new(e),
            }
        })
    }

    #[instrument(skip(self), fields(workspace = %self.workspace))]
    async fn destroy(&self) -> Result<(), ProvisionError> {
        let vars = self
            .last_vars
            .lock()
            .await
            .clone()
            .ok_or(ProvisionError::NothingApplied)?;
        self.ensure_initialized().await?;

        let mut cmd = args(["destroy", "-auto-approve", "-input=false", "-no-color"]);
        cmd.extend(var_args(&vars));
        self.run(&cmd).await.map(|_| ())
    }
}

fn args<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

fn var_args(vars: &ProvisionVars) -> impl Iterator<Item = String> + '_ {
    vars.iter()
        .flat_map(|(k, v)| ["-var".to_string(), format!("{k}={v}")])
}

/// Decode `terraform output -json` into plain output values
pub fn parse_outputs(stdout: &[u8]) -> Result<ProvisionOutputs, ProvisionError> {
    let raw: BTreeMap<String, OutputMeta> = serde_json::from_slice(stdout)?;
    Ok(raw.into_iter().map(|(k, meta)| (k, meta.value)).collect())
}
