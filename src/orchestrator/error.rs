//! Error types for upgrade test runs
//!
//! Errors are classified into categories that mirror where a run can break:
//! - **Precondition**: missing credentials or an invalid test case; nothing was provisioned
//! - **Provisioning**: apply/destroy failures and unusable provisioning outputs
//! - **Ingestion**: generator failures, including a generator that never drains
//! - **Assertion**: snapshot violations, always reported in full
//! - **Log**: non-ignored error-level log entries
//! - **Hook**: caller-supplied setup or post-upgrade hook failures
//! - **Collection**: snapshot or log queries against the search engine failed
//! - **Timeout** / **Cancelled**: the phase did not finish in time or the run was stopped

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::assertions::{LogFailure, Violation};
use crate::clients::error::ClientError;
use crate::clients::handle::HandleError;
use crate::clients::provisioner::ProvisionError;
use crate::clients::telemetry::GeneratorError;
use crate::config::ConfigError;
use crate::orchestrator::phase::TestPhase;
use crate::orchestrator::report::RunReport;
use crate::orchestrator::state_machine::RunEvent;
use crate::snapshot::CollectorError;

/// Error category, used for logging and metrics labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Precondition,
    Provisioning,
    Ingestion,
    Assertion,
    Log,
    Hook,
    Collection,
    Timeout,
    Cancelled,
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Precondition => write!(f, "precondition"),
            ErrorCategory::Provisioning => write!(f, "provisioning"),
            ErrorCategory::Ingestion => write!(f, "ingestion"),
            ErrorCategory::Assertion => write!(f, "assertion"),
            ErrorCategory::Log => write!(f, "log"),
            ErrorCategory::Hook => write!(f, "hook"),
            ErrorCategory::Collection => write!(f, "collection"),
            ErrorCategory::Timeout => write!(f, "timeout"),
            ErrorCategory::Cancelled => write!(f, "cancelled"),
            ErrorCategory::Internal => write!(f, "internal"),
        }
    }
}

/// Error variants for an upgrade test run
#[derive(Error, Debug)]
pub enum HarnessError {
    // ============================================
    // Precondition Errors (nothing provisioned)
    // ============================================
    /// Required configuration missing
    #[error("precondition failed: {0}")]
    Config(#[from] ConfigError),

    /// Test case cannot be run as declared
    #[error("invalid test case: {0}")]
    InvalidTestCase(String),

    // ============================================
    // Provisioning Errors
    // ============================================
    /// Apply or destroy failed
    #[error("provisioning failed: {0}")]
    Provision(#[from] ProvisionError),

    /// Apply succeeded but its outputs do not describe a usable cluster
    #[error("invalid provisioning outputs: {0}")]
    Handle(#[from] HandleError),

    /// Client construction or API key creation against the new cluster failed
    #[error("cluster unreachable: {0}")]
    Cluster(ClientError),

    /// The upgrade produced a different cluster instead of upgrading in place
    #[error("upgrade replaced the cluster: expected deployment {expected}, got {actual}")]
    ClusterReplaced { expected: String, actual: String },

    // ============================================
    // Ingestion Errors
    // ============================================
    #[error("ingestion failed: {0}")]
    Ingest(#[from] GeneratorError),

    // ============================================
    // Assertion Errors
    // ============================================
    /// Snapshot checks found mismatches; every one is listed
    #[error("{} assertion violation(s) {checkpoint}", violations.len())]
    Assertion {
        checkpoint: &'static str,
        violations: Vec<Violation>,
    },

    /// Non-ignored error-level logs were found
    #[error("error logs found in {}", sources(.0))]
    ErrorLogs(Vec<LogFailure>),

    // ============================================
    // Hook Errors
    // ============================================
    #[error("{phase} hook failed: {message}")]
    Hook { phase: TestPhase, message: String },

    // ============================================
    // Collection Errors
    // ============================================
    #[error("snapshot failed: {0}")]
    Snapshot(#[from] CollectorError),

    #[error("log query failed: {0}")]
    LogQuery(ClientError),

    // ============================================
    // Timing
    // ============================================
    #[error("phase {phase} exceeded {timeout:?}")]
    PhaseTimeout { phase: TestPhase, timeout: Duration },

    #[error("run cancelled")]
    Cancelled,

    /// The run reached a state the workflow does not allow
    #[error("no transition from {phase} on {event}: {reason}")]
    Workflow {
        phase: TestPhase,
        event: RunEvent,
        reason: String,
    },
}

fn sources(failures: &[LogFailure]) -> String {
    failures
        .iter()
        .map(|f| f.source.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl HarnessError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            HarnessError::Config(_) | HarnessError::InvalidTestCase(_) => {
                ErrorCategory::Precondition
            }
            HarnessError::Provision(_)
            | HarnessError::Handle(_)
            | HarnessError::Cluster(_)
            | HarnessError::ClusterReplaced { .. } => ErrorCategory::Provisioning,
            // A cancelled generator is a cancelled run, not a broken ingest.
            HarnessError::Ingest(GeneratorError::Cancelled) => ErrorCategory::Cancelled,
            HarnessError::Ingest(_) => ErrorCategory::Ingestion,
            HarnessError::Assertion { .. } => ErrorCategory::Assertion,
            HarnessError::ErrorLogs(_) => ErrorCategory::Log,
            HarnessError::Hook { .. } => ErrorCategory::Hook,
            HarnessError::Snapshot(_) | HarnessError::LogQuery(_) => ErrorCategory::Collection,
            HarnessError::PhaseTimeout { .. } => ErrorCategory::Timeout,
            HarnessError::Cancelled => ErrorCategory::Cancelled,
            HarnessError::Workflow { .. } => ErrorCategory::Internal,
        }
    }

    /// Reported before any resource is provisioned
    pub fn is_precondition(&self) -> bool {
        self.category() == ErrorCategory::Precondition
    }

    pub fn is_provisioning(&self) -> bool {
        self.category() == ErrorCategory::Provisioning
    }

    pub fn is_ingestion(&self) -> bool {
        self.category() == ErrorCategory::Ingestion
    }

    pub fn is_assertion(&self) -> bool {
        self.category() == ErrorCategory::Assertion
    }

    pub fn is_log_failure(&self) -> bool {
        self.category() == ErrorCategory::Log
    }

    pub fn is_timeout(&self) -> bool {
        self.category() == ErrorCategory::Timeout
    }

    pub fn is_cancelled(&self) -> bool {
        self.category() == ErrorCategory::Cancelled
    }

    /// Stream-level mismatches carried by this error
    pub fn violations(&self) -> &[Violation] {
        match self {
            HarnessError::Assertion { violations, .. } => violations,
            _ => &[],
        }
    }

    /// Offending log entries carried by this error
    pub fn log_failures(&self) -> &[LogFailure] {
        match self {
            HarnessError::ErrorLogs(failures) => failures,
            _ => &[],
        }
    }
}

/// A failed run: which phase broke, why, and everything observed up to then
#[derive(Debug)]
pub struct RunFailure {
    pub case: String,
    pub phase: TestPhase,
    pub error: HarnessError,
    /// Set when destroying the cluster failed as well
    pub teardown_error: Option<HarnessError>,
    pub report: RunReport,
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "upgrade test {} failed in phase {} ({}): {}",
            self.case,
            self.phase,
            self.error.category(),
            self.error
        )?;
        for violation in self.error.violations() {
            write!(f, "\n  - {violation}")?;
        }
        for failure in self.error.log_failures() {
            write!(f, "\n  - {failure}")?;
        }
        if let Some(teardown) = &self.teardown_error {
            write!(f, "\n  teardown also failed: {teardown}")?;
        }
        Ok(())
    }
}

impl std::error::Error for RunFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
