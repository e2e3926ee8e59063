//! Harness configuration loaded from the environment
//!
//! The orchestrator receives a [`HarnessConfig`] at construction; nothing
//! here is process-wide state.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::orchestrator::phase::TestPhase;

pub const EC_API_KEY: &str = "EC_API_KEY";
pub const EC_REGION: &str = "EC_REGION";
pub const EC_TARGET: &str = "EC_TARGET";
pub const TF_WORKING_DIR: &str = "TF_WORKING_DIR";
pub const TF_BINARY: &str = "TF_BINARY";
pub const TELEMETRYGEN_BINARY: &str = "TELEMETRYGEN_BINARY";
pub const TELEMETRYGEN_EVENT_RATE: &str = "TELEMETRYGEN_EVENT_RATE";
pub const TLS_SKIP_VERIFY: &str = "TLS_SKIP_VERIFY";
pub const PROVISION_TIMEOUT: &str = "UPGRADE_HARNESS_PROVISION_TIMEOUT";
pub const UPGRADE_TIMEOUT: &str = "UPGRADE_HARNESS_UPGRADE_TIMEOUT";
pub const TEARDOWN_TIMEOUT: &str = "UPGRADE_HARNESS_TEARDOWN_TIMEOUT";
pub const INGEST_TIMEOUT: &str = "UPGRADE_HARNESS_INGEST_TIMEOUT";
pub const HOOK_TIMEOUT: &str = "UPGRADE_HARNESS_HOOK_TIMEOUT";
pub const QUERY_TIMEOUT: &str = "UPGRADE_HARNESS_QUERY_TIMEOUT";
pub const REQUEST_TIMEOUT: &str = "UPGRADE_HARNESS_REQUEST_TIMEOUT";
pub const DRAIN_MAX_ATTEMPTS: &str = "UPGRADE_HARNESS_DRAIN_MAX_ATTEMPTS";
pub const METRICS_PATH: &str = "UPGRADE_HARNESS_METRICS_PATH";

const DEFAULT_REGION: &str = "aws-eu-west-1";
const DEFAULT_TF_WORKING_DIR: &str = "infra/terraform/ec_deployment";
const DEFAULT_TF_BINARY: &str = "terraform";
const DEFAULT_TELEMETRYGEN_BINARY: &str = "apmtelemetrygen";
const DEFAULT_EVENT_RATE: &str = "1000/s";
const DEFAULT_DRAIN_MAX_ATTEMPTS: u32 = 10;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),

    #[error("invalid value {value:?} for {name}: {reason}")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Elastic Cloud environment deployments are created in
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CloudTarget {
    #[default]
    Pro,
    Qa,
}

impl CloudTarget {
    /// API endpoint the provisioning module is pointed at
    pub fn endpoint(&self) -> &'static str {
        match self {
            CloudTarget::Pro => "api.elastic-cloud.com",
            CloudTarget::Qa => "https://public-api.qa.cld.elstc.co",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CloudTarget::Pro => "pro",
            CloudTarget::Qa => "qa",
        }
    }
}

impl std::str::FromStr for CloudTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pro" => Ok(CloudTarget::Pro),
            "qa" => Ok(CloudTarget::Qa),
            other => Err(format!("expected 'pro' or 'qa', got '{other}'")),
        }
    }
}

/// Deadlines for the long-running phases
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhaseTimeouts {
    pub provision: Duration,
    pub upgrade: Duration,
    pub teardown: Duration,
    pub ingest: Duration,
    pub hook: Duration,
    /// Snapshot and log queries
    pub query: Duration,
}

impl Default for PhaseTimeouts {
    fn default() -> Self {
        Self {
            provision: Duration::from_secs(30 * 60),
            upgrade: Duration::from_secs(45 * 60),
            teardown: Duration::from_secs(20 * 60),
            ingest: Duration::from_secs(15 * 60),
            hook: Duration::from_secs(10 * 60),
            query: Duration::from_secs(2 * 60),
        }
    }
}

impl PhaseTimeouts {
    /// Deadline applied to a workflow phase
    pub fn for_phase(&self, phase: TestPhase) -> Duration {
        match phase {
            TestPhase::Provision => self.provision,
            TestPhase::Upgrade => self.upgrade,
            TestPhase::Teardown => self.teardown,
            TestPhase::PreUpgradeIngest | TestPhase::PostUpgradeIngest => self.ingest,
            TestPhase::CustomSetup | TestPhase::PostUpgradeHook => self.hook,
            _ => self.query,
        }
    }
}

#[derive(Clone, PartialEq)]
pub struct HarnessConfig {
    /// Cloud access key; runs are refused without it
    pub api_key: Option<String>,
    pub region: String,
    pub target: CloudTarget,
    pub tf_working_dir: PathBuf,
    pub tf_binary: String,
    pub telemetrygen_binary: String,
    pub event_rate: String,
    pub tls_skip_verify: bool,
    pub timeouts: PhaseTimeouts,
    /// Deadline for a single REST request; shorter than the query phase so
    /// a hung request can be retried within it
    pub request_timeout: Duration,
    pub drain_max_attempts: u32,
    pub metrics_path: Option<PathBuf>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            region: DEFAULT_REGION.to_string(),
            target: CloudTarget::default(),
            tf_working_dir: PathBuf::from(DEFAULT_TF_WORKING_DIR),
            tf_binary: DEFAULT_TF_BINARY.to_string(),
            telemetrygen_binary: DEFAULT_TELEMETRYGEN_BINARY.to_string(),
            event_rate: DEFAULT_EVENT_RATE.to_string(),
            tls_skip_verify: false,
            timeouts: PhaseTimeouts::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            drain_max_attempts: DEFAULT_DRAIN_MAX_ATTEMPTS,
            metrics_path: None,
        }
    }
}

impl std::fmt::Debug for HarnessConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarnessConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("region", &self.region)
            .field("target", &self.target)
            .field("tf_working_dir", &self.tf_working_dir)
            .field("tf_binary", &self.tf_binary)
            .field("telemetrygen_binary", &self.telemetrygen_binary)
            .field("event_rate", &self.event_rate)
            .field("tls_skip_verify", &self.tls_skip_verify)
            .field("timeouts", &self.timeouts)
            .field("request_timeout", &self.request_timeout)
            .field("drain_max_attempts", &self.drain_max_attempts)
            .field("metrics_path", &self.metrics_path)
            .finish()
    }
}

impl HarnessConfig {
    /// Load from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load through an arbitrary lookup; empty values count as unset.
    ///
    /// A missing access key is not an error here: it is reported by
    /// [`HarnessConfig::check_preconditions`] when a run starts.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let target = match get(EC_TARGET) {
            Some(value) => value.parse().map_err(|reason| ConfigError::InvalidValue {
                name: EC_TARGET,
                value,
                reason,
            })?,
            None => defaults.target,
        };

        let duration = |name: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            match get(name) {
                Some(value) => parse_duration(&value).ok_or(ConfigError::InvalidValue {
                    name,
                    value,
                    reason: "expected a duration such as 45s, 30m or 2h".to_string(),
                }),
                None => Ok(default),
            }
        };

        let timeouts = PhaseTimeouts {
            provision: duration(PROVISION_TIMEOUT, defaults.timeouts.provision)?,
            upgrade: duration(UPGRADE_TIMEOUT, defaults.timeouts.upgrade)?,
            teardown: duration(TEARDOWN_TIMEOUT, defaults.timeouts.teardown)?,
            ingest: duration(INGEST_TIMEOUT, defaults.timeouts.ingest)?,
            hook: duration(HOOK_TIMEOUT, defaults.timeouts.hook)?,
            query: duration(QUERY_TIMEOUT, defaults.timeouts.query)?,
        };

        let request_timeout = duration(REQUEST_TIMEOUT, defaults.request_timeout)?;
        if request_timeout.is_zero() || request_timeout >= timeouts.query {
            return Err(ConfigError::InvalidValue {
                name: REQUEST_TIMEOUT,
                value: format!("{request_timeout:?}"),
                reason: format!(
                    "must be non-zero and shorter than the query timeout ({:?})",
                    timeouts.query
                ),
            });
        }

        let drain_max_attempts = match get(DRAIN_MAX_ATTEMPTS) {
            Some(value) => match value.trim().parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: DRAIN_MAX_ATTEMPTS,
                        value,
                        reason: "expected a positive integer".to_string(),
                    });
                }
            },
            None => defaults.drain_max_attempts,
        };

        Ok(Self {
            api_key: get(EC_API_KEY),
            region: get(EC_REGION).unwrap_or(defaults.region),
            target,
            tf_working_dir: get(TF_WORKING_DIR)
                .map(PathBuf::from)
                .unwrap_or(defaults.tf_working_dir),
            tf_binary: get(TF_BINARY).unwrap_or(defaults.tf_binary),
            telemetrygen_binary: get(TELEMETRYGEN_BINARY).unwrap_or(defaults.telemetrygen_binary),
            event_rate: get(TELEMETRYGEN_EVENT_RATE).unwrap_or(defaults.event_rate),
            tls_skip_verify: get(TLS_SKIP_VERIFY).is_some(),
            timeouts,
            request_timeout,
            drain_max_attempts,
            metrics_path: get(METRICS_PATH).map(PathBuf::from),
        })
    }

    /// Everything a run needs before it may provision anything
    pub fn check_preconditions(&self) -> Result<(), ConfigError> {
        if self.api_key.is_none() {
            return Err(ConfigError::MissingEnv(EC_API_KEY));
        }
        if self.region.trim().is_empty() {
            return Err(ConfigError::MissingEnv(EC_REGION));
        }
        Ok(())
    }
}

/// Parse a duration such as `45s`, `30m`, `2h` or `1d`; a bare number is seconds
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    let (digits, multiplier) = match value.strip_suffix('s') {
        Some(rest) => (rest, 1),
        None => match value.strip_suffix('m') {
            Some(rest) => (rest, 60),
            None => match value.strip_suffix('h') {
                Some(rest) => (rest, 3600),
                None => match value.strip_suffix('d') {
                    Some(rest) => (rest, 86400),
                    None => (value, 1),
                },
            },
        },
    };

    digits
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .map(Duration::from_secs)
}
