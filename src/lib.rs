//! Upgrade-correctness test harness for managed telemetry ingestion clusters.
//!
//! A run provisions a cluster at one stack version, ingests synthetic
//! telemetry, upgrades the cluster in place and verifies that the
//! observable data stream state is preserved or changes only as declared.

pub mod assertions;
pub mod clients;
pub mod config;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod retry;
pub mod scenarios;
pub mod snapshot;

pub use config::{ConfigError, HarnessConfig};
pub use metrics::HarnessMetrics;
pub use model::{
    CountDelta, DataStreamSnapshot, DataStreamsExpectation, DeltaPolicy, ExpectedDelta,
    StackVersion, UpgradeTestCase,
};
pub use orchestrator::{
    HarnessError, HookContext, RunFailure, RunReport, TestPhase, UpgradeTestRunner,
    run_concurrently,
};
pub use retry::RetryPolicy;
