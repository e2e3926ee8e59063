//! Upgrade test orchestration
//!
//! Sequences provisioning, ingestion, snapshots, the upgrade and the
//! differential assertions of one test case, with teardown guaranteed on
//! every exit path.

pub mod context;
pub mod error;
pub mod phase;
pub mod report;
pub mod runner;
pub mod state_machine;

pub use context::HookContext;
pub use error::{ErrorCategory, HarnessError, RunFailure};
pub use phase::TestPhase;
pub use report::{CheckpointSnapshots, PhaseRecord, RunReport};
pub use runner::{UpgradeTestRunner, run_concurrently};
pub use state_machine::{
    RunEvent, RunStateMachine, RunTransition, RunTransitionContext, RunTransitionResult,
    determine_run_event,
};
