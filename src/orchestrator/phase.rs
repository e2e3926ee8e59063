//! Phases of one upgrade test run

use std::fmt;

use serde::Serialize;

/// Phase of an upgrade test run
///
/// The workflow phases run strictly in declaration order; `Completed` and
/// `Failed` are terminal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum TestPhase {
    /// Credentials, configuration and test case checks; nothing provisioned yet
    #[default]
    Precondition,
    /// Create the cluster at the from version
    Provision,
    /// Capture the state before any ingestion
    BaselineSnapshot,
    /// Optional caller-supplied setup hook
    CustomSetup,
    /// Ingest against the from version
    PreUpgradeIngest,
    /// Check growth and structure after the first ingest
    PreUpgradeAssertion,
    /// Re-apply with the to version
    Upgrade,
    /// Optional caller-supplied post-upgrade hook
    PostUpgradeHook,
    /// Check the upgrade itself changed nothing
    NoDriftAssertion,
    /// Ingest against the to version
    PostUpgradeIngest,
    /// Check growth, rollover and structure after the second ingest
    PostUpgradeAssertion,
    /// Check error logs of the engine and the ingestion service
    LogAssertion,
    /// Destroy the cluster
    Teardown,
    /// Every phase passed and the cluster was destroyed
    Completed,
    /// A phase failed; see the run failure for which one
    Failed,
}

impl TestPhase {
    /// The twelve workflow phases that act on a cluster, in execution order
    pub const WORKFLOW: [TestPhase; 12] = [
        TestPhase::Provision,
        TestPhase::BaselineSnapshot,
        TestPhase::CustomSetup,
        TestPhase::PreUpgradeIngest,
        TestPhase::PreUpgradeAssertion,
        TestPhase::Upgrade,
        TestPhase::PostUpgradeHook,
        TestPhase::NoDriftAssertion,
        TestPhase::PostUpgradeIngest,
        TestPhase::PostUpgradeAssertion,
        TestPhase::LogAssertion,
        TestPhase::Teardown,
    ];

    /// Returns true if no further transitions are expected
    pub fn is_terminal(&self) -> bool {
        matches!(self, TestPhase::Completed | TestPhase::Failed)
    }

    /// Phases that run while a cluster may exist and therefore must be
    /// followed by teardown whatever their outcome
    pub fn requires_teardown(&self) -> bool {
        matches!(
            self,
            TestPhase::BaselineSnapshot
                | TestPhase::CustomSetup
                | TestPhase::PreUpgradeIngest
                | TestPhase::PreUpgradeAssertion
                | TestPhase::Upgrade
                | TestPhase::PostUpgradeHook
                | TestPhase::NoDriftAssertion
                | TestPhase::PostUpgradeIngest
                | TestPhase::PostUpgradeAssertion
                | TestPhase::LogAssertion
        )
    }

    /// Phases backed by an optional hook
    pub fn is_hook(&self) -> bool {
        matches!(self, TestPhase::CustomSetup | TestPhase::PostUpgradeHook)
    }

    /// Position in the workflow (1 = Provision, 12 = Teardown)
    pub fn number(&self) -> Option<usize> {
        Self::WORKFLOW
            .iter()
            .position(|p| p == self)
            .map(|i| i + 1)
    }

    /// Stable snake_case name for logs and metric labels
    pub fn label(&self) -> &'static str {
        match self {
            TestPhase::Precondition => "precondition",
            TestPhase::Provision => "provision",
            TestPhase::BaselineSnapshot => "baseline_snapshot",
            TestPhase::CustomSetup => "custom_setup",
            TestPhase::PreUpgradeIngest => "pre_upgrade_ingest",
            TestPhase::PreUpgradeAssertion => "pre_upgrade_assertion",
            TestPhase::Upgrade => "upgrade",
            TestPhase::PostUpgradeHook => "post_upgrade_hook",
            TestPhase::NoDriftAssertion => "no_drift_assertion",
            TestPhase::PostUpgradeIngest => "post_upgrade_ingest",
            TestPhase::PostUpgradeAssertion => "post_upgrade_assertion",
            TestPhase::LogAssertion => "log_assertion",
            TestPhase::Teardown => "teardown",
            TestPhase::Completed => "completed",
            TestPhase::Failed => "failed",
        }
    }
}

impl fmt::Display for TestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestPhase::Precondition => write!(f, "Precondition"),
            TestPhase::Provision => write!(f, "Provision"),
            TestPhase::BaselineSnapshot => write!(f, "BaselineSnapshot"),
            TestPhase::CustomSetup => write!(f, "CustomSetup"),
            TestPhase::PreUpgradeIngest => write!(f, "PreUpgradeIngest"),
            TestPhase::PreUpgradeAssertion => write!(f, "PreUpgradeAssertion"),
            TestPhase::Upgrade => write!(f, "Upgrade"),
            TestPhase::PostUpgradeHook => write!(f, "PostUpgradeHook"),
            TestPhase::NoDriftAssertion => write!(f, "NoDriftAssertion"),
            TestPhase::PostUpgradeIngest => write!(f, "PostUpgradeIngest"),
            TestPhase::PostUpgradeAssertion => write!(f, "PostUpgradeAssertion"),
            TestPhase::LogAssertion => write!(f, "LogAssertion"),
            TestPhase::Teardown => write!(f, "Teardown"),
            TestPhase::Completed => write!(f, "Completed"),
            TestPhase::Failed => write!(f, "Failed"),
        }
    }
}
