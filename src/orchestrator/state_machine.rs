//! Formal finite state machine for upgrade test runs
//!
//! The orchestrator never decides the next phase itself: it reports the
//! outcome of the current phase as a [`RunEvent`] and the transition table
//! below picks the successor. This keeps the teardown guarantee in one
//! place.
//!
//! ## Phase Flow
//!
//! ```text
//! Precondition → Provision → BaselineSnapshot → CustomSetup →
//! PreUpgradeIngest → PreUpgradeAssertion → Upgrade → PostUpgradeHook →
//! NoDriftAssertion → PostUpgradeIngest → PostUpgradeAssertion →
//! LogAssertion → Teardown → Completed
//!                 ↓ (any phase from Provision on, cluster exists)
//!              Teardown → Failed
//! ```

use std::fmt;

use serde::Serialize;
use tracing::error;

use crate::orchestrator::phase::TestPhase;

/// Outcome of a phase, fed to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RunEvent {
    /// The phase did its work and every check passed
    Succeeded,
    /// The phase had nothing to do (hook not supplied)
    Skipped,
    /// The phase failed or timed out
    Failed,
    /// The run was cancelled during the phase
    Cancelled,
}

impl fmt::Display for RunEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunEvent::Succeeded => write!(f, "Succeeded"),
            RunEvent::Skipped => write!(f, "Skipped"),
            RunEvent::Failed => write!(f, "Failed"),
            RunEvent::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Context information available during run state transitions
#[derive(Debug, Clone, Default)]
pub struct RunTransitionContext {
    /// Whether a cluster exists (or may exist) that teardown must destroy
    pub cluster_provisioned: bool,
    /// Whether an earlier phase already failed
    pub prior_failure: bool,
    /// Whether the current hook phase has a hook to run
    pub hook_present: bool,
}

/// A state transition definition for run phases
#[derive(Debug)]
pub struct RunTransition {
    /// Source phase
    pub from: TestPhase,
    /// Target phase
    pub to: TestPhase,
    /// Event that triggers this transition
    pub event: RunEvent,
    /// Human-readable description of this transition
    pub description: &'static str,
}

impl RunTransition {
    const fn new(
        from: TestPhase,
        to: TestPhase,
        event: RunEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

/// Result of attempting a run state transition
#[derive(Debug)]
pub enum RunTransitionResult {
    /// Transition was successful
    Success {
        from: TestPhase,
        to: TestPhase,
        event: RunEvent,
        description: &'static str,
    },
    /// Transition was not valid for current phase
    InvalidTransition { current: TestPhase, event: RunEvent },
    /// Guard condition prevented every candidate transition
    GuardFailed {
        from: TestPhase,
        to: TestPhase,
        event: RunEvent,
        reason: String,
    },
}

/// Formal state machine for upgrade test runs
pub struct RunStateMachine {
    transitions: Vec<RunTransition>,
}

impl Default for RunStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStateMachine {
    /// Create a new run state machine with the defined transition table
    #[allow(clippy::too_many_lines)]
    pub fn new() -> Self {
        let mut transitions = vec![
            // === Precondition state transitions ===
            RunTransition::new(
                TestPhase::Precondition,
                TestPhase::Provision,
                RunEvent::Succeeded,
                "Preconditions met, provisioning cluster",
            ),
            RunTransition::new(
                TestPhase::Precondition,
                TestPhase::Failed,
                RunEvent::Failed,
                "Precondition failed, nothing to clean up",
            ),
            RunTransition::new(
                TestPhase::Precondition,
                TestPhase::Failed,
                RunEvent::Cancelled,
                "Cancelled before provisioning",
            ),
            // === Provision state transitions ===
            RunTransition::new(
                TestPhase::Provision,
                TestPhase::BaselineSnapshot,
                RunEvent::Succeeded,
                "Cluster ready, capturing baseline",
            ),
            RunTransition::new(
                TestPhase::Provision,
                TestPhase::Teardown,
                RunEvent::Failed,
                "Provisioning failed with partial state, tearing down",
            ),
            RunTransition::new(
                TestPhase::Provision,
                TestPhase::Failed,
                RunEvent::Failed,
                "Provisioning failed before anything was created",
            ),
            RunTransition::new(
                TestPhase::Provision,
                TestPhase::Teardown,
                RunEvent::Cancelled,
                "Cancelled during provisioning, tearing down",
            ),
            RunTransition::new(
                TestPhase::Provision,
                TestPhase::Failed,
                RunEvent::Cancelled,
                "Cancelled before anything was created",
            ),
            // === Workflow transitions ===
            RunTransition::new(
                TestPhase::BaselineSnapshot,
                TestPhase::CustomSetup,
                RunEvent::Succeeded,
                "Baseline captured",
            ),
            RunTransition::new(
                TestPhase::CustomSetup,
                TestPhase::PreUpgradeIngest,
                RunEvent::Succeeded,
                "Custom setup done, ingesting",
            ),
            RunTransition::new(
                TestPhase::CustomSetup,
                TestPhase::PreUpgradeIngest,
                RunEvent::Skipped,
                "No custom setup, ingesting",
            ),
            RunTransition::new(
                TestPhase::PreUpgradeIngest,
                TestPhase::PreUpgradeAssertion,
                RunEvent::Succeeded,
                "Generator drained, asserting",
            ),
            RunTransition::new(
                TestPhase::PreUpgradeAssertion,
                TestPhase::Upgrade,
                RunEvent::Succeeded,
                "Pre-upgrade state verified, upgrading",
            ),
            RunTransition::new(
                TestPhase::Upgrade,
                TestPhase::PostUpgradeHook,
                RunEvent::Succeeded,
                "Upgrade applied",
            ),
            RunTransition::new(
                TestPhase::PostUpgradeHook,
                TestPhase::NoDriftAssertion,
                RunEvent::Succeeded,
                "Post-upgrade hook done, checking drift",
            ),
            RunTransition::new(
                TestPhase::PostUpgradeHook,
                TestPhase::NoDriftAssertion,
                RunEvent::Skipped,
                "No post-upgrade hook, checking drift",
            ),
            RunTransition::new(
                TestPhase::NoDriftAssertion,
                TestPhase::PostUpgradeIngest,
                RunEvent::Succeeded,
                "No drift, ingesting",
            ),
            RunTransition::new(
                TestPhase::PostUpgradeIngest,
                TestPhase::PostUpgradeAssertion,
                RunEvent::Succeeded,
                "Generator drained, asserting",
            ),
            RunTransition::new(
                TestPhase::PostUpgradeAssertion,
                TestPhase::LogAssertion,
                RunEvent::Succeeded,
                "Post-upgrade state verified, checking logs",
            ),
            RunTransition::new(
                TestPhase::LogAssertion,
                TestPhase::Teardown,
                RunEvent::Succeeded,
                "No error logs, tearing down",
            ),
            // === Teardown state transitions ===
            // Teardown ignores cancellation, so there is no Cancelled edge.
            RunTransition::new(
                TestPhase::Teardown,
                TestPhase::Completed,
                RunEvent::Succeeded,
                "Cluster destroyed, run passed",
            ),
            RunTransition::new(
                TestPhase::Teardown,
                TestPhase::Failed,
                RunEvent::Succeeded,
                "Cluster destroyed after a failure",
            ),
            RunTransition::new(
                TestPhase::Teardown,
                TestPhase::Failed,
                RunEvent::Failed,
                "Teardown failed",
            ),
            // === Completed / Failed are terminal ===
        ];

        // Every phase between provisioning and teardown releases the cluster on failure.
        for phase in TestPhase::WORKFLOW
            .into_iter()
            .filter(TestPhase::requires_teardown)
        {
            transitions.push(RunTransition::new(
                phase,
                TestPhase::Teardown,
                RunEvent::Failed,
                "Phase failed, tearing down",
            ));
            transitions.push(RunTransition::new(
                phase,
                TestPhase::Teardown,
                RunEvent::Cancelled,
                "Cancelled, tearing down",
            ));
        }

        Self { transitions }
    }

    /// Attempt to transition to a new phase based on an event.
    ///
    /// Several transitions may share a source and event; the first one whose
    /// guard passes wins.
    pub fn transition(
        &self,
        current: &TestPhase,
        event: RunEvent,
        ctx: &RunTransitionContext,
    ) -> RunTransitionResult {
        let mut first_rejection = None;

        for t in self
            .transitions
            .iter()
            .filter(|t| t.from == *current && t.event == event)
        {
            match self.check_guard(t, ctx) {
                None => {
                    return RunTransitionResult::Success {
                        from: t.from,
                        to: t.to,
                        event,
                        description: t.description,
                    };
                }
                Some(reason) => {
                    if first_rejection.is_none() {
                        first_rejection = Some((t.to, reason));
                    }
                }
            }
        }

        match first_rejection {
            Some((to, reason)) => RunTransitionResult::GuardFailed {
                from: *current,
                to,
                event,
                reason,
            },
            None => RunTransitionResult::InvalidTransition {
                current: *current,
                event,
            },
        }
    }

    /// Resolve the next phase, falling back to the safest one when the
    /// table has no applicable edge: teardown if a cluster may exist,
    /// otherwise `Failed`.
    pub fn next_phase(
        &self,
        current: &TestPhase,
        event: RunEvent,
        ctx: &RunTransitionContext,
    ) -> TestPhase {
        match self.transition(current, event, ctx) {
            RunTransitionResult::Success { to, .. } => to,
            other => {
                error!(phase = %current, %event, result = ?other, "no valid transition");
                if ctx.cluster_provisioned && *current != TestPhase::Teardown {
                    TestPhase::Teardown
                } else {
                    TestPhase::Failed
                }
            }
        }
    }

    /// Check if a transition is valid (ignoring guards)
    pub fn can_transition(&self, from: &TestPhase, event: &RunEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == *from && t.event == *event)
    }

    /// Get all valid events for a given phase
    pub fn valid_events(&self, phase: &TestPhase) -> Vec<&RunEvent> {
        let mut events: Vec<&RunEvent> = Vec::new();
        for t in self.transitions.iter().filter(|t| t.from == *phase) {
            if !events.contains(&&t.event) {
                events.push(&t.event);
            }
        }
        events
    }

    /// Check guard conditions for a transition
    fn check_guard(&self, transition: &RunTransition, ctx: &RunTransitionContext) -> Option<String> {
        match (&transition.from, &transition.to, &transition.event) {
            // Guard: a successful provision must have produced a cluster
            (TestPhase::Provision, TestPhase::BaselineSnapshot, RunEvent::Succeeded) => {
                if !ctx.cluster_provisioned {
                    Some("Provisioning reported success without a cluster".to_string())
                } else {
                    None
                }
            }

            // Guard: tear down after a provisioning failure only if something exists
            (TestPhase::Provision, TestPhase::Teardown, _) => {
                if !ctx.cluster_provisioned {
                    Some("No cluster was created".to_string())
                } else {
                    None
                }
            }
            (TestPhase::Provision, TestPhase::Failed, _) => {
                if ctx.cluster_provisioned {
                    Some("A cluster exists and must be torn down".to_string())
                } else {
                    None
                }
            }

            // Guard: hook phases succeed only with a hook and skip only without one
            (from, _, RunEvent::Succeeded) if from.is_hook() => {
                if !ctx.hook_present {
                    Some(format!("{from} has no hook to run"))
                } else {
                    None
                }
            }
            (from, _, RunEvent::Skipped) if from.is_hook() => {
                if ctx.hook_present {
                    Some(format!("{from} has a hook that must run"))
                } else {
                    None
                }
            }

            // Guard: teardown completes the run only when nothing failed before
            (TestPhase::Teardown, TestPhase::Completed, RunEvent::Succeeded) => {
                if ctx.prior_failure {
                    Some("An earlier phase failed".to_string())
                } else {
                    None
                }
            }
            (TestPhase::Teardown, TestPhase::Failed, RunEvent::Succeeded) => {
                if !ctx.prior_failure {
                    Some("No earlier phase failed".to_string())
                } else {
                    None
                }
            }

            // No guard for other transitions
            _ => None,
        }
    }
}

/// Map a phase outcome to its state machine event
pub fn determine_run_event<T, E>(outcome: &Result<T, E>, cancelled: bool) -> RunEvent {
    match outcome {
        Ok(_) => RunEvent::Succeeded,
        Err(_) if cancelled => RunEvent::Cancelled,
        Err(_) => RunEvent::Failed,
    }
}
