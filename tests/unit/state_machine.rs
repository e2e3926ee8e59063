//! Additional unit tests for run state machine transitions

use upgrade_harness::orchestrator::{
    RunEvent, RunStateMachine, RunTransitionContext, RunTransitionResult, TestPhase,
    determine_run_event,
};

fn provisioned() -> RunTransitionContext {
    RunTransitionContext {
        cluster_provisioned: true,
        ..Default::default()
    }
}

fn failed_earlier() -> RunTransitionContext {
    RunTransitionContext {
        cluster_provisioned: true,
        prior_failure: true,
        ..Default::default()
    }
}

mod phase_tests {
    use super::*;

    #[test]
    fn test_workflow_order() {
        let numbers: Vec<usize> = TestPhase::WORKFLOW
            .iter()
            .filter_map(TestPhase::number)
            .collect();
        assert_eq!(numbers, (1..=12).collect::<Vec<_>>());
        assert_eq!(TestPhase::WORKFLOW[0], TestPhase::Provision);
        assert_eq!(TestPhase::WORKFLOW[11], TestPhase::Teardown);
    }

    #[test]
    fn test_precondition_and_terminal_have_no_number() {
        assert!(TestPhase::Precondition.number().is_none());
        assert!(TestPhase::Completed.number().is_none());
        assert!(TestPhase::Failed.number().is_none());
    }

    #[test]
    fn test_terminal_phases() {
        assert!(TestPhase::Completed.is_terminal());
        assert!(TestPhase::Failed.is_terminal());
        for phase in TestPhase::WORKFLOW {
            assert!(!phase.is_terminal(), "{phase}");
        }
    }

    #[test]
    fn test_requires_teardown() {
        assert!(!TestPhase::Precondition.requires_teardown());
        assert!(!TestPhase::Provision.requires_teardown());
        assert!(!TestPhase::Teardown.requires_teardown());
        assert!(TestPhase::BaselineSnapshot.requires_teardown());
        assert!(TestPhase::LogAssertion.requires_teardown());
    }

    #[test]
    fn test_labels_are_unique() {
        let mut labels: Vec<&str> = TestPhase::WORKFLOW.iter().map(TestPhase::label).collect();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), 12);
    }
}

mod transition_tests {
    use super::*;

    #[test]
    fn test_precondition_transitions() {
        let sm = RunStateMachine::new();
        let ctx = RunTransitionContext::default();
        assert_eq!(
            sm.next_phase(&TestPhase::Precondition, RunEvent::Succeeded, &ctx),
            TestPhase::Provision
        );
        assert_eq!(
            sm.next_phase(&TestPhase::Precondition, RunEvent::Cancelled, &ctx),
            TestPhase::Failed
        );
    }

    #[test]
    fn test_provision_success_requires_cluster() {
        let sm = RunStateMachine::new();
        let result = sm.transition(
            &TestPhase::Provision,
            RunEvent::Succeeded,
            &RunTransitionContext::default(),
        );
        assert!(matches!(result, RunTransitionResult::GuardFailed { .. }));

        let result = sm.transition(&TestPhase::Provision, RunEvent::Succeeded, &provisioned());
        assert!(matches!(
            result,
            RunTransitionResult::Success {
                to: TestPhase::BaselineSnapshot,
                ..
            }
        ));
    }

    #[test]
    fn test_cancelled_provision_with_cluster_tears_down() {
        let sm = RunStateMachine::new();
        assert_eq!(
            sm.next_phase(&TestPhase::Provision, RunEvent::Cancelled, &provisioned()),
            TestPhase::Teardown
        );
        assert_eq!(
            sm.next_phase(
                &TestPhase::Provision,
                RunEvent::Cancelled,
                &RunTransitionContext::default()
            ),
            TestPhase::Failed
        );
    }

    #[test]
    fn test_hook_guards() {
        let sm = RunStateMachine::new();
        let with_hook = RunTransitionContext {
            cluster_provisioned: true,
            hook_present: true,
            ..Default::default()
        };

        for phase in [TestPhase::CustomSetup, TestPhase::PostUpgradeHook] {
            assert!(matches!(
                sm.transition(&phase, RunEvent::Succeeded, &with_hook),
                RunTransitionResult::Success { .. }
            ));
            assert!(matches!(
                sm.transition(&phase, RunEvent::Skipped, &with_hook),
                RunTransitionResult::GuardFailed { .. }
            ));
            assert!(matches!(
                sm.transition(&phase, RunEvent::Skipped, &provisioned()),
                RunTransitionResult::Success { .. }
            ));
            assert!(matches!(
                sm.transition(&phase, RunEvent::Succeeded, &provisioned()),
                RunTransitionResult::GuardFailed { .. }
            ));
        }
    }

    #[test]
    fn test_skip_only_valid_for_hooks() {
        let sm = RunStateMachine::new();
        for phase in TestPhase::WORKFLOW.into_iter().filter(|p| !p.is_hook()) {
            assert!(!sm.can_transition(&phase, &RunEvent::Skipped), "{phase}");
        }
    }

    #[test]
    fn test_every_cluster_phase_tears_down_on_failure_and_cancel() {
        let sm = RunStateMachine::new();
        for phase in TestPhase::WORKFLOW
            .into_iter()
            .filter(TestPhase::requires_teardown)
        {
            for event in [RunEvent::Failed, RunEvent::Cancelled] {
                assert_eq!(
                    sm.next_phase(&phase, event, &failed_earlier()),
                    TestPhase::Teardown,
                    "{phase} on {event}"
                );
            }
        }
    }

    #[test]
    fn test_teardown_outcomes() {
        let sm = RunStateMachine::new();
        assert_eq!(
            sm.next_phase(&TestPhase::Teardown, RunEvent::Succeeded, &provisioned()),
            TestPhase::Completed
        );
        assert_eq!(
            sm.next_phase(&TestPhase::Teardown, RunEvent::Succeeded, &failed_earlier()),
            TestPhase::Failed
        );
        assert_eq!(
            sm.next_phase(&TestPhase::Teardown, RunEvent::Failed, &provisioned()),
            TestPhase::Failed
        );
    }

    #[test]
    fn test_terminal_phases_have_no_transitions() {
        let sm = RunStateMachine::new();
        for phase in [TestPhase::Completed, TestPhase::Failed] {
            assert!(sm.valid_events(&phase).is_empty());
            assert!(matches!(
                sm.transition(&phase, RunEvent::Succeeded, &provisioned()),
                RunTransitionResult::InvalidTransition { .. }
            ));
        }
    }

    #[test]
    fn test_invalid_transition_falls_back_to_teardown() {
        let sm = RunStateMachine::new();
        // Skipped is never valid for an assertion phase
        assert_eq!(
            sm.next_phase(
                &TestPhase::PreUpgradeAssertion,
                RunEvent::Skipped,
                &provisioned()
            ),
            TestPhase::Teardown
        );
        assert_eq!(
            sm.next_phase(
                &TestPhase::PreUpgradeAssertion,
                RunEvent::Skipped,
                &RunTransitionContext::default()
            ),
            TestPhase::Failed
        );
    }
}

mod event_tests {
    use super::*;

    #[test]
    fn test_determine_run_event() {
        let ok: Result<(), &str> = Ok(());
        let err: Result<(), &str> = Err("boom");
        assert_eq!(determine_run_event(&ok, false), RunEvent::Succeeded);
        assert_eq!(determine_run_event(&ok, true), RunEvent::Succeeded);
        assert_eq!(determine_run_event(&err, false), RunEvent::Failed);
        assert_eq!(determine_run_event(&err, true), RunEvent::Cancelled);
    }

    #[test]
    fn test_event_display() {
        assert_eq!(RunEvent::Succeeded.to_string(), "Succeeded");
        assert_eq!(RunEvent::Skipped.to_string(), "Skipped");
        assert_eq!(RunEvent::Cancelled.to_string(), "Cancelled");
    }
}
