// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Property-based tests for differential assertions and run orchestration
//!
//! These tests use proptest to generate random snapshots and event sequences
//! and verify that:
//! 1. Comparing a snapshot with itself under a zero-delta policy never fails
//! 2. A stream that disappears is always reported, whatever the policy
//! 3. Exactly one rollover plus growth passes, anything else fails
//! 4. Collecting a snapshot twice without writes yields the same snapshot
//! 5. The state machine terminates on any event sequence
//! 6. A failure in any phase after provisioning tears down exactly once

#[path = "../common/mod.rs"]
mod common;

use std::collections::BTreeMap;

use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

use upgrade_harness::assertions::{ViolationKind, compare};
use upgrade_harness::model::{
    DataStreamSnapshot, DataStreamState, DeltaPolicy, ExpectedDelta, LifecycleManager,
};
use upgrade_harness::orchestrator::{RunEvent, RunStateMachine, RunTransitionContext, TestPhase};
use upgrade_harness::snapshot::collect_snapshot;

use common::*;

// =============================================================================
// Strategies
// =============================================================================

fn arb_manager() -> impl Strategy<Value = LifecycleManager> {
    prop_oneof![
        Just(LifecycleManager::DataStreamLifecycle),
        Just(LifecycleManager::IndexLifecycleManagement),
        Just(LifecycleManager::Unmanaged),
    ]
}

fn arb_state() -> impl Strategy<Value = DataStreamState> {
    (0u64..1_000_000, 1u32..6, arb_manager(), any::<bool>()).prop_map(
        |(document_count, backing_index_count, manager, prefer_ilm)| DataStreamState {
            document_count,
            backing_index_count,
            lifecycle_manager: manager,
            prefer_ilm,
            index_managers: vec![manager; backing_index_count as usize],
        },
    )
}

fn arb_snapshot() -> impl Strategy<Value = DataStreamSnapshot> {
    prop::collection::btree_map("[a-z]{1,8}-apm\\.[a-z]{1,6}-default", arb_state(), 1..12)
        .prop_map(DataStreamSnapshot::new)
}

fn arb_event() -> impl Strategy<Value = RunEvent> {
    prop_oneof![
        Just(RunEvent::Succeeded),
        Just(RunEvent::Skipped),
        Just(RunEvent::Failed),
        Just(RunEvent::Cancelled),
    ]
}

fn arb_cluster_phase() -> impl Strategy<Value = TestPhase> {
    prop::sample::select(
        TestPhase::WORKFLOW
            .into_iter()
            .filter(TestPhase::requires_teardown)
            .collect::<Vec<_>>(),
    )
}

fn grown(before: &DataStreamSnapshot, extra: u64, rollover: bool) -> DataStreamSnapshot {
    before
        .iter()
        .map(|(name, s)| {
            let mut s = s.clone();
            s.document_count += extra;
            if rollover {
                s.backing_index_count += 1;
                s.index_managers.push(s.lifecycle_manager);
            }
            (name.to_string(), s)
        })
        .collect()
}

// =============================================================================
// Differential assertions
// =============================================================================

proptest! {
    #[test]
    fn unchanged_snapshot_passes_zero_delta(snapshot in arb_snapshot()) {
        let policy = DeltaPolicy::uniform(snapshot.names(), ExpectedDelta::unchanged());
        prop_assert!(compare(&snapshot, &snapshot, &policy).is_empty());
    }

    #[test]
    fn any_document_change_fails_zero_delta(
        snapshot in arb_snapshot(),
        extra in 1u64..1000,
    ) {
        let policy = DeltaPolicy::uniform(snapshot.names(), ExpectedDelta::unchanged());
        let after = grown(&snapshot, extra, false);
        let violations = compare(&snapshot, &after, &policy);
        prop_assert_eq!(violations.len(), snapshot.len());
        let all_document_count = violations
            .iter()
            .all(|v| matches!(v.kind, ViolationKind::DocumentCount { .. }));
        prop_assert!(all_document_count);
    }

    #[test]
    fn disappearance_always_reported(
        snapshot in arb_snapshot(),
        mask in prop::collection::vec(any::<bool>(), 12),
        name_policy in any::<bool>(),
    ) {
        let after: DataStreamSnapshot = snapshot
            .iter()
            .zip(mask.iter().cycle())
            .filter(|(_, keep)| **keep)
            .map(|((name, s), _)| (name.to_string(), s.clone()))
            .collect();
        let removed: Vec<&str> = snapshot.names().filter(|n| !after.contains(n)).collect();

        let policy = if name_policy {
            DeltaPolicy::uniform(snapshot.names(), ExpectedDelta::growth())
        } else {
            DeltaPolicy::new()
        };
        let violations = compare(&snapshot, &after, &policy);

        for name in &removed {
            let count = violations
                .iter()
                .filter(|v| v.stream.as_deref() == Some(*name)
                    && v.kind == ViolationKind::StreamDisappeared)
                .count();
            prop_assert_eq!(count, 1, "{} reported once", name);
        }
        prop_assert_eq!(violations.len(), removed.len());
    }

    #[test]
    fn single_rollover_with_growth_passes(
        snapshot in arb_snapshot(),
        extra in 0u64..1000,
    ) {
        let policy = DeltaPolicy::uniform(snapshot.names(), ExpectedDelta::growth_with_rollover());
        let after = grown(&snapshot, extra, true);
        prop_assert!(compare(&snapshot, &after, &policy).is_empty());
    }

    #[test]
    fn missing_rollover_reported_per_stream(
        snapshot in arb_snapshot(),
        extra in 0u64..1000,
    ) {
        let policy = DeltaPolicy::uniform(snapshot.names(), ExpectedDelta::growth_with_rollover());
        let after = grown(&snapshot, extra, false);
        let violations = compare(&snapshot, &after, &policy);
        prop_assert_eq!(violations.len(), snapshot.len());
        let all_backing_index_count = violations
            .iter()
            .all(|v| matches!(v.kind, ViolationKind::BackingIndexCount { .. }));
        prop_assert!(all_backing_index_count);
    }

    #[test]
    fn compare_is_deterministic(
        before in arb_snapshot(),
        after in arb_snapshot(),
    ) {
        let policy = DeltaPolicy::uniform(before.names(), ExpectedDelta::growth().may_appear());
        prop_assert_eq!(
            compare(&before, &after, &policy),
            compare(&before, &after, &policy)
        );
    }
}

// =============================================================================
// Snapshot collection
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn snapshot_is_idempotent_without_writes(
        writes in prop::collection::btree_map(
            prop::sample::select(simulated_streams(NAMESPACE)),
            1u64..10_000,
            0..8,
        ),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let sim = SimulatedCluster::new();
        for (name, docs) in &writes {
            sim.write(name, *docs);
        }
        let search = sim.search();

        let (first, second) = rt.block_on(async {
            let first = collect_snapshot(search.as_ref(), "*apm*").await.unwrap();
            let second = collect_snapshot(search.as_ref(), "*apm*").await.unwrap();
            (first, second)
        });

        let expected: BTreeMap<String, u64> = writes;
        prop_assert_eq!(first.len(), expected.len());
        prop_assert_eq!(&first, &second);
        for (name, docs) in &expected {
            prop_assert_eq!(first.get(name).unwrap().document_count, *docs);
        }
    }
}

// =============================================================================
// Orchestration
// =============================================================================

proptest! {
    #[test]
    fn state_machine_terminates_on_any_events(
        events in prop::collection::vec(arb_event(), 14),
        cluster_provisioned in any::<bool>(),
        hook_present in any::<bool>(),
    ) {
        let sm = RunStateMachine::new();
        let mut phase = TestPhase::Precondition;
        let mut prior_failure = false;

        for event in events {
            if phase.is_terminal() {
                break;
            }
            prior_failure |= matches!(event, RunEvent::Failed | RunEvent::Cancelled);
            let ctx = RunTransitionContext {
                cluster_provisioned,
                prior_failure,
                hook_present,
            };
            let next = sm.next_phase(&phase, event, &ctx);

            if phase.requires_teardown() && matches!(event, RunEvent::Failed | RunEvent::Cancelled) {
                prop_assert_eq!(next, TestPhase::Teardown);
            }
            phase = next;
        }

        prop_assert!(phase.is_terminal(), "stuck in {}", phase);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn teardown_runs_exactly_once_after_any_failure(phase in arb_cluster_phase()) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let (sim, case) = failing_at(phase);

        let failure = rt
            .block_on(sim.runner().run(case, &CancellationToken::new()))
            .unwrap_err();

        prop_assert_eq!(failure.phase, phase);
        prop_assert_eq!(sim.destroy_calls(), 1);
        prop_assert!(!sim.exists());
        let teardowns = failure
            .report
            .phases
            .iter()
            .filter(|p| p.phase == TestPhase::Teardown)
            .count();
        prop_assert_eq!(teardowns, 1);
    }
}
