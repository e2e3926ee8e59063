//! Differential assertion between two snapshots

use crate::assertions::violation::{Side, Violation, ViolationKind};
use crate::model::expectation::{DeltaPolicy, ExpectedDelta, Presence};
use crate::model::snapshot::{DataStreamSnapshot, DataStreamState};

/// Compare `after` with `before` under `policy`, returning every violation.
///
/// Never short-circuits. Streams present in `before` but absent from `after`
/// are reported whether or not the policy names them; the set of streams
/// may grow across snapshots, never shrink.
pub fn compare(
    before: &DataStreamSnapshot,
    after: &DataStreamSnapshot,
    policy: &DeltaPolicy,
) -> Vec<Violation> {
    let mut violations = Vec::new();

    for name in before.names().filter(|n| !after.contains(n)) {
        violations.push(Violation::stream(name, ViolationKind::StreamDisappeared));
    }

    for (name, expected) in policy.iter() {
        let Some(after_state) = after.get(name) else {
            // Already reported as disappeared.
            if !before.contains(name) {
                violations.push(Violation::stream(
                    name,
                    ViolationKind::StreamNotFound { side: Side::After },
                ));
            }
            continue;
        };

        match before.get(name) {
            Some(before_state) => {
                check_pair(name, before_state, after_state, expected, &mut violations)
            }
            None => match expected.presence {
                Presence::MustExist => violations.push(Violation::stream(
                    name,
                    ViolationKind::StreamNotFound { side: Side::Before },
                )),
                Presence::MayAppear => {
                    check_count(name, 0, after_state.document_count, expected, &mut violations)
                }
            },
        }
    }

    violations
}

fn check_count(
    name: &str,
    before: u64,
    after: u64,
    expected: &ExpectedDelta,
    violations: &mut Vec<Violation>,
) {
    let delta = i128::from(after) - i128::from(before);
    let accepted = i64::try_from(delta).is_ok_and(|d| expected.count.accepts(d));
    if !accepted {
        violations.push(Violation::stream(
            name,
            ViolationKind::DocumentCount {
                expected: expected.count,
                before,
                after,
            },
        ));
    }
}

fn check_pair(
    name: &str,
    before: &DataStreamState,
    after: &DataStreamState,
    expected: &ExpectedDelta,
    violations: &mut Vec<Violation>,
) {
    check_count(
        name,
        before.document_count,
        after.document_count,
        expected,
        violations,
    );

    let want_indices = before
        .backing_index_count
        .saturating_add(expected.backing_indices.expected_increase());
    if after.backing_index_count != want_indices {
        violations.push(Violation::stream(
            name,
            ViolationKind::BackingIndexCount {
                expected: want_indices,
                actual: after.backing_index_count,
            },
        ));
    }

    if before.lifecycle_manager != after.lifecycle_manager {
        violations.push(Violation::stream(
            name,
            ViolationKind::LifecycleManagerChanged {
                before: before.lifecycle_manager,
                after: after.lifecycle_manager,
            },
        ));
    }
}
