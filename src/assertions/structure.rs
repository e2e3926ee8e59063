//! Absolute structural checks on a single snapshot

use crate::assertions::violation::{Violation, ViolationKind};
use crate::model::expectation::DataStreamsExpectation;
use crate::model::snapshot::DataStreamSnapshot;

/// Check every stream in `snapshot` against the declared shape.
pub fn check_data_streams(
    snapshot: &DataStreamSnapshot,
    want: &DataStreamsExpectation,
) -> Vec<Violation> {
    let mut violations = Vec::new();

    if snapshot.len() != want.quantity {
        violations.push(Violation::global(ViolationKind::StreamQuantity {
            expected: want.quantity,
            actual: snapshot.len(),
        }));
    }

    for (name, state) in snapshot.iter() {
        if state.prefer_ilm != want.prefer_ilm {
            violations.push(Violation::stream(
                name,
                ViolationKind::PreferIlm {
                    expected: want.prefer_ilm,
                    actual: state.prefer_ilm,
                },
            ));
        }

        if state.lifecycle_manager != want.lifecycle_manager {
            violations.push(Violation::stream(
                name,
                ViolationKind::LifecycleManager {
                    expected: want.lifecycle_manager,
                    actual: state.lifecycle_manager,
                },
            ));
        }

        if state.backing_index_count != want.backing_indices {
            violations.push(Violation::stream(
                name,
                ViolationKind::BackingIndexCount {
                    expected: want.backing_indices,
                    actual: state.backing_index_count,
                },
            ));
        }

        if let Some(expected) = &want.index_managers {
            if &state.index_managers != expected {
                violations.push(Violation::stream(
                    name,
                    ViolationKind::IndexManagers {
                        expected: expected.clone(),
                        actual: state.index_managers.clone(),
                    },
                ));
            }
        }
    }

    violations
}
