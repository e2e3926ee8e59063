//! Assertion findings
//!
//! Violations are data: the engines return every one they find and the
//! orchestrator decides whether the phase failed.

use std::fmt;

use serde::Serialize;

use crate::model::expectation::CountDelta;
use crate::model::snapshot::LifecycleManager;

/// Which snapshot of a compared pair a stream was missing from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Side {
    Before,
    After,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Before => write!(f, "before"),
            Side::After => write!(f, "after"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum ViolationKind {
    /// A stream named by the policy was not found in one snapshot
    StreamNotFound { side: Side },
    /// A stream present before is gone after
    StreamDisappeared,
    DocumentCount {
        expected: CountDelta,
        before: u64,
        after: u64,
    },
    BackingIndexCount { expected: u32, actual: u32 },
    /// Lifecycle manager differs between the two snapshots
    LifecycleManagerChanged {
        before: LifecycleManager,
        after: LifecycleManager,
    },
    /// Lifecycle manager differs from the declared one
    LifecycleManager {
        expected: LifecycleManager,
        actual: LifecycleManager,
    },
    PreferIlm { expected: bool, actual: bool },
    IndexManagers {
        expected: Vec<LifecycleManager>,
        actual: Vec<LifecycleManager>,
    },
    StreamQuantity { expected: usize, actual: usize },
}

/// One mismatch, optionally tied to a data stream
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub stream: Option<String>,
    pub kind: ViolationKind,
}

impl Violation {
    pub fn stream(name: &str, kind: ViolationKind) -> Self {
        Self {
            stream: Some(name.to_string()),
            kind,
        }
    }

    pub fn global(kind: ViolationKind) -> Self {
        Self { stream: None, kind }
    }
}

fn managers(list: &[LifecycleManager]) -> String {
    list.iter()
        .map(LifecycleManager::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(stream) = &self.stream {
            write!(f, "{stream}: ")?;
        }
        match &self.kind {
            ViolationKind::StreamNotFound { side } => {
                write!(f, "stream not found in {side} snapshot")
            }
            ViolationKind::StreamDisappeared => write!(f, "stream disappeared"),
            ViolationKind::DocumentCount {
                expected,
                before,
                after,
            } => {
                let delta = i128::from(*after) - i128::from(*before);
                write!(
                    f,
                    "document count: expected delta {expected}, actual {delta:+} ({before} -> {after})"
                )
            }
            ViolationKind::BackingIndexCount { expected, actual } => {
                write!(f, "backing indices: expected {expected}, actual {actual}")
            }
            ViolationKind::LifecycleManagerChanged { before, after } => {
                write!(f, "lifecycle manager changed: {before} -> {after}")
            }
            ViolationKind::LifecycleManager { expected, actual } => {
                write!(f, "lifecycle manager: expected {expected}, actual {actual}")
            }
            ViolationKind::PreferIlm { expected, actual } => {
                write!(f, "prefer_ilm: expected {expected}, actual {actual}")
            }
            ViolationKind::IndexManagers { expected, actual } => write!(
                f,
                "index managers: expected [{}], actual [{}]",
                managers(expected),
                managers(actual)
            ),
            ViolationKind::StreamQuantity { expected, actual } => {
                write!(f, "data streams: expected {expected}, actual {actual}")
            }
        }
    }
}
