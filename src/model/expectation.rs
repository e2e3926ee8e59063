//! Declarative expectations evaluated against snapshots
//!
//! Two kinds of expectation exist:
//! - [`DeltaPolicy`]: per-stream rules for the transition between two snapshots
//! - [`DataStreamsExpectation`]: absolute structural shape of one snapshot

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::snapshot::LifecycleManager;

/// Accepted change in document count between two snapshots
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountDelta {
    /// `after - before` must equal this value
    Exact(i64),
    /// `after - before` must be >= 0
    AnyNonNegative,
}

impl CountDelta {
    /// No document may be added or removed
    pub const ZERO: CountDelta = CountDelta::Exact(0);

    pub fn accepts(&self, delta: i64) -> bool {
        match self {
            CountDelta::Exact(n) => delta == *n,
            CountDelta::AnyNonNegative => delta >= 0,
        }
    }
}

impl fmt::Display for CountDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CountDelta::Exact(n) => write!(f, "exactly {n:+}"),
            CountDelta::AnyNonNegative => write!(f, ">= 0"),
        }
    }
}

/// Accepted change in backing index count between two snapshots
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexDelta {
    /// No rollover happened
    Unchanged,
    /// Exactly one rollover happened
    RolledOver,
}

impl IndexDelta {
    pub fn expected_increase(&self) -> u32 {
        match self {
            IndexDelta::Unchanged => 0,
            IndexDelta::RolledOver => 1,
        }
    }
}

/// Whether a stream must already exist in the earlier snapshot
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Presence {
    /// Missing from `before` is a violation
    #[default]
    MustExist,
    /// May be created between the two snapshots; prior count is taken as 0
    MayAppear,
}

/// Accepted transition of one data stream between two snapshots
///
/// The lifecycle manager must be identical on both sides whenever the stream
/// exists in both; that rule is not configurable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedDelta {
    pub count: CountDelta,
    pub backing_indices: IndexDelta,
    #[serde(default)]
    pub presence: Presence,
}

impl ExpectedDelta {
    /// Nothing may change: the stream must exist, same count, same indices
    pub const fn unchanged() -> Self {
        Self {
            count: CountDelta::ZERO,
            backing_indices: IndexDelta::Unchanged,
            presence: Presence::MustExist,
        }
    }

    /// Documents may have been added, no rollover
    pub const fn growth() -> Self {
        Self {
            count: CountDelta::AnyNonNegative,
            backing_indices: IndexDelta::Unchanged,
            presence: Presence::MustExist,
        }
    }

    /// Documents may have been added and exactly one rollover happened
    pub const fn growth_with_rollover() -> Self {
        Self {
            count: CountDelta::AnyNonNegative,
            backing_indices: IndexDelta::RolledOver,
            presence: Presence::MustExist,
        }
    }

    pub const fn with_count(mut self, count: CountDelta) -> Self {
        self.count = count;
        self
    }

    pub const fn may_appear(mut self) -> Self {
        self.presence = Presence::MayAppear;
        self
    }
}

/// Per-data-stream expected deltas, keyed by stream name
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeltaPolicy {
    streams: BTreeMap<String, ExpectedDelta>,
}

impl DeltaPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the same rule to every listed stream
    pub fn uniform<I, S>(names: I, delta: ExpectedDelta) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            streams: names.into_iter().map(|n| (n.into(), delta)).collect(),
        }
    }

    /// Add or replace the rule for one stream
    pub fn with_stream(mut self, name: impl Into<String>, delta: ExpectedDelta) -> Self {
        self.streams.insert(name.into(), delta);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ExpectedDelta> {
        self.streams.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ExpectedDelta)> {
        self.streams.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

/// Absolute shape every matching data stream must have at a checkpoint
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataStreamsExpectation {
    /// Exact number of streams matching the pattern
    pub quantity: usize,
    pub prefer_ilm: bool,
    /// Manager of the next generation of each stream
    pub lifecycle_manager: LifecycleManager,
    /// Backing indices per stream
    pub backing_indices: u32,
    /// Expected manager of each backing index, oldest first; `None` skips the check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_managers: Option<Vec<LifecycleManager>>,
}

impl DataStreamsExpectation {
    /// Every stream managed by data stream lifecycle, including all indices
    pub fn managed_by_dsl(quantity: usize, backing_indices: u32) -> Self {
        let count = usize::try_from(backing_indices).unwrap_or(usize::MAX);
        Self {
            quantity,
            prefer_ilm: false,
            lifecycle_manager: LifecycleManager::DataStreamLifecycle,
            backing_indices,
            index_managers: Some(vec![LifecycleManager::DataStreamLifecycle; count]),
        }
    }
}
