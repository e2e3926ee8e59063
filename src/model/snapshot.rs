//! Point-in-time data stream state

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Subsystem responsible for rotating and retaining a data stream's indices
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleManager {
    /// Data stream lifecycle (DSL)
    DataStreamLifecycle,
    /// Index lifecycle management (ILM)
    IndexLifecycleManagement,
    /// Neither manager is attached
    Unmanaged,
}

impl LifecycleManager {
    /// Name reported by the search engine's data stream API
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleManager::DataStreamLifecycle => "Data stream lifecycle",
            LifecycleManager::IndexLifecycleManagement => "Index Lifecycle Management",
            LifecycleManager::Unmanaged => "Unmanaged",
        }
    }

    /// Parse the engine's display name, returning `None` for unknown managers
    pub fn from_engine_name(name: &str) -> Option<Self> {
        match name {
            "Data stream lifecycle" => Some(LifecycleManager::DataStreamLifecycle),
            "Index Lifecycle Management" => Some(LifecycleManager::IndexLifecycleManagement),
            "Unmanaged" => Some(LifecycleManager::Unmanaged),
            _ => None,
        }
    }
}

impl fmt::Display for LifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable state of one data stream
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataStreamState {
    /// Number of documents across all backing indices
    pub document_count: u64,
    /// Number of backing indices (always >= 1)
    pub backing_index_count: u32,
    /// Manager of the next generation (the write index after rollover)
    pub lifecycle_manager: LifecycleManager,
    /// Whether ILM is preferred when both managers are configured
    pub prefer_ilm: bool,
    /// Manager of each backing index, oldest first
    pub index_managers: Vec<LifecycleManager>,
}

/// Immutable mapping from data stream name to its state
///
/// Backed by a `BTreeMap`, so iteration order and serialized form are
/// deterministic for identical contents.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataStreamSnapshot {
    streams: BTreeMap<String, DataStreamState>,
}

impl DataStreamSnapshot {
    pub fn new(streams: BTreeMap<String, DataStreamState>) -> Self {
        Self { streams }
    }

    pub fn get(&self, name: &str) -> Option<&DataStreamState> {
        self.streams.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.streams.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.streams.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DataStreamState)> {
        self.streams.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Total documents across every stream in the snapshot
    pub fn total_documents(&self) -> u64 {
        self.streams.values().map(|s| s.document_count).sum()
    }
}

impl FromIterator<(String, DataStreamState)> for DataStreamSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, DataStreamState)>>(iter: I) -> Self {
        Self {
            streams: iter.into_iter().collect(),
        }
    }
}
