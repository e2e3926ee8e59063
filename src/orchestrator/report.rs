//! What a run observed, for triage and for the success path

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::snapshot::DataStreamSnapshot;
use crate::orchestrator::phase::TestPhase;
use crate::orchestrator::state_machine::RunEvent;

/// Outcome and duration of one executed phase
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PhaseRecord {
    pub phase: TestPhase,
    pub event: RunEvent,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
}

/// Snapshots taken at each checkpoint of the workflow
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CheckpointSnapshots {
    pub baseline: Option<DataStreamSnapshot>,
    pub after_first_ingest: Option<DataStreamSnapshot>,
    pub after_upgrade: Option<DataStreamSnapshot>,
    pub after_second_ingest: Option<DataStreamSnapshot>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub case: String,
    pub run_id: String,
    pub deployment_id: Option<String>,
    pub from_version: String,
    pub to_version: String,
    pub started_at: Option<DateTime<Utc>>,
    pub phases: Vec<PhaseRecord>,
    pub snapshots: CheckpointSnapshots,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
}

impl RunReport {
    /// Phases that actually ran, in order
    pub fn executed_phases(&self) -> impl Iterator<Item = TestPhase> + '_ {
        self.phases.iter().map(|r| r.phase)
    }

    pub fn record(&self, phase: TestPhase) -> Option<&PhaseRecord> {
        self.phases.iter().find(|r| r.phase == phase)
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }
}
