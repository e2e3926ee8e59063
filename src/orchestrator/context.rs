//! Per-run state and the context handed to hooks

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::clients::elasticsearch::SearchClient;
use crate::clients::handle::ClusterHandle;
use crate::clients::kibana::DashboardClient;
use crate::clients::ClientBundle;
use crate::model::snapshot::DataStreamSnapshot;
use crate::model::test_case::{UpgradeHook, UpgradeTestCase};
use crate::orchestrator::error::HarnessError;
use crate::orchestrator::phase::TestPhase;
use crate::orchestrator::report::RunReport;

/// What a setup or post-upgrade hook gets to work with
#[derive(Clone)]
pub struct HookContext {
    /// Fires when the run is cancelled; long hooks should watch it
    pub cancel: CancellationToken,
    pub search: Arc<dyn SearchClient>,
    pub dashboard: Arc<dyn DashboardClient>,
    /// Name of the deployment under test
    pub deployment_name: String,
}

impl HookContext {
    pub fn new(cancel: CancellationToken, clients: &ClientBundle, deployment_name: &str) -> Self {
        Self {
            cancel,
            search: clients.search.clone(),
            dashboard: clients.dashboard.clone(),
            deployment_name: deployment_name.to_string(),
        }
    }
}

/// Mutable state of one run, owned by the runner for the run's lifetime
pub(crate) struct RunContext {
    pub case: UpgradeTestCase,
    pub run_id: String,
    /// UUID-suffixed so concurrent runs never share a deployment
    pub deployment_name: String,
    pub started: Instant,

    pub handle: Option<ClusterHandle>,
    pub clients: Option<ClientBundle>,
    /// An apply was started, so a cluster may exist even without outputs
    pub apply_started: bool,
    /// A cluster exists (or partially exists) and teardown must destroy it
    pub cluster_provisioned: bool,

    /// First failure; later phases other than teardown never run
    pub failure: Option<(TestPhase, HarnessError)>,
    pub teardown_error: Option<HarnessError>,
    pub report: RunReport,
}

impl RunContext {
    pub fn new(case: UpgradeTestCase) -> Self {
        let run_id = uuid::Uuid::new_v4().simple().to_string();
        let suffix = run_id.get(..8).unwrap_or(&run_id);
        let deployment_name = format!("{}-{}", case.name.replace('_', "-"), suffix);

        let report = RunReport {
            case: case.name.clone(),
            run_id: run_id.clone(),
            from_version: case.from_version.to_string(),
            to_version: case.to_version.to_string(),
            started_at: Some(Utc::now()),
            ..Default::default()
        };

        Self {
            case,
            run_id,
            deployment_name,
            started: Instant::now(),
            handle: None,
            clients: None,
            apply_started: false,
            cluster_provisioned: false,
            failure: None,
            teardown_error: None,
            report,
        }
    }

    /// Hook configured for a hook phase
    pub fn hook_for(&self, phase: TestPhase) -> Option<UpgradeHook> {
        match phase {
            TestPhase::CustomSetup => self.case.setup.clone(),
            TestPhase::PostUpgradeHook => self.case.post_upgrade.clone(),
            _ => None,
        }
    }

    pub fn clients(&self) -> Result<&ClientBundle, HarnessError> {
        self.clients.as_ref().ok_or_else(|| HarnessError::Workflow {
            phase: TestPhase::Provision,
            event: crate::orchestrator::state_machine::RunEvent::Succeeded,
            reason: "no cluster clients after provisioning".to_string(),
        })
    }

    pub fn search(&self) -> Result<Arc<dyn SearchClient>, HarnessError> {
        Ok(self.clients()?.search.clone())
    }

    /// Most recent checkpoint snapshot, if any
    pub fn snapshot(&self, phase: TestPhase) -> Option<&DataStreamSnapshot> {
        let snapshots = &self.report.snapshots;
        match phase {
            TestPhase::BaselineSnapshot => snapshots.baseline.as_ref(),
            TestPhase::PreUpgradeAssertion => snapshots.after_first_ingest.as_ref(),
            TestPhase::NoDriftAssertion => snapshots.after_upgrade.as_ref(),
            TestPhase::PostUpgradeAssertion => snapshots.after_second_ingest.as_ref(),
            _ => None,
        }
    }

    pub fn store_snapshot(&mut self, phase: TestPhase, snapshot: DataStreamSnapshot) {
        let snapshots = &mut self.report.snapshots;
        let slot = match phase {
            TestPhase::BaselineSnapshot => &mut snapshots.baseline,
            TestPhase::PreUpgradeAssertion => &mut snapshots.after_first_ingest,
            TestPhase::NoDriftAssertion => &mut snapshots.after_upgrade,
            TestPhase::PostUpgradeAssertion => &mut snapshots.after_second_ingest,
            _ => return,
        };
        *slot = Some(snapshot);
    }
}
