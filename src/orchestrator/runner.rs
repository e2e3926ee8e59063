//! Upgrade test orchestrator
//!
//! [`UpgradeTestRunner::run`] executes one [`UpgradeTestCase`] as a strict
//! sequence of phases:
//!
//! 1. Provision the cluster at the from version
//! 2. Capture the baseline snapshot
//! 3. Run the optional setup hook
//! 4. Ingest and wait for the generator to drain
//! 5. Snapshot and check growth and structure
//! 6. Re-apply at the to version, keeping the same deployment
//! 7. Run the optional post-upgrade hook
//! 8. Snapshot and check that the upgrade itself changed nothing
//! 9. Ingest again
//! 10. Snapshot and check growth, rollover and structure
//! 11. Check engine and ingestion error logs
//! 12. Destroy the cluster
//!
//! The first failing phase aborts the rest; teardown runs on every path
//! once a cluster may exist, under its own deadline and regardless of
//! cancellation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::assertions::{check_data_streams, check_error_logs, compare};
use crate::clients::error::ClientError;
use crate::clients::handle::ClusterHandle;
use crate::clients::provisioner::{ProvisionVars, Provisioner, TerraformRunner, vars};
use crate::clients::telemetry::{GeneratorAdapter, ProcessGenerator, TelemetryGenerator};
use crate::clients::{ClientFactory, RestClientFactory};
use crate::config::{EC_API_KEY, HarnessConfig};
use crate::metrics::HarnessMetrics;
use crate::model::expectation::{DeltaPolicy, ExpectedDelta};
use crate::model::snapshot::DataStreamSnapshot;
use crate::model::test_case::{Checkpoint, UpgradeTestCase};
use crate::model::version::StackVersion;
use crate::orchestrator::context::{HookContext, RunContext};
use crate::orchestrator::error::{HarnessError, RunFailure};
use crate::orchestrator::phase::TestPhase;
use crate::orchestrator::report::{PhaseRecord, RunReport};
use crate::orchestrator::state_machine::{
    RunEvent, RunStateMachine, RunTransitionContext, RunTransitionResult, determine_run_event,
};
use crate::retry::{PollError, RetryPolicy, retry_transient};
use crate::snapshot::{CollectorError, collect_snapshot};

/// Attempts for snapshot, log and API key requests that fail transiently
const QUERY_MAX_ATTEMPTS: u32 = 5;

/// Runs upgrade test cases against one set of collaborators.
///
/// A runner owns its provisioner, and with it the provisioner's state:
/// concurrent cases each need their own runner.
pub struct UpgradeTestRunner {
    provisioner: Arc<dyn Provisioner>,
    clients: Arc<dyn ClientFactory>,
    generator: Arc<dyn TelemetryGenerator>,
    config: HarnessConfig,
    drain: RetryPolicy,
    query_retry: RetryPolicy,
    metrics: Option<Arc<HarnessMetrics>>,
    state_machine: RunStateMachine,
}

impl UpgradeTestRunner {
    pub fn new(
        provisioner: Arc<dyn Provisioner>,
        clients: Arc<dyn ClientFactory>,
        generator: Arc<dyn TelemetryGenerator>,
        config: HarnessConfig,
    ) -> Self {
        let drain = RetryPolicy {
            max_attempts: config.drain_max_attempts,
            ..RetryPolicy::default()
        };
        let query_retry = RetryPolicy {
            max_attempts: QUERY_MAX_ATTEMPTS,
            ..RetryPolicy::default()
        };
        Self {
            provisioner,
            clients,
            generator,
            config,
            drain,
            query_retry,
            metrics: None,
            state_machine: RunStateMachine::new(),
        }
    }

    /// Runner backed by terraform, the REST clients and the generator process.
    ///
    /// `workspace` selects the terraform workspace, so it must be unique per
    /// concurrently running case.
    pub fn from_config(config: HarnessConfig, workspace: &str) -> Self {
        let mut terraform =
            TerraformRunner::new(&config.tf_binary, &config.tf_working_dir, workspace);
        if let Some(key) = &config.api_key {
            terraform = terraform.with_env(EC_API_KEY, key.clone());
        }
        let clients = RestClientFactory::from_config(&config);
        let generator = ProcessGenerator::new(config.telemetrygen_binary.clone());
        Self::new(
            Arc::new(terraform),
            Arc::new(clients),
            Arc::new(generator),
            config,
        )
    }

    pub fn with_drain_policy(mut self, policy: RetryPolicy) -> Self {
        self.drain = policy;
        self
    }

    pub fn with_query_retry(mut self, policy: RetryPolicy) -> Self {
        self.query_retry = policy;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<HarnessMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Execute every phase of `case` and report the outcome.
    ///
    /// Cancelling `cancel` stops the current phase; teardown still runs.
    #[instrument(skip_all, fields(case = %case.name))]
    pub async fn run(
        &self,
        case: UpgradeTestCase,
        cancel: &CancellationToken,
    ) -> Result<RunReport, RunFailure> {
        let mut run = RunContext::new(case);
        let mut adapter = GeneratorAdapter::new(self.generator.clone(), self.drain.clone());
        let mut phase = TestPhase::Precondition;

        info!(
            run_id = %run.run_id,
            deployment = %run.deployment_name,
            from = %run.case.from_version,
            to = %run.case.to_version,
            "starting upgrade test"
        );

        while !phase.is_terminal() {
            let phase_started = Instant::now();
            match phase.number() {
                Some(n) => info!(%phase, "phase {n}/{}: starting", TestPhase::WORKFLOW.len()),
                None => info!(%phase, "checking preconditions"),
            }

            let outcome = if phase == TestPhase::Teardown {
                self.teardown(&mut run).await
            } else {
                self.guarded(phase, &mut run, &mut adapter, cancel).await
            };

            // An interrupted apply may already have created resources.
            if phase == TestPhase::Provision
                && run.apply_started
                && matches!(&outcome, Err(e) if e.is_cancelled() || e.is_timeout())
            {
                run.cluster_provisioned = true;
            }

            let event = match &outcome {
                Ok(RunEvent::Skipped) => RunEvent::Skipped,
                other => determine_run_event(other, matches!(other, Err(e) if e.is_cancelled())),
            };
            let duration = phase_started.elapsed();
            run.report.phases.push(PhaseRecord {
                phase,
                event,
                duration,
            });
            self.record_phase(&run, phase, event, duration.as_secs_f64());

            info!(
                %phase,
                %event,
                duration = ?duration,
                elapsed = ?run.started.elapsed(),
                "time elapsed"
            );

            if let Err(err) = outcome {
                error!(%phase, category = %err.category(), error = %err, "phase failed");
                if let Some(metrics) = &self.metrics {
                    metrics.record_violations(&run.case.name, err.violations().len());
                }
                if phase == TestPhase::Teardown && run.failure.is_some() {
                    run.teardown_error = Some(err);
                } else if run.failure.is_none() {
                    run.failure = Some((phase, err));
                }
            }

            let ctx = RunTransitionContext {
                cluster_provisioned: run.cluster_provisioned,
                prior_failure: run.failure.is_some(),
                hook_present: run.hook_for(phase).is_some(),
            };

            phase = match self.state_machine.transition(&phase, event, &ctx) {
                RunTransitionResult::Success {
                    from,
                    to,
                    description,
                    ..
                } => {
                    debug!(%from, %to, description, "phase transition");
                    to
                }
                rejected => {
                    if run.failure.is_none() {
                        run.failure = Some((
                            phase,
                            HarnessError::Workflow {
                                phase,
                                event,
                                reason: format!("{rejected:?}"),
                            },
                        ));
                    }
                    self.state_machine.next_phase(&phase, event, &ctx)
                }
            };
        }

        run.report.elapsed = run.started.elapsed();
        self.finish(run)
    }

    fn finish(&self, run: RunContext) -> Result<RunReport, RunFailure> {
        let RunContext {
            case,
            failure,
            teardown_error,
            report,
            ..
        } = run;

        match failure {
            None => {
                info!(elapsed = ?report.elapsed, "upgrade test passed");
                if let Some(metrics) = &self.metrics {
                    metrics.record_run("passed");
                }
                Ok(report)
            }
            Some((phase, error)) => {
                let outcome = if error.is_cancelled() {
                    "cancelled"
                } else {
                    "failed"
                };
                if let Some(metrics) = &self.metrics {
                    metrics.record_run(outcome);
                }
                let failure = RunFailure {
                    case: case.name,
                    phase,
                    error,
                    teardown_error,
                    report,
                };
                error!(elapsed = ?failure.report.elapsed, "{failure}");
                Err(failure)
            }
        }
    }

    fn record_phase(&self, run: &RunContext, phase: TestPhase, event: RunEvent, secs: f64) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        metrics.record_phase(&run.case.name, phase, secs);
        if matches!(event, RunEvent::Failed | RunEvent::Cancelled) {
            metrics.record_phase_failure(&run.case.name, phase);
        }
    }

    /// Run a non-teardown phase under its deadline, stopping early on cancel
    async fn guarded(
        &self,
        phase: TestPhase,
        run: &mut RunContext,
        adapter: &mut GeneratorAdapter,
        cancel: &CancellationToken,
    ) -> Result<RunEvent, HarnessError> {
        let timeout = self.config.timeouts.for_phase(phase);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(HarnessError::Cancelled),
            res = tokio::time::timeout(timeout, self.execute(phase, run, adapter, cancel)) => {
                match res {
                    Ok(outcome) => outcome,
                    Err(_) => Err(HarnessError::PhaseTimeout { phase, timeout }),
                }
            }
        }
    }

    async fn execute(
        &self,
        phase: TestPhase,
        run: &mut RunContext,
        adapter: &mut GeneratorAdapter,
        cancel: &CancellationToken,
    ) -> Result<RunEvent, HarnessError> {
        match phase {
            TestPhase::Precondition => {
                self.config.check_preconditions()?;
                run.case.validate().map_err(HarnessError::InvalidTestCase)?;
                Ok(RunEvent::Succeeded)
            }
            TestPhase::Provision => self.provision(run, adapter, cancel).await,
            TestPhase::BaselineSnapshot => {
                let baseline = self.snapshot(run, cancel).await?;
                info!(
                    streams = baseline.len(),
                    documents = baseline.total_documents(),
                    "captured baseline"
                );
                run.store_snapshot(phase, baseline);
                Ok(RunEvent::Succeeded)
            }
            TestPhase::CustomSetup | TestPhase::PostUpgradeHook => {
                self.run_hook(phase, run, cancel).await
            }
            TestPhase::PreUpgradeIngest | TestPhase::PostUpgradeIngest => {
                adapter.run_blocking_until_drained(cancel).await?;
                Ok(RunEvent::Succeeded)
            }
            TestPhase::PreUpgradeAssertion => {
                let after = self.snapshot(run, cancel).await?;
                let checkpoint = run.case.after_first_ingest.clone();
                check_checkpoint(
                    run,
                    phase,
                    TestPhase::BaselineSnapshot,
                    after,
                    &checkpoint,
                    "after first ingest",
                )
            }
            TestPhase::Upgrade => self.upgrade(run).await,
            TestPhase::NoDriftAssertion => {
                let after = self.snapshot(run, cancel).await?;
                let mut checkpoint = run.case.across_upgrade.clone();
                if checkpoint.delta.is_empty() {
                    if let Some(before) = run.snapshot(TestPhase::PreUpgradeAssertion) {
                        checkpoint.delta =
                            DeltaPolicy::uniform(before.names(), ExpectedDelta::unchanged());
                    }
                }
                check_checkpoint(
                    run,
                    phase,
                    TestPhase::PreUpgradeAssertion,
                    after,
                    &checkpoint,
                    "across upgrade",
                )
            }
            TestPhase::PostUpgradeAssertion => {
                let after = self.snapshot(run, cancel).await?;
                let checkpoint = run.case.after_second_ingest.clone();
                check_checkpoint(
                    run,
                    phase,
                    TestPhase::NoDriftAssertion,
                    after,
                    &checkpoint,
                    "after second ingest",
                )
            }
            TestPhase::LogAssertion => self.check_logs(run, cancel).await,
            TestPhase::Teardown | TestPhase::Completed | TestPhase::Failed => {
                Err(HarnessError::Workflow {
                    phase,
                    event: RunEvent::Succeeded,
                    reason: "phase is not executed through the guarded path".to_string(),
                })
            }
        }
    }

    fn provision_vars(&self, run: &RunContext, version: &StackVersion) -> ProvisionVars {
        BTreeMap::from([
            (vars::STACK_VERSION.to_string(), version.to_string()),
            (
                vars::INTEGRATIONS_SERVER.to_string(),
                run.case.deploy_mode.enable_integrations().to_string(),
            ),
            (vars::DEPLOYMENT_NAME.to_string(), run.deployment_name.clone()),
            (vars::REGION.to_string(), self.config.region.clone()),
            (
                vars::EC_TARGET.to_string(),
                self.config.target.endpoint().to_string(),
            ),
        ])
    }

    async fn provision(
        &self,
        run: &mut RunContext,
        adapter: &mut GeneratorAdapter,
        cancel: &CancellationToken,
    ) -> Result<RunEvent, HarnessError> {
        let vars = self.provision_vars(run, &run.case.from_version);
        info!(version = %run.case.from_version, region = %self.config.region, "creating cluster");

        run.apply_started = true;
        let outputs = match self.provisioner.apply(&vars).await {
            Ok(outputs) => outputs,
            Err(err) => {
                if err.resources_may_exist() {
                    warn!(error = %err, "apply failed after creating resources");
                    run.cluster_provisioned = true;
                }
                return Err(err.into());
            }
        };
        run.cluster_provisioned = true;

        let handle = ClusterHandle::from_outputs(&outputs)?;
        run.report.deployment_id = Some(handle.deployment_id.clone());
        info!(deployment_id = %handle.deployment_id, "cluster created");

        let clients = self.clients.connect(&handle).map_err(HarnessError::Cluster)?;
        let api_key = match &handle.api_key {
            Some(key) => key.clone(),
            None => {
                let search = clients.search.clone();
                let name = run.deployment_name.clone();
                retry_transient(&self.query_retry, cancel, ClientError::is_transient, || {
                    search.create_api_key(&name, None, json!({}))
                })
                .await
                .map_err(|e| from_poll(e, HarnessError::Cluster))?
            }
        };
        adapter.configure(handle.ingest_url.clone(), api_key, self.config.event_rate.clone());

        run.handle = Some(handle);
        run.clients = Some(clients);
        Ok(RunEvent::Succeeded)
    }

    async fn upgrade(&self, run: &mut RunContext) -> Result<RunEvent, HarnessError> {
        let vars = self.provision_vars(run, &run.case.to_version);
        info!(from = %run.case.from_version, to = %run.case.to_version, "upgrading cluster");

        let outputs = self.provisioner.apply(&vars).await?;
        let upgraded = ClusterHandle::from_outputs(&outputs)?;

        let expected = run
            .handle
            .as_ref()
            .map(|h| h.deployment_id.clone())
            .unwrap_or_default();
        if upgraded.deployment_id != expected {
            return Err(HarnessError::ClusterReplaced {
                expected,
                actual: upgraded.deployment_id,
            });
        }

        info!(deployment_id = %expected, version = %run.case.to_version, "cluster upgraded in place");
        run.handle = Some(upgraded);
        Ok(RunEvent::Succeeded)
    }

    async fn run_hook(
        &self,
        phase: TestPhase,
        run: &RunContext,
        cancel: &CancellationToken,
    ) -> Result<RunEvent, HarnessError> {
        let Some(hook) = run.hook_for(phase) else {
            info!(%phase, "no hook configured, skipping");
            return Ok(RunEvent::Skipped);
        };

        let ctx = HookContext::new(cancel.child_token(), run.clients()?, &run.deployment_name);
        hook(ctx).await.map_err(|e| HarnessError::Hook {
            phase,
            message: e.to_string(),
        })?;
        Ok(RunEvent::Succeeded)
    }

    async fn snapshot(
        &self,
        run: &RunContext,
        cancel: &CancellationToken,
    ) -> Result<DataStreamSnapshot, HarnessError> {
        let search = run.search()?;
        let pattern = run.case.data_stream_pattern.as_str();
        retry_transient(&self.query_retry, cancel, CollectorError::is_transient, || {
            collect_snapshot(search.as_ref(), pattern)
        })
        .await
        .map_err(|e| from_poll(e, HarnessError::Snapshot))
    }

    async fn check_logs(
        &self,
        run: &RunContext,
        cancel: &CancellationToken,
    ) -> Result<RunEvent, HarnessError> {
        let search = run.search()?;
        let failures = retry_transient(&self.query_retry, cancel, ClientError::is_transient, || {
            check_error_logs(
                search.as_ref(),
                &run.case.ignored_engine_logs,
                &run.case.ignored_ingest_logs,
            )
        })
        .await
        .map_err(|e| from_poll(e, HarnessError::LogQuery))?;

        if failures.is_empty() {
            Ok(RunEvent::Succeeded)
        } else {
            Err(HarnessError::ErrorLogs(failures))
        }
    }

    /// Destroy the cluster if one may exist; ignores cancellation
    async fn teardown(&self, run: &mut RunContext) -> Result<RunEvent, HarnessError> {
        if !run.cluster_provisioned {
            info!("no cluster to destroy");
            return Ok(RunEvent::Succeeded);
        }

        let timeout = self.config.timeouts.teardown;
        info!(deployment = %run.deployment_name, "destroying cluster");
        match tokio::time::timeout(timeout, self.provisioner.destroy()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(HarnessError::PhaseTimeout {
                    phase: TestPhase::Teardown,
                    timeout,
                });
            }
        }

        run.cluster_provisioned = false;
        info!("cluster destroyed");
        Ok(RunEvent::Succeeded)
    }
}

/// Compare `after` with the snapshot stored for `before_phase`, check the
/// absolute shape, store `after`, and fail with every violation found.
fn check_checkpoint(
    run: &mut RunContext,
    phase: TestPhase,
    before_phase: TestPhase,
    after: DataStreamSnapshot,
    checkpoint: &Checkpoint,
    label: &'static str,
) -> Result<RunEvent, HarnessError> {
    let before = run
        .snapshot(before_phase)
        .ok_or_else(|| HarnessError::Workflow {
            phase,
            event: RunEvent::Succeeded,
            reason: format!("no snapshot from {before_phase}"),
        })?;

    let mut violations = compare(before, &after, &checkpoint.delta);
    if let Some(want) = &checkpoint.data_streams {
        violations.extend(check_data_streams(&after, want));
    }

    info!(
        checkpoint = label,
        streams = after.len(),
        documents = after.total_documents(),
        violations = violations.len(),
        "checked snapshot"
    );
    run.store_snapshot(phase, after);

    if violations.is_empty() {
        Ok(RunEvent::Succeeded)
    } else {
        for violation in &violations {
            warn!(checkpoint = label, "{violation}");
        }
        Err(HarnessError::Assertion {
            checkpoint: label,
            violations,
        })
    }
}

/// Collapse a retry outcome into a harness error, keeping the last cause
fn from_poll<E>(err: PollError<E, E>, wrap: impl FnOnce(E) -> HarnessError) -> HarnessError {
    match err {
        PollError::Exhausted { last, .. } => wrap(last),
        PollError::Failed(e) => wrap(e),
        PollError::Cancelled => HarnessError::Cancelled,
    }
}

/// Run independent cases concurrently, one runner per case.
///
/// A failing case never affects its siblings; results keep the input order.
pub async fn run_concurrently(
    runs: Vec<(UpgradeTestRunner, UpgradeTestCase)>,
    cancel: &CancellationToken,
) -> Vec<Result<RunReport, RunFailure>> {
    join_all(
        runs.into_iter()
            .map(|(runner, case)| async move { runner.run(case, cancel).await }),
    )
    .await
}
