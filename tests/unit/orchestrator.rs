//! Orchestrator tests against the simulated cluster

use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::Method;
use tokio_util::sync::CancellationToken;

use upgrade_harness::assertions::{LogSource, ViolationKind};
use upgrade_harness::clients::GeneratorError;
use upgrade_harness::config::ConfigError;
use upgrade_harness::metrics::{OutcomeLabels, PhaseLabels};
use upgrade_harness::model::{DeployMode, HookError, hook};
use upgrade_harness::orchestrator::{ErrorCategory, HarnessError, RunEvent, TestPhase};
use upgrade_harness::{HarnessConfig, HarnessMetrics, run_concurrently};

use crate::common::*;

mod happy_path_tests {
    use super::*;

    #[tokio::test]
    async fn test_shipped_upgrade_passes() {
        init_test();
        let sim = SimulatedCluster::new();

        let report = sim
            .runner()
            .run(upgrade_case(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.case, "upgrade_8_15_4_to_8_16_0");
        assert_eq!(report.deployment_id.as_deref(), Some(DEPLOYMENT_ID));
        assert_eq!(report.from_version.to_string(), "8.15.4");
        assert_eq!(report.to_version.to_string(), "8.16.0");

        // Precondition plus the twelve workflow phases
        assert_eq!(report.phases.len(), 13);
        assert_eq!(report.phases.last().unwrap().phase, TestPhase::Teardown);
        assert!(report.phases.iter().all(|p| matches!(
            p.event,
            RunEvent::Succeeded | RunEvent::Skipped
        )));

        let baseline = report.snapshots.baseline.as_ref().unwrap();
        assert!(baseline.is_empty());
        let first = report.snapshots.after_first_ingest.as_ref().unwrap();
        assert_eq!(first.len(), 8);
        let upgraded = report.snapshots.after_upgrade.as_ref().unwrap();
        assert_eq!(upgraded.total_documents(), first.total_documents());
        let second = report.snapshots.after_second_ingest.as_ref().unwrap();
        assert!(second.iter().all(|(_, s)| s.backing_index_count == 2));

        assert_eq!(sim.apply_calls(), 2);
        assert_eq!(sim.destroy_calls(), 1);
        assert_eq!(sim.ingest_runs(), 2);
        assert!(!sim.exists());
    }

    #[tokio::test]
    async fn test_hooks_skipped_when_absent() {
        let sim = SimulatedCluster::new();
        let report = sim
            .runner()
            .run(simple_case("no_hooks"), &CancellationToken::new())
            .await
            .unwrap();

        let skipped: Vec<TestPhase> = report
            .phases
            .iter()
            .filter(|p| p.event == RunEvent::Skipped)
            .map(|p| p.phase)
            .collect();
        assert_eq!(
            skipped,
            vec![TestPhase::CustomSetup, TestPhase::PostUpgradeHook]
        );
    }

    #[tokio::test]
    async fn test_provision_variables() {
        let sim = SimulatedCluster::new();
        sim.runner()
            .run(upgrade_case(), &CancellationToken::new())
            .await
            .unwrap();

        let applied = sim.applied_vars();
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[0]["stack_version"], "8.15.4");
        assert_eq!(applied[1]["stack_version"], "8.16.0");
        assert_eq!(applied[0]["integrations_server"], "true");
        assert_eq!(applied[0]["ec_region"], "aws-eu-west-1");
        // Same deployment name on both applies
        assert_eq!(applied[0]["name"], applied[1]["name"]);
        assert!(applied[0]["name"].starts_with("upgrade-8-15-4-to-8-16-0-"));
    }

    #[tokio::test]
    async fn test_standalone_mode_ingests_through_standalone_endpoint() {
        let sim = SimulatedCluster::new();
        let case = simple_case("standalone").with_deploy_mode(DeployMode::Standalone);
        sim.runner()
            .run(case, &CancellationToken::new())
            .await
            .unwrap();

        let applied = sim.applied_vars();
        assert!(applied.iter().all(|v| v["integrations_server"] == "false"));
        assert_eq!(
            sim.ingest_urls(),
            vec![STANDALONE_INGEST_URL, STANDALONE_INGEST_URL]
        );
        assert_eq!(sim.destroy_calls(), 1);
    }

    #[tokio::test]
    async fn test_managed_mode_ingests_through_integrations_server() {
        let sim = SimulatedCluster::new();
        sim.runner()
            .run(simple_case("managed"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            sim.ingest_urls(),
            vec![MANAGED_INGEST_URL, MANAGED_INGEST_URL]
        );
    }

    #[tokio::test]
    async fn test_api_key_created_for_deployment() {
        let sim = SimulatedCluster::new();
        sim.runner()
            .run(simple_case("api_key"), &CancellationToken::new())
            .await
            .unwrap();

        let keys = sim.api_keys();
        assert_eq!(keys.len(), 1);
        assert!(keys[0].starts_with("api-key-"));
    }
}

mod precondition_tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_api_key_provisions_nothing() {
        let sim = SimulatedCluster::new();
        let config = HarnessConfig {
            api_key: None,
            ..test_config()
        };

        let failure = sim
            .runner_with_config(config)
            .run(upgrade_case(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(failure.phase, TestPhase::Precondition);
        assert!(failure.error.is_precondition());
        assert!(matches!(
            failure.error,
            HarnessError::Config(ConfigError::MissingEnv("EC_API_KEY"))
        ));
        assert_eq!(sim.apply_calls(), 0);
        assert_eq!(sim.destroy_calls(), 0);
        assert_eq!(failure.report.phases.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_case_provisions_nothing() {
        let sim = SimulatedCluster::new();
        let mut case = simple_case("downgrade");
        std::mem::swap(&mut case.from_version, &mut case.to_version);

        let failure = sim
            .runner()
            .run(case, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(failure.phase, TestPhase::Precondition);
        assert!(matches!(failure.error, HarnessError::InvalidTestCase(_)));
        assert_eq!(sim.apply_calls(), 0);
    }
}

mod teardown_tests {
    use super::*;

    #[tokio::test]
    async fn test_teardown_runs_once_after_every_failing_phase() {
        for phase in TestPhase::WORKFLOW
            .into_iter()
            .filter(|p| p.requires_teardown())
        {
            let (sim, case) = failing_at(phase);
            let failure = sim
                .runner()
                .run(case, &CancellationToken::new())
                .await
                .unwrap_err();

            assert_eq!(failure.phase, phase, "failure attributed to {phase}");
            assert_eq!(sim.destroy_calls(), 1, "teardown after {phase}");
            assert!(failure.teardown_error.is_none());
            assert_eq!(
                failure.report.phases.last().unwrap().phase,
                TestPhase::Teardown
            );
        }
    }

    #[tokio::test]
    async fn test_failed_phase_stops_the_workflow() {
        let (sim, case) = failing_at(TestPhase::PreUpgradeIngest);
        let failure = sim
            .runner()
            .run(case, &CancellationToken::new())
            .await
            .unwrap_err();

        let executed: Vec<TestPhase> = failure.report.executed_phases().collect();
        assert!(!executed.contains(&TestPhase::PreUpgradeAssertion));
        assert!(!executed.contains(&TestPhase::Upgrade));
        assert_eq!(sim.apply_calls(), 1);
        assert!(failure.error.is_ingestion());
        assert!(matches!(
            failure.error,
            HarnessError::Ingest(GeneratorError::Exited { .. })
        ));
    }

    #[tokio::test]
    async fn test_provision_failure_without_resources_skips_destroy() {
        let (sim, case) = failing_at(TestPhase::Provision);
        let failure = sim
            .runner()
            .run(case, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(failure.phase, TestPhase::Provision);
        assert!(failure.error.is_provisioning());
        assert_eq!(sim.destroy_calls(), 0);
    }

    #[tokio::test]
    async fn test_provision_failure_with_partial_resources_destroys() {
        let sim = SimulatedCluster::with_faults(Faults {
            fail_apply: Some(1),
            partial_apply: true,
            ..Faults::default()
        });
        let failure = sim
            .runner()
            .run(simple_case("partial"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(failure.phase, TestPhase::Provision);
        assert_eq!(sim.destroy_calls(), 1);
        assert!(!sim.exists());
    }

    #[tokio::test]
    async fn test_unreadable_outputs_after_apply_destroys() {
        let sim = SimulatedCluster::with_faults(Faults {
            fail_outputs: Some(1),
            ..Faults::default()
        });
        let failure = sim
            .runner()
            .run(simple_case("outputs_locked"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(failure.phase, TestPhase::Provision);
        assert!(failure.error.is_provisioning());
        assert!(failure.to_string().contains("state locked"));
        assert_eq!(sim.destroy_calls(), 1);
        assert!(!sim.exists());
    }

    #[tokio::test]
    async fn test_teardown_failure_after_success() {
        let (sim, case) = failing_at(TestPhase::Teardown);
        let failure = sim
            .runner()
            .run(case, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(failure.phase, TestPhase::Teardown);
        assert!(failure.error.is_provisioning());
        assert_eq!(sim.destroy_calls(), 1);
    }

    #[tokio::test]
    async fn test_teardown_failure_is_kept_beside_first_failure() {
        let sim = SimulatedCluster::with_faults(Faults {
            fail_ingest: Some(1),
            fail_destroy: true,
            ..Faults::default()
        });
        let failure = sim
            .runner()
            .run(simple_case("double"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(failure.phase, TestPhase::PreUpgradeIngest);
        assert!(failure.error.is_ingestion());
        assert!(failure.teardown_error.is_some());
        assert!(failure.to_string().contains("teardown also failed"));
    }
}

mod ingestion_tests {
    use super::*;

    #[tokio::test]
    async fn test_residual_backlog_fails_ingest() {
        let sim = SimulatedCluster::with_faults(Faults {
            backlogs: vec![40, 30, 20, 10, 5],
            ..Faults::default()
        });
        let failure = sim
            .runner()
            .run(simple_case("backlog"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(failure.phase, TestPhase::PreUpgradeIngest);
        assert_eq!(failure.error.category(), ErrorCategory::Ingestion);
        assert!(matches!(
            failure.error,
            HarnessError::Ingest(GeneratorError::NotDrained { backlog: 5 })
        ));
        assert_eq!(sim.destroy_calls(), 1);
    }

    #[tokio::test]
    async fn test_backlog_that_drains_passes() {
        let sim = SimulatedCluster::with_faults(Faults {
            backlogs: vec![40, 10],
            ..Faults::default()
        });
        assert!(
            sim.runner()
                .run(simple_case("drains"), &CancellationToken::new())
                .await
                .is_ok()
        );
    }
}

mod upgrade_tests {
    use super::*;

    #[tokio::test]
    async fn test_replaced_cluster_fails_upgrade() {
        let sim = SimulatedCluster::with_faults(Faults {
            replace_on_upgrade: true,
            ..Faults::default()
        });
        let failure = sim
            .runner()
            .run(simple_case("replaced"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(failure.phase, TestPhase::Upgrade);
        assert!(matches!(
            failure.error,
            HarnessError::ClusterReplaced { ref expected, ref actual }
                if expected == DEPLOYMENT_ID && actual == "sim-deployment-2"
        ));
        assert_eq!(sim.destroy_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upgrade_deadline_tears_down() {
        let sim = SimulatedCluster::with_faults(Faults {
            hang_apply: Some(2),
            ..Faults::default()
        });
        let failure = sim
            .runner()
            .run(simple_case("slow_upgrade"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(failure.phase, TestPhase::Upgrade);
        assert!(matches!(
            failure.error,
            HarnessError::PhaseTimeout {
                phase: TestPhase::Upgrade,
                ..
            }
        ));
        assert!(failure.error.is_timeout());
        assert_eq!(sim.apply_calls(), 2);
        assert_eq!(sim.destroy_calls(), 1);
        assert!(!sim.exists());
        let executed: Vec<TestPhase> = failure.report.executed_phases().collect();
        assert!(!executed.contains(&TestPhase::NoDriftAssertion));
    }

    #[tokio::test]
    async fn test_missing_rollover_is_a_violation() {
        let sim = SimulatedCluster::with_faults(Faults {
            skip_rollover: true,
            ..Faults::default()
        });
        let failure = sim
            .runner()
            .run(upgrade_case(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(failure.phase, TestPhase::PostUpgradeAssertion);
        assert!(failure.error.is_assertion());
        let violations = failure.error.violations();
        let index_counts = violations
            .iter()
            .filter(|v| {
                matches!(
                    v.kind,
                    ViolationKind::BackingIndexCount {
                        expected: 2,
                        actual: 1
                    }
                )
            })
            .count();
        // Seven from the delta on named streams, eight from the shape
        assert_eq!(index_counts, 7 + 8);
        assert!(
            violations
                .iter()
                .any(|v| matches!(v.kind, ViolationKind::IndexManagers { .. }))
        );
        assert!(
            violations
                .iter()
                .all(|v| !matches!(v.kind, ViolationKind::DocumentCount { .. }))
        );
    }

    #[tokio::test]
    async fn test_stream_lost_across_upgrade_is_reported() {
        let sim = SimulatedCluster::new();
        let dropper = sim.clone();
        let case = simple_case("lost_stream").with_post_upgrade(hook(move |_ctx| {
            let sim = dropper.clone();
            async move {
                sim.delete_stream("logs-apm.error-default");
                Ok::<(), HookError>(())
            }
        }));

        let failure = sim
            .runner()
            .run(case, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(failure.phase, TestPhase::NoDriftAssertion);
        assert!(failure.error.violations().iter().any(|v| {
            v.kind == ViolationKind::StreamDisappeared
                && v.stream.as_deref() == Some("logs-apm.error-default")
        }));
        assert!(failure.to_string().contains("stream disappeared"));
    }

    #[tokio::test]
    async fn test_documents_written_during_upgrade_are_drift() {
        let sim = SimulatedCluster::new();
        let writer = sim.clone();
        let case = simple_case("drift").with_post_upgrade(hook(move |_ctx| {
            let sim = writer.clone();
            async move {
                sim.write("traces-apm-default", 3);
                Ok::<(), HookError>(())
            }
        }));

        let failure = sim
            .runner()
            .run(case, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(failure.phase, TestPhase::NoDriftAssertion);
        assert_eq!(failure.error.violations().len(), 1);
        assert!(matches!(
            failure.error.violations()[0].kind,
            ViolationKind::DocumentCount { .. }
        ));
    }
}

mod log_tests {
    use super::*;

    #[tokio::test]
    async fn test_error_logs_fail_the_run() {
        let sim = SimulatedCluster::with_faults(Faults {
            engine_errors: vec!["shard failure on [traces-apm-default]".to_string()],
            ..Faults::default()
        });
        let failure = sim
            .runner()
            .run(upgrade_case(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(failure.phase, TestPhase::LogAssertion);
        assert!(failure.error.is_log_failure());
        let logs = failure.error.log_failures();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].source, LogSource::Engine);
        assert!(failure.to_string().contains("shard failure"));
        assert_eq!(sim.destroy_calls(), 1);
    }

    #[tokio::test]
    async fn test_ignored_error_logs_pass() {
        let sim = SimulatedCluster::with_faults(Faults {
            engine_errors: vec!["node disconnected from cluster".to_string()],
            ingest_errors: vec!["dial tcp 10.0.0.1:9243: connection refused".to_string()],
            ..Faults::default()
        });
        assert!(
            sim.runner()
                .run(upgrade_case(), &CancellationToken::new())
                .await
                .is_ok()
        );
    }
}

mod hook_tests {
    use super::*;

    #[tokio::test]
    async fn test_hooks_receive_cluster_clients() {
        let sim = SimulatedCluster::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let record = |label: &'static str| {
            let seen = seen.clone();
            hook(move |ctx| {
                let seen = seen.clone();
                async move {
                    ctx.search
                        .perform(Method::PUT, "_index_template/custom", None)
                        .await?;
                    ctx.dashboard
                        .perform(Method::GET, "api/status", None)
                        .await?;
                    seen.lock()
                        .unwrap()
                        .push(format!("{label} {}", ctx.deployment_name));
                    Ok(())
                }
            })
        };

        let case = simple_case("hooks")
            .with_setup(record("setup"))
            .with_post_upgrade(record("post"));
        let report = sim
            .runner()
            .run(case, &CancellationToken::new())
            .await
            .unwrap();

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].starts_with("setup hooks-"));
        assert!(seen[1].starts_with("post hooks-"));
        assert!(
            report
                .phases
                .iter()
                .filter(|p| p.phase.is_hook())
                .all(|p| p.event == RunEvent::Succeeded)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_hook_deadline() {
        let sim = SimulatedCluster::new();
        let case = simple_case("slow_hook").with_setup(hook(|_ctx| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<(), HookError>(())
        }));

        let failure = sim
            .runner()
            .run(case, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(failure.phase, TestPhase::CustomSetup);
        assert!(failure.error.is_timeout());
        assert_eq!(sim.destroy_calls(), 1);
    }
}

mod cancellation_tests {
    use super::*;

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let sim = SimulatedCluster::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let failure = sim
            .runner()
            .run(upgrade_case(), &cancel)
            .await
            .unwrap_err();

        assert!(failure.error.is_cancelled());
        assert_eq!(sim.apply_calls(), 0);
        assert_eq!(sim.destroy_calls(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_mid_run_still_tears_down() {
        let sim = SimulatedCluster::new();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let case = simple_case("interrupted").with_setup(hook(move |_ctx| {
            let trigger = trigger.clone();
            async move {
                trigger.cancel();
                std::future::pending::<()>().await;
                Ok::<(), HookError>(())
            }
        }));

        let failure = sim.runner().run(case, &cancel).await.unwrap_err();

        assert_eq!(failure.phase, TestPhase::CustomSetup);
        assert_eq!(failure.error.category(), ErrorCategory::Cancelled);
        assert_eq!(sim.destroy_calls(), 1);
        assert!(!sim.exists());
        let last = failure.report.phases.last().unwrap();
        assert_eq!(last.phase, TestPhase::Teardown);
        assert_eq!(last.event, RunEvent::Succeeded);
    }
    #[tokio::test(start_paused = true)]
    async fn test_provision_deadline_mid_apply_tears_down() {
        let sim = SimulatedCluster::with_faults(Faults {
            hang_apply: Some(1),
            ..Faults::default()
        });
        let failure = sim
            .runner()
            .run(simple_case("slow_provision"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(failure.phase, TestPhase::Provision);
        assert!(matches!(
            failure.error,
            HarnessError::PhaseTimeout {
                phase: TestPhase::Provision,
                ..
            }
        ));
        assert_eq!(sim.destroy_calls(), 1);
        assert!(!sim.exists());
        assert_eq!(
            failure.report.phases.last().unwrap().phase,
            TestPhase::Teardown
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_mid_apply_tears_down() {
        let sim = SimulatedCluster::with_faults(Faults {
            hang_apply: Some(1),
            ..Faults::default()
        });
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let failure = sim
            .runner()
            .run(simple_case("interrupted_apply"), &cancel)
            .await
            .unwrap_err();

        assert_eq!(failure.phase, TestPhase::Provision);
        assert!(failure.error.is_cancelled());
        assert_eq!(sim.apply_calls(), 1);
        assert_eq!(sim.destroy_calls(), 1);
        assert!(!sim.exists());
    }
}

mod concurrency_tests {
    use super::*;

    #[tokio::test]
    async fn test_concurrent_runs_are_isolated() {
        let healthy = SimulatedCluster::new();
        let (broken, broken_case) = failing_at(TestPhase::Upgrade);

        let results = run_concurrently(
            vec![
                (healthy.runner(), simple_case("healthy")),
                (broken.runner(), broken_case),
            ],
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        let failure = results[1].as_ref().unwrap_err();
        assert_eq!(failure.phase, TestPhase::Upgrade);

        assert_eq!(healthy.destroy_calls(), 1);
        assert_eq!(broken.destroy_calls(), 1);
        assert_eq!(healthy.version().as_deref(), Some("8.16.0"));
    }

    #[tokio::test]
    async fn test_deployment_names_are_unique() {
        let a = SimulatedCluster::new();
        let b = SimulatedCluster::new();
        let _ = run_concurrently(
            vec![
                (a.runner(), simple_case("same_case")),
                (b.runner(), simple_case("same_case")),
            ],
            &CancellationToken::new(),
        )
        .await;

        assert_ne!(a.applied_vars()[0]["name"], b.applied_vars()[0]["name"]);
    }
}

mod metrics_tests {
    use super::*;

    #[tokio::test]
    async fn test_runner_records_metrics() {
        let metrics = Arc::new(HarnessMetrics::new());
        let (sim, case) = failing_at(TestPhase::PostUpgradeIngest);

        let _ = sim
            .runner()
            .with_metrics(metrics.clone())
            .run(case, &CancellationToken::new())
            .await;

        let failed_runs = metrics
            .runs
            .get_or_create(&OutcomeLabels {
                outcome: "failed".to_string(),
            })
            .get();
        assert_eq!(failed_runs, 1);

        let phase_failures = metrics
            .phase_failures
            .get_or_create(&PhaseLabels {
                case: "failing_case".to_string(),
                phase: "post_upgrade_ingest".to_string(),
            })
            .get();
        assert_eq!(phase_failures, 1);

        let text = metrics.encode().unwrap();
        assert!(text.contains("upgrade_harness_phase_duration_seconds"));
    }
}
