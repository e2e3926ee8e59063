use std::process::ExitCode;
use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use upgrade_harness::{
    HarnessConfig, HarnessMetrics, UpgradeTestCase, UpgradeTestRunner, run_concurrently,
    scenarios,
};

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("upgrade_harness=info".parse()?),
        )
        .init();

    let config = HarnessConfig::from_env()?;

    // Scenario names as arguments; none means every shipped scenario
    let names: Vec<String> = std::env::args().skip(1).collect();
    let cases = select_cases(&names)?;
    info!(
        cases = ?cases.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
        region = %config.region,
        target = config.target.as_str(),
        "Starting upgrade-harness"
    );

    let metrics = Arc::new(HarnessMetrics::new());
    let cancel = CancellationToken::new();

    // Cancel every run on SIGTERM or SIGINT; teardown still happens
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            warn!("Received shutdown signal, cancelling runs and tearing down clusters...");
            cancel.cancel();
        });
    }

    let runs = cases
        .into_iter()
        .map(|case| {
            let workspace = format!("{}-{}", case.name, uuid::Uuid::new_v4().simple());
            let runner = UpgradeTestRunner::from_config(config.clone(), &workspace)
                .with_metrics(metrics.clone());
            (runner, case)
        })
        .collect();

    let results = run_concurrently(runs, &cancel).await;

    let mut failed = 0usize;
    for result in &results {
        match result {
            Ok(report) => info!(
                case = %report.case,
                elapsed = ?report.elapsed,
                "PASS"
            ),
            Err(failure) => {
                failed += 1;
                error!(case = %failure.case, phase = %failure.phase, "FAIL");
                eprintln!("{failure}");
            }
        }
    }

    if let Some(path) = &config.metrics_path {
        match metrics.encode() {
            Ok(text) => {
                if let Err(e) = tokio::fs::write(path, text).await {
                    warn!(path = %path.display(), "Failed to write metrics: {}", e);
                }
            }
            Err(e) => warn!("Failed to encode metrics: {}", e),
        }
    }

    info!(total = results.len(), failed, "upgrade-harness finished");
    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn select_cases(names: &[String]) -> Result<Vec<UpgradeTestCase>, String> {
    if names.is_empty() {
        return Ok(scenarios::all());
    }
    names
        .iter()
        .map(|name| {
            scenarios::find(name).ok_or_else(|| {
                let known = scenarios::all()
                    .into_iter()
                    .map(|c| c.name)
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("unknown scenario '{name}' (known: {known})")
            })
        })
        .collect()
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
