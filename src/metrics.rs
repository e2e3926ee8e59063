//! Prometheus metrics for upgrade test runs
//!
//! The harness is a batch job, so metrics are not served over HTTP; the
//! binary writes the text exposition to a file once all runs finish.

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;

use crate::orchestrator::phase::TestPhase;

/// Labels for per-phase metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct PhaseLabels {
    pub case: String,
    pub phase: String,
}

impl prometheus_client::encoding::EncodeLabelSet for PhaseLabels {
    fn encode(
        &self,
        mut encoder: prometheus_client::encoding::LabelSetEncoder<'_>,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("case", self.case.as_str()).encode(encoder.encode_label())?;
        ("phase", self.phase.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for run outcome metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct OutcomeLabels {
    pub outcome: String,
}

impl prometheus_client::encoding::EncodeLabelSet for OutcomeLabels {
    fn encode(
        &self,
        mut encoder: prometheus_client::encoding::LabelSetEncoder<'_>,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("outcome", self.outcome.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for per-case metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct CaseLabels {
    pub case: String,
}

impl prometheus_client::encoding::EncodeLabelSet for CaseLabels {
    fn encode(
        &self,
        mut encoder: prometheus_client::encoding::LabelSetEncoder<'_>,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("case", self.case.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics state
pub struct HarnessMetrics {
    /// Phase duration histogram
    pub phase_duration_seconds: Family<PhaseLabels, Histogram>,
    /// Failed phases counter
    pub phase_failures: Family<PhaseLabels, Counter>,
    /// Finished runs by outcome
    pub runs: Family<OutcomeLabels, Counter>,
    /// Assertion violations reported per case
    pub violations: Family<CaseLabels, Counter>,

    registry: Registry,
}

impl Default for HarnessMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl HarnessMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        // 1s .. ~4.5h
        let phase_duration_seconds =
            Family::<PhaseLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(1.0, 2.0, 15))
            });
        registry.register(
            "upgrade_harness_phase_duration_seconds",
            "Duration of each upgrade test phase in seconds",
            phase_duration_seconds.clone(),
        );

        let phase_failures = Family::<PhaseLabels, Counter>::default();
        registry.register(
            "upgrade_harness_phase_failures",
            "Total number of failed upgrade test phases",
            phase_failures.clone(),
        );

        let runs = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "upgrade_harness_runs",
            "Total number of finished upgrade test runs by outcome",
            runs.clone(),
        );

        let violations = Family::<CaseLabels, Counter>::default();
        registry.register(
            "upgrade_harness_violations",
            "Total number of assertion violations reported",
            violations.clone(),
        );

        Self {
            phase_duration_seconds,
            phase_failures,
            runs,
            violations,
            registry,
        }
    }

    fn phase_labels(case: &str, phase: TestPhase) -> PhaseLabels {
        PhaseLabels {
            case: case.to_string(),
            phase: phase.label().to_string(),
        }
    }

    /// Record how long a phase ran, whatever its outcome
    pub fn record_phase(&self, case: &str, phase: TestPhase, duration_secs: f64) {
        self.phase_duration_seconds
            .get_or_create(&Self::phase_labels(case, phase))
            .observe(duration_secs);
    }

    pub fn record_phase_failure(&self, case: &str, phase: TestPhase) {
        self.phase_failures
            .get_or_create(&Self::phase_labels(case, phase))
            .inc();
    }

    /// Record a finished run; `outcome` is `passed`, `failed` or `cancelled`
    pub fn record_run(&self, outcome: &str) {
        self.runs
            .get_or_create(&OutcomeLabels {
                outcome: outcome.to_string(),
            })
            .inc();
    }

    pub fn record_violations(&self, case: &str, count: usize) {
        if count == 0 {
            return;
        }
        self.violations
            .get_or_create(&CaseLabels {
                case: case.to_string(),
            })
            .inc_by(count as u64);
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }
}
