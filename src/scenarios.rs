//! Shipped upgrade test cases

use crate::clients::elasticsearch::LogFilter;
use crate::model::expectation::{DataStreamsExpectation, DeltaPolicy, ExpectedDelta};
use crate::model::test_case::UpgradeTestCase;
use crate::model::version::StackVersion;

/// Number of data streams a replay of the synthetic telemetry creates
pub const INGESTED_DATA_STREAMS: usize = 8;

/// Data streams every replay writes to, independent of the replayed
/// services. The eighth stream carries application metrics and is named
/// after the service, so it is only counted, not named.
pub fn expected_data_streams(namespace: &str) -> Vec<String> {
    [
        "traces-apm",
        "logs-apm.error",
        "metrics-apm.internal",
        "metrics-apm.service_destination.1m",
        "metrics-apm.service_summary.1m",
        "metrics-apm.service_transaction.1m",
        "metrics-apm.transaction.1m",
    ]
    .iter()
    .map(|prefix| format!("{prefix}-{namespace}"))
    .collect()
}

/// Growth is expected on every stream, which may not exist before the first ingest
fn first_ingest(namespace: &str) -> DeltaPolicy {
    DeltaPolicy::uniform(
        expected_data_streams(namespace),
        ExpectedDelta::growth().may_appear(),
    )
}

/// Engine errors logged while nodes restart during an upgrade
fn upgrade_engine_noise() -> Vec<LogFilter> {
    vec![
        LogFilter::match_phrase("message", "failed to establish trust with server"),
        LogFilter::match_phrase("message", "node disconnected"),
        LogFilter::match_phrase("error.type", "org.elasticsearch.transport.NodeDisconnectedException"),
    ]
}

/// Ingestion errors logged while the engine is briefly unavailable
fn upgrade_ingest_noise() -> Vec<LogFilter> {
    vec![
        LogFilter::match_phrase("message", "dial tcp"),
        LogFilter::match_phrase("message", "context canceled"),
        LogFilter::term("log.logger", "beater"),
    ]
}

/// 8.15.4 to 8.16.0 with the default namespace: every stream stays on data
/// stream lifecycle with one backing index until the first post-upgrade
/// ingest, which rolls each stream over.
pub fn upgrade_8_15_4_to_8_16_0() -> UpgradeTestCase {
    let namespace = "default";
    let after_upgrade = DeltaPolicy::uniform(
        expected_data_streams(namespace),
        ExpectedDelta::growth_with_rollover(),
    );

    UpgradeTestCase::new(
        "upgrade_8_15_4_to_8_16_0",
        StackVersion::new(8, 15, 4),
        StackVersion::new(8, 16, 0),
    )
    .with_namespace(namespace)
    .with_after_first_ingest(
        first_ingest(namespace),
        Some(DataStreamsExpectation::managed_by_dsl(INGESTED_DATA_STREAMS, 1)),
    )
    .with_across_upgrade(
        DeltaPolicy::new(),
        Some(DataStreamsExpectation::managed_by_dsl(INGESTED_DATA_STREAMS, 1)),
    )
    .with_after_second_ingest(
        after_upgrade,
        Some(DataStreamsExpectation::managed_by_dsl(INGESTED_DATA_STREAMS, 2)),
    )
    .ignore_engine_logs(upgrade_engine_noise())
    .ignore_ingest_logs(upgrade_ingest_noise())
}

/// Every shipped case
pub fn all() -> Vec<UpgradeTestCase> {
    vec![upgrade_8_15_4_to_8_16_0()]
}

/// Look up a shipped case by name
pub fn find(name: &str) -> Option<UpgradeTestCase> {
    all().into_iter().find(|case| case.name == name)
}
