//! Error log assertions

use std::fmt;

use tracing::{info, instrument};

use crate::clients::elasticsearch::{LogEntries, LogFilter, LogQuery, SearchClient};
use crate::clients::error::ClientError;

/// Component whose logs are checked
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogSource {
    /// The search engine itself
    Engine,
    /// The ingestion service
    Ingest,
}

impl LogSource {
    /// `service.type` value the component logs with
    pub fn service_type(&self) -> &'static str {
        match self {
            LogSource::Engine => "elasticsearch",
            LogSource::Ingest => "apm",
        }
    }
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.service_type())
    }
}

/// Non-ignored error logs found for one source
#[derive(Clone, Debug, PartialEq)]
pub struct LogFailure {
    pub source: LogSource,
    pub logs: LogEntries,
}

impl fmt::Display for LogFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error logs: {}", self.source, self.logs.total)?;
        for entry in &self.logs.entries {
            write!(
                f,
                "\n    [{}] {}",
                entry.timestamp.as_deref().unwrap_or("-"),
                entry.message.as_deref().unwrap_or("<no message>")
            )?;
        }
        Ok(())
    }
}

/// Query both log sources and return one failure per source with
/// non-ignored error entries. Both sources are always queried.
#[instrument(skip_all)]
pub async fn check_error_logs(
    client: &dyn SearchClient,
    ignored_engine: &[LogFilter],
    ignored_ingest: &[LogFilter],
) -> Result<Vec<LogFailure>, ClientError> {
    let mut failures = Vec::new();

    for (source, ignored) in [
        (LogSource::Engine, ignored_engine),
        (LogSource::Ingest, ignored_ingest),
    ] {
        let logs = client
            .search_error_logs(&LogQuery::new(source.service_type(), ignored))
            .await?;
        info!(%source, errors = logs.total, "checked error logs");
        if logs.total > 0 || !logs.entries.is_empty() {
            failures.push(LogFailure { source, logs });
        }
    }

    Ok(failures)
}
