//! Synthetic telemetry ingestion
//!
//! [`TelemetryGenerator`] is the raw load tool; [`GeneratorAdapter`] binds it
//! to a target and adds the drain contract: an ingest only counts as done
//! once the generator reports zero outstanding events, checked by a bounded
//! poll.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::retry::{PollError, Readiness, RetryPolicy, poll_until};

#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("generator is not configured with a target")]
    NotConfigured,

    #[error("failed to spawn {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("generator exited with {status}: {stderr}")]
    Exited { status: String, stderr: String },

    #[error("generator did not drain, {backlog} events still outstanding")]
    NotDrained { backlog: u64 },

    #[error("generator run cancelled")]
    Cancelled,
}

/// Where and how fast to send events
#[derive(Clone, PartialEq, Eq)]
pub struct IngestTarget {
    pub server_url: Url,
    pub api_key: String,
    /// Rate in `<events>/<unit>` form, e.g. `1000/s`
    pub event_rate: String,
}

impl std::fmt::Debug for IngestTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestTarget")
            .field("server_url", &self.server_url.as_str())
            .field("event_rate", &self.event_rate)
            .finish_non_exhaustive()
    }
}

/// A load generator replaying recorded agent traffic
#[async_trait]
pub trait TelemetryGenerator: Send + Sync {
    /// Replay the recorded events once against `target`
    async fn run_blocking(&self, target: &IngestTarget) -> Result<(), GeneratorError>;

    /// Events sent or queued but not yet acknowledged
    async fn backlog(&self) -> Result<u64, GeneratorError>;
}

/// Runs an external generator binary once per ingest
pub struct ProcessGenerator {
    binary: String,
    in_flight: AtomicU64,
}

impl ProcessGenerator {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            in_flight: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl TelemetryGenerator for ProcessGenerator {
    #[instrument(skip(self))]
    async fn run_blocking(&self, target: &IngestTarget) -> Result<(), GeneratorError> {
        // Released on every exit, including a dropped future. The binary
        // flushes before a clean exit, and a failed or killed run has nothing
        // left to deliver.
        let _replay = InFlight::enter(&self.in_flight);

        let output = Command::new(&self.binary)
            .arg("-server")
            .arg(target.server_url.as_str())
            .arg("-api-key")
            .arg(&target.api_key)
            .arg("-event-rate")
            .arg(&target.event_rate)
            .arg("-rewrite-timestamps")
            .arg("-rewrite-ids")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| GeneratorError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(GeneratorError::Exited {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        debug!("generator exited cleanly");
        Ok(())
    }

    async fn backlog(&self) -> Result<u64, GeneratorError> {
        Ok(self.in_flight.load(Ordering::SeqCst))
    }
}

/// One replay counted in a [`ProcessGenerator`] backlog while alive
struct InFlight<'a>(&'a AtomicU64);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicU64) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Binds a [`TelemetryGenerator`] to a target and enforces the drain contract
pub struct GeneratorAdapter {
    generator: Arc<dyn TelemetryGenerator>,
    target: Option<IngestTarget>,
    drain: RetryPolicy,
}

impl GeneratorAdapter {
    pub fn new(generator: Arc<dyn TelemetryGenerator>, drain: RetryPolicy) -> Self {
        Self {
            generator,
            target: None,
            drain,
        }
    }

    pub fn configure(&mut self, server_url: Url, api_key: impl Into<String>, event_rate: impl Into<String>) {
        self.target = Some(IngestTarget {
            server_url,
            api_key: api_key.into(),
            event_rate: event_rate.into(),
        });
    }

    pub fn target(&self) -> Option<&IngestTarget> {
        self.target.as_ref()
    }

    /// Run one replay, then poll until the backlog is zero.
    ///
    /// Running out of drain attempts with events still outstanding is a
    /// failure; a partially drained ingest never counts as done.
    pub async fn run_blocking_until_drained(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(), GeneratorError> {
        let target = self.target.as_ref().ok_or(GeneratorError::NotConfigured)?;
        info!(server_url = %target.server_url, event_rate = %target.event_rate, "starting ingestion");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GeneratorError::Cancelled),
            res = self.generator.run_blocking(target) => res?,
        }

        let drained = poll_until(&self.drain, cancel, || async {
            let backlog = self.generator.backlog().await?;
            Ok::<_, GeneratorError>(if backlog == 0 {
                Readiness::Ready(())
            } else {
                Readiness::Pending(backlog)
            })
        })
        .await;

        match drained {
            Ok(()) => {
                info!("generator drained");
                Ok(())
            }
            Err(PollError::Exhausted { attempts, last }) => {
                warn!(attempts, backlog = last, "generator did not drain");
                Err(GeneratorError::NotDrained { backlog: last })
            }
            Err(PollError::Cancelled) => Err(GeneratorError::Cancelled),
            Err(PollError::Failed(e)) => Err(e),
        }
    }
}
