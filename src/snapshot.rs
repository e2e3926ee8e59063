//! State snapshot collector
//!
//! Joins data stream metadata with per-stream document counts into one
//! [`DataStreamSnapshot`]. A pattern matching nothing yields an empty
//! snapshot; callers decide whether that is acceptable.

use thiserror::Error;
use tracing::{debug, instrument};

use crate::clients::elasticsearch::{DataStreamInfo, SearchClient};
use crate::clients::error::ClientError;
use crate::model::snapshot::{DataStreamSnapshot, DataStreamState, LifecycleManager};

#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("search engine request failed: {0}")]
    Client(#[from] ClientError),

    #[error("data stream {stream}: unknown lifecycle manager '{name}'")]
    UnknownManager { stream: String, name: String },

    #[error("data stream {stream}: {reason}")]
    InvalidDataStream { stream: String, reason: String },
}

impl CollectorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CollectorError::Client(e) if e.is_transient())
    }
}

/// Read the current state of every data stream matching `pattern`.
///
/// Streams without documents (no bucket in the count aggregation) get a
/// count of zero; they still exist and have backing indices.
#[instrument(skip(client))]
pub async fn collect_snapshot(
    client: &dyn SearchClient,
    pattern: &str,
) -> Result<DataStreamSnapshot, CollectorError> {
    let streams = client.get_data_streams(pattern).await?;
    if streams.is_empty() {
        debug!("no data stream matches the pattern");
        return Ok(DataStreamSnapshot::default());
    }

    let counts = client.doc_count_per_stream(pattern).await?;

    let snapshot = streams
        .into_iter()
        .map(|info| {
            let count = counts.get(&info.name).copied().unwrap_or(0);
            state_from_info(info, count)
        })
        .collect::<Result<DataStreamSnapshot, _>>()?;

    debug!(
        streams = snapshot.len(),
        documents = snapshot.total_documents(),
        "collected snapshot"
    );
    Ok(snapshot)
}

fn parse_manager(stream: &str, name: Option<&str>) -> Result<LifecycleManager, CollectorError> {
    let name = name.unwrap_or(LifecycleManager::Unmanaged.as_str());
    LifecycleManager::from_engine_name(name).ok_or_else(|| CollectorError::UnknownManager {
        stream: stream.to_string(),
        name: name.to_string(),
    })
}

fn state_from_info(
    info: DataStreamInfo,
    document_count: u64,
) -> Result<(String, DataStreamState), CollectorError> {
    if info.indices.is_empty() {
        return Err(CollectorError::InvalidDataStream {
            stream: info.name,
            reason: "no backing index".to_string(),
        });
    }
    let backing_index_count = u32::try_from(info.backing_index_count()).map_err(|_| {
        CollectorError::InvalidDataStream {
            stream: info.name.clone(),
            reason: format!("{} backing indices", info.backing_index_count()),
        }
    })?;

    let lifecycle_manager = parse_manager(&info.name, info.next_generation_managed_by.as_deref())?;
    let index_managers = info
        .indices
        .iter()
        .map(|idx| parse_manager(&info.name, idx.managed_by.as_deref()))
        .collect::<Result<Vec<_>, _>>()?;

    Ok((
        info.name,
        DataStreamState {
            document_count,
            backing_index_count,
            lifecycle_manager,
            prefer_ilm: info.prefer_ilm,
            index_managers,
        },
    ))
}
