//! Feeding JSON-lines timeline events into a tracker runtime and printing reports.

use std::{io, sync::Arc};

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};
use utd_core::{DecryptedEvent, ReportStream, TrackerChannelError, TrackerCommand};
use utd_platform::{JsonFileReportedEventStore, ReportedEventStore, ReportedEventStoreError};
use utd_runtime::{TrackerRuntimeHandle, spawn_runtime};

use crate::config::ReplayConfig;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("replay i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Runtime(#[from] TrackerChannelError),
    #[error("failed opening reported-event store: {0}")]
    Store(#[from] ReportedEventStoreError),
}

/// Counters for one pass over the input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Lines forwarded to the tracker.
    pub observed: usize,
    /// Lines skipped because they were not a JSON event object.
    pub malformed: usize,
    /// Reports written to the output.
    pub reported: usize,
}

/// Replay `reader` through a fresh runtime and write its reports to `writer`.
///
/// Returns once the runtime has exited and every report has been written.
pub async fn run_replay<R, W>(
    config: &ReplayConfig,
    reader: R,
    writer: W,
) -> Result<ReplaySummary, ReplayError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let store = match &config.reported_store {
        Some(path) => {
            Some(Arc::new(JsonFileReportedEventStore::open(path)?) as Arc<dyn ReportedEventStore>)
        }
        None => None,
    };
    let (handle, reports) = spawn_runtime(config.runtime, store);

    let feeding = async move {
        let fed = match feed_events(reader, &handle).await {
            Ok(summary) => drain(config, &handle).await.map(|()| summary),
            Err(err) => Err(err),
        };
        // Closing the command channel lets the runtime finish queued commands and exit.
        drop(handle);
        fed
    };
    let (fed, written) = tokio::join!(feeding, write_reports(reports, writer));

    let mut summary = fed?;
    summary.reported = written?;
    Ok(summary)
}

/// Classify every non-blank line of `reader` and forward it to the runtime.
pub async fn feed_events<R>(
    reader: R,
    handle: &TrackerRuntimeHandle,
) -> Result<ReplaySummary, ReplayError>
where
    R: AsyncBufRead + Unpin,
{
    let mut summary = ReplaySummary::default();
    let mut lines = reader.lines();
    let mut line_no = 0_usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        match DecryptedEvent::from_timeline_json(&line) {
            Ok(event) => {
                handle.send(TrackerCommand::Observe(event)).await?;
                summary.observed += 1;
            }
            Err(err) => {
                warn!(line = line_no, error = %err, "skipping malformed timeline event");
                summary.malformed += 1;
            }
        }
    }

    debug!(
        observed = summary.observed,
        malformed = summary.malformed,
        "finished reading timeline events"
    );
    Ok(summary)
}

/// Give outstanding failures a chance to be reported before shutting down.
async fn drain(config: &ReplayConfig, handle: &TrackerRuntimeHandle) -> Result<(), ReplayError> {
    if config.flush_on_eof {
        handle
            .send(TrackerCommand::Flush { now_ms: u64::MAX })
            .await?;
        return Ok(());
    }

    let settle = config.settle_window();
    warn!(
        settle_ms = settle.as_millis() as u64,
        "flush on EOF disabled; waiting for timers to report"
    );
    tokio::time::sleep(settle).await;
    Ok(())
}

/// Write each reported failure to `writer` as one JSON line.
///
/// Returns the number of reports written once the report stream closes.
pub async fn write_reports<W>(mut reports: ReportStream, mut writer: W) -> io::Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    while let Some(failure) = reports.recv().await {
        let mut encoded = serde_json::to_vec(&failure).map_err(io::Error::other)?;
        encoded.push(b'\n');
        writer.write_all(&encoded).await?;
        written += 1;
    }

    writer.flush().await?;
    Ok(written)
}
