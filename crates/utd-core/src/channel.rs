use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::types::{DecryptionFailure, TrackerCommand, TrackerEvent};

/// Status stream (rejections, flush summaries). Slow subscribers may lag.
pub type EventStream = broadcast::Receiver<TrackerEvent>;

/// Lossless, ordered stream of reported failures.
///
/// Closes once the runtime owning the matching [`RuntimeChannels`] exits.
pub type ReportStream = mpsc::Receiver<DecryptionFailure>;

/// Errors returned by tracker channel operations.
#[derive(Debug, Error)]
pub enum TrackerChannelError {
    /// The runtime no longer accepts commands.
    #[error("command channel is closed")]
    CommandChannelClosed,
    /// Nobody is reading the report stream anymore.
    #[error("report channel is closed")]
    ReportChannelClosed,
}

/// Caller side: submit commands and watch status events.
#[derive(Clone, Debug)]
pub struct TrackerChannels {
    command_tx: mpsc::Sender<TrackerCommand>,
    event_tx: broadcast::Sender<TrackerEvent>,
}

/// Runtime side: receive commands, deliver reports, emit status events.
#[derive(Debug)]
pub struct RuntimeChannels {
    command_rx: mpsc::Receiver<TrackerCommand>,
    report_tx: mpsc::Sender<DecryptionFailure>,
    event_tx: broadcast::Sender<TrackerEvent>,
}

impl TrackerChannels {
    /// Create both channel ends plus the report stream.
    ///
    /// Reports apply backpressure: once `report_buffer` undelivered reports
    /// are waiting, the runtime waits for the reader instead of dropping any.
    pub fn new(
        command_buffer: usize,
        report_buffer: usize,
        event_buffer: usize,
    ) -> (Self, RuntimeChannels, ReportStream) {
        let (command_tx, command_rx) = mpsc::channel(command_buffer.max(1));
        let (report_tx, report_rx) = mpsc::channel(report_buffer.max(1));
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));

        (
            Self {
                command_tx,
                event_tx: event_tx.clone(),
            },
            RuntimeChannels {
                command_rx,
                report_tx,
                event_tx,
            },
            report_rx,
        )
    }

    /// Subscribe to status events.
    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    /// Send one command to the runtime.
    pub async fn send_command(&self, command: TrackerCommand) -> Result<(), TrackerChannelError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| TrackerChannelError::CommandChannelClosed)
    }
}

impl RuntimeChannels {
    /// Next command, or `None` once every caller-side handle is gone.
    pub async fn recv_command(&mut self) -> Option<TrackerCommand> {
        self.command_rx.recv().await
    }

    /// Deliver one report, waiting while the report stream is full.
    pub async fn deliver_report(
        &self,
        failure: DecryptionFailure,
    ) -> Result<(), TrackerChannelError> {
        self.report_tx
            .send(failure)
            .await
            .map_err(|_| TrackerChannelError::ReportChannelClosed)
    }

    /// Emit a status event to all subscribers. Best-effort.
    pub fn emit(&self, event: TrackerEvent) {
        let _ = self.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DecryptedEvent;

    fn failure(id: &str) -> DecryptionFailure {
        DecryptionFailure {
            failed_event_id: id.into(),
            failed_at_ms: 42,
        }
    }

    #[tokio::test]
    async fn sends_commands_to_runtime_side() {
        let (channels, mut runtime, _reports) = TrackerChannels::new(8, 8, 8);
        channels
            .send_command(TrackerCommand::Observe(DecryptedEvent::failed("$1")))
            .await
            .expect("command send should work");

        let cmd = runtime
            .recv_command()
            .await
            .expect("runtime should have a command");
        match cmd {
            TrackerCommand::Observe(event) => assert_eq!(event.event_id.as_deref(), Some("$1")),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test]
    async fn fans_out_status_events_to_subscribers() {
        let (channels, runtime, _reports) = TrackerChannels::new(4, 4, 16);
        let mut a = channels.subscribe();
        let mut b = channels.subscribe();

        runtime.emit(TrackerEvent::Flushed {
            queued: 1,
            reported: 1,
        });

        let event_a = a.recv().await.expect("subscriber a should receive event");
        let event_b = b.recv().await.expect("subscriber b should receive event");
        assert_eq!(event_a, event_b);
    }

    #[tokio::test]
    async fn report_stream_waits_for_reader_instead_of_dropping() {
        let (_channels, runtime, mut reports) = TrackerChannels::new(1, 2, 1);

        let producer = tokio::spawn(async move {
            for n in 0..10 {
                runtime
                    .deliver_report(failure(&format!("${n}")))
                    .await
                    .expect("reader is alive");
            }
        });

        let mut seen = Vec::new();
        while let Some(report) = reports.recv().await {
            seen.push(report.failed_event_id);
        }
        producer.await.expect("producer task should finish");

        let expected = (0..10).map(|n| format!("${n}")).collect::<Vec<_>>();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn reports_closed_channels() {
        let (channels, runtime, reports) = TrackerChannels::new(1, 1, 1);
        drop(reports);
        let err = runtime
            .deliver_report(failure("$1"))
            .await
            .expect_err("delivery should fail once the reader is gone");
        assert!(matches!(err, TrackerChannelError::ReportChannelClosed));

        drop(runtime);
        let err = channels
            .send_command(TrackerCommand::Flush { now_ms: 0 })
            .await
            .expect_err("send should fail once the runtime is gone");
        assert!(matches!(err, TrackerChannelError::CommandChannelClosed));
    }
}
