//! Background task that owns a [`DecryptionFailureTracker`] and drives it.
//!
//! Observations arrive over the command channel. Two timers run the tracker's
//! check and report passes. Reports go out, in order and without loss, over
//! the [`ReportStream`] returned by [`spawn_runtime`]; status updates fan out
//! as [`TrackerEvent`]s.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::mpsc,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use utd_core::{
    Clock, DecryptionFailure, DecryptionFailureTracker, EventStream, ReportStream, Reporter,
    RuntimeChannels, SystemClock, TrackerChannelError, TrackerChannels, TrackerCommand,
    TrackerConfig, TrackerEvent,
};
use utd_platform::{PersistentReporter, ReportedEventStore};

/// Default period between check passes.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(5_000);
/// Default period between report passes.
pub const DEFAULT_TRACK_INTERVAL: Duration = Duration::from_millis(1_000);

const COMMAND_BUFFER: usize = 256;
const REPORT_BUFFER: usize = 256;
const EVENT_BUFFER: usize = 64;

type BoxedReporter = Box<dyn Reporter + Send>;

/// Runtime timing and tracker tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerRuntimeConfig {
    pub tracker: TrackerConfig,
    pub check_interval: Duration,
    pub track_interval: Duration,
}

impl Default for TrackerRuntimeConfig {
    fn default() -> Self {
        Self {
            tracker: TrackerConfig::default(),
            check_interval: DEFAULT_CHECK_INTERVAL,
            track_interval: DEFAULT_TRACK_INTERVAL,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TrackerRuntimeHandle {
    channels: TrackerChannels,
    cancel: CancellationToken,
}

impl TrackerRuntimeHandle {
    pub async fn send(&self, command: TrackerCommand) -> Result<(), TrackerChannelError> {
        self.channels.send_command(command).await
    }

    pub fn subscribe(&self) -> EventStream {
        self.channels.subscribe()
    }

    /// Stop the timers and the command loop. Queued failures are not flushed.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

/// Spawn a runtime that stamps failures with the wall clock.
///
/// Dropping every handle lets the runtime finish the commands already sent
/// and exit, which closes the returned report stream.
pub fn spawn_runtime(
    config: TrackerRuntimeConfig,
    store: Option<Arc<dyn ReportedEventStore>>,
) -> (TrackerRuntimeHandle, ReportStream) {
    spawn_runtime_with_clock(config, store, SystemClock)
}

pub fn spawn_runtime_with_clock<C>(
    config: TrackerRuntimeConfig,
    store: Option<Arc<dyn ReportedEventStore>>,
    clock: C,
) -> (TrackerRuntimeHandle, ReportStream)
where
    C: Clock + Clone + Send + 'static,
{
    let (channels, runtime_channels, reports) =
        TrackerChannels::new(COMMAND_BUFFER, REPORT_BUFFER, EVENT_BUFFER);
    let cancel = CancellationToken::new();
    let runtime = TrackerRuntime::new(config, runtime_channels, store, clock, cancel.clone());
    tokio::spawn(async move {
        runtime.run().await;
    });

    (TrackerRuntimeHandle { channels, cancel }, reports)
}

/// Collects what the tracker reports until the runtime hands it on.
struct Outbox(mpsc::UnboundedSender<DecryptionFailure>);

impl Reporter for Outbox {
    fn report(&mut self, failure: DecryptionFailure) {
        // The receiver lives as long as the runtime that owns this tracker.
        let _ = self.0.send(failure);
    }
}

struct TrackerRuntime<C> {
    channels: RuntimeChannels,
    outbox: mpsc::UnboundedReceiver<DecryptionFailure>,
    tracker: DecryptionFailureTracker<BoxedReporter, C>,
    clock: C,
    check_interval: Duration,
    track_interval: Duration,
    cancel: CancellationToken,
}

impl<C: Clock + Clone> TrackerRuntime<C> {
    fn new(
        config: TrackerRuntimeConfig,
        channels: RuntimeChannels,
        store: Option<Arc<dyn ReportedEventStore>>,
        clock: C,
        cancel: CancellationToken,
    ) -> Self {
        let (outbox_tx, outbox) = mpsc::unbounded_channel();
        let reporter = build_reporter(Outbox(outbox_tx), store);
        Self {
            channels,
            outbox,
            tracker: DecryptionFailureTracker::with_clock(reporter, clock.clone(), config.tracker),
            clock,
            check_interval: config.check_interval,
            track_interval: config.track_interval,
            cancel,
        }
    }

    async fn run(mut self) {
        let mut check_timer = time::interval(self.check_interval);
        check_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut track_timer = time::interval(self.track_interval);
        track_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let cancel = self.cancel.clone();

        info!(
            grace_period_ms = self.tracker.grace_period_ms(),
            check_interval_ms = self.check_interval.as_millis() as u64,
            track_interval_ms = self.track_interval.as_millis() as u64,
            "decryption failure tracker started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                command = self.channels.recv_command() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                _ = check_timer.tick() => {
                    let now_ms = self.clock.now_ms();
                    let queued = self.tracker.check_failures(now_ms);
                    trace!(now_ms, queued, "periodic failure check");
                }
                _ = track_timer.tick() => {
                    self.tracker.track_failure();
                    self.deliver_reports().await;
                }
            }
        }

        info!(
            pending = self.tracker.pending_len(),
            queued = self.tracker.queued_len(),
            "decryption failure tracker stopped"
        );
    }

    async fn handle_command(&mut self, command: TrackerCommand) {
        match command {
            TrackerCommand::Observe(event) => {
                if let Err(err) = self.tracker.event_decrypted(&event) {
                    warn!(code = %err.code, "rejected decryption observation");
                    self.channels.emit(TrackerEvent::ObservationRejected {
                        code: err.code,
                        message: err.message,
                    });
                }
            }
            TrackerCommand::Flush { now_ms } => {
                let queued = self.tracker.check_failures(now_ms);
                self.tracker.track_failure();
                let reported = self.deliver_reports().await;
                debug!(now_ms, queued, reported, "flushed decryption failures");
                self.channels.emit(TrackerEvent::Flushed { queued, reported });
            }
        }
    }

    /// Move everything the tracker reported onto the report stream, waiting
    /// for the reader when it is full. Returns how many were delivered.
    async fn deliver_reports(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(failure) = self.outbox.try_recv() {
            let event_id = failure.failed_event_id.clone();
            match self.channels.deliver_report(failure).await {
                Ok(()) => delivered += 1,
                Err(err) => warn!(%event_id, error = %err, "dropping decryption failure report"),
            }
        }
        delivered
    }
}

fn build_reporter(outbox: Outbox, store: Option<Arc<dyn ReportedEventStore>>) -> BoxedReporter {
    match store {
        Some(store) => Box::new(PersistentReporter::new(outbox, store)),
        None => Box::new(outbox),
    }
}
