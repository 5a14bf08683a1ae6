use std::collections::{HashMap, VecDeque};

use tracing::{debug, trace};

use crate::{
    clock::{Clock, SystemClock},
    error::TrackerError,
    types::{DecryptionFailure, DecryptionObservation, DecryptionOutcome},
};

/// Default delay between observing a failure and it becoming reportable.
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 5_000;

/// Sink that receives each decryption failure exactly once.
pub trait Reporter {
    fn report(&mut self, failure: DecryptionFailure);
}

impl<F> Reporter for F
where
    F: FnMut(DecryptionFailure),
{
    fn report(&mut self, failure: DecryptionFailure) {
        self(failure)
    }
}

impl Reporter for Box<dyn Reporter + Send> {
    fn report(&mut self, failure: DecryptionFailure) {
        (**self).report(failure)
    }
}

/// Per-event tracking state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedEventState {
    /// Latest observation decrypted successfully.
    Ok,
    /// Latest observation failed and the failure is waiting out the grace period.
    Failing {
        /// Clock value when the failure was first observed.
        failed_at_ms: u64,
    },
    /// Failure is in the report queue. Later observations no longer matter.
    Queued,
    /// Failure was handed to the reporter. Terminal.
    Reported,
}

/// Tracker tuning fixed for the lifetime of one tracker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerConfig {
    /// How long a failure must persist before it is queued for reporting.
    pub grace_period_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
        }
    }
}

/// Deduplicates and debounces decryption failures before reporting them.
///
/// Observations only update state. [`check_failures`](Self::check_failures)
/// moves failures that outlived the grace period into a report queue and
/// [`track_failure`](Self::track_failure) drains that queue into the
/// reporter. Each event ID is reported at most once per tracker.
pub struct DecryptionFailureTracker<R, C = SystemClock> {
    reporter: R,
    clock: C,
    grace_period_ms: u64,
    events: HashMap<String, TrackedEventState>,
    pending: VecDeque<String>,
    ready: VecDeque<DecryptionFailure>,
}

impl<R: Reporter> DecryptionFailureTracker<R> {
    /// Create a tracker using the wall clock and the default grace period.
    pub fn new(reporter: R) -> Self {
        Self::with_clock(reporter, SystemClock, TrackerConfig::default())
    }
}

impl<R: Reporter, C: Clock> DecryptionFailureTracker<R, C> {
    pub fn with_clock(reporter: R, clock: C, config: TrackerConfig) -> Self {
        Self {
            reporter,
            clock,
            grace_period_ms: config.grace_period_ms,
            events: HashMap::new(),
            pending: VecDeque::new(),
            ready: VecDeque::new(),
        }
    }

    /// Record the latest decryption outcome for an event.
    ///
    /// Fails with `missing_event_id` when the observation has no usable ID;
    /// the tracker is left untouched in that case.
    pub fn event_decrypted<E>(&mut self, event: &E) -> Result<(), TrackerError>
    where
        E: DecryptionObservation + ?Sized,
    {
        let event_id = event
            .event_id()
            .filter(|id| !id.is_empty())
            .ok_or_else(TrackerError::missing_event_id)?;

        match event.outcome() {
            DecryptionOutcome::Failure => self.record_failure(event_id),
            DecryptionOutcome::Success => self.record_success(event_id),
        }
        Ok(())
    }

    /// Queue every failure observed more than the grace period before `now_ms`.
    ///
    /// Returns the number of failures queued by this pass. Queue order
    /// follows the order in which the failures were first observed.
    pub fn check_failures(&mut self, now_ms: u64) -> usize {
        let mut still_pending = VecDeque::with_capacity(self.pending.len());
        let mut queued = 0;

        for event_id in self.pending.drain(..) {
            let Some(state) = self.events.get_mut(&event_id) else {
                continue;
            };
            let current = *state;
            match current {
                TrackedEventState::Failing { failed_at_ms }
                    if now_ms.saturating_sub(failed_at_ms) > self.grace_period_ms =>
                {
                    *state = TrackedEventState::Queued;
                    trace!(%event_id, failed_at_ms, now_ms, "failure queued for reporting");
                    self.ready.push_back(DecryptionFailure {
                        failed_event_id: event_id,
                        failed_at_ms,
                    });
                    queued += 1;
                }
                TrackedEventState::Failing { .. } => still_pending.push_back(event_id),
                _ => {}
            }
        }

        self.pending = still_pending;
        if queued > 0 {
            debug!(queued, pending = self.pending.len(), "decryption failures queued");
        }
        queued
    }

    /// Report every queued failure, oldest first.
    ///
    /// Returns how many failures reached the reporter; an empty queue is a no-op.
    pub fn track_failure(&mut self) -> usize {
        let mut reported = 0;
        while let Some(failure) = self.ready.pop_front() {
            self.events
                .insert(failure.failed_event_id.clone(), TrackedEventState::Reported);
            debug!(event_id = %failure.failed_event_id, "reporting decryption failure");
            self.reporter.report(failure);
            reported += 1;
        }
        reported
    }

    /// Current state for an event, `None` when it was never observed.
    pub fn state(&self, event_id: &str) -> Option<TrackedEventState> {
        self.events.get(event_id).copied()
    }

    /// Failures still inside their grace period.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Failures waiting for the next `track_failure`.
    pub fn queued_len(&self) -> usize {
        self.ready.len()
    }

    /// Distinct event IDs observed so far.
    pub fn tracked_len(&self) -> usize {
        self.events.len()
    }

    pub fn grace_period_ms(&self) -> u64 {
        self.grace_period_ms
    }

    fn record_failure(&mut self, event_id: &str) {
        match self.events.get(event_id) {
            Some(TrackedEventState::Ok) | None => {}
            Some(state) => {
                trace!(event_id, ?state, "repeated decryption failure ignored");
                return;
            }
        }

        let failed_at_ms = self.clock.now_ms();
        self.events.insert(
            event_id.to_owned(),
            TrackedEventState::Failing { failed_at_ms },
        );
        self.pending.push_back(event_id.to_owned());
        debug!(event_id, failed_at_ms, "decryption failure observed");
    }

    fn record_success(&mut self, event_id: &str) {
        match self.events.get(event_id) {
            None => {
                self.events
                    .insert(event_id.to_owned(), TrackedEventState::Ok);
            }
            Some(TrackedEventState::Failing { .. }) => {
                self.events
                    .insert(event_id.to_owned(), TrackedEventState::Ok);
                self.pending.retain(|pending_id| pending_id != event_id);
                debug!(event_id, "pending decryption failure resolved");
            }
            Some(TrackedEventState::Ok) => {}
            Some(TrackedEventState::Queued | TrackedEventState::Reported) => {
                trace!(event_id, "late decryption success after failure was queued");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        cell::RefCell,
        rc::Rc,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use super::*;
    use crate::{clock::ManualClock, types::DecryptedEvent};

    #[derive(Clone, Default)]
    struct Recorder(Rc<RefCell<Vec<DecryptionFailure>>>);

    impl Recorder {
        fn ids(&self) -> Vec<String> {
            self.0
                .borrow()
                .iter()
                .map(|failure| failure.failed_event_id.clone())
                .collect()
        }

        fn count(&self) -> usize {
            self.0.borrow().len()
        }
    }

    impl Reporter for Recorder {
        fn report(&mut self, failure: DecryptionFailure) {
            self.0.borrow_mut().push(failure);
        }
    }

    fn tracker() -> (DecryptionFailureTracker<Recorder, ManualClock>, Recorder, ManualClock) {
        let recorder = Recorder::default();
        let clock = ManualClock::new(1_000);
        let tracker = DecryptionFailureTracker::with_clock(
            recorder.clone(),
            clock.clone(),
            TrackerConfig::default(),
        );
        (tracker, recorder, clock)
    }

    fn observe(tracker: &mut DecryptionFailureTracker<Recorder, ManualClock>, event: DecryptedEvent) {
        tracker
            .event_decrypted(&event)
            .expect("observation should be accepted");
    }

    #[test]
    fn tracks_a_failed_decryption() {
        let (mut tracker, recorder, _) = tracker();
        observe(&mut tracker, DecryptedEvent::failed("$a"));

        tracker.check_failures(u64::MAX);
        tracker.track_failure();

        assert_eq!(recorder.ids(), vec!["$a".to_owned()]);
        assert_eq!(recorder.0.borrow()[0].failed_at_ms, 1_000);
    }

    #[test]
    fn does_not_track_failure_resolved_by_later_decryption() {
        let (mut tracker, recorder, _) = tracker();
        observe(&mut tracker, DecryptedEvent::failed("$a"));
        observe(&mut tracker, DecryptedEvent::decrypted("$a"));

        assert_eq!(tracker.check_failures(u64::MAX), 0);
        assert_eq!(tracker.track_failure(), 0);

        assert_eq!(recorder.count(), 0);
        assert_eq!(tracker.state("$a"), Some(TrackedEventState::Ok));
    }

    #[test]
    fn tracks_single_failure_per_event_despite_repeated_observations() {
        let (mut tracker, recorder, _) = tracker();
        for _ in 0..5 {
            observe(&mut tracker, DecryptedEvent::failed("$a"));
        }
        for _ in 0..3 {
            observe(&mut tracker, DecryptedEvent::failed("$b"));
        }

        tracker.check_failures(u64::MAX);
        for _ in 0..4 {
            tracker.track_failure();
        }

        assert_eq!(recorder.count(), 2);
    }

    #[test]
    fn tracks_failures_in_the_order_they_occurred() {
        let (mut tracker, recorder, _) = tracker();
        observe(&mut tracker, DecryptedEvent::failed("$a"));
        observe(&mut tracker, DecryptedEvent::failed("$b"));
        observe(&mut tracker, DecryptedEvent::failed("$a"));

        tracker.check_failures(u64::MAX);
        tracker.track_failure();
        tracker.track_failure();

        assert_eq!(recorder.ids(), vec!["$a".to_owned(), "$b".to_owned()]);
    }

    #[test]
    fn does_not_track_an_event_that_was_tracked_previously() {
        let (mut tracker, recorder, _) = tracker();
        observe(&mut tracker, DecryptedEvent::failed("$a"));
        tracker.check_failures(u64::MAX);
        tracker.track_failure();

        observe(&mut tracker, DecryptedEvent::failed("$a"));
        tracker.track_failure();
        tracker.check_failures(u64::MAX);
        tracker.track_failure();

        assert_eq!(recorder.count(), 1);
        assert_eq!(tracker.state("$a"), Some(TrackedEventState::Reported));
    }

    #[test]
    fn reported_failure_is_not_retracted_by_later_success() {
        let (mut tracker, recorder, _) = tracker();
        observe(&mut tracker, DecryptedEvent::failed("$a"));
        tracker.check_failures(u64::MAX);

        observe(&mut tracker, DecryptedEvent::decrypted("$a"));
        assert_eq!(tracker.state("$a"), Some(TrackedEventState::Queued));

        tracker.track_failure();
        assert_eq!(recorder.ids(), vec!["$a".to_owned()]);
    }

    #[test]
    fn track_failure_on_empty_queue_does_not_report() {
        let (mut tracker, recorder, _) = tracker();
        assert_eq!(tracker.track_failure(), 0);

        observe(&mut tracker, DecryptedEvent::failed("$a"));
        assert_eq!(tracker.track_failure(), 0);
        assert_eq!(recorder.count(), 0);
    }

    #[test]
    fn waits_out_the_grace_period_before_queueing() {
        let (mut tracker, recorder, clock) = tracker();
        observe(&mut tracker, DecryptedEvent::failed("$a"));

        assert_eq!(tracker.check_failures(1_000 + DEFAULT_GRACE_PERIOD_MS), 0);
        assert_eq!(tracker.pending_len(), 1);

        clock.advance(3_000);
        observe(&mut tracker, DecryptedEvent::failed("$b"));

        assert_eq!(tracker.check_failures(1_000 + DEFAULT_GRACE_PERIOD_MS + 1), 1);
        assert_eq!(tracker.pending_len(), 1);
        assert_eq!(tracker.queued_len(), 1);

        tracker.track_failure();
        assert_eq!(recorder.ids(), vec!["$a".to_owned()]);
        assert_eq!(
            tracker.state("$b"),
            Some(TrackedEventState::Failing {
                failed_at_ms: 4_000
            })
        );
    }

    #[test]
    fn late_success_inside_grace_period_cancels_report() {
        let (mut tracker, recorder, clock) = tracker();
        observe(&mut tracker, DecryptedEvent::failed("$a"));
        observe(&mut tracker, DecryptedEvent::failed("$b"));

        tracker.check_failures(2_000);
        clock.advance(500);
        observe(&mut tracker, DecryptedEvent::decrypted("$a"));

        tracker.check_failures(u64::MAX);
        tracker.track_failure();
        assert_eq!(recorder.ids(), vec!["$b".to_owned()]);
    }

    #[test]
    fn refailing_after_success_restarts_the_grace_period() {
        let (mut tracker, recorder, clock) = tracker();
        observe(&mut tracker, DecryptedEvent::failed("$a"));
        observe(&mut tracker, DecryptedEvent::decrypted("$a"));

        clock.set(9_000);
        observe(&mut tracker, DecryptedEvent::failed("$a"));

        assert_eq!(tracker.check_failures(10_000), 0);
        assert_eq!(tracker.check_failures(14_001), 1);
        tracker.track_failure();

        assert_eq!(recorder.count(), 1);
        assert_eq!(recorder.0.borrow()[0].failed_at_ms, 9_000);
    }

    #[test]
    fn rejects_observation_without_event_id() {
        let (mut tracker, _, _) = tracker();
        let err = tracker
            .event_decrypted(&DecryptedEvent {
                event_id: None,
                outcome: DecryptionOutcome::Failure,
            })
            .expect_err("missing id must be rejected");
        assert_eq!(err.code, "missing_event_id");

        let err = tracker
            .event_decrypted(&DecryptedEvent::failed(""))
            .expect_err("empty id must be rejected");
        assert_eq!(err.code, "missing_event_id");
        assert_eq!(tracker.tracked_len(), 0);
    }

    #[test]
    fn accepts_closure_reporters() {
        let mut seen = Vec::new();
        {
            let mut tracker = DecryptionFailureTracker::new(|failure: DecryptionFailure| {
                seen.push(failure.failed_event_id)
            });
            tracker
                .event_decrypted(&DecryptedEvent::failed("$a"))
                .expect("observation should be accepted");
            tracker.check_failures(u64::MAX);
            tracker.track_failure();
        }
        assert_eq!(seen, vec!["$a".to_owned()]);
    }

    #[test]
    fn accepts_boxed_reporter_trait_objects() {
        struct Counting(Arc<AtomicUsize>);

        impl Reporter for Counting {
            fn report(&mut self, _failure: DecryptionFailure) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let count = Arc::new(AtomicUsize::new(0));
        let reporter: Box<dyn Reporter + Send> = Box::new(Counting(Arc::clone(&count)));
        let mut tracker = DecryptionFailureTracker::new(reporter);
        for id in ["$a", "$b"] {
            tracker
                .event_decrypted(&DecryptedEvent::failed(id))
                .expect("observation should be accepted");
        }
        tracker.check_failures(u64::MAX);

        assert_eq!(tracker.track_failure(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
