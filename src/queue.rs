//! The device-matching work queue.
//!
//! One queue per pool. Device workers block in [`TestCaseQueue::poll_for_device`]
//! until an event they can run appears; a removed event stays accounted for
//! through the in-flight counter until its [`Checkout`] completes, so the
//! drain predicate never reports an empty queue while work could still be
//! re-offered.
//!
//! The in-flight counter going negative, or an `offer` with nothing checked
//! out, is an internal consistency violation and panics deliberately.

use log::{debug, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::device::Device;
use crate::result::TestCaseRunResult;
use crate::test_case::TestCaseEvent;

/// The shared, append-only collection every worker reports into. Readers may
/// only assume a stable snapshot after all producing threads have joined.
pub type ResultSink = Arc<Mutex<Vec<TestCaseRunResult>>>;

/// Granularity of the coarse re-check while waiting for matching work.
const POLL_GRANULARITY: Duration = Duration::from_secs(1);

struct QueueInner {
    events: VecDeque<TestCaseEvent>,
    checked_out: usize,
}

pub struct TestCaseQueue {
    inner: Mutex<QueueInner>,
    cond: Condvar,
    results: ResultSink,
}

impl TestCaseQueue {
    pub fn new(events: Vec<TestCaseEvent>, results: ResultSink) -> Self {
        TestCaseQueue {
            inner: Mutex::new(QueueInner {
                events: events.into(),
                checked_out: 0,
            }),
            cond: Condvar::new(),
            results,
        }
    }

    /// Removes and checks out the first queued event the device may run.
    /// Blocks with a coarse periodic re-check up to `timeout`; `None` means
    /// no matching work appeared in time.
    pub fn poll_for_device(&self, device: &dyn Device, timeout: Duration) -> Option<Checkout<'_>> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(index) = inner
                .events
                .iter()
                .position(|event| event.is_enabled_on(device))
            {
                let event = inner.events.remove(index).unwrap();
                inner.checked_out += 1;
                debug!(
                    "Device {} checked out {} ({} queued, {} in flight)",
                    device.serial(),
                    event.identifier(),
                    inner.events.len(),
                    inner.checked_out
                );
                return Some(Checkout {
                    queue: self,
                    event: Some(event),
                });
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let wait = POLL_GRANULARITY.min(deadline - now);
            let (guard, _) = self.cond.wait_timeout(inner, wait).unwrap();
            inner = guard;
        }
    }

    /// The queue-drain termination predicate: true iff no queued event
    /// matches this device and nothing is checked out anywhere. A checked-out
    /// event might be re-offered and could match this device, so in-flight
    /// work keeps every worker polling.
    pub fn has_no_potential_events_for(&self, device: &dyn Device) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.checked_out == 0
            && !inner
                .events
                .iter()
                .any(|event| event.is_enabled_on(device))
    }

    /// Re-inserts an event. Legal only while at least one checkout is in
    /// flight; otherwise a worker could already have observed a drained
    /// queue and exited.
    pub fn offer(&self, event: TestCaseEvent) {
        let mut inner = self.inner.lock().unwrap();
        if inner.checked_out == 0 {
            panic!("offer outside an active checkout");
        }
        debug!("Re-offering {}", event.identifier());
        inner.events.push_back(event);
        self.cond.notify_all();
    }

    /// Events still waiting for a device. In-flight work is not counted.
    pub fn queued_count(&self) -> usize {
        self.inner.lock().unwrap().events.len()
    }

    fn complete_checkout(&self, result: TestCaseRunResult, follow_up: Option<TestCaseEvent>) {
        self.results.lock().unwrap().push(result);
        let mut inner = self.inner.lock().unwrap();
        if inner.checked_out == 0 {
            panic!("in-flight counter would go negative");
        }
        if let Some(event) = follow_up {
            // Still inside this checkout, so the re-offer is legal.
            debug!("Re-offering {} for retry", event.identifier());
            inner.events.push_back(event);
        }
        inner.checked_out -= 1;
        self.cond.notify_all();
    }

    fn abandon_checkout(&self, event: TestCaseEvent) {
        warn!("Checkout of {} abandoned; re-queueing", event.identifier());
        let mut inner = self.inner.lock().unwrap();
        if inner.checked_out == 0 {
            panic!("in-flight counter would go negative");
        }
        inner.events.push_front(event);
        inner.checked_out -= 1;
        self.cond.notify_all();
    }
}

/// The in-flight state of one event between dequeue and result recording.
///
/// [`Checkout::do_work`] records the produced result and may re-offer a
/// follow-up event (the retry path). Dropping a checkout without completing
/// it re-queues the event: a dying worker can duplicate an attempt but never
/// lose one.
pub struct Checkout<'q> {
    queue: &'q TestCaseQueue,
    event: Option<TestCaseEvent>,
}

impl Checkout<'_> {
    #[allow(dead_code)]
    pub fn event(&self) -> &TestCaseEvent {
        self.event.as_ref().expect("checkout already completed")
    }

    pub fn do_work(
        mut self,
        f: impl FnOnce(&TestCaseEvent) -> (TestCaseRunResult, Option<TestCaseEvent>),
    ) {
        let event = self.event.take().expect("checkout already completed");
        let (result, follow_up) = f(&event);
        self.queue.complete_checkout(result, follow_up);
    }
}

impl Drop for Checkout<'_> {
    fn drop(&mut self) {
        if let Some(event) = self.event.take() {
            self.queue.abandon_checkout(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::LocalDevice;
    use crate::result::{ResultStatus, TestCaseRunResult};
    use crate::test_case::{TestCase, TestIdentifier};
    use chrono::Utc;
    use std::collections::HashMap;
    use std::thread;

    fn event(class: &str, eligible: Option<&[&str]>) -> TestCaseEvent {
        TestCaseEvent::new(TestCase::new(
            "com.example",
            TestIdentifier::new(class, "m"),
            HashMap::new(),
            Vec::new(),
            eligible.map(|s| s.iter().map(|s| s.to_string()).collect()),
            "run-1",
        ))
    }

    fn result_for(event: &TestCaseEvent, status: ResultStatus) -> TestCaseRunResult {
        let now = Utc::now();
        TestCaseRunResult::new(
            "default",
            "dev-1",
            "local",
            event.identifier().clone(),
            status,
            "",
            now,
            now,
            now,
            now,
            event.total_failure_count(),
        )
    }

    fn queue_with(events: Vec<TestCaseEvent>) -> (Arc<TestCaseQueue>, ResultSink) {
        let sink: ResultSink = Arc::new(Mutex::new(Vec::new()));
        (
            Arc::new(TestCaseQueue::new(events, Arc::clone(&sink))),
            sink,
        )
    }

    #[test]
    fn poll_returns_first_matching_event() {
        let device = LocalDevice::new("dev-1", "local");
        let (queue, _sink) = queue_with(vec![
            event("Pinned", Some(&["other"])),
            event("Matches", None),
        ]);
        let checkout = queue
            .poll_for_device(&device, Duration::from_millis(10))
            .unwrap();
        assert_eq!(checkout.event().identifier().class, "Matches");
        // The pinned event stays queued.
        assert_eq!(queue.queued_count(), 1);
    }

    #[test]
    fn poll_times_out_without_matching_work() {
        let device = LocalDevice::new("dev-1", "local");
        let (queue, _sink) = queue_with(vec![event("Pinned", Some(&["other"]))]);
        let start = Instant::now();
        assert!(
            queue
                .poll_for_device(&device, Duration::from_millis(50))
                .is_none()
        );
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn drain_predicate_tracks_queued_and_in_flight_work() {
        let device = LocalDevice::new("dev-1", "local");
        let other = LocalDevice::new("other", "local");
        let (queue, sink) = queue_with(vec![event("T", None)]);

        // A queued match keeps the predicate false.
        assert!(!queue.has_no_potential_events_for(&device));
        // No queued match for `other`... but checking out the event keeps the
        // predicate false for everyone, because it could be re-offered.
        let checkout = queue
            .poll_for_device(&device, Duration::from_millis(10))
            .unwrap();
        assert!(!queue.has_no_potential_events_for(&device));
        assert!(!queue.has_no_potential_events_for(&other));

        checkout.do_work(|e| (result_for(e, ResultStatus::Pass), None));
        assert!(queue.has_no_potential_events_for(&device));
        assert!(queue.has_no_potential_events_for(&other));
        assert_eq!(sink.lock().unwrap().len(), 1);
    }

    #[test]
    fn follow_up_event_is_requeued_during_checkout() {
        let device = LocalDevice::new("dev-1", "local");
        let (queue, sink) = queue_with(vec![event("T", None)]);
        let checkout = queue
            .poll_for_device(&device, Duration::from_millis(10))
            .unwrap();
        checkout.do_work(|e| {
            (
                result_for(e, ResultStatus::Fail),
                Some(e.with_failure_count(1)),
            )
        });
        // The retry is back in the queue and the attempt was recorded.
        assert_eq!(queue.queued_count(), 1);
        assert!(!queue.has_no_potential_events_for(&device));
        assert_eq!(sink.lock().unwrap().len(), 1);
        let retried = queue
            .poll_for_device(&device, Duration::from_millis(10))
            .unwrap();
        assert_eq!(retried.event().total_failure_count(), 1);
    }

    #[test]
    #[should_panic(expected = "offer outside an active checkout")]
    fn offer_without_checkout_panics() {
        let (queue, _sink) = queue_with(vec![]);
        queue.offer(event("T", None));
    }

    #[test]
    fn dropped_checkout_requeues_its_event() {
        let device = LocalDevice::new("dev-1", "local");
        let (queue, sink) = queue_with(vec![event("T", None)]);
        {
            let _checkout = queue
                .poll_for_device(&device, Duration::from_millis(10))
                .unwrap();
            // Dropped without do_work.
        }
        assert_eq!(queue.queued_count(), 1);
        assert!(sink.lock().unwrap().is_empty());
        // The queue is usable again and the event is not lost.
        assert!(!queue.has_no_potential_events_for(&device));
    }

    #[test]
    fn concurrent_workers_drain_each_event_exactly_once() {
        let (queue, sink) = queue_with(vec![
            event("A", None),
            event("B", None),
            event("C", None),
            event("D", None),
            event("E", None),
            event("F", None),
        ]);

        let mut handles = Vec::new();
        for n in 0..2 {
            let queue = Arc::clone(&queue);
            handles.push(thread::spawn(move || {
                let device = LocalDevice::new(format!("dev-{n}"), "local");
                loop {
                    match queue.poll_for_device(&device, Duration::from_millis(50)) {
                        Some(checkout) => {
                            checkout.do_work(|e| (result_for(e, ResultStatus::Pass), None))
                        }
                        None => {
                            if queue.has_no_potential_events_for(&device) {
                                break;
                            }
                        }
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let results = sink.lock().unwrap();
        assert_eq!(results.len(), 6);
        let mut classes: Vec<String> = results.iter().map(|r| r.test.class.clone()).collect();
        classes.sort();
        assert_eq!(classes, ["A", "B", "C", "D", "E", "F"]);
    }
}
