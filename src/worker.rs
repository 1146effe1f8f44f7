//! Per-device execution worker.
//!
//! A worker owns one device within one pool. It runs the device-scoped rule
//! chain around its whole polling loop, and the test-run rule chain around
//! every dispatch. Whatever goes wrong during a dispatch, whether in a hook,
//! the runner chain or the device itself, is converted into a synthetic error
//! result for that one test case; the worker never takes the run down with
//! it.

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::RunOptions;
use crate::device::Device;
use crate::pool::DevicePool;
use crate::queue::TestCaseQueue;
use crate::result::{ResultStatus, TestCaseRunResult};
use crate::rules::factory::{DeviceContext, PluginRegistry, TestRunContext};
use crate::rules::{HookError, run_with_hooks};
use crate::runner::{self, RunnerArgs};
use crate::test_case::TestCaseEvent;

pub struct DeviceWorker {
    pool: Arc<DevicePool>,
    device: Arc<dyn Device>,
    queue: Arc<TestCaseQueue>,
    registry: Arc<PluginRegistry>,
    options: Arc<RunOptions>,
    stop: Arc<AtomicBool>,
}

impl DeviceWorker {
    pub fn new(
        pool: Arc<DevicePool>,
        device: Arc<dyn Device>,
        queue: Arc<TestCaseQueue>,
        registry: Arc<PluginRegistry>,
        options: Arc<RunOptions>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        DeviceWorker {
            pool,
            device,
            queue,
            registry,
            options,
            stop,
        }
    }

    /// Runs the device-scoped rule chain around the polling loop. A `before`
    /// failure means the loop never starts; the queue's leftover events are
    /// flagged by the pool coordinator's drain check afterwards.
    pub fn run(&self) {
        let serial = self.device.serial().to_string();
        info!("Device worker {serial} starting");
        let context = DeviceContext {
            options: &self.options,
            pool: &self.pool,
            device: &self.device,
        };
        let mut rules = self.registry.device_rules(&context);
        let outcome = run_with_hooks(
            &mut rules,
            |rule| rule.before(),
            || {
                self.poll_loop();
                Ok(())
            },
            |rule, _outcome| rule.after(),
        );
        match outcome {
            Ok(()) => info!("Device worker {serial} finished"),
            Err(e) => error!("Device worker {serial} failed: {e}"),
        }
    }

    fn poll_loop(&self) {
        loop {
            if self.stop.load(Ordering::Relaxed) {
                info!(
                    "Device worker {} stopping on request",
                    self.device.serial()
                );
                break;
            }
            match self
                .queue
                .poll_for_device(&*self.device, self.options.poll_timeout)
            {
                Some(checkout) => checkout.do_work(|event| self.execute(event)),
                None => {
                    if self.queue.has_no_potential_events_for(&*self.device) {
                        debug!("Queue drained for device {}", self.device.serial());
                        break;
                    }
                }
            }
        }
    }

    /// One dispatch: test-run rules wrap the runner chain; the produced
    /// result is fixed up to this worker's identity and the retry decision is
    /// made while the checkout is still active.
    fn execute(&self, event: &TestCaseEvent) -> (TestCaseRunResult, Option<TestCaseEvent>) {
        let dispatched_at = Utc::now();
        info!(
            "Running {} on {} (attempt {})",
            event.identifier(),
            self.device.serial(),
            event.total_failure_count() + 1
        );

        let context = TestRunContext {
            options: &self.options,
            pool_name: self.pool.name(),
            device: &self.device,
            event,
        };
        let mut rules = self.registry.test_run_rules(&context);
        let args = RunnerArgs {
            options: &self.options,
            pool_name: self.pool.name(),
            device: &self.device,
            event,
        };
        let outcome = run_with_hooks(
            &mut rules,
            |rule| rule.before(),
            || runner::dispatch(&args),
            |rule, outcome| rule.after(outcome),
        );

        let mut result = match outcome {
            Ok(result) => result,
            Err(failure) => self.synthetic_error_result(event, dispatched_at, &failure),
        };

        // Fix-up: this worker's identity always wins, the wall clock starts
        // at dispatch, and the carried failure count is only ever raised.
        result.pool = self.pool.name().to_string();
        result.device_serial = self.device.serial().to_string();
        result.device_model = self.device.model().to_string();
        result.started_at = dispatched_at;
        result.ended_at = Utc::now();
        result.raise_base_failure_count(event.total_failure_count());

        let follow_up = self.retry_decision(event, &result);
        if result.status.is_failure() {
            warn!(
                "{} {} on {} ({} failure(s) so far{})",
                event.identifier(),
                result.status,
                self.device.serial(),
                result.total_failure_count(),
                if follow_up.is_some() {
                    ", will retry"
                } else {
                    ""
                }
            );
        } else {
            info!("{} passed on {}", event.identifier(), self.device.serial());
        }
        (result, follow_up)
    }

    /// Re-offer the test while its accumulated failures stay within the
    /// retry budget. The new event carries the raised count; the offer itself
    /// happens inside the live checkout.
    fn retry_decision(
        &self,
        event: &TestCaseEvent,
        result: &TestCaseRunResult,
    ) -> Option<TestCaseEvent> {
        if !result.status.is_failure() {
            return None;
        }
        let total = result.total_failure_count();
        if total <= self.options.retry_limit {
            Some(event.with_failure_count(total))
        } else {
            None
        }
    }

    /// Whatever escaped the pipeline marks this one test case as errored,
    /// with zero net time and the failure's full detail as the trace.
    fn synthetic_error_result(
        &self,
        event: &TestCaseEvent,
        dispatched_at: DateTime<Utc>,
        failure: &HookError,
    ) -> TestCaseRunResult {
        error!(
            "Execution of {} on {} failed: {failure}",
            event.identifier(),
            self.device.serial()
        );
        TestCaseRunResult::new(
            self.pool.name(),
            self.device.serial(),
            self.device.model(),
            event.identifier().clone(),
            ResultStatus::Error,
            failure.detailed(),
            dispatched_at,
            dispatched_at,
            dispatched_at,
            dispatched_at,
            event.total_failure_count(),
        )
    }
}
