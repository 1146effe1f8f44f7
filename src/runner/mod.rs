//! Runner candidates and the delegation chain.
//!
//! At bind time every registered [`RunnerFactory`] is asked, per pool, device
//! and test case, whether it wants a seat in the chain. At execution time the
//! bound candidates are walked in reverse bind order: later-registered, more
//! specific runners (a remote proxy, say) get first refusal before the
//! defaults. A candidate that declines returns [`RunResult::Delegate`] and
//! must have left no shared state behind.

mod shell;
pub use shell::{ExplicitCommandRunnerFactory, ShellRunnerFactory};

use anyhow::Result;
use log::debug;
use std::sync::Arc;

use crate::config::RunOptions;
use crate::device::Device;
use crate::errors::SchedulingError;
use crate::pool::DevicePool;
use crate::result::{RunResult, TestCaseRunResult};
use crate::test_case::{TestCase, TestCaseEvent};

/// Everything a runner needs for one dispatch.
pub struct RunnerArgs<'a> {
    pub options: &'a RunOptions,
    pub pool_name: &'a str,
    pub device: &'a Arc<dyn Device>,
    pub event: &'a TestCaseEvent,
}

/// One candidate executor. `run` either produces a terminal result or
/// delegates to the next candidate; a delegating call must be side-effect
/// free.
pub trait TestRunner: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self, args: &RunnerArgs<'_>) -> Result<RunResult>;
}

/// Asked once per (pool, device, test case) at bind time. `None` means this
/// factory does not support the combination.
pub trait RunnerFactory: Send + Sync {
    fn name(&self) -> &str;

    fn create(
        &self,
        pool: &DevicePool,
        device: &Arc<dyn Device>,
        test_case: &TestCase,
    ) -> Option<Arc<dyn TestRunner>>;
}

/// Walks the event's bound candidates for this device, last bound first,
/// until one produces a terminal result.
///
/// Every candidate delegating is a scheduling error; the test must never be
/// silently dropped.
pub fn dispatch(args: &RunnerArgs<'_>) -> Result<TestCaseRunResult> {
    let serial = args.device.serial();
    let runners = args.event.runners_for(serial);
    for runner in runners.iter().rev() {
        debug!(
            "Offering {} to runner {} on {serial}",
            args.event.identifier(),
            runner.name()
        );
        match runner.run(args)? {
            RunResult::Delegate => continue,
            RunResult::Completed(result) => return Ok(result),
        }
    }
    Err(SchedulingError::AllRunnersDelegated {
        test: args.event.identifier().to_string(),
        serial: serial.to_string(),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::LocalDevice;
    use crate::result::ResultStatus;
    use crate::test_case::TestIdentifier;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scripted candidate that records the order it was consulted in.
    struct ScriptedRunner {
        name: String,
        delegates: bool,
        consulted: Arc<Mutex<Vec<String>>>,
    }

    impl TestRunner for ScriptedRunner {
        fn name(&self) -> &str {
            &self.name
        }

        fn run(&self, args: &RunnerArgs<'_>) -> Result<RunResult> {
            self.consulted.lock().unwrap().push(self.name.clone());
            if self.delegates {
                return Ok(RunResult::Delegate);
            }
            let now = Utc::now();
            Ok(RunResult::Completed(TestCaseRunResult::new(
                args.pool_name,
                args.device.serial(),
                args.device.model(),
                args.event.identifier().clone(),
                ResultStatus::Pass,
                "",
                now,
                now,
                now,
                now,
                args.event.total_failure_count(),
            )))
        }
    }

    fn args_with_runners(
        event: &mut TestCaseEvent,
        scripted: &[(&str, bool)],
        consulted: &Arc<Mutex<Vec<String>>>,
    ) {
        for (name, delegates) in scripted {
            event.bind_runner(
                "dev-1",
                Arc::new(ScriptedRunner {
                    name: name.to_string(),
                    delegates: *delegates,
                    consulted: Arc::clone(consulted),
                }),
            );
        }
    }

    fn event() -> TestCaseEvent {
        TestCaseEvent::new(crate::test_case::TestCase::new(
            "com.example",
            TestIdentifier::new("T", "m"),
            HashMap::new(),
            Vec::new(),
            None,
            "run-1",
        ))
    }

    #[test]
    fn chain_walks_in_reverse_bind_order() {
        let consulted = Arc::new(Mutex::new(Vec::new()));
        let mut event = event();
        // "fallback" bound first, "specific" second: specific must run first.
        args_with_runners(
            &mut event,
            &[("fallback", false), ("specific", true)],
            &consulted,
        );
        let options = RunOptions::default();
        let device: Arc<dyn Device> = Arc::new(LocalDevice::new("dev-1", "local"));
        let result = dispatch(&RunnerArgs {
            options: &options,
            pool_name: "default",
            device: &device,
            event: &event,
        })
        .unwrap();
        assert_eq!(result.status, ResultStatus::Pass);
        assert_eq!(*consulted.lock().unwrap(), ["specific", "fallback"]);
    }

    #[test]
    fn all_candidates_delegating_is_a_scheduling_error() {
        let consulted = Arc::new(Mutex::new(Vec::new()));
        let mut event = event();
        args_with_runners(&mut event, &[("a", true), ("b", true)], &consulted);
        let options = RunOptions::default();
        let device: Arc<dyn Device> = Arc::new(LocalDevice::new("dev-1", "local"));
        let err = dispatch(&RunnerArgs {
            options: &options,
            pool_name: "default",
            device: &device,
            event: &event,
        })
        .unwrap_err();
        let scheduling = err.downcast_ref::<SchedulingError>().unwrap();
        assert!(matches!(
            scheduling,
            SchedulingError::AllRunnersDelegated { .. }
        ));
    }

    #[test]
    fn no_bound_runner_is_a_scheduling_error() {
        let event = event();
        let options = RunOptions::default();
        let device: Arc<dyn Device> = Arc::new(LocalDevice::new("dev-1", "local"));
        let err = dispatch(&RunnerArgs {
            options: &options,
            pool_name: "default",
            device: &device,
            event: &event,
        })
        .unwrap_err();
        assert!(err.downcast_ref::<SchedulingError>().is_some());
    }
}
