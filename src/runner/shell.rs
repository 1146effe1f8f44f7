//! Shell-command runners.
//!
//! Two built-in candidates cover command execution:
//!
//! - [`ShellRunnerFactory`] binds to every (device, test case) pair and runs
//!   the configured command template. It is the chain's fallback.
//! - [`ExplicitCommandRunnerFactory`] also binds everywhere but only handles
//!   test cases carrying a `command` property, delegating otherwise. Register
//!   it after the shell runner so it gets first refusal.

use anyhow::{Context, Result};
use chrono::Utc;
use log::debug;
use std::path::PathBuf;
use std::sync::Arc;

use crate::connection::CommandOutput;
use crate::device::Device;
use crate::pool::DevicePool;
use crate::result::{ResultStatus, RunResult, TestCaseRunResult};
use crate::runner::{RunnerArgs, RunnerFactory, TestRunner};
use crate::test_case::TestCase;

/// Property a test case may carry to replace the configured template.
const COMMAND_PROPERTY: &str = "command";
/// Property naming a coverage artifact the command produced.
const COVERAGE_PROPERTY: &str = "coverage_artifact";

pub struct ShellRunnerFactory;

impl RunnerFactory for ShellRunnerFactory {
    fn name(&self) -> &str {
        "shell"
    }

    fn create(
        &self,
        _pool: &DevicePool,
        _device: &Arc<dyn Device>,
        _test_case: &TestCase,
    ) -> Option<Arc<dyn TestRunner>> {
        Some(Arc::new(ShellRunner))
    }
}

/// Fallback executor: renders the command template and runs it on the
/// device's connection.
struct ShellRunner;

impl TestRunner for ShellRunner {
    fn name(&self) -> &str {
        "shell"
    }

    fn run(&self, args: &RunnerArgs<'_>) -> Result<RunResult> {
        let case = args.event.test_case();
        let command = render_template(&args.options.command_template, case, &**args.device);
        execute_on_device(args, &command).map(RunResult::Completed)
    }
}

pub struct ExplicitCommandRunnerFactory;

impl RunnerFactory for ExplicitCommandRunnerFactory {
    fn name(&self) -> &str {
        "explicit-command"
    }

    fn create(
        &self,
        _pool: &DevicePool,
        _device: &Arc<dyn Device>,
        _test_case: &TestCase,
    ) -> Option<Arc<dyn TestRunner>> {
        Some(Arc::new(ExplicitCommandRunner))
    }
}

/// Runs the test case's own `command` property; delegates when there is
/// none. Declining leaves no state behind.
struct ExplicitCommandRunner;

impl TestRunner for ExplicitCommandRunner {
    fn name(&self) -> &str {
        "explicit-command"
    }

    fn run(&self, args: &RunnerArgs<'_>) -> Result<RunResult> {
        let case = args.event.test_case();
        let Some(template) = case.property(COMMAND_PROPERTY) else {
            debug!(
                "{} has no {COMMAND_PROPERTY} property; delegating",
                case.identifier()
            );
            return Ok(RunResult::Delegate);
        };
        let command = render_template(template, case, &**args.device);
        execute_on_device(args, &command).map(RunResult::Completed)
    }
}

fn render_template(template: &str, case: &TestCase, device: &dyn Device) -> String {
    template
        .replace("{package}", case.package())
        .replace("{class}", &case.identifier().class)
        .replace("{method}", &case.identifier().method)
        .replace("{serial}", device.serial())
}

/// Runs one command on the device and classifies the captured output: exit
/// code zero passes, anything else fails with stderr as the trace.
fn execute_on_device(args: &RunnerArgs<'_>, command: &str) -> Result<TestCaseRunResult> {
    let case = args.event.test_case();
    let started_at = Utc::now();

    let mut connection = args
        .device
        .connect()
        .with_context(|| format!("failed to connect to device {}", args.device.serial()))?;

    // Net span covers the test command alone, not connection setup/teardown.
    let net_started_at = Utc::now();
    let output = connection.execute_command(command, Some(args.options.command_timeout))?;
    let net_ended_at = Utc::now();

    let _ = connection.teardown();
    let (status, trace) = classify(&output);

    let mut result = TestCaseRunResult::new(
        args.pool_name,
        args.device.serial(),
        args.device.model(),
        case.identifier().clone(),
        status,
        trace,
        started_at,
        Utc::now(),
        net_started_at,
        net_ended_at,
        args.event.total_failure_count(),
    );
    if !output.stdout.is_empty() {
        result.push_report_block("stdout", output.stdout.clone());
    }
    if !output.stderr.is_empty() {
        result.push_report_block("stderr", output.stderr.clone());
    }
    if let Some(path) = case.property(COVERAGE_PROPERTY) {
        result.coverage_artifact = Some(PathBuf::from(path));
    }
    Ok(result)
}

fn classify(output: &CommandOutput) -> (ResultStatus, String) {
    if output.exit_code == 0 {
        (ResultStatus::Pass, String::new())
    } else {
        let trace = if output.stderr.is_empty() {
            format!("command exited with code {}", output.exit_code)
        } else {
            output.stderr.clone()
        };
        (ResultStatus::Fail, trace)
    }
}
