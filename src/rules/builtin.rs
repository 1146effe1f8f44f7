//! Built-in plugins.
//!
//! Registered by default, these cover the orchestration concerns that every
//! run wants and double as reference implementations of the factory seams.

use anyhow::{Result, bail};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::device::Device;
use crate::manifest;
use crate::result::TestCaseRunResult;
use crate::rules::HookOutcome;
use crate::rules::factory::{
    DeviceContext, DeviceRuleFactory, LifecycleRule, PoolContext, PoolRuleFactory, RunContext,
    RunRuleFactory, TestCaseRule, TestCaseRuleFactory, TestRunContext, TestRunRule,
    TestRunRuleFactory,
};
use crate::test_case::TestCase;

/// Logs run start and total elapsed time.
pub struct RunTimingRuleFactory;

impl RunRuleFactory for RunTimingRuleFactory {
    fn rules(&self, _context: &RunContext<'_>) -> Vec<Box<dyn LifecycleRule>> {
        vec![Box::new(RunTimingRule { started: None })]
    }
}

struct RunTimingRule {
    started: Option<Instant>,
}

impl LifecycleRule for RunTimingRule {
    fn before(&mut self) -> Result<()> {
        info!("Run starting");
        self.started = Some(Instant::now());
        Ok(())
    }

    fn after(&mut self) -> Result<()> {
        if let Some(started) = self.started {
            info!("Run finished in {:.1?}", started.elapsed());
        }
        Ok(())
    }
}

/// Logs per-pool start/end with device count and elapsed time.
pub struct PoolTimingRuleFactory;

impl PoolRuleFactory for PoolTimingRuleFactory {
    fn rules(&self, context: &PoolContext<'_>) -> Vec<Box<dyn LifecycleRule>> {
        vec![Box::new(PoolTimingRule {
            pool_name: context.pool.name().to_string(),
            device_count: context.pool.devices().len(),
            started: None,
        })]
    }
}

struct PoolTimingRule {
    pool_name: String,
    device_count: usize,
    started: Option<Instant>,
}

impl LifecycleRule for PoolTimingRule {
    fn before(&mut self) -> Result<()> {
        info!(
            "Pool {} starting on {} device(s)",
            self.pool_name, self.device_count
        );
        self.started = Some(Instant::now());
        Ok(())
    }

    fn after(&mut self) -> Result<()> {
        if let Some(started) = self.started {
            info!("Pool {} finished in {:.1?}", self.pool_name, started.elapsed());
        }
        Ok(())
    }
}

/// Runs the pool's configured setup commands on a device before it starts
/// polling, and the teardown commands after its queue drains.
pub struct DeviceSetupRuleFactory;

impl DeviceRuleFactory for DeviceSetupRuleFactory {
    fn rules(&self, context: &DeviceContext<'_>) -> Vec<Box<dyn LifecycleRule>> {
        if context.pool.setup_commands().is_empty() && context.pool.teardown_commands().is_empty() {
            return Vec::new();
        }
        vec![Box::new(DeviceSetupRule {
            device: Arc::clone(context.device),
            setup_commands: context.pool.setup_commands().to_vec(),
            teardown_commands: context.pool.teardown_commands().to_vec(),
            timeout: context.options.command_timeout,
        })]
    }
}

struct DeviceSetupRule {
    device: Arc<dyn Device>,
    setup_commands: Vec<String>,
    teardown_commands: Vec<String>,
    timeout: Duration,
}

impl DeviceSetupRule {
    fn run_commands(&self, commands: &[String], phase: &str) -> Result<()> {
        if commands.is_empty() {
            return Ok(());
        }
        let mut connection = self.device.connect()?;
        for command in commands {
            let command = command.replace("{serial}", self.device.serial());
            debug!("Device {} {phase}: {command}", self.device.serial());
            let output = connection.execute_command(&command, Some(self.timeout))?;
            if output.exit_code != 0 {
                bail!(
                    "{phase} command failed on {} (exit {}): {command}",
                    self.device.serial(),
                    output.exit_code
                );
            }
        }
        connection.teardown()?;
        Ok(())
    }
}

impl LifecycleRule for DeviceSetupRule {
    fn before(&mut self) -> Result<()> {
        self.run_commands(&self.setup_commands, "setup")
    }

    fn after(&mut self) -> Result<()> {
        self.run_commands(&self.teardown_commands, "teardown")
    }
}

/// Drops test cases annotated `skip = "true"`.
pub struct SkipAnnotationRuleFactory;

impl TestCaseRuleFactory for SkipAnnotationRuleFactory {
    fn rules(&self, _context: &PoolContext<'_>) -> Vec<Box<dyn TestCaseRule>> {
        vec![Box::new(SkipAnnotationRule)]
    }
}

struct SkipAnnotationRule;

impl TestCaseRule for SkipAnnotationRule {
    fn apply(&mut self, cases: Vec<TestCase>) -> Result<Vec<TestCase>> {
        let before = cases.len();
        let kept: Vec<TestCase> = cases
            .into_iter()
            .filter(|case| {
                let skipped = case.annotation("skip") == Some("true");
                if skipped {
                    info!("Skipping {} (skip annotation)", case.identifier());
                }
                !skipped
            })
            .collect();
        if kept.len() < before {
            info!("Skip annotations removed {} test case(s)", before - kept.len());
        }
        Ok(kept)
    }
}

/// Applies the configured `class#method` regex filter, when one is set.
pub struct TestFilterRuleFactory;

impl TestCaseRuleFactory for TestFilterRuleFactory {
    fn rules(&self, context: &PoolContext<'_>) -> Vec<Box<dyn TestCaseRule>> {
        match &context.options.filter {
            Some(pattern) => vec![Box::new(TestFilterRule {
                pattern: pattern.clone(),
            })],
            None => Vec::new(),
        }
    }
}

struct TestFilterRule {
    pattern: String,
}

impl TestCaseRule for TestFilterRule {
    fn apply(&mut self, cases: Vec<TestCase>) -> Result<Vec<TestCase>> {
        manifest::filter_test_cases(cases, &self.pattern)
    }
}

/// Stamps device model and attempt number onto every produced result.
pub struct PropertyStampRuleFactory;

impl TestRunRuleFactory for PropertyStampRuleFactory {
    fn rules(&self, context: &TestRunContext<'_>) -> Vec<Box<dyn TestRunRule>> {
        vec![Box::new(PropertyStampRule {
            device_model: context.device.model().to_string(),
            attempt: context.event.total_failure_count() + 1,
        })]
    }
}

struct PropertyStampRule {
    device_model: String,
    attempt: u32,
}

impl TestRunRule for PropertyStampRule {
    fn after(&mut self, outcome: &mut HookOutcome<TestCaseRunResult>) -> Result<()> {
        if let HookOutcome::Success(result) = outcome {
            result
                .properties
                .insert("device_model".to_string(), self.device_model.clone());
            result
                .properties
                .insert("attempt".to_string(), self.attempt.to_string());
        } else {
            warn!("Skipping property stamp: execution produced no result");
        }
        Ok(())
    }
}
