//! Plugin factory seams.
//!
//! Every hook level accepts a list of factories; each factory is invoked
//! exactly once per applicable context and may return zero or many rule
//! instances. Rule instances are created per context and never shared across
//! contexts by the core; a plugin that wants shared state must close over
//! it explicitly.
//!
//! The [`PluginRegistry`] travels by `Arc` through scheduler, pool tasks and
//! workers; there is no ambient global configuration cell.

use anyhow::Result;
use std::sync::Arc;

use crate::config::RunOptions;
use crate::device::Device;
use crate::pool::DevicePool;
use crate::result::TestCaseRunResult;
use crate::rules::HookOutcome;
use crate::runner::RunnerFactory;
use crate::test_case::{TestCase, TestCaseEvent};

/// Read-only context for run-level rules.
pub struct RunContext<'a> {
    pub options: &'a RunOptions,
}

/// Read-only context for pool-level and test-case-collection rules.
pub struct PoolContext<'a> {
    pub options: &'a RunOptions,
    pub pool: &'a DevicePool,
}

/// Read-only context for device-level rules.
pub struct DeviceContext<'a> {
    pub options: &'a RunOptions,
    pub pool: &'a DevicePool,
    pub device: &'a Arc<dyn Device>,
}

/// Read-only context for per-execution rules.
pub struct TestRunContext<'a> {
    pub options: &'a RunOptions,
    pub pool_name: &'a str,
    pub device: &'a Arc<dyn Device>,
    pub event: &'a TestCaseEvent,
}

/// A before/after hook at run, pool or device scope. Both phases default to
/// no-ops so a rule may implement only the side it needs.
pub trait LifecycleRule: Send {
    fn before(&mut self) -> Result<()> {
        Ok(())
    }

    fn after(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A hook wrapping one test case execution. `after` receives the outcome and
/// may transform the result it carries.
pub trait TestRunRule: Send {
    fn before(&mut self) -> Result<()> {
        Ok(())
    }

    fn after(&mut self, outcome: &mut HookOutcome<TestCaseRunResult>) -> Result<()> {
        let _ = outcome;
        Ok(())
    }
}

/// A transform over the collection of test cases bound to a pool, applied
/// before any scheduling happens. Filtering and enrichment both fit.
pub trait TestCaseRule: Send {
    fn apply(&mut self, cases: Vec<TestCase>) -> Result<Vec<TestCase>>;
}

pub trait RunRuleFactory: Send + Sync {
    fn rules(&self, context: &RunContext<'_>) -> Vec<Box<dyn LifecycleRule>>;
}

pub trait PoolRuleFactory: Send + Sync {
    fn rules(&self, context: &PoolContext<'_>) -> Vec<Box<dyn LifecycleRule>>;
}

pub trait DeviceRuleFactory: Send + Sync {
    fn rules(&self, context: &DeviceContext<'_>) -> Vec<Box<dyn LifecycleRule>>;
}

pub trait TestCaseRuleFactory: Send + Sync {
    fn rules(&self, context: &PoolContext<'_>) -> Vec<Box<dyn TestCaseRule>>;
}

pub trait TestRunRuleFactory: Send + Sync {
    fn rules(&self, context: &TestRunContext<'_>) -> Vec<Box<dyn TestRunRule>>;
}

/// Everything pluggable, gathered at startup and passed down explicitly.
#[derive(Default)]
pub struct PluginRegistry {
    run_rule_factories: Vec<Box<dyn RunRuleFactory>>,
    pool_rule_factories: Vec<Box<dyn PoolRuleFactory>>,
    device_rule_factories: Vec<Box<dyn DeviceRuleFactory>>,
    test_case_rule_factories: Vec<Box<dyn TestCaseRuleFactory>>,
    test_run_rule_factories: Vec<Box<dyn TestRunRuleFactory>>,
    runner_factories: Vec<Box<dyn RunnerFactory>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_run_rule_factory(&mut self, factory: Box<dyn RunRuleFactory>) {
        self.run_rule_factories.push(factory);
    }

    pub fn register_pool_rule_factory(&mut self, factory: Box<dyn PoolRuleFactory>) {
        self.pool_rule_factories.push(factory);
    }

    pub fn register_device_rule_factory(&mut self, factory: Box<dyn DeviceRuleFactory>) {
        self.device_rule_factories.push(factory);
    }

    pub fn register_test_case_rule_factory(&mut self, factory: Box<dyn TestCaseRuleFactory>) {
        self.test_case_rule_factories.push(factory);
    }

    pub fn register_test_run_rule_factory(&mut self, factory: Box<dyn TestRunRuleFactory>) {
        self.test_run_rule_factories.push(factory);
    }

    /// Runner factories are consulted in registration order at bind time; the
    /// chain executes in reverse bind order, so register more specific
    /// runners later.
    pub fn register_runner_factory(&mut self, factory: Box<dyn RunnerFactory>) {
        self.runner_factories.push(factory);
    }

    pub fn runner_factories(&self) -> &[Box<dyn RunnerFactory>] {
        &self.runner_factories
    }

    pub fn run_rules(&self, context: &RunContext<'_>) -> Vec<Box<dyn LifecycleRule>> {
        self.run_rule_factories
            .iter()
            .flat_map(|factory| factory.rules(context))
            .collect()
    }

    pub fn pool_rules(&self, context: &PoolContext<'_>) -> Vec<Box<dyn LifecycleRule>> {
        self.pool_rule_factories
            .iter()
            .flat_map(|factory| factory.rules(context))
            .collect()
    }

    pub fn device_rules(&self, context: &DeviceContext<'_>) -> Vec<Box<dyn LifecycleRule>> {
        self.device_rule_factories
            .iter()
            .flat_map(|factory| factory.rules(context))
            .collect()
    }

    pub fn test_case_rules(&self, context: &PoolContext<'_>) -> Vec<Box<dyn TestCaseRule>> {
        self.test_case_rule_factories
            .iter()
            .flat_map(|factory| factory.rules(context))
            .collect()
    }

    pub fn test_run_rules(&self, context: &TestRunContext<'_>) -> Vec<Box<dyn TestRunRule>> {
        self.test_run_rule_factories
            .iter()
            .flat_map(|factory| factory.rules(context))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFactory {
        invocations: Arc<AtomicUsize>,
        instances: usize,
    }

    impl RunRuleFactory for CountingFactory {
        fn rules(&self, _context: &RunContext<'_>) -> Vec<Box<dyn LifecycleRule>> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            (0..self.instances)
                .map(|_| Box::new(NoopRule) as Box<dyn LifecycleRule>)
                .collect()
        }
    }

    struct NoopRule;
    impl LifecycleRule for NoopRule {}

    #[test]
    fn every_factory_is_invoked_exactly_once_per_context() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let mut registry = PluginRegistry::new();
        registry.register_run_rule_factory(Box::new(CountingFactory {
            invocations: Arc::clone(&invocations),
            instances: 0,
        }));
        registry.register_run_rule_factory(Box::new(CountingFactory {
            invocations: Arc::clone(&invocations),
            instances: 3,
        }));

        let options = RunOptions::default();
        let rules = registry.run_rules(&RunContext { options: &options });
        // Zero-or-many instances per factory, all flattened in order.
        assert_eq!(rules.len(), 3);
        assert_eq!(invocations.load(Ordering::SeqCst), 2);
    }
}
