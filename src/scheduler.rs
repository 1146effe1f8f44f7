//! Top-level run coordination.
//!
//! The scheduler binds work sequentially (load pools, load and filter test
//! cases, bind runner candidates, validate that nothing is orphaned) and
//! then executes pools in parallel, one thread per pool. A scheduling
//! failure is fatal to its pool and recorded on the summary; sibling pools
//! are never affected.

use anyhow::{Context, Result, bail};
use chrono::Utc;
use log::{error, info};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::thread;

use crate::aggregator::{self, RunReport, SchedulingFailure};
use crate::config::RunOptions;
use crate::config::pool_config::PoolConfig;
use crate::errors::SchedulingError;
use crate::manifest;
use crate::pool::DevicePool;
use crate::pool_task::PoolTask;
use crate::queue::{ResultSink, TestCaseQueue};
use crate::rules::factory::{PluginRegistry, PoolContext, RunContext};
use crate::rules::run_with_hooks;
use crate::test_case::{TestCaseEvent, TestIdentifier};
use crate::utils::{CountDownLatch, LatchGuard};

/// One pool with its bound, validated schedule.
pub struct PreparedPool {
    pub pool: Arc<DevicePool>,
    pub events: Vec<TestCaseEvent>,
}

impl PreparedPool {
    /// The test-case universe handed to the result sink.
    pub fn universe(&self) -> Vec<TestIdentifier> {
        self.events
            .iter()
            .map(|event| event.identifier().clone())
            .collect()
    }
}

/// The outcome of the sequential binding phase.
pub struct RunPlan {
    pub prepared: Vec<PreparedPool>,
    pub scheduling_failures: Vec<SchedulingFailure>,
}

pub struct RunScheduler {
    pool_configs: Vec<PoolConfig>,
    options: Arc<RunOptions>,
    registry: Arc<PluginRegistry>,
}

impl RunScheduler {
    pub fn new(
        pool_configs: Vec<PoolConfig>,
        options: Arc<RunOptions>,
        registry: Arc<PluginRegistry>,
    ) -> Self {
        RunScheduler {
            pool_configs,
            options,
            registry,
        }
    }

    /// Runs everything: plan, execute, aggregate. The returned report always
    /// carries whatever partial results were produced.
    pub fn run(&self) -> Result<RunReport> {
        let run_token = format!("run-{}", Utc::now().format("%Y%m%d-%H%M%S%.3f"));
        let started_at = Utc::now();
        info!("Starting {run_token}");

        let plan = self.plan(&run_token)?;
        let mut failures = plan.scheduling_failures;
        let universes: Vec<(String, Vec<TestIdentifier>)> = plan
            .prepared
            .iter()
            .map(|prepared| (prepared.pool.name().to_string(), prepared.universe()))
            .collect();

        let results: ResultSink = Arc::new(Mutex::new(Vec::new()));
        let mut run_rules = self
            .registry
            .run_rules(&RunContext {
                options: &self.options,
            });
        let prepared = plan.prepared;
        let execution = run_with_hooks(
            &mut run_rules,
            |rule| rule.before(),
            || self.execute_pools(prepared, &results),
            |rule, _outcome| rule.after(),
        );
        match execution {
            Ok(pool_failures) => failures.extend(pool_failures),
            Err(hook_failure) => {
                error!("Run-level rules failed: {hook_failure}");
                failures.push(SchedulingFailure {
                    pool: "<run>".to_string(),
                    message: hook_failure.detailed(),
                });
            }
        }

        // Every producing thread has joined; the snapshot is stable.
        let raw_results = results.lock().unwrap().clone();
        let summary = aggregator::compile(
            run_token,
            started_at,
            Utc::now(),
            &universes,
            &raw_results,
            failures,
        );
        Ok(RunReport {
            summary,
            results: raw_results,
        })
    }

    /// The sequential binding phase. Per-pool failures are captured, not
    /// propagated; an empty pool list is a configuration error.
    pub fn plan(&self, run_token: &str) -> Result<RunPlan> {
        if self.pool_configs.is_empty() {
            bail!("no pools configured; add at least one [[pools]] table");
        }

        let mut prepared = Vec::new();
        let mut scheduling_failures = Vec::new();
        for pool_config in &self.pool_configs {
            match self.prepare_pool(pool_config, run_token) {
                Ok(pool) => prepared.push(pool),
                Err(e) => {
                    error!("Scheduling failed for pool {}: {e:#}", pool_config.name);
                    scheduling_failures.push(SchedulingFailure {
                        pool: pool_config.name.clone(),
                        message: format!("{e:#}"),
                    });
                }
            }
        }
        Ok(RunPlan {
            prepared,
            scheduling_failures,
        })
    }

    fn prepare_pool(&self, pool_config: &PoolConfig, run_token: &str) -> Result<PreparedPool> {
        let pool = Arc::new(DevicePool::from_config(pool_config)?);
        if pool.devices().is_empty() {
            return Err(SchedulingError::NoDevicesInPool {
                pool: pool.name().to_string(),
            }
            .into());
        }

        let manifest_path = manifest::require_manifest_path(&self.options.manifest)?;
        let cases = manifest::load_test_cases(manifest_path, run_token)?;
        if cases.is_empty() {
            return Err(SchedulingError::NoTestCasesFound {
                pool: pool.name().to_string(),
            }
            .into());
        }

        // Fold the collection through every registered test-case rule.
        let context = PoolContext {
            options: &self.options,
            pool: &pool,
        };
        let mut rules = self.registry.test_case_rules(&context);
        let mut cases = cases;
        for rule in &mut rules {
            cases = rule
                .apply(cases)
                .with_context(|| format!("test case rule failed for pool {}", pool.name()))?;
        }
        if cases.is_empty() {
            return Err(SchedulingError::AllTestCasesFiltered {
                pool: pool.name().to_string(),
            }
            .into());
        }

        // Bind runner candidates per device; every factory is asked once per
        // (device, test case) and matches are appended in registration order.
        let mut events = Vec::with_capacity(cases.len());
        for case in cases {
            let mut event = TestCaseEvent::new(case);
            let mut bound_any = false;
            for device in pool.devices() {
                if !event.test_case().is_enabled_on(&**device) {
                    continue;
                }
                for factory in self.registry.runner_factories() {
                    if let Some(runner) = factory.create(&pool, device, event.test_case()) {
                        event.bind_runner(device.serial(), runner);
                        bound_any = true;
                    }
                }
            }
            if !bound_any {
                // Fail fast, naming the orphaned test case.
                return Err(SchedulingError::NoEligibleRunner {
                    pool: pool.name().to_string(),
                    test: event.identifier().to_string(),
                }
                .into());
            }
            events.push(event);
        }

        info!(
            "Pool {} bound {} test case(s) across {} device(s)",
            pool.name(),
            events.len(),
            pool.devices().len()
        );
        Ok(PreparedPool { pool, events })
    }

    /// Fan-out: one native thread per pool, all reporting into the shared
    /// sink, all counted down on one latch. One pool failing never aborts a
    /// sibling.
    fn execute_pools(
        &self,
        prepared: Vec<PreparedPool>,
        results: &ResultSink,
    ) -> Result<Vec<SchedulingFailure>> {
        let latch = Arc::new(CountDownLatch::new(prepared.len()));
        let failures: Arc<Mutex<Vec<SchedulingFailure>>> = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::with_capacity(prepared.len());

        for PreparedPool { pool, events } in prepared {
            let queue = Arc::new(TestCaseQueue::new(events, Arc::clone(results)));
            let task = PoolTask::new(
                Arc::clone(&pool),
                queue,
                Arc::clone(&self.registry),
                Arc::clone(&self.options),
                Arc::clone(&stop),
            );
            let latch = Arc::clone(&latch);
            let failures = Arc::clone(&failures);
            let pool_name = pool.name().to_string();
            let handle = thread::Builder::new()
                .name(format!("pool-{pool_name}"))
                .spawn(move || {
                    let _guard = LatchGuard::new(&latch);
                    if let Err(e) = task.run() {
                        error!("Pool {pool_name} failed: {e:#}");
                        failures.lock().unwrap().push(SchedulingFailure {
                            pool: pool_name,
                            message: format!("{e:#}"),
                        });
                    }
                })?;
            handles.push(handle);
        }

        latch.wait();
        for handle in handles {
            let _ = handle.join();
        }

        let failures = Arc::try_unwrap(failures)
            .map(|m| m.into_inner().unwrap())
            .unwrap_or_default();
        Ok(failures)
    }
}
