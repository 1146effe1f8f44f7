//! Per-pool execution coordinator.
//!
//! One pool task runs on its own thread: pool-scoped rules wrap the fan-out
//! of one device worker thread per device. Workers signal a countdown latch
//! as they finish (or die); once everyone has, the task verifies the queue
//! actually drained.

use anyhow::Result;
use log::{error, info, warn};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;

use crate::config::RunOptions;
use crate::errors::SchedulingError;
use crate::pool::DevicePool;
use crate::queue::TestCaseQueue;
use crate::rules::factory::{PluginRegistry, PoolContext};
use crate::rules::{HookError, run_with_hooks};
use crate::utils::{CountDownLatch, LatchGuard};
use crate::worker::DeviceWorker;

pub struct PoolTask {
    pool: Arc<DevicePool>,
    queue: Arc<TestCaseQueue>,
    registry: Arc<PluginRegistry>,
    options: Arc<RunOptions>,
    stop: Arc<AtomicBool>,
}

impl PoolTask {
    pub fn new(
        pool: Arc<DevicePool>,
        queue: Arc<TestCaseQueue>,
        registry: Arc<PluginRegistry>,
        options: Arc<RunOptions>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        PoolTask {
            pool,
            queue,
            registry,
            options,
            stop,
        }
    }

    /// Runs the pool to completion. Scheduling problems (no devices, a
    /// queue that did not drain) come back as errors; they are fatal to
    /// this pool only.
    pub fn run(&self) -> Result<()> {
        if self.pool.devices().is_empty() {
            return Err(SchedulingError::NoDevicesInPool {
                pool: self.pool.name().to_string(),
            }
            .into());
        }

        let context = PoolContext {
            options: &self.options,
            pool: &self.pool,
        };
        let mut rules = self.registry.pool_rules(&context);
        run_with_hooks(
            &mut rules,
            |rule| rule.before(),
            || self.run_devices(),
            |rule, _outcome| rule.after(),
        )
        .map_err(HookError::into_primary)
    }

    fn run_devices(&self) -> Result<()> {
        let devices = self.pool.devices();
        let latch = Arc::new(CountDownLatch::new(devices.len()));
        let mut handles = Vec::with_capacity(devices.len());

        for device in devices {
            let worker = DeviceWorker::new(
                Arc::clone(&self.pool),
                Arc::clone(device),
                Arc::clone(&self.queue),
                Arc::clone(&self.registry),
                Arc::clone(&self.options),
                Arc::clone(&self.stop),
            );
            let latch = Arc::clone(&latch);
            let handle = thread::Builder::new()
                .name(format!("device-{}", device.serial()))
                .spawn(move || {
                    // The guard counts down even if the worker panics, so the
                    // pool never waits forever.
                    let _guard = LatchGuard::new(&latch);
                    worker.run();
                })?;
            handles.push(handle);
        }

        latch.wait();
        for handle in handles {
            if handle.join().is_err() {
                // Logged and treated as clean pool termination; the drain
                // check below catches anything the dead worker left behind.
                warn!(
                    "A device worker of pool {} terminated abnormally",
                    self.pool.name()
                );
            }
        }

        let leftover = self.queue.queued_count();
        if leftover > 0 {
            error!(
                "Pool {} finished with {leftover} event(s) never dispatched",
                self.pool.name()
            );
            return Err(SchedulingError::QueueNotDrained {
                pool: self.pool.name().to_string(),
                count: leftover,
            }
            .into());
        }
        info!("Pool {} drained", self.pool.name());
        Ok(())
    }
}
