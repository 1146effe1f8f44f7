mod aggregator;
mod config;
mod connection;
mod device;
mod errors;
mod manifest;
mod pool;
mod pool_task;
mod queue;
mod result;
mod rules;
mod runner;
mod scheduler;
mod test_case;
mod utils;
mod worker;

use clap::Parser;
use log::error;
use std::sync::Arc;

use crate::config::cli_args::CliArgs;
use crate::config::RunConfig;
use crate::rules::builtin::{
    DeviceSetupRuleFactory, PoolTimingRuleFactory, PropertyStampRuleFactory,
    RunTimingRuleFactory, SkipAnnotationRuleFactory, TestFilterRuleFactory,
};
use crate::rules::factory::PluginRegistry;
use crate::runner::{ExplicitCommandRunnerFactory, ShellRunnerFactory};
use crate::scheduler::RunScheduler;

fn main() {
    let args = CliArgs::parse();

    let default_filter = if args.verbose {
        "debug"
    } else if args.quiet {
        "warn"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    std::process::exit(run(&args));
}

fn run(args: &CliArgs) -> i32 {
    let config = match RunConfig::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("{e:#}");
            return 2;
        }
    };
    let options = Arc::new(config.run.clone().merge_cli(args));
    let registry = Arc::new(default_registry());
    let scheduler = RunScheduler::new(config.pools.clone(), Arc::clone(&options), registry);

    if args.list || args.dry_run {
        return print_plan(&scheduler, args.list);
    }

    match scheduler.run() {
        Ok(report) => {
            if let Err(e) = aggregator::write_reports(&report, &options.output_dir) {
                error!("Failed to write reports: {e:#}");
                return 2;
            }
            let summary = &report.summary;
            println!(
                "{}: {} total, {} passed, {} failed, {} errored, {} missing, {} scheduling failure(s)",
                if summary.success { "PASSED" } else { "FAILED" },
                summary.total,
                summary.passed,
                summary.failed,
                summary.errored,
                summary.missing,
                summary.scheduling_failures.len()
            );
            if !summary.scheduling_failures.is_empty() {
                2
            } else if summary.success {
                0
            } else {
                1
            }
        }
        Err(e) => {
            error!("Run failed: {e:#}");
            2
        }
    }
}

/// Shared handler for `--list` (print the execution plan) and `--dry-run`
/// (validate scheduling silently).
fn print_plan(scheduler: &RunScheduler, list: bool) -> i32 {
    let plan = match scheduler.plan("plan") {
        Ok(plan) => plan,
        Err(e) => {
            error!("{e:#}");
            return 2;
        }
    };
    if list {
        for prepared in &plan.prepared {
            let serials: Vec<&str> = prepared
                .pool
                .devices()
                .iter()
                .map(|device| device.serial())
                .collect();
            println!(
                "Pool {} ({} device(s): {})",
                prepared.pool.name(),
                serials.len(),
                serials.join(", ")
            );
            for event in &prepared.events {
                println!("  {}", event.identifier());
            }
        }
    }
    for failure in &plan.scheduling_failures {
        error!("Pool {}: {}", failure.pool, failure.message);
    }
    if plan.scheduling_failures.is_empty() {
        if !list {
            println!("Scheduling OK: {} pool(s) bound", plan.prepared.len());
        }
        0
    } else {
        2
    }
}

fn default_registry() -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    registry.register_run_rule_factory(Box::new(RunTimingRuleFactory));
    registry.register_pool_rule_factory(Box::new(PoolTimingRuleFactory));
    registry.register_device_rule_factory(Box::new(DeviceSetupRuleFactory));
    registry.register_test_case_rule_factory(Box::new(SkipAnnotationRuleFactory));
    registry.register_test_case_rule_factory(Box::new(TestFilterRuleFactory));
    registry.register_test_run_rule_factory(Box::new(PropertyStampRuleFactory));
    // The explicit-command runner registers after the shell fallback: the
    // chain executes in reverse bind order, so it gets first refusal.
    registry.register_runner_factory(Box::new(ShellRunnerFactory));
    registry.register_runner_factory(Box::new(ExplicitCommandRunnerFactory));
    registry
}
