//! Result aggregation and report output.
//!
//! Workers append raw attempts in no particular order; this module owns the
//! dedup-by-final-attempt view, the overall success verdict, and rendering
//! to `results.json` and `summary.md`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::result::{ResultStatus, TestCaseRunResult};
use crate::test_case::TestIdentifier;

/// A pool-level (or run-level) failure recorded during scheduling.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulingFailure {
    pub pool: String,
    pub message: String,
}

/// The final verdict for one test case: its last attempt wins, earlier
/// attempts remain in the raw results list.
#[derive(Debug, Serialize)]
pub struct TestOutcome {
    pub test: TestIdentifier,
    pub status: ResultStatus,
    pub attempts: u32,
    pub device_serial: String,
    pub total_failure_count: u32,
}

#[derive(Debug, Serialize)]
pub struct PoolSummary {
    pub name: String,
    pub tests: Vec<TestOutcome>,
    /// Universe entries that produced no result at all.
    pub missing: Vec<TestIdentifier>,
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub run_token: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub pools: Vec<PoolSummary>,
    pub scheduling_failures: Vec<SchedulingFailure>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub missing: usize,
    pub success: bool,
}

/// Everything a run produced: the compiled summary plus the full attempt
/// history.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub summary: RunSummary,
    pub results: Vec<TestCaseRunResult>,
}

/// Compiles the summary from the raw, unordered attempt list and the
/// per-pool test-case universes.
pub fn compile(
    run_token: String,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    universes: &[(String, Vec<TestIdentifier>)],
    results: &[TestCaseRunResult],
    scheduling_failures: Vec<SchedulingFailure>,
) -> RunSummary {
    let mut pools = Vec::with_capacity(universes.len());
    let (mut total, mut passed, mut failed, mut errored, mut missing_total) = (0, 0, 0, 0, 0);

    for (pool_name, universe) in universes {
        // Last attempt wins; the raw list keeps the full history.
        let mut final_attempts: HashMap<&TestIdentifier, &TestCaseRunResult> = HashMap::new();
        let mut attempt_counts: HashMap<&TestIdentifier, u32> = HashMap::new();
        for result in results.iter().filter(|r| &r.pool == pool_name) {
            final_attempts.insert(&result.test, result);
            *attempt_counts.entry(&result.test).or_insert(0) += 1;
        }

        let mut tests = Vec::new();
        let mut missing = Vec::new();
        for identifier in universe {
            total += 1;
            match final_attempts.get(identifier) {
                Some(result) => {
                    match result.status {
                        ResultStatus::Pass => passed += 1,
                        ResultStatus::Fail => failed += 1,
                        ResultStatus::Error => errored += 1,
                    }
                    tests.push(TestOutcome {
                        test: identifier.clone(),
                        status: result.status,
                        attempts: attempt_counts.get(identifier).copied().unwrap_or(1),
                        device_serial: result.device_serial.clone(),
                        total_failure_count: result.total_failure_count(),
                    });
                }
                None => {
                    missing_total += 1;
                    missing.push(identifier.clone());
                }
            }
        }
        pools.push(PoolSummary {
            name: pool_name.clone(),
            tests,
            missing,
        });
    }

    let success =
        scheduling_failures.is_empty() && failed == 0 && errored == 0 && missing_total == 0;
    RunSummary {
        run_token,
        started_at,
        finished_at,
        pools,
        scheduling_failures,
        total,
        passed,
        failed,
        errored,
        missing: missing_total,
        success,
    }
}

/// Writes `results.json` (summary + full attempt history) and `summary.md`
/// into the output directory.
pub fn write_reports(report: &RunReport, output_dir: &Path) -> Result<()> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create output directory {}", output_dir.display()))?;

    let json_path = output_dir.join("results.json");
    let json = serde_json::to_string_pretty(report)?;
    fs::write(&json_path, json)
        .with_context(|| format!("failed to write {}", json_path.display()))?;

    let markdown_path = output_dir.join("summary.md");
    fs::write(&markdown_path, render_markdown(&report.summary))
        .with_context(|| format!("failed to write {}", markdown_path.display()))?;

    info!(
        "Reports written to {} and {}",
        json_path.display(),
        markdown_path.display()
    );
    Ok(())
}

fn render_markdown(summary: &RunSummary) -> String {
    let mut out = format!(
        "# Test Run Summary ({})\n\n{} to {}\n\n",
        summary.run_token,
        summary.started_at.to_rfc3339(),
        summary.finished_at.to_rfc3339()
    );
    out.push_str(&format!(
        "**{}**: {} total, {} passed, {} failed, {} errored, {} missing\n\n",
        if summary.success { "PASSED" } else { "FAILED" },
        summary.total,
        summary.passed,
        summary.failed,
        summary.errored,
        summary.missing
    ));

    if !summary.scheduling_failures.is_empty() {
        out.push_str("## Scheduling failures\n\n");
        for failure in &summary.scheduling_failures {
            out.push_str(&format!("- `{}`: {}\n", failure.pool, failure.message));
        }
        out.push('\n');
    }

    for pool in &summary.pools {
        out.push_str(&format!("## Pool {}\n\n", pool.name));
        out.push_str("| Test | Status | Attempts | Device | Failures |\n");
        out.push_str("|------|--------|----------|--------|----------|\n");
        for outcome in &pool.tests {
            out.push_str(&format!(
                "| {} | {} | {} | {} | {} |\n",
                outcome.test, outcome.status, outcome.attempts, outcome.device_serial,
                outcome.total_failure_count
            ));
        }
        for identifier in &pool.missing {
            out.push_str(&format!("| {identifier} | never ran | 0 | - | - |\n"));
        }
        out.push('\n');
    }
    out
}
