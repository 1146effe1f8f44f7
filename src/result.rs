//! Run results.
//!
//! [`RunResult`] is what a runner candidate returns: either it delegates to
//! the next candidate in the chain or it produces a terminal
//! [`TestCaseRunResult`].

use crate::test_case::TestIdentifier;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// Outcome of asking one runner candidate to handle a test case.
#[derive(Debug)]
pub enum RunResult {
    /// This candidate declines; try the previous-bound one.
    Delegate,
    /// A terminal result; the chain stops here.
    Completed(TestCaseRunResult),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Pass,
    Fail,
    Error,
}

impl ResultStatus {
    pub fn is_failure(self) -> bool {
        matches!(self, ResultStatus::Fail | ResultStatus::Error)
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultStatus::Pass => write!(f, "pass"),
            ResultStatus::Fail => write!(f, "fail"),
            ResultStatus::Error => write!(f, "error"),
        }
    }
}

/// One named block of report data attached to a result, in the order the
/// producer emitted them.
#[derive(Debug, Clone, Serialize)]
pub struct ReportBlock {
    pub title: String,
    pub body: String,
}

/// The complete record of one test case attempt on one device.
///
/// The cumulative failure counter obeys
/// `total_failure_count = base_total_failure_count + (1 if status is fail/error else 0)`,
/// and the base never decreases relative to the event that triggered the
/// attempt; the worker only ever raises it.
#[derive(Debug, Clone, Serialize)]
pub struct TestCaseRunResult {
    pub pool: String,
    pub device_serial: String,
    pub device_model: String,
    pub test: TestIdentifier,
    pub status: ResultStatus,
    /// Stack trace or error output; empty on a clean pass.
    pub trace: String,
    /// Wall-clock span, including setup/teardown overhead.
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Net span of the test body alone.
    pub net_started_at: DateTime<Utc>,
    pub net_ended_at: DateTime<Utc>,
    base_total_failure_count: u32,
    pub properties: HashMap<String, String>,
    pub coverage_artifact: Option<PathBuf>,
    pub report_blocks: Vec<ReportBlock>,
}

impl TestCaseRunResult {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: impl Into<String>,
        device_serial: impl Into<String>,
        device_model: impl Into<String>,
        test: TestIdentifier,
        status: ResultStatus,
        trace: impl Into<String>,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        net_started_at: DateTime<Utc>,
        net_ended_at: DateTime<Utc>,
        base_total_failure_count: u32,
    ) -> Self {
        TestCaseRunResult {
            pool: pool.into(),
            device_serial: device_serial.into(),
            device_model: device_model.into(),
            test,
            status,
            trace: trace.into(),
            started_at,
            ended_at,
            net_started_at,
            net_ended_at,
            base_total_failure_count,
            properties: HashMap::new(),
            coverage_artifact: None,
            report_blocks: Vec::new(),
        }
    }

    #[allow(dead_code)]
    pub fn base_total_failure_count(&self) -> u32 {
        self.base_total_failure_count
    }

    /// Failures accumulated across attempts, including this one.
    pub fn total_failure_count(&self) -> u32 {
        self.base_total_failure_count + u32::from(self.status.is_failure())
    }

    /// Raises the carried failure count to at least `floor`. Never lowers it.
    pub fn raise_base_failure_count(&mut self, floor: u32) {
        if floor > self.base_total_failure_count {
            self.base_total_failure_count = floor;
        }
    }

    pub fn push_report_block(&mut self, title: impl Into<String>, body: impl Into<String>) {
        self.report_blocks.push(ReportBlock {
            title: title.into(),
            body: body.into(),
        });
    }
}
