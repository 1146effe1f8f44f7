//! Typed scheduling errors.
//!
//! These are fatal to the pool they occur in, never to sibling pools. Hook
//! and execution errors are handled where they arise (see `rules` and
//! `worker`) and do not appear here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulingError {
    #[error("pool {pool} has no devices")]
    NoDevicesInPool { pool: String },

    #[error("no test cases found for pool {pool}")]
    NoTestCasesFound { pool: String },

    #[error("all test cases for pool {pool} were filtered out")]
    AllTestCasesFiltered { pool: String },

    #[error("test case {test} has no eligible device with a bound runner in pool {pool}")]
    NoEligibleRunner { pool: String, test: String },

    #[error("every bound runner delegated for test case {test} on device {serial}")]
    AllRunnersDelegated { test: String, serial: String },

    #[error("pool {pool} drained with {count} test case(s) never dispatched")]
    QueueNotDrained { pool: String, count: usize },
}
