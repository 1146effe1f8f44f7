//! Test case manifest.
//!
//! The manifest is a TOML file naming every test case a run may schedule:
//!
//! ```toml
//! package = "com.example.suite"
//!
//! [[tests]]
//! class = "LoginTest"
//! method = "logs_in"
//!
//! [[tests]]
//! class = "SyncTest"
//! method = "syncs_offline_edits"
//! devices = ["lab-42"]
//! properties = { command = "./run-sync-test.sh" }
//! annotations = { slow = "true" }
//! ```

use anyhow::{Context, Result, bail};
use log::info;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::test_case::{Annotation, TestCase, TestIdentifier};
use crate::utils;

#[derive(Debug, Deserialize)]
pub struct TestManifest {
    /// Default package for entries that do not name their own.
    #[serde(default)]
    pub package: Option<String>,
    #[serde(default)]
    pub tests: Vec<TestCaseConfig>,
}

#[derive(Debug, Deserialize)]
pub struct TestCaseConfig {
    pub class: String,
    pub method: String,
    #[serde(default)]
    pub package: Option<String>,
    #[serde(default)]
    pub properties: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    /// Serials of the only devices this test may run on. Absent = all.
    #[serde(default)]
    pub devices: Option<Vec<String>>,
}

/// Loads the manifest and materializes one [`TestCase`] per entry, all
/// stamped with the run's correlation token.
pub fn load_test_cases(path: &Path, run_token: &str) -> Result<Vec<TestCase>> {
    let manifest: TestManifest = utils::read_toml_from_file(path)
        .map_err(|e| anyhow::anyhow!(e.to_string()))
        .with_context(|| format!("failed to load test manifest {}", path.display()))?;

    let default_package = manifest.package.unwrap_or_else(|| "default".to_string());
    let mut cases = Vec::with_capacity(manifest.tests.len());
    for entry in manifest.tests {
        let mut annotations: Vec<Annotation> = entry
            .annotations
            .into_iter()
            .map(|(key, value)| Annotation { key, value })
            .collect();
        annotations.sort_by(|a, b| a.key.cmp(&b.key));

        cases.push(TestCase::new(
            entry.package.unwrap_or_else(|| default_package.clone()),
            TestIdentifier::new(entry.class, entry.method),
            entry.properties,
            annotations,
            entry
                .devices
                .map(|serials| serials.into_iter().collect()),
            run_token,
        ));
    }
    info!("Loaded {} test case(s) from {}", cases.len(), path.display());
    Ok(cases)
}

/// Keeps only test cases whose `class#method` matches the pattern.
pub fn filter_test_cases(cases: Vec<TestCase>, pattern: &str) -> Result<Vec<TestCase>> {
    let re = regex::Regex::new(pattern)
        .with_context(|| format!("invalid test filter pattern: {pattern}"))?;
    let before = cases.len();
    let kept: Vec<TestCase> = cases
        .into_iter()
        .filter(|case| re.is_match(&case.identifier().to_string()))
        .collect();
    if kept.len() < before {
        info!(
            "Test filter {pattern} kept {} of {before} test case(s)",
            kept.len()
        );
    }
    Ok(kept)
}

/// Fails when the manifest option is missing entirely; there is nothing to
/// schedule without one.
pub fn require_manifest_path(manifest: &Option<std::path::PathBuf>) -> Result<&Path> {
    match manifest {
        Some(path) => Ok(path),
        None => bail!("no test manifest configured; pass --manifest or set run.manifest"),
    }
}
