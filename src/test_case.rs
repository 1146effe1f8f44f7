//! Test case data model.
//!
//! A [`TestCase`] is the immutable description of one test; a
//! [`TestCaseEvent`] wraps it with the run-scoped state the scheduler and
//! workers need: excluded devices, the carried failure count, and the runners
//! bound per device.
//!
//! Identity is deliberately loose: two `TestCase` values with the same
//! class+method are the same test for queueing and result matching even when
//! their properties or eligible-device sets differ, which is exactly what the
//! retry path produces.

use crate::device::Device;
use crate::runner::TestRunner;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// The class+method identity a test is queued, retried and reported under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TestIdentifier {
    pub class: String,
    pub method: String,
}

impl TestIdentifier {
    pub fn new(class: impl Into<String>, method: impl Into<String>) -> Self {
        TestIdentifier {
            class: class.into(),
            method: method.into(),
        }
    }
}

impl fmt::Display for TestIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.class, self.method)
    }
}

/// Arbitrary key/value metadata attached to a test case, consumed by plugins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Annotation {
    pub key: String,
    pub value: String,
}

/// Immutable description of one test case.
#[derive(Debug, Clone)]
pub struct TestCase {
    package: String,
    identifier: TestIdentifier,
    properties: HashMap<String, String>,
    annotations: Vec<Annotation>,
    /// `None` means the test may run on every device.
    eligible_devices: Option<HashSet<String>>,
    /// Opaque per-run correlation token.
    run_token: String,
}

impl TestCase {
    pub fn new(
        package: impl Into<String>,
        identifier: TestIdentifier,
        properties: HashMap<String, String>,
        annotations: Vec<Annotation>,
        eligible_devices: Option<HashSet<String>>,
        run_token: impl Into<String>,
    ) -> Self {
        TestCase {
            package: package.into(),
            identifier,
            properties,
            annotations,
            eligible_devices,
            run_token: run_token.into(),
        }
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn identifier(&self) -> &TestIdentifier {
        &self.identifier
    }

    #[allow(dead_code)]
    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    #[allow(dead_code)]
    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations
            .iter()
            .find(|a| a.key == key)
            .map(|a| a.value.as_str())
    }

    #[allow(dead_code)]
    pub fn run_token(&self) -> &str {
        &self.run_token
    }

    /// Whether this test may run on the given device. Absence of an explicit
    /// eligible-device set means every device qualifies.
    pub fn is_enabled_on(&self, device: &dyn Device) -> bool {
        match &self.eligible_devices {
            Some(serials) => serials.contains(device.serial()),
            None => true,
        }
    }
}

/// A schedulable unit: one test case plus its run-scoped bindings.
///
/// Mutated only to bind runners before execution starts; a retry decision
/// produces a fresh event via [`TestCaseEvent::with_failure_count`] rather
/// than mutating in place.
pub struct TestCaseEvent {
    test_case: TestCase,
    excluded_devices: HashSet<String>,
    total_failure_count: u32,
    /// Bound runner candidates per device serial, in bind order.
    runners: HashMap<String, Vec<Arc<dyn TestRunner>>>,
}

impl TestCaseEvent {
    pub fn new(test_case: TestCase) -> Self {
        TestCaseEvent {
            test_case,
            excluded_devices: HashSet::new(),
            total_failure_count: 0,
            runners: HashMap::new(),
        }
    }

    pub fn test_case(&self) -> &TestCase {
        &self.test_case
    }

    pub fn identifier(&self) -> &TestIdentifier {
        self.test_case.identifier()
    }

    pub fn total_failure_count(&self) -> u32 {
        self.total_failure_count
    }

    #[allow(dead_code)]
    pub fn exclude_device(&mut self, serial: impl Into<String>) {
        self.excluded_devices.insert(serial.into());
    }

    /// Whether this event may be dispatched to the given device: the test
    /// case must be enabled on it and it must not have been excluded since.
    pub fn is_enabled_on(&self, device: &dyn Device) -> bool {
        !self.excluded_devices.contains(device.serial()) && self.test_case.is_enabled_on(device)
    }

    pub fn bind_runner(&mut self, serial: impl Into<String>, runner: Arc<dyn TestRunner>) {
        self.runners.entry(serial.into()).or_default().push(runner);
    }

    pub fn runners_for(&self, serial: &str) -> &[Arc<dyn TestRunner>] {
        self.runners.get(serial).map(Vec::as_slice).unwrap_or(&[])
    }

    #[allow(dead_code)]
    pub fn bound_device_serials(&self) -> impl Iterator<Item = &str> {
        self.runners.keys().map(String::as_str)
    }

    /// A new event for the same test carrying an updated failure count.
    /// Bindings and exclusions carry over; the count must not decrease.
    pub fn with_failure_count(&self, total_failure_count: u32) -> Self {
        debug_assert!(total_failure_count >= self.total_failure_count);
        TestCaseEvent {
            test_case: self.test_case.clone(),
            excluded_devices: self.excluded_devices.clone(),
            total_failure_count,
            runners: self.runners.clone(),
        }
    }
}

impl fmt::Debug for TestCaseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCaseEvent")
            .field("test", &self.test_case.identifier().to_string())
            .field("total_failure_count", &self.total_failure_count)
            .field("excluded_devices", &self.excluded_devices)
            .field("bound_devices", &self.runners.keys().collect::<Vec<_>>())
            .finish()
    }
}
