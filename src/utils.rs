//! Shared utilities: countdown latch, TOML loading.

use log::error;
use serde::de::DeserializeOwned;
use std::error::Error;
use std::fs;
use std::path::Path;
use std::sync::{Condvar, Mutex};

/// One-shot gate that `wait`ers block on until it has been counted down to
/// zero by the worker threads it tracks.
///
/// Counting down past zero is an internal consistency violation and panics.
pub struct CountDownLatch {
    count: Mutex<usize>,
    cond: Condvar,
}

impl CountDownLatch {
    pub fn new(count: usize) -> Self {
        CountDownLatch {
            count: Mutex::new(count),
            cond: Condvar::new(),
        }
    }

    pub fn count_down(&self) {
        let mut count = self.count.lock().unwrap();
        if *count == 0 {
            panic!("countdown latch advanced past zero");
        }
        *count -= 1;
        if *count == 0 {
            self.cond.notify_all();
        }
    }

    /// Blocks until the count reaches zero.
    pub fn wait(&self) {
        let mut count = self.count.lock().unwrap();
        while *count > 0 {
            count = self.cond.wait(count).unwrap();
        }
    }

    #[allow(dead_code)]
    pub fn current_count(&self) -> usize {
        *self.count.lock().unwrap()
    }
}

/// Counts a latch down when dropped, so a panicking worker thread still
/// releases its pool coordinator.
pub struct LatchGuard<'a> {
    latch: &'a CountDownLatch,
}

impl<'a> LatchGuard<'a> {
    pub fn new(latch: &'a CountDownLatch) -> Self {
        LatchGuard { latch }
    }
}

impl Drop for LatchGuard<'_> {
    fn drop(&mut self) {
        self.latch.count_down();
    }
}

/// Reads a TOML file into an arbitrary struct.
///
/// # Errors
///
/// Returns an error if the file cannot be read or data parsing fails.
pub fn read_toml_from_file<T>(path: &Path) -> Result<T, Box<dyn Error>>
where
    T: DeserializeOwned,
{
    let content = fs::read_to_string(path)?;
    let parsed: T = match toml::de::from_str(&content) {
        Ok(parsed) => parsed,
        Err(e) => {
            error!("Failed to parse TOML file {}: {e}", path.display());
            return Err(Box::new(e));
        }
    };
    Ok(parsed)
}
