//! The rule pipeline engine.
//!
//! Plugins attach before/after hooks at run, pool, device and test-case
//! scope. All of them are executed through the single generic
//! [`run_with_hooks`] below, which guarantees the unwinding contract:
//!
//! 1. `before` runs on each rule in order, halting at the first failure; the
//!    failing rule is excluded from the allowed-after set.
//! 2. If every `before` passed, the wrapped action runs and its outcome is
//!    captured.
//! 3. `after` runs on the allowed-after rules in reverse order, receiving the
//!    current outcome and free to replace its payload.
//! 4. An `after` that itself fails never aborts the fold: on an
//!    already-failed outcome the new error is attached as suppressed, on a
//!    success it becomes the failure.
//!
//! The engine is shape-agnostic: it is parameterized over the closures the
//! caller supplies, not over a fixed rule trait.

pub mod builtin;
pub mod factory;

use anyhow::Result;
use log::warn;
use std::fmt;

/// A hook-chain failure: the primary error plus any errors suppressed while
/// unwinding the `after` chain, in the order they occurred.
#[derive(Debug)]
pub struct HookError {
    primary: anyhow::Error,
    suppressed: Vec<anyhow::Error>,
}

impl HookError {
    pub fn new(primary: anyhow::Error) -> Self {
        HookError {
            primary,
            suppressed: Vec::new(),
        }
    }

    #[allow(dead_code)]
    pub fn primary(&self) -> &anyhow::Error {
        &self.primary
    }

    #[allow(dead_code)]
    pub fn suppressed(&self) -> &[anyhow::Error] {
        &self.suppressed
    }

    pub fn suppress(&mut self, error: anyhow::Error) {
        self.suppressed.push(error);
    }

    /// Collapses into the primary error, folding suppressed errors in as
    /// context. Downcasting to the primary's original type keeps working.
    pub fn into_primary(self) -> anyhow::Error {
        let mut error = self.primary;
        for suppressed in self.suppressed {
            error = error.context(format!("suppressed: {suppressed:#}"));
        }
        error
    }

    /// Multi-line rendering of the primary cause chain and every suppressed
    /// error, suitable for a result trace.
    pub fn detailed(&self) -> String {
        let mut out = format!("{:#}", self.primary);
        for suppressed in &self.suppressed {
            out.push_str(&format!("\nsuppressed: {suppressed:#}"));
        }
        out
    }
}

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.primary)?;
        for suppressed in &self.suppressed {
            write!(f, " (suppressed: {suppressed})")?;
        }
        Ok(())
    }
}

impl std::error::Error for HookError {}

/// The value threaded through the `after` fold: the action's success value or
/// the failure accumulated so far. `after` hooks may replace the payload but
/// the engine owns the success/failure transitions.
#[derive(Debug)]
pub enum HookOutcome<V> {
    Success(V),
    Failure(HookError),
}

/// Runs `action` inside the before/after chains of `rules`.
///
/// See the module documentation for the exact unwinding contract.
pub fn run_with_hooks<R, V>(
    rules: &mut [R],
    mut before: impl FnMut(&mut R) -> Result<()>,
    action: impl FnOnce() -> Result<V>,
    mut after: impl FnMut(&mut R, &mut HookOutcome<V>) -> Result<()>,
) -> Result<V, HookError> {
    let mut allowed_after = rules.len();
    let mut before_failure: Option<HookError> = None;
    for (index, rule) in rules.iter_mut().enumerate() {
        if let Err(e) = before(rule) {
            // Rules before this one get their `after`; this one does not.
            allowed_after = index;
            before_failure = Some(HookError::new(e));
            break;
        }
    }

    let mut outcome = match before_failure {
        Some(failure) => HookOutcome::Failure(failure),
        None => match action() {
            Ok(value) => HookOutcome::Success(value),
            Err(e) => HookOutcome::Failure(HookError::new(e)),
        },
    };

    for rule in rules[..allowed_after].iter_mut().rev() {
        if let Err(e) = after(rule, &mut outcome) {
            warn!("after hook failed: {e:#}");
            outcome = match outcome {
                // A hook failure on a clean outcome is a real failure.
                HookOutcome::Success(_) => HookOutcome::Failure(HookError::new(e)),
                // The original failure stays primary; the new one is attached.
                HookOutcome::Failure(mut failure) => {
                    failure.suppress(e);
                    HookOutcome::Failure(failure)
                }
            };
        }
    }

    match outcome {
        HookOutcome::Success(value) => Ok(value),
        HookOutcome::Failure(failure) => Err(failure),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::cell::RefCell;

    #[test]
    fn hooks_run_in_order_and_unwind_in_reverse() {
        let log = RefCell::new(Vec::new());
        let mut rules = vec!["r1", "r2", "r3"];
        let value = run_with_hooks(
            &mut rules,
            |r| {
                log.borrow_mut().push(format!("before {r}"));
                Ok(())
            },
            || {
                log.borrow_mut().push("action".to_string());
                Ok(7)
            },
            |r, _outcome| {
                log.borrow_mut().push(format!("after {r}"));
                Ok(())
            },
        )
        .unwrap();
        assert_eq!(value, 7);
        assert_eq!(
            *log.borrow(),
            ["before r1", "before r2", "before r3", "action", "after r3", "after r2", "after r1"]
        );
    }

    #[test]
    fn before_failure_halts_and_skips_failed_rule_in_unwind() {
        let log = RefCell::new(Vec::new());
        let mut rules = vec!["r1", "r2", "r3"];
        let result: Result<(), HookError> = run_with_hooks(
            &mut rules,
            |r| {
                log.borrow_mut().push(format!("before {r}"));
                if *r == "r2" {
                    return Err(anyhow!("boom in {r}"));
                }
                Ok(())
            },
            || {
                log.borrow_mut().push("action".to_string());
                Ok(())
            },
            |r, outcome| {
                let seen = match outcome {
                    HookOutcome::Failure(f) => format!("{}", f.primary()),
                    HookOutcome::Success(_) => "success".to_string(),
                };
                log.borrow_mut().push(format!("after {r}: {seen}"));
                Ok(())
            },
        );
        // The action never ran, r3's hooks never ran, r1 unwound with the
        // same underlying error.
        assert_eq!(
            *log.borrow(),
            ["before r1", "before r2", "after r1: boom in r2"]
        );
        let failure = result.unwrap_err();
        assert_eq!(format!("{}", failure.primary()), "boom in r2");
        assert!(failure.suppressed().is_empty());
    }

    #[test]
    fn failing_after_is_suppressed_onto_existing_failure() {
        let mut rules = vec!["r1", "r2"];
        let result: Result<(), HookError> = run_with_hooks(
            &mut rules,
            |_| Ok(()),
            || Err(anyhow!("action failed")),
            |r, _outcome| {
                if *r == "r2" {
                    return Err(anyhow!("after {r} failed"));
                }
                Ok(())
            },
        );
        let failure = result.unwrap_err();
        assert_eq!(format!("{}", failure.primary()), "action failed");
        assert_eq!(failure.suppressed().len(), 1);
        assert_eq!(format!("{}", failure.suppressed()[0]), "after r2 failed");
        assert!(failure.detailed().contains("suppressed: after r2 failed"));
    }

    #[test]
    fn failing_after_on_success_becomes_the_failure() {
        let mut rules = vec!["r1"];
        let result = run_with_hooks(
            &mut rules,
            |_| Ok(()),
            || Ok(1),
            |_, _| Err(anyhow!("teardown failed")),
        );
        let failure = result.unwrap_err();
        assert_eq!(format!("{}", failure.primary()), "teardown failed");
    }

    #[test]
    fn after_may_replace_the_payload() {
        let mut rules = vec!["doubler", "incrementer"];
        let value = run_with_hooks(
            &mut rules,
            |_| Ok(()),
            || Ok(10),
            |r, outcome| {
                if let HookOutcome::Success(v) = outcome {
                    match *r {
                        "doubler" => *v *= 2,
                        "incrementer" => *v += 1,
                        _ => {}
                    }
                }
                Ok(())
            },
        )
        .unwrap();
        // Reverse order: incrementer first, then doubler.
        assert_eq!(value, 22);
    }

    #[test]
    fn multiple_after_failures_accumulate_in_order() {
        let mut rules = vec!["r1", "r2", "r3"];
        let result: Result<(), HookError> = run_with_hooks(
            &mut rules,
            |_| Ok(()),
            || Err(anyhow!("root")),
            |r, _| Err(anyhow!("after {r}")),
        );
        let failure = result.unwrap_err();
        assert_eq!(format!("{}", failure.primary()), "root");
        let suppressed: Vec<String> = failure
            .suppressed()
            .iter()
            .map(|e| format!("{e}"))
            .collect();
        assert_eq!(suppressed, ["after r3", "after r2", "after r1"]);
    }
}
