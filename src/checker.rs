//! Checker contract and safe invocation
//!
//! The checker analyzes a completed history against a model. Whatever
//! it does — return an error, panic — the runner gets a result back;
//! a failed analysis is a test outcome, not a crash.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::HarnessError;
use crate::history::Op;
use crate::store::TestReport;

/// An abstract model of the system under test, handed to the checker.
///
/// The orchestrator never interprets it; checkers downcast to the
/// concrete type they expect.
pub trait Model: Any + fmt::Debug + Send + Sync {}

/// The absence of a model
#[derive(Debug)]
pub struct NoModel;

impl Model for NoModel {}

/// Outcome of a history analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    /// Whether the history satisfies the model
    pub valid: bool,
    /// Description of the violation, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Checker-specific extras (statistics, witnesses, ...)
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl CheckResult {
    /// A passing result
    pub fn valid() -> Self {
        CheckResult { valid: true, error: None, details: serde_json::Map::new() }
    }

    /// A failing result with a reason
    pub fn invalid(reason: impl Into<String>) -> Self {
        CheckResult { valid: false, error: Some(reason.into()), details: serde_json::Map::new() }
    }

    /// Attach a checker-specific detail field
    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}

/// Analyzes a completed, indexed history
pub trait Checker: Send + Sync {
    fn check(
        &self,
        test: &TestReport,
        model: &dyn Model,
        history: &[Op],
    ) -> Result<CheckResult, HarnessError>;
}

/// Checker that approves every history
pub struct Valid;

impl Checker for Valid {
    fn check(
        &self,
        _test: &TestReport,
        _model: &dyn Model,
        _history: &[Op],
    ) -> Result<CheckResult, HarnessError> {
        Ok(CheckResult::valid())
    }
}

/// Invoke a checker, converting any failure into an invalid result.
///
/// Both an error return and a panic inside the checker become
/// `valid = false`; the runner itself never dies on analysis.
pub fn check_safely(
    checker: &dyn Checker,
    test: &TestReport,
    model: &dyn Model,
    history: &[Op],
) -> CheckResult {
    let outcome = catch_unwind(AssertUnwindSafe(|| checker.check(test, model, history)));
    match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            warn!(error = %e, "checker returned an error");
            CheckResult::invalid(e.to_string())
        }
        Err(panic) => {
            let message = panic_message(&*panic);
            warn!(message = %message, "checker panicked");
            CheckResult::invalid(format!("checker panicked: {}", message))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TestReport;

    struct Panicking;

    impl Checker for Panicking {
        fn check(
            &self,
            _test: &TestReport,
            _model: &dyn Model,
            _history: &[Op],
        ) -> Result<CheckResult, HarnessError> {
            panic!("model diverged")
        }
    }

    struct Erroring;

    impl Checker for Erroring {
        fn check(
            &self,
            _test: &TestReport,
            _model: &dyn Model,
            _history: &[Op],
        ) -> Result<CheckResult, HarnessError> {
            Err(HarnessError::Contract("history truncated".to_string()))
        }
    }

    #[test]
    fn test_valid_checker_passes() {
        let report = TestReport::empty();
        let result = check_safely(&Valid, &report, &NoModel, &[]);
        assert!(result.valid);
        assert!(result.error.is_none());
    }

    #[test]
    fn test_panicking_checker_becomes_invalid() {
        let report = TestReport::empty();
        let result = check_safely(&Panicking, &report, &NoModel, &[]);
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("model diverged"));
    }

    #[test]
    fn test_erroring_checker_becomes_invalid() {
        let report = TestReport::empty();
        let result = check_safely(&Erroring, &report, &NoModel, &[]);
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("history truncated"));
    }

    #[test]
    fn test_check_result_serializes_details_flat() {
        let result = CheckResult::valid().with_detail("op_count", serde_json::json!(4));
        let v = serde_json::to_value(&result).unwrap();
        assert_eq!(v["valid"], serde_json::json!(true));
        assert_eq!(v["op_count"], serde_json::json!(4));
    }
}
