//! Per-field validators and the feedback they produce.
//!
//! Each validator yields zero or one feedback entry per run; a field's
//! entries concatenate in declaration order. A validator returning `Err` is
//! captured as a single synthetic error-severity entry - it never aborts the
//! validation pass or its siblings. Deferred (asynchronous) validators run
//! on the single cooperative thread via `LocalBoxFuture`; submission awaits
//! all of them to completion so the error set is complete (no fail-fast).

use std::rc::Rc;

use futures::future::LocalBoxFuture;
use serde_json::Value;

use crate::error::ValidationRuleError;
use crate::path::FieldPath;
use crate::types::{Feedback, Severity};

type SyncCheck = Rc<dyn Fn(&Value) -> Result<Option<String>, ValidationRuleError>>;
type DeferredCheck =
    Rc<dyn Fn(Value) -> LocalBoxFuture<'static, Result<Option<String>, ValidationRuleError>>>;

#[derive(Clone)]
enum Check {
    Sync(SyncCheck),
    Deferred(DeferredCheck),
}

/// A single rule attached to a field. Cloning shares the underlying check.
#[derive(Clone)]
pub struct Validator {
    severity: Severity,
    check: Check,
}

impl Validator {
    /// A synchronous error-severity rule. Return `Ok(Some(message))` to
    /// report a problem, `Ok(None)` to pass.
    pub fn sync(
        check: impl Fn(&Value) -> Result<Option<String>, ValidationRuleError> + 'static,
    ) -> Self {
        Self {
            severity: Severity::Error,
            check: Check::Sync(Rc::new(check)),
        }
    }

    /// A synchronous warning-severity rule.
    pub fn warning(
        check: impl Fn(&Value) -> Result<Option<String>, ValidationRuleError> + 'static,
    ) -> Self {
        Self {
            severity: Severity::Warning,
            check: Check::Sync(Rc::new(check)),
        }
    }

    /// An asynchronous error-severity rule. The check receives a clone of
    /// the current value; its result is discarded if the owning node is
    /// disposed before it resolves.
    pub fn deferred(
        check: impl Fn(Value) -> LocalBoxFuture<'static, Result<Option<String>, ValidationRuleError>>
        + 'static,
    ) -> Self {
        Self {
            severity: Severity::Error,
            check: Check::Deferred(Rc::new(check)),
        }
    }

    /// The built-in rule generated from a schema node's `required` flag.
    pub(crate) fn required(label: String) -> Self {
        Self::sync(move |value| {
            if is_empty_value(value) {
                Ok(Some(format!("{label} is required")))
            } else {
                Ok(None)
            }
        })
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// Run against a value, producing at most one feedback entry.
    pub(crate) async fn run(&self, path: &FieldPath, value: &Value) -> Option<Feedback> {
        let outcome = match &self.check {
            Check::Sync(check) => check(value),
            Check::Deferred(check) => check(value.clone()).await,
        };
        match outcome {
            Ok(None) => None,
            Ok(Some(message)) => Some(Feedback {
                path: path.to_string(),
                message,
                severity: self.severity,
            }),
            // A failed validator implementation becomes a synthetic error
            // entry rather than aborting the pass.
            Err(failure) => Some(Feedback::error(path.to_string(), failure.to_string())),
        }
    }
}

impl std::fmt::Debug for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Validator")
            .field("severity", &self.severity)
            .field(
                "kind",
                &match self.check {
                    Check::Sync(_) => "sync",
                    Check::Deferred(_) => "deferred",
                },
            )
            .finish()
    }
}

/// Emptiness as the `required` rule sees it: null, the empty string, or an
/// empty array.
pub(crate) fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}
