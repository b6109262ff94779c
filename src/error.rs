//! Error taxonomy for the form engine.
//!
//! Propagation policy: per-field validator failures are isolated to that
//! field's feedback list (see [`crate::validate`]) and never abort sibling
//! validation. Tree-construction failures (`NotConfigured`, an unresolvable
//! root) are fatal and propagate to the caller of form construction.

use thiserror::Error;

/// Errors surfaced by form construction, path resolution, and submission.
#[derive(Debug, Error)]
pub enum FormError {
    /// No reactive adapter is registered. Fatal at form-construction time;
    /// callers cannot recover locally.
    #[error("no reactive adapter configured (call set_reactive_adapter first)")]
    NotConfigured,

    /// A path could not be resolved against the schema. Fatal for the
    /// resolve call; recoverable at the tree level by skipping the node.
    #[error("path `{path}` does not resolve against the schema: {reason}")]
    PathResolution { path: String, reason: String },

    /// A submission is already in flight on this instance. Concurrent
    /// `submit()` calls are rejected rather than queued or interleaved.
    #[error("a submission is already in flight on this form")]
    SubmitInProgress,
}

impl FormError {
    pub(crate) fn path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PathResolution {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// A validator implementation failed (the Rust rendition of a rule throwing).
///
/// Captured by the pipeline and converted into a single synthetic
/// error-severity feedback entry; never aborts the validation pass.
#[derive(Debug, Error)]
#[error("validator failed: {message}")]
pub struct ValidationRuleError {
    pub message: String,
}

impl ValidationRuleError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
