//! Core types for formwork.
//!
//! These types define the foundation that everything builds on.
//! They flow through field nodes, the validation pipeline, and the
//! submission protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Pattern
// =============================================================================

/// Interaction pattern of a field or of the whole form.
///
/// A field's effective pattern is the nearest explicitly-set pattern walking
/// from the field up to the form root; unset means "inherit from parent",
/// with the form-level pattern as the final fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Pattern {
    /// The field participates in editing, value collection, and validation.
    #[default]
    Editable,
    /// The field is displayed but not editable; it still submits its value.
    ReadOnly,
    /// The field is excluded from value collection and validation.
    Disabled,
}

impl Pattern {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Editable => "editable",
            Self::ReadOnly => "readOnly",
            Self::Disabled => "disabled",
        }
    }

    pub(crate) fn as_value(self) -> Value {
        Value::String(self.as_str().to_owned())
    }

    /// Parse a pattern from its observable cell representation.
    /// `Null` (and anything unrecognized) means "inherit".
    pub(crate) fn from_value(value: &Value) -> Option<Self> {
        match value.as_str() {
            Some("editable") => Some(Self::Editable),
            Some("readOnly") => Some(Self::ReadOnly),
            Some("disabled") => Some(Self::Disabled),
            _ => None,
        }
    }
}

// =============================================================================
// Validation feedback
// =============================================================================

/// Severity of a feedback entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A single validation message with its originating path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub path: String,
    pub message: String,
    pub severity: Severity,
}

impl Feedback {
    pub fn error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            severity: Severity::Error,
        }
    }

    pub fn warning(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            severity: Severity::Warning,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

// =============================================================================
// Data source
// =============================================================================

/// An option-list entry for choice-style fields.
///
/// Forms an ownership tree (parent owns children). Used only to populate
/// option lists; not part of form state proper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceItem {
    pub label: String,
    pub value: Value,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub children: Vec<DataSourceItem>,
}

impl DataSourceItem {
    pub fn new(label: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            disabled: false,
            children: Vec::new(),
        }
    }
}

// =============================================================================
// Layout hints
// =============================================================================

/// Layout configuration propagated to the (out-of-scope) layout layer.
///
/// The engine exposes each field's schema-declared hints unchanged; nested
/// containers merge child-over-parent via [`FormLayout::merged`]. This is
/// pure configuration propagation, not reactive form state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormLayout {
    pub label_position: Option<String>,
    pub label_width: Option<u32>,
    pub colon: Option<bool>,
}

impl FormLayout {
    /// Merge `child` over `self`: any hint the child declares wins.
    pub fn merged(&self, child: &FormLayout) -> FormLayout {
        FormLayout {
            label_position: child
                .label_position
                .clone()
                .or_else(|| self.label_position.clone()),
            label_width: child.label_width.or(self.label_width),
            colon: child.colon.or(self.colon),
        }
    }
}

// =============================================================================
// Submission
// =============================================================================

/// Outcome of [`crate::form::FormInstance::submit`].
///
/// With no invalid fields, `errors` is empty and `values` holds every
/// visible, non-disabled field's value. With invalid fields, `values` is the
/// best-effort current snapshot and `errors` is non-empty with a
/// deterministic order.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitResult {
    pub values: Value,
    pub errors: Vec<Feedback>,
}

impl SubmitResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pattern_cell_roundtrip() {
        for pattern in [Pattern::Editable, Pattern::ReadOnly, Pattern::Disabled] {
            assert_eq!(Pattern::from_value(&pattern.as_value()), Some(pattern));
        }
        assert_eq!(Pattern::from_value(&Value::Null), None);
        assert_eq!(Pattern::from_value(&json!("bogus")), None);
    }

    #[test]
    fn layout_merge_child_wins() {
        let parent = FormLayout {
            label_position: Some("left".into()),
            label_width: Some(120),
            colon: Some(true),
        };
        let child = FormLayout {
            label_position: Some("top".into()),
            label_width: None,
            colon: None,
        };
        let merged = parent.merged(&child);
        assert_eq!(merged.label_position.as_deref(), Some("top"));
        assert_eq!(merged.label_width, Some(120));
        assert_eq!(merged.colon, Some(true));
    }

    #[test]
    fn feedback_severity() {
        assert!(Feedback::error("a", "bad").is_error());
        assert!(!Feedback::warning("a", "meh").is_error());
    }
}
