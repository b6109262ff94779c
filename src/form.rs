//! FormInstance - the top-level handle over one form's reactive state.
//!
//! Owns the field tree, the form-level pattern, and the reset baseline.
//! Submission is the engine's outer protocol: validate every visible,
//! non-disabled field (deferred validators awaited to completion, no
//! fail-fast), then hand back the gated value snapshot together with the
//! error list. Concurrent submissions on one instance are rejected, not
//! queued.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::FormError;
use crate::node::FieldNode;
use crate::path::FieldPath;
use crate::reactive::{ObservableValue, ReactiveContext};
use crate::schema::{SchemaKind, SchemaNode};
use crate::tree::FieldTree;
use crate::types::{Feedback, Pattern, SubmitResult};

pub struct FormInstance {
    ctx: ReactiveContext,
    tree: FieldTree,
    /// Form-level pattern cell; the final fallback of every node's
    /// effective-pattern walk.
    pattern: ObservableValue,
    /// Snapshot restored by `reset`; advanced on successful submission.
    baseline: RefCell<Value>,
    submitting: Rc<Cell<bool>>,
    disposed: Cell<bool>,
}

/// Clears the in-flight flag when the submission future completes or is
/// dropped mid-flight.
struct SubmitGuard {
    flag: Rc<Cell<bool>>,
}

impl Drop for SubmitGuard {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}

impl FormInstance {
    /// Create a form bound to the registry's active adapter.
    ///
    /// Fails with [`FormError::NotConfigured`] when no adapter was
    /// registered.
    pub fn new(schema: SchemaNode, initial: Value) -> Result<Self, FormError> {
        Self::with_context(ReactiveContext::from_registry()?, schema, initial)
    }

    /// Create a form with an explicitly injected adapter binding.
    pub fn with_context(
        ctx: ReactiveContext,
        schema: SchemaNode,
        initial: Value,
    ) -> Result<Self, FormError> {
        let pattern = ctx.adapter().observable(Pattern::Editable.as_value());
        let tree = FieldTree::new(ctx.clone(), schema, initial, Rc::clone(&pattern))?;
        // Baseline includes schema defaults the initial values omitted.
        let baseline = tree.assemble(&FieldPath::root());
        debug!("form constructed");
        Ok(Self {
            ctx,
            tree,
            pattern,
            baseline: RefCell::new(baseline),
            submitting: Rc::new(Cell::new(false)),
            disposed: Cell::new(false),
        })
    }

    pub fn context(&self) -> &ReactiveContext {
        &self.ctx
    }

    // =========================================================================
    // Pattern
    // =========================================================================

    /// The form-level pattern; tracks when read reactively.
    pub fn pattern(&self) -> Pattern {
        Pattern::from_value(&self.pattern.get()).unwrap_or_default()
    }

    pub fn set_pattern(&self, pattern: Pattern) {
        self.pattern.set(pattern.as_value());
    }

    // =========================================================================
    // Fields
    // =========================================================================

    /// Resolve a field by its text path, materializing it on first access.
    pub fn field(&self, path: &str) -> Result<Rc<FieldNode>, FormError> {
        self.resolve(&FieldPath::parse(path)?)
    }

    pub fn resolve(&self, path: &FieldPath) -> Result<Rc<FieldNode>, FormError> {
        self.tree.resolve(path)
    }

    /// A node's children in deterministic order (schema declaration order
    /// for objects, value length for arrays).
    pub fn children(&self, path: &FieldPath) -> Result<Vec<Rc<FieldNode>>, FormError> {
        self.tree.children(path)
    }

    /// Dispose the subtree at `path` (children before parent, atomically)
    /// and drop its values. Returns the number of nodes disposed.
    pub fn remove_subtree(&self, path: &FieldPath) -> Result<usize, FormError> {
        self.tree.remove_subtree(path)
    }

    // =========================================================================
    // Values
    // =========================================================================

    /// The full value tree: materialized cells overlaid on staged values.
    /// Does not materialize anything.
    pub fn get_values(&self) -> Value {
        self.tree.assemble(&FieldPath::root())
    }

    /// Apply a bulk update as one atomic batch. Object entries merge per
    /// key recursively (absent keys keep their current value); arrays and
    /// leaves replace wholesale.
    pub fn set_values(&self, values: Value) -> Result<(), FormError> {
        let outcome = RefCell::new(Ok(()));
        self.ctx.adapter().batch(Box::new(|| {
            *outcome.borrow_mut() = self.merge_values(&FieldPath::root(), values);
        }));
        outcome.into_inner()
    }

    fn merge_values(&self, path: &FieldPath, value: Value) -> Result<(), FormError> {
        let kind = self.tree.schema_kind_at(path)?;
        match (kind, value) {
            (SchemaKind::Object, Value::Object(entries)) => {
                for (key, child) in entries {
                    self.merge_values(&path.child_key(&key), child)?;
                }
                Ok(())
            }
            (_, value) => self.tree.write_value(path, value),
        }
    }

    /// Restore the construction-time baseline (or the last successfully
    /// submitted snapshot) and clear all validation feedback, atomically.
    pub fn reset(&self) {
        debug!("form reset");
        let baseline = self.baseline.borrow().clone();
        self.ctx.adapter().batch(Box::new(|| {
            self.tree.reset_to(&baseline);
        }));
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Validate every visible, non-disabled field and collect the gated
    /// value snapshot.
    ///
    /// All validators run to completion (deferred ones awaited, no
    /// fail-fast), so `errors` is the complete set in a stable pre-order
    /// walk of the tree. On a clean pass the baseline advances to the
    /// submitted snapshot. A second `submit` while one is in flight returns
    /// [`FormError::SubmitInProgress`].
    pub async fn submit(&self) -> Result<SubmitResult, FormError> {
        if self.submitting.get() {
            return Err(FormError::SubmitInProgress);
        }
        self.submitting.set(true);
        let _guard = SubmitGuard {
            flag: Rc::clone(&self.submitting),
        };

        let targets = self.tree.validation_targets();
        info!(fields = targets.len(), "submit: validation pass");
        let outcomes = join_all(targets.iter().map(|node| node.run_validators())).await;

        let mut errors: Vec<Feedback> = Vec::new();
        self.ctx.adapter().batch(Box::new(|| {
            for (node, feedbacks) in targets.iter().zip(outcomes) {
                // A node disposed while its deferred validators ran no
                // longer participates; its results are discarded.
                if node.is_disposed() {
                    continue;
                }
                errors.extend(feedbacks.iter().filter(|f| f.is_error()).cloned());
                node.set_feedbacks(feedbacks);
            }
        }));

        let values = self.tree.collect_gated();
        if errors.is_empty() {
            // The full snapshot, not the gated one, so hidden fields keep
            // their values across a later reset.
            let snapshot = self.get_values();
            self.tree.commit_staging(snapshot.clone());
            *self.baseline.borrow_mut() = snapshot;
        }
        info!(errors = errors.len(), "submit finished");
        Ok(SubmitResult { values, errors })
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    /// Tear down every field node. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.get() {
            return;
        }
        debug!("form disposed");
        self.disposed.set(true);
        self.ctx.adapter().batch(Box::new(|| {
            self.tree.dispose_all();
        }));
    }
}

impl std::fmt::Debug for FormInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormInstance")
            .field("disposed", &self.disposed.get())
            .finish_non_exhaustive()
    }
}
