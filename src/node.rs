//! FieldNode - the unit of observable form state.
//!
//! Each node owns reactive cells for its value, pattern override,
//! visibility, and validation feedback, all registered through the active
//! reactive adapter. Nodes are created lazily by the field tree the first
//! time their path resolves, and disposed when their subtree is removed.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use bitflags::bitflags;
use serde_json::Value;
use tracing::trace;

use crate::path::{FieldPath, Segment};
use crate::reactive::{Disposer, ObservableValue, ReactiveAdapter};
use crate::schema::SchemaNode;
use crate::types::{DataSourceItem, Feedback, FormLayout, Pattern};
use crate::validate::Validator;

/// Tree-provided write hook: pushes a value into staging and every
/// materialized node under the given path.
pub(crate) type WriteThrough = Rc<dyn Fn(&FieldPath, Value)>;

bitflags! {
    /// Interaction state of a node.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NodeFlags: u8 {
        /// The value has been written through `set_value` at least once.
        const TOUCHED = 1 << 0;
        /// A validation pass is currently running for this node.
        const VALIDATING = 1 << 1;
        /// The node has been torn down; reactive state is inert.
        const DISPOSED = 1 << 2;
    }
}

/// A single addressable unit of reactive form state.
pub struct FieldNode {
    path: FieldPath,
    schema: Rc<SchemaNode>,
    adapter: Rc<dyn ReactiveAdapter>,
    parent: RefCell<Weak<FieldNode>>,
    /// Form-level default pattern cell, shared across the whole tree.
    form_pattern: ObservableValue,
    value: ObservableValue,
    /// Set by the tree at materialization; routes `set_value` through the
    /// shared value machinery so descendants and staging stay consistent.
    write_through: RefCell<Option<WriteThrough>>,
    /// `Null` means "inherit"; otherwise a pattern string.
    pattern: ObservableValue,
    visible: ObservableValue,
    /// Serialized `Vec<Feedback>`, replaced atomically per validation pass.
    feedbacks: ObservableValue,
    validators: RefCell<Vec<Validator>>,
    /// Opaque slot owned by the UI layer.
    component_ref: RefCell<Option<Box<dyn Any>>>,
    flags: Cell<NodeFlags>,
    /// Adapter subscriptions owned by this node, torn down on dispose.
    subscriptions: RefCell<Vec<Disposer>>,
}

impl FieldNode {
    pub(crate) fn new(
        path: FieldPath,
        schema: Rc<SchemaNode>,
        adapter: Rc<dyn ReactiveAdapter>,
        form_pattern: ObservableValue,
        initial: Value,
    ) -> Rc<Self> {
        // Composite values can be large; shallow cells skip the deep
        // comparison and always notify.
        let value = if schema.is_composite() {
            adapter.shallow_observable(initial)
        } else {
            adapter.observable(initial)
        };
        let pattern = adapter.observable(
            schema
                .pattern
                .map(Pattern::as_value)
                .unwrap_or(Value::Null),
        );
        let visible = adapter.observable(Value::Bool(schema.visible));
        let feedbacks = adapter.observable(Value::Array(Vec::new()));

        let mut validators = Vec::new();
        if schema.required {
            validators.push(Validator::required(field_label(&path, &schema)));
        }

        Rc::new(Self {
            path,
            schema,
            adapter,
            parent: RefCell::new(Weak::new()),
            form_pattern,
            value,
            write_through: RefCell::new(None),
            pattern,
            visible,
            feedbacks,
            validators: RefCell::new(validators),
            component_ref: RefCell::new(None),
            flags: Cell::new(NodeFlags::empty()),
            subscriptions: RefCell::new(Vec::new()),
        })
    }

    pub fn path(&self) -> &FieldPath {
        &self.path
    }

    pub fn schema(&self) -> &SchemaNode {
        &self.schema
    }

    pub(crate) fn set_parent(&self, parent: Weak<FieldNode>) {
        *self.parent.borrow_mut() = parent;
    }

    pub fn parent(&self) -> Option<Rc<FieldNode>> {
        self.parent.borrow().upgrade()
    }

    // =========================================================================
    // Value
    // =========================================================================

    /// Current value; tracks when read inside a reactive computation.
    pub fn value(&self) -> Value {
        self.value.get()
    }

    /// Current value without establishing a dependency.
    pub fn peek_value(&self) -> Value {
        self.value.peek()
    }

    /// Write the value as one atomic change. Dependent computations (other
    /// fields' visibility, computed values) observe a single update.
    ///
    /// Writes go through the owning tree, so a composite value also lands
    /// in staging and in every materialized descendant's cell.
    pub fn set_value(&self, value: Value) {
        trace!(path = %self.path, "set_value");
        self.flags.set(self.flags.get() | NodeFlags::TOUCHED);
        let write_through = self.write_through.borrow().clone();
        match write_through {
            Some(write) => {
                let path = self.path.clone();
                self.adapter.action(Box::new(move || write(&path, value)));
            }
            None => {
                let cell = Rc::clone(&self.value);
                self.adapter.action(Box::new(move || cell.set(value)));
            }
        }
    }

    pub(crate) fn set_write_through(&self, write: WriteThrough) {
        *self.write_through.borrow_mut() = Some(write);
    }

    /// Raw cell write used by bulk operations; no touch flag, no wrapping
    /// action (the caller batches).
    pub(crate) fn write_cell(&self, value: Value) {
        self.value.set(value);
    }

    pub(crate) fn value_cell(&self) -> ObservableValue {
        Rc::clone(&self.value)
    }

    pub(crate) fn visible_cell(&self) -> ObservableValue {
        Rc::clone(&self.visible)
    }

    // =========================================================================
    // Pattern
    // =========================================================================

    /// This node's explicit pattern, if any; `None` means inherit.
    pub fn pattern_override(&self) -> Option<Pattern> {
        Pattern::from_value(&self.pattern.get())
    }

    /// Override the inherited pattern for this node and its descendants
    /// (nearest override wins). `None` restores inheritance.
    pub fn set_pattern(&self, pattern: Option<Pattern>) {
        self.pattern
            .set(pattern.map(Pattern::as_value).unwrap_or(Value::Null));
    }

    /// The nearest explicitly-set pattern walking from this node to the
    /// form root, with the form-level pattern as the final fallback.
    pub fn effective_pattern(&self) -> Pattern {
        if let Some(pattern) = self.pattern_override() {
            return pattern;
        }
        let mut ancestor = self.parent();
        while let Some(node) = ancestor {
            if let Some(pattern) = node.pattern_override() {
                return pattern;
            }
            ancestor = node.parent();
        }
        Pattern::from_value(&self.form_pattern.get()).unwrap_or_default()
    }

    // =========================================================================
    // Visibility
    // =========================================================================

    pub fn visible(&self) -> bool {
        self.visible.get().as_bool().unwrap_or(true)
    }

    pub fn set_visible(&self, visible: bool) {
        self.visible.set(Value::Bool(visible));
    }

    // =========================================================================
    // Validation feedback
    // =========================================================================

    pub fn feedbacks(&self) -> Vec<Feedback> {
        serde_json::from_value(self.feedbacks.get()).unwrap_or_default()
    }

    pub fn errors(&self) -> Vec<Feedback> {
        self.feedbacks().into_iter().filter(Feedback::is_error).collect()
    }

    pub fn warnings(&self) -> Vec<Feedback> {
        self.feedbacks()
            .into_iter()
            .filter(|feedback| !feedback.is_error())
            .collect()
    }

    /// Replace all feedback in one atomic cell write.
    pub fn set_feedbacks(&self, feedbacks: Vec<Feedback>) {
        let serialized =
            serde_json::to_value(feedbacks).unwrap_or_else(|_| Value::Array(Vec::new()));
        self.feedbacks.set(serialized);
    }

    pub fn clear_feedbacks(&self) {
        self.feedbacks.set(Value::Array(Vec::new()));
    }

    pub fn add_validator(&self, validator: Validator) {
        self.validators.borrow_mut().push(validator);
    }

    /// Run this node's validators in declaration order without applying the
    /// result. Deferred validators are awaited to completion.
    pub(crate) async fn run_validators(&self) -> Vec<Feedback> {
        self.flags.set(self.flags.get() | NodeFlags::VALIDATING);
        let value = self.peek_value();
        let mut out = Vec::new();
        // Cloned out per rule so no borrow spans an await; rules appended
        // while a deferred rule is parked run at the tail of this pass.
        let mut index = 0;
        loop {
            let validator = {
                let validators = self.validators.borrow();
                match validators.get(index) {
                    Some(validator) => validator.clone(),
                    None => break,
                }
            };
            if let Some(feedback) = validator.run(&self.path, &value).await {
                out.push(feedback);
            }
            index += 1;
        }
        self.flags.set(self.flags.get() - NodeFlags::VALIDATING);
        out
    }

    /// Validate this node and apply the feedback. Returns whether any
    /// error-severity entry exists. If the node was disposed while deferred
    /// validators ran, the result is discarded.
    pub async fn validate(&self) -> bool {
        let feedbacks = self.run_validators().await;
        if self.is_disposed() {
            return false;
        }
        let has_error = feedbacks.iter().any(Feedback::is_error);
        self.set_feedbacks(feedbacks);
        has_error
    }

    // =========================================================================
    // UI hand-off
    // =========================================================================

    /// Attach the UI layer's opaque component handle.
    pub fn set_component_ref(&self, component: Box<dyn Any>) {
        *self.component_ref.borrow_mut() = Some(component);
    }

    pub fn take_component_ref(&self) -> Option<Box<dyn Any>> {
        self.component_ref.borrow_mut().take()
    }

    pub fn has_component_ref(&self) -> bool {
        self.component_ref.borrow().is_some()
    }

    /// Option list declared by the schema for choice-style components.
    pub fn data_source(&self) -> &[DataSourceItem] {
        &self.schema.data_source
    }

    /// Schema-declared layout hints, unchanged, for the layout layer.
    pub fn layout(&self) -> FormLayout {
        self.schema.layout()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub fn touched(&self) -> bool {
        self.flags.get().contains(NodeFlags::TOUCHED)
    }

    pub fn is_disposed(&self) -> bool {
        self.flags.get().contains(NodeFlags::DISPOSED)
    }

    pub(crate) fn add_subscription(&self, subscription: Disposer) {
        self.subscriptions.borrow_mut().push(subscription);
    }

    /// Tear down every adapter subscription owned by this node. Idempotent:
    /// a second call is a no-op.
    pub fn dispose(&self) {
        if self.is_disposed() {
            return;
        }
        trace!(path = %self.path, "dispose");
        self.flags.set(self.flags.get() | NodeFlags::DISPOSED);
        for subscription in self.subscriptions.borrow_mut().drain(..) {
            subscription.dispose();
        }
        self.component_ref.borrow_mut().take();
    }
}

impl std::fmt::Debug for FieldNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldNode")
            .field("path", &self.path.to_string())
            .field("flags", &self.flags.get())
            .finish_non_exhaustive()
    }
}

/// Human-readable label for built-in messages: the schema title, falling
/// back to the last path segment.
fn field_label(path: &FieldPath, schema: &SchemaNode) -> String {
    if let Some(title) = &schema.title {
        return title.clone();
    }
    match path.segments().last() {
        Some(Segment::Key(key)) => key.clone(),
        Some(Segment::Index(index)) => format!("item {index}"),
        None => "value".to_owned(),
    }
}
