//! Field Tree - lazy materialization and addressing of field nodes.
//!
//! Nodes are stored in an index keyed by normalized path string, never by
//! raw object reference, so disposal and re-creation under the same path
//! cannot leave stale listeners attached to a freed node. Resolving a path
//! twice returns the same node instance until that node is disposed.
//!
//! Values for paths that have never been resolved live in a staging tree
//! (seeded from the construction values); materialized nodes own their value
//! in a reactive cell. Assembly overlays cells on the staging tree. Writes
//! (bulk `set_values` and per-node `set_value` alike) go through one shared
//! path that updates staging and every materialized descendant's cell.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;
use tracing::{debug, trace};

use crate::error::FormError;
use crate::node::FieldNode;
use crate::path::{FieldPath, Segment};
use crate::reactive::{ObservableValue, ReactionOptions, ReactiveContext};
use crate::schema::{SchemaKind, SchemaNode, VisibleWhen};
use crate::types::Pattern;

/// The mutable value state shared between the tree and its nodes' write
/// hooks. Nodes hold it weakly, so the node map never keeps itself alive.
struct TreeState {
    /// Materialized nodes keyed by canonical path string.
    nodes: RefCell<HashMap<String, Rc<FieldNode>>>,
    /// Values for unmaterialized paths; kept current by every write.
    staging: RefCell<Value>,
}

impl TreeState {
    /// Write `value` at `canonical`: update staging, then push the change
    /// into the cells of every materialized node at or under the path.
    /// The caller wraps this in an adapter batch.
    fn push_down(&self, canonical: &FieldPath, value: Value) {
        {
            let mut staging = self.staging.borrow_mut();
            store_value(&mut staging, canonical.segments(), value.clone());
        }
        let affected: Vec<Rc<FieldNode>> = self
            .nodes
            .borrow()
            .values()
            .filter(|node| node.path().starts_with(canonical))
            .cloned()
            .collect();
        for node in affected {
            let next = match node.path().strip_prefix(canonical) {
                Some(relative) if relative.is_root() => value.clone(),
                Some(relative) => lookup(&value, &relative).cloned().unwrap_or(Value::Null),
                None => continue,
            };
            node.write_cell(next);
        }
    }
}

pub struct FieldTree {
    ctx: ReactiveContext,
    schema: Rc<SchemaNode>,
    /// Form-level default pattern cell, shared with every node.
    form_pattern: ObservableValue,
    state: Rc<TreeState>,
}

impl FieldTree {
    pub(crate) fn new(
        ctx: ReactiveContext,
        schema: SchemaNode,
        initial: Value,
        form_pattern: ObservableValue,
    ) -> Result<Self, FormError> {
        let tree = Self {
            ctx,
            schema: Rc::new(schema),
            form_pattern,
            state: Rc::new(TreeState {
                nodes: RefCell::new(HashMap::new()),
                staging: RefCell::new(initial),
            }),
        };
        // An unresolvable root is fatal at construction time.
        tree.resolve(&FieldPath::root())?;
        Ok(tree)
    }

    /// Number of currently materialized nodes.
    pub fn materialized_count(&self) -> usize {
        self.state.nodes.borrow().len()
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Resolve a path to its field node, materializing it (and any missing
    /// ancestors) on first access. Identity-stable until disposal.
    pub fn resolve(&self, path: &FieldPath) -> Result<Rc<FieldNode>, FormError> {
        let (canonical, _) = self.locate(path)?;
        let key = canonical.to_string();
        if let Some(node) = self.state.nodes.borrow().get(&key) {
            return Ok(Rc::clone(node));
        }
        self.materialize(&canonical)
    }

    /// Canonicalize a path against the schema (coercing numeric keys to
    /// indices under arrays) and find the schema node it addresses.
    fn locate(&self, path: &FieldPath) -> Result<(FieldPath, &SchemaNode), FormError> {
        let mut canonical = FieldPath::root();
        let mut schema: &SchemaNode = &self.schema;
        for segment in path.segments() {
            match (schema.kind, segment) {
                (SchemaKind::Object, Segment::Key(key)) => match schema.properties.get(key) {
                    Some(child) => {
                        schema = child;
                        canonical = canonical.child_key(key);
                    }
                    None => {
                        return Err(FormError::path(
                            path.to_string(),
                            format!("no property `{key}` declared"),
                        ));
                    }
                },
                (SchemaKind::Array, segment) => {
                    let Some(index) = segment.as_index() else {
                        return Err(FormError::path(
                            path.to_string(),
                            "array nodes take numeric segments",
                        ));
                    };
                    let Some(items) = schema.items.as_deref() else {
                        return Err(FormError::path(
                            path.to_string(),
                            "array schema declares no items",
                        ));
                    };
                    schema = items;
                    canonical = canonical.child_index(index);
                }
                _ => {
                    return Err(FormError::path(
                        path.to_string(),
                        format!("segment below a {:?} leaf", schema.kind),
                    ));
                }
            }
        }
        Ok((canonical, schema))
    }

    fn materialize(&self, canonical: &FieldPath) -> Result<Rc<FieldNode>, FormError> {
        let parent = match canonical.parent() {
            Some(parent_path) => Some(self.resolve(&parent_path)?),
            None => None,
        };
        let (_, schema) = self.locate(canonical)?;
        let schema = Rc::new(schema.clone());

        let initial = {
            let staging = self.state.staging.borrow();
            lookup(&staging, canonical)
                .cloned()
                .or_else(|| schema.default.clone())
                .unwrap_or(Value::Null)
        };

        trace!(path = %canonical, "materialize field node");
        let node = FieldNode::new(
            canonical.clone(),
            Rc::clone(&schema),
            Rc::clone(self.ctx.adapter()),
            Rc::clone(&self.form_pattern),
            initial,
        );
        if let Some(parent) = &parent {
            node.set_parent(Rc::downgrade(parent));
        }
        let state = Rc::downgrade(&self.state);
        node.set_write_through(Rc::new(move |path: &FieldPath, value: Value| {
            if let Some(state) = state.upgrade() {
                state.push_down(path, value);
            }
        }));
        self.state
            .nodes
            .borrow_mut()
            .insert(canonical.to_string(), Rc::clone(&node));

        if let Some(condition) = &schema.visible_when
            && let Err(error) = self.wire_visibility(&node, condition)
        {
            // Leave no half-wired node behind: the next resolve must fail
            // the same way, not hand back a node whose gating never runs.
            self.state.nodes.borrow_mut().remove(&canonical.to_string());
            node.dispose();
            return Err(error);
        }

        Ok(node)
    }

    fn wire_visibility(
        &self,
        node: &Rc<FieldNode>,
        condition: &VisibleWhen,
    ) -> Result<(), FormError> {
        let target_path = FieldPath::parse(&condition.path)?;
        let (target_canonical, _) = self.locate(&target_path)?;
        // A self-referential condition cannot be wired.
        if target_canonical == *node.path() {
            return Ok(());
        }
        let target = self.resolve(&target_canonical)?;
        let target_cell = target.value_cell();
        let visible_cell = node.visible_cell();
        let expected = condition.eq.clone();
        let subscription = self.ctx.adapter().reaction(
            Box::new(move || target_cell.get()),
            Box::new(move |value| visible_cell.set(Value::Bool(value == expected))),
            ReactionOptions::immediate(),
        );
        node.add_subscription(subscription);
        Ok(())
    }

    /// Children in schema declaration order (objects) or current value
    /// length (arrays; recomputed reactively as the length changes).
    pub fn children(&self, path: &FieldPath) -> Result<Vec<Rc<FieldNode>>, FormError> {
        let node = self.resolve(path)?;
        let base = node.path().clone();
        match node.schema().kind {
            SchemaKind::Object => {
                let keys: Vec<String> = node.schema().properties.keys().cloned().collect();
                keys.iter()
                    .map(|key| self.resolve(&base.child_key(key)))
                    .collect()
            }
            SchemaKind::Array => {
                let len = node.value().as_array().map_or(0, Vec::len);
                (0..len)
                    .map(|index| self.resolve(&base.child_index(index)))
                    .collect()
            }
            _ => Ok(Vec::new()),
        }
    }

    // =========================================================================
    // Removal & disposal
    // =========================================================================

    /// Dispose the node subtree at `path` (children before parent, one
    /// atomic batch) and drop its staged value. Returns how many nodes were
    /// disposed. Resolving the path afterwards re-materializes fresh nodes.
    pub fn remove_subtree(&self, path: &FieldPath) -> Result<usize, FormError> {
        let (canonical, _) = self.locate(path)?;
        let mut doomed: Vec<Rc<FieldNode>> = self
            .state
            .nodes
            .borrow()
            .values()
            .filter(|node| node.path().starts_with(&canonical))
            .cloned()
            .collect();
        // deepest first, so children observe no partially-torn-down parent
        doomed.sort_by(|a, b| {
            b.path()
                .depth()
                .cmp(&a.path().depth())
                .then_with(|| b.path().to_string().cmp(&a.path().to_string()))
        });
        let count = doomed.len();
        debug!(path = %canonical, count, "remove subtree");

        self.ctx.adapter().batch(Box::new(|| {
            for node in &doomed {
                node.dispose();
            }
        }));
        {
            let mut nodes = self.state.nodes.borrow_mut();
            for node in &doomed {
                nodes.remove(&node.path().to_string());
            }
        }
        remove_value(&mut self.state.staging.borrow_mut(), &canonical);
        Ok(count)
    }

    /// Dispose every node. Called when the owning form is torn down.
    pub(crate) fn dispose_all(&self) {
        let mut nodes: Vec<Rc<FieldNode>> = self.state.nodes.borrow().values().cloned().collect();
        nodes.sort_by_key(|node| std::cmp::Reverse(node.path().depth()));
        for node in &nodes {
            node.dispose();
        }
        self.state.nodes.borrow_mut().clear();
    }

    // =========================================================================
    // Values
    // =========================================================================

    /// Write a value at `path` into staging and every materialized node
    /// under it. The caller wraps this in an adapter batch.
    pub(crate) fn write_value(&self, path: &FieldPath, value: Value) -> Result<(), FormError> {
        let (canonical, _) = self.locate(path)?;
        self.state.push_down(&canonical, value);
        Ok(())
    }

    /// Restore every materialized node (and staging) from a baseline value
    /// tree, clearing all validation feedback. The caller batches.
    pub(crate) fn reset_to(&self, baseline: &Value) {
        *self.state.staging.borrow_mut() = baseline.clone();
        let mut nodes: Vec<Rc<FieldNode>> = self.state.nodes.borrow().values().cloned().collect();
        nodes.sort_by_key(|node| node.path().depth());
        for node in &nodes {
            let value = lookup(baseline, node.path())
                .cloned()
                .or_else(|| node.schema().default.clone())
                .unwrap_or(Value::Null);
            node.write_cell(value);
            node.clear_feedbacks();
        }
    }

    /// Align staging with a committed snapshot so unmaterialized lookups
    /// reflect it.
    pub(crate) fn commit_staging(&self, snapshot: Value) {
        *self.state.staging.borrow_mut() = snapshot;
    }

    /// Assemble the full value tree without materializing anything new:
    /// materialized cells overlaid on the staging tree. Key order follows
    /// the schema, so iteration is deterministic.
    pub(crate) fn assemble(&self, path: &FieldPath) -> Value {
        let node = self.state.nodes.borrow().get(&path.to_string()).cloned();
        let Some(node) = node else {
            // Unmaterialized: the staged value, or what materialization
            // would seed from the schema default.
            let staged = lookup(&self.state.staging.borrow(), path).cloned();
            return staged
                .or_else(|| {
                    self.locate(path)
                        .ok()
                        .and_then(|(_, schema)| schema.default.clone())
                })
                .unwrap_or(Value::Null);
        };
        match node.schema().kind {
            SchemaKind::Object => {
                let mut out = serde_json::Map::new();
                let keys: Vec<String> = node.schema().properties.keys().cloned().collect();
                for key in keys {
                    let child = self.assemble(&node.path().child_key(&key));
                    if !child.is_null() {
                        out.insert(key, child);
                    }
                }
                Value::Object(out)
            }
            SchemaKind::Array => {
                let len = node.value().as_array().map_or(0, Vec::len);
                let mut out = Vec::with_capacity(len);
                for index in 0..len {
                    out.push(self.assemble(&node.path().child_index(index)));
                }
                Value::Array(out)
            }
            _ => node.value(),
        }
    }

    /// Collect values for submission: every visible, non-disabled field,
    /// materializing as needed. Invisible and disabled subtrees are excluded
    /// from the result entirely.
    pub(crate) fn collect_gated(&self) -> Value {
        self.collect(&FieldPath::root())
            .unwrap_or(Value::Object(serde_json::Map::new()))
    }

    fn collect(&self, path: &FieldPath) -> Option<Value> {
        let node = self.resolve(path).ok()?;
        if !node.visible() || node.effective_pattern() == Pattern::Disabled {
            return None;
        }
        match node.schema().kind {
            SchemaKind::Object => {
                let mut out = serde_json::Map::new();
                let keys: Vec<String> = node.schema().properties.keys().cloned().collect();
                for key in keys {
                    if let Some(child) = self.collect(&node.path().child_key(&key))
                        && !child.is_null()
                    {
                        out.insert(key, child);
                    }
                }
                Some(Value::Object(out))
            }
            SchemaKind::Array => {
                let len = node.value().as_array().map_or(0, Vec::len);
                let mut out = Vec::new();
                for index in 0..len {
                    if let Some(child) = self.collect(&node.path().child_index(index)) {
                        out.push(child);
                    }
                }
                Some(Value::Array(out))
            }
            _ => Some(node.value()),
        }
    }

    /// The nodes submission validates, in a stable pre-order walk.
    /// Unresolvable branches are skipped rather than failing the pass.
    pub(crate) fn validation_targets(&self) -> Vec<Rc<FieldNode>> {
        let mut out = Vec::new();
        self.gather(&FieldPath::root(), &mut out);
        out
    }

    fn gather(&self, path: &FieldPath, out: &mut Vec<Rc<FieldNode>>) {
        let Ok(node) = self.resolve(path) else {
            return;
        };
        if !node.visible() || node.effective_pattern() == Pattern::Disabled {
            return;
        }
        out.push(Rc::clone(&node));
        match node.schema().kind {
            SchemaKind::Object => {
                let keys: Vec<String> = node.schema().properties.keys().cloned().collect();
                for key in keys {
                    self.gather(&node.path().child_key(&key), out);
                }
            }
            SchemaKind::Array => {
                let len = node.value().as_array().map_or(0, Vec::len);
                for index in 0..len {
                    self.gather(&node.path().child_index(index), out);
                }
            }
            _ => {}
        }
    }

    /// Kind of the schema node a path addresses.
    pub(crate) fn schema_kind_at(&self, path: &FieldPath) -> Result<SchemaKind, FormError> {
        self.locate(path).map(|(_, schema)| schema.kind)
    }
}

impl std::fmt::Debug for FieldTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldTree")
            .field("materialized", &self.materialized_count())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Value-tree helpers
// =============================================================================

fn lookup<'a>(root: &'a Value, path: &FieldPath) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.segments() {
        current = match segment {
            Segment::Key(key) => match current {
                Value::Object(map) => map.get(key)?,
                Value::Array(items) => items.get(segment.as_index()?)?,
                _ => return None,
            },
            Segment::Index(index) => current.as_array()?.get(*index)?,
        };
    }
    Some(current)
}

fn store_value(target: &mut Value, segments: &[Segment], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *target = value;
        return;
    };
    match head {
        Segment::Key(key) => {
            if !target.is_object() {
                *target = Value::Object(serde_json::Map::new());
            }
            if let Some(map) = target.as_object_mut() {
                let slot = map.entry(key.clone()).or_insert(Value::Null);
                store_value(slot, rest, value);
            }
        }
        Segment::Index(index) => {
            if !target.is_array() {
                *target = Value::Array(Vec::new());
            }
            if let Some(items) = target.as_array_mut() {
                while items.len() <= *index {
                    items.push(Value::Null);
                }
                store_value(&mut items[*index], rest, value);
            }
        }
    }
}

fn remove_value(root: &mut Value, path: &FieldPath) {
    let Some(parent) = path.parent() else {
        *root = Value::Null;
        return;
    };
    let Some(last) = path.segments().last() else {
        return;
    };
    let mut current = root;
    for segment in parent.segments() {
        let next = match segment {
            Segment::Key(key) => match current {
                Value::Object(map) => map.get_mut(key),
                Value::Array(items) => segment.as_index().and_then(|i| items.get_mut(i)),
                _ => None,
            },
            Segment::Index(index) => current.as_array_mut().and_then(|items| items.get_mut(*index)),
        };
        match next {
            Some(value) => current = value,
            None => return,
        }
    }
    match (current, last) {
        (Value::Object(map), Segment::Key(key)) => {
            map.shift_remove(key);
        }
        (Value::Array(items), segment) => {
            if let Some(index) = segment.as_index()
                && index < items.len()
            {
                items.remove(index);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::GraphAdapter;
    use serde_json::json;

    fn test_tree(schema: SchemaNode, initial: Value) -> (FieldTree, GraphAdapter) {
        let adapter = GraphAdapter::new();
        let ctx = ReactiveContext::new(Rc::new(adapter.clone()));
        let form_pattern = ctx.adapter().observable(Pattern::Editable.as_value());
        let tree = FieldTree::new(ctx, schema, initial, form_pattern).unwrap();
        (tree, adapter)
    }

    fn address_schema() -> SchemaNode {
        SchemaNode::object()
            .property("name", SchemaNode::string())
            .property(
                "address",
                SchemaNode::object()
                    .property("city", SchemaNode::string())
                    .property("zip", SchemaNode::string()),
            )
            .property("tags", SchemaNode::array(SchemaNode::string()))
    }

    #[test]
    fn resolve_is_identity_stable() {
        let (tree, _) = test_tree(address_schema(), json!({}));
        let path = FieldPath::parse("address.city").unwrap();
        let first = tree.resolve(&path).unwrap();
        let second = tree.resolve(&path).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn materialization_is_lazy() {
        let (tree, _) = test_tree(address_schema(), json!({}));
        // only the root exists up front
        assert_eq!(tree.materialized_count(), 1);

        tree.resolve(&FieldPath::parse("address.zip").unwrap()).unwrap();
        // root + address + zip; city untouched
        assert_eq!(tree.materialized_count(), 3);
    }

    #[test]
    fn resolve_rejects_undeclared_paths() {
        let (tree, _) = test_tree(address_schema(), json!({}));
        let err = tree.resolve(&FieldPath::parse("address.country").unwrap());
        assert!(matches!(err, Err(FormError::PathResolution { .. })));
        let err = tree.resolve(&FieldPath::parse("name.deeper").unwrap());
        assert!(matches!(err, Err(FormError::PathResolution { .. })));
    }

    #[test]
    fn numeric_keys_coerce_under_arrays() {
        let (tree, _) = test_tree(address_schema(), json!({"tags": ["a", "b"]}));
        let bracketed = tree.resolve(&FieldPath::parse("tags[1]").unwrap()).unwrap();
        let dotted = tree.resolve(&FieldPath::parse("tags.1").unwrap()).unwrap();
        assert!(Rc::ptr_eq(&bracketed, &dotted));
        assert_eq!(bracketed.value(), json!("b"));
    }

    #[test]
    fn children_follow_schema_order_and_array_length() {
        let (tree, _) = test_tree(address_schema(), json!({"tags": ["x", "y", "z"]}));
        let object_children = tree.children(&FieldPath::parse("address").unwrap()).unwrap();
        let keys: Vec<String> = object_children
            .iter()
            .map(|node| node.path().to_string())
            .collect();
        assert_eq!(keys, ["address.city", "address.zip"]);

        let array_children = tree.children(&FieldPath::parse("tags").unwrap()).unwrap();
        assert_eq!(array_children.len(), 3);
        assert_eq!(array_children[2].value(), json!("z"));
    }

    #[test]
    fn initial_values_flow_from_staging_and_defaults() {
        let schema = SchemaNode::object()
            .property("a", SchemaNode::string())
            .property("b", SchemaNode::string().with_default(json!("fallback")));
        let (tree, _) = test_tree(schema, json!({"a": "given"}));
        assert_eq!(
            tree.resolve(&FieldPath::parse("a").unwrap()).unwrap().value(),
            json!("given")
        );
        assert_eq!(
            tree.resolve(&FieldPath::parse("b").unwrap()).unwrap().value(),
            json!("fallback")
        );
    }

    #[test]
    fn composite_writes_reach_descendants_and_staging() {
        let (tree, _) = test_tree(
            address_schema(),
            json!({"address": {"city": "Paris", "zip": "75000"}}),
        );
        let city = tree.resolve(&FieldPath::parse("address.city").unwrap()).unwrap();
        let address = tree.resolve(&FieldPath::parse("address").unwrap()).unwrap();

        address.set_value(json!({"city": "Lyon", "zip": "69000"}));

        // the materialized child cell follows the composite write
        assert_eq!(city.value(), json!("Lyon"));
        // and assembly sees it for unmaterialized children too
        assert_eq!(
            tree.assemble(&FieldPath::root())["address"],
            json!({"city": "Lyon", "zip": "69000"})
        );
    }

    #[test]
    fn remove_subtree_disposes_children_first() {
        let (tree, _) = test_tree(address_schema(), json!({}));
        let city = tree.resolve(&FieldPath::parse("address.city").unwrap()).unwrap();
        let address = tree.resolve(&FieldPath::parse("address").unwrap()).unwrap();

        let count = tree.remove_subtree(&FieldPath::parse("address").unwrap()).unwrap();
        // address + city; zip was never materialized
        assert_eq!(count, 2);
        assert!(city.is_disposed());
        assert!(address.is_disposed());

        // re-resolving yields a fresh identity
        let fresh = tree.resolve(&FieldPath::parse("address.city").unwrap()).unwrap();
        assert!(!Rc::ptr_eq(&fresh, &city));
        assert!(!fresh.is_disposed());
    }

    #[test]
    fn visible_when_tracks_controlling_field() {
        let schema = SchemaNode::object()
            .property("newsletter", SchemaNode::boolean())
            .property(
                "frequency",
                SchemaNode::string().visible_when("newsletter", json!(true)),
            );
        let (tree, _) = test_tree(schema, json!({"newsletter": false}));

        let frequency = tree.resolve(&FieldPath::parse("frequency").unwrap()).unwrap();
        assert!(!frequency.visible());

        let newsletter = tree.resolve(&FieldPath::parse("newsletter").unwrap()).unwrap();
        newsletter.set_value(json!(true));
        assert!(frequency.visible());

        newsletter.set_value(json!(false));
        assert!(!frequency.visible());
    }

    #[test]
    fn visible_when_stops_after_dispose() {
        let schema = SchemaNode::object()
            .property("gate", SchemaNode::boolean())
            .property(
                "detail",
                SchemaNode::string().visible_when("gate", json!(true)),
            );
        let (tree, _) = test_tree(schema, json!({"gate": true}));
        let detail = tree.resolve(&FieldPath::parse("detail").unwrap()).unwrap();
        assert!(detail.visible());

        detail.dispose();
        let gate = tree.resolve(&FieldPath::parse("gate").unwrap()).unwrap();
        gate.set_value(json!(false));
        // the reaction was torn down with the node
        assert!(detail.visible());
    }

    #[test]
    fn failed_visibility_wiring_is_not_cached() {
        let schema = SchemaNode::object().property(
            "wrap",
            SchemaNode::object().property(
                "field",
                SchemaNode::string().visible_when("no_such_target", json!(true)),
            ),
        );
        let (tree, _) = test_tree(schema, json!({}));
        let path = FieldPath::parse("wrap.field").unwrap();

        assert!(matches!(
            tree.resolve(&path),
            Err(FormError::PathResolution { .. })
        ));
        // the failure repeats; no half-wired node was left in the index
        assert!(matches!(
            tree.resolve(&path),
            Err(FormError::PathResolution { .. })
        ));
        // root + wrap (the ancestor) only
        assert_eq!(tree.materialized_count(), 2);
    }
}
