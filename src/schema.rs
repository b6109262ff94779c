//! Declarative schema tree consumed by the field tree.
//!
//! The engine reads this structure to lazily materialize field nodes; it
//! does not own parsing or validation of the schema format itself beyond
//! what resolution needs. Property order is preserved (ordered maps) so that
//! children enumeration and validation walks are deterministic.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::path::Segment;
use crate::types::{DataSourceItem, FormLayout, Pattern};

/// Value kind of a schema node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaKind {
    String,
    Number,
    Boolean,
    #[default]
    Object,
    Array,
}

/// Condition making a field's visibility track another field's value.
///
/// Wired as an adapter reaction when the node materializes: the field is
/// visible exactly while the value at `path` equals `eq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisibleWhen {
    pub path: String,
    pub eq: Value,
}

/// One node of the declarative schema tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchemaNode {
    #[serde(rename = "type")]
    pub kind: SchemaKind,
    pub title: Option<String>,
    pub required: bool,
    /// UI component name, opaque to the engine.
    pub component: Option<String>,
    pub component_props: Map<String, Value>,
    /// Decorator configuration; carries the layout hints of [`FormLayout`].
    pub decorator_props: Map<String, Value>,
    /// Child declarations for object nodes, in declaration order.
    pub properties: IndexMap<String, SchemaNode>,
    /// Element declaration for array nodes (one schema for every slot).
    pub items: Option<Box<SchemaNode>>,
    /// Explicit pattern override for this subtree.
    pub pattern: Option<Pattern>,
    /// Static initial visibility.
    pub visible: bool,
    pub visible_when: Option<VisibleWhen>,
    /// Initial value when none is provided at form construction.
    pub default: Option<Value>,
    pub data_source: Vec<DataSourceItem>,
}

impl Default for SchemaNode {
    fn default() -> Self {
        Self {
            kind: SchemaKind::Object,
            title: None,
            required: false,
            component: None,
            component_props: Map::new(),
            decorator_props: Map::new(),
            properties: IndexMap::new(),
            items: None,
            pattern: None,
            visible: true,
            visible_when: None,
            default: None,
            data_source: Vec::new(),
        }
    }
}

impl SchemaNode {
    pub fn object() -> Self {
        Self::default()
    }

    pub fn string() -> Self {
        Self {
            kind: SchemaKind::String,
            ..Self::default()
        }
    }

    pub fn number() -> Self {
        Self {
            kind: SchemaKind::Number,
            ..Self::default()
        }
    }

    pub fn boolean() -> Self {
        Self {
            kind: SchemaKind::Boolean,
            ..Self::default()
        }
    }

    pub fn array(items: SchemaNode) -> Self {
        Self {
            kind: SchemaKind::Array,
            items: Some(Box::new(items)),
            ..Self::default()
        }
    }

    pub fn property(mut self, key: impl Into<String>, node: SchemaNode) -> Self {
        self.properties.insert(key.into(), node);
        self
    }

    pub fn require(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn with_pattern(mut self, pattern: Pattern) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn visible_when(mut self, path: impl Into<String>, eq: Value) -> Self {
        self.visible_when = Some(VisibleWhen {
            path: path.into(),
            eq,
        });
        self
    }

    pub fn with_data_source(mut self, items: Vec<DataSourceItem>) -> Self {
        self.data_source = items;
        self
    }

    /// Whether this node declares children.
    pub fn is_composite(&self) -> bool {
        matches!(self.kind, SchemaKind::Object | SchemaKind::Array)
    }

    /// The child schema a segment addresses, if declared.
    pub fn child(&self, segment: &Segment) -> Option<&SchemaNode> {
        match (self.kind, segment) {
            (SchemaKind::Object, Segment::Key(key)) => self.properties.get(key),
            (SchemaKind::Array, seg) => seg.as_index().and(self.items.as_deref()),
            _ => None,
        }
    }

    /// Schema-declared layout hints, exposed unchanged for the layout layer.
    pub fn layout(&self) -> FormLayout {
        serde_json::from_value(Value::Object(self.decorator_props.clone())).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_shapes() {
        let schema = SchemaNode::object()
            .property("name", SchemaNode::string().require().with_title("Name"))
            .property("age", SchemaNode::number())
            .property("tags", SchemaNode::array(SchemaNode::string()));

        assert_eq!(schema.kind, SchemaKind::Object);
        assert_eq!(schema.properties.len(), 3);
        assert!(schema.properties["name"].required);
        assert_eq!(
            schema.properties["tags"].items.as_ref().unwrap().kind,
            SchemaKind::String
        );
    }

    #[test]
    fn property_order_preserved() {
        let schema = SchemaNode::object()
            .property("z", SchemaNode::string())
            .property("a", SchemaNode::string())
            .property("m", SchemaNode::string());
        let keys: Vec<_> = schema.properties.keys().cloned().collect();
        assert_eq!(keys, ["z", "a", "m"]);
    }

    #[test]
    fn deserialize_from_json() {
        let schema: SchemaNode = serde_json::from_value(json!({
            "type": "object",
            "properties": {
                "email": {
                    "type": "string",
                    "title": "Email",
                    "required": true,
                    "component": "Input",
                    "decoratorProps": {"labelPosition": "left", "labelWidth": 96}
                },
                "newsletter": {"type": "boolean", "default": false},
                "frequency": {
                    "type": "string",
                    "visibleWhen": {"path": "newsletter", "eq": true}
                }
            }
        }))
        .unwrap();

        let email = &schema.properties["email"];
        assert!(email.required);
        assert_eq!(email.component.as_deref(), Some("Input"));
        assert_eq!(email.layout().label_width, Some(96));
        assert_eq!(email.layout().label_position.as_deref(), Some("left"));

        let frequency = &schema.properties["frequency"];
        assert_eq!(
            frequency.visible_when,
            Some(VisibleWhen {
                path: "newsletter".into(),
                eq: json!(true)
            })
        );
    }

    #[test]
    fn child_lookup_coerces_numeric_keys() {
        let schema = SchemaNode::object().property("rows", SchemaNode::array(SchemaNode::number()));
        let rows = &schema.properties["rows"];
        assert!(rows.child(&Segment::Index(3)).is_some());
        assert!(rows.child(&Segment::Key("3".into())).is_some());
        assert!(rows.child(&Segment::Key("x".into())).is_none());
    }
}
