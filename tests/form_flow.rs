//! End-to-end flows through the public API: construction, value round
//! trips, reactivity, validation, submission, reset, and disposal.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::FutureExt;
use futures::executor::block_on;
use serde_json::{Value, json};

use formwork::{
    FieldPath, FormError, FormInstance, GraphAdapter, Pattern, ReactiveAdapter, ReactiveContext,
    SchemaNode, Validator, reset_reactive_adapter, set_reactive_adapter,
};

fn graph_form(schema: SchemaNode, initial: Value) -> (FormInstance, GraphAdapter) {
    let adapter = GraphAdapter::new();
    let ctx = ReactiveContext::new(Rc::new(adapter.clone()));
    let form = FormInstance::with_context(ctx, schema, initial).unwrap();
    (form, adapter)
}

#[test]
fn construction_requires_an_adapter() {
    reset_reactive_adapter();
    let schema = SchemaNode::object().property("a", SchemaNode::string());
    assert!(matches!(
        FormInstance::new(schema.clone(), json!({})),
        Err(FormError::NotConfigured)
    ));

    set_reactive_adapter(Rc::new(GraphAdapter::new()));
    assert!(FormInstance::new(schema, json!({})).is_ok());
    reset_reactive_adapter();
}

#[test]
fn set_value_then_submit_round_trips() {
    let schema = SchemaNode::object()
        .property("a", SchemaNode::number())
        .property("b", SchemaNode::object().property("c", SchemaNode::number()));
    let (form, _) = graph_form(schema, json!({"a": 1, "b": {"c": 0}}));

    form.field("b.c").unwrap().set_value(json!(2));

    let result = block_on(form.submit()).unwrap();
    assert!(result.is_ok());
    assert_eq!(result.values, json!({"a": 1, "b": {"c": 2}}));
}

#[test]
fn required_violation_reports_but_still_snapshots() {
    let schema = SchemaNode::object().property("a", SchemaNode::string().require().with_title("A"));
    let (form, _) = graph_form(schema, json!({"a": ""}));

    let result = block_on(form.submit()).unwrap();
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].path, "a");
    assert_eq!(result.values["a"], json!(""));
}

#[test]
fn field_resolution_is_identity_stable() {
    let schema = SchemaNode::object()
        .property("user", SchemaNode::object().property("name", SchemaNode::string()));
    let (form, _) = graph_form(schema, json!({}));

    let first = form.field("user.name").unwrap();
    let second = form.field("user.name").unwrap();
    assert!(Rc::ptr_eq(&first, &second));

    form.remove_subtree(&FieldPath::parse("user").unwrap()).unwrap();
    let third = form.field("user.name").unwrap();
    assert!(!Rc::ptr_eq(&first, &third));
}

#[test]
fn field_values_are_observable() {
    let schema = SchemaNode::object().property("count", SchemaNode::number());
    let (form, adapter) = graph_form(schema, json!({"count": 0}));

    let count = form.field("count").unwrap();
    let seen: Rc<RefCell<Vec<Value>>> = Rc::new(RefCell::new(Vec::new()));
    let seen_clone = Rc::clone(&seen);
    let count_clone = Rc::clone(&count);
    let _sub = adapter.autorun(Box::new(move || {
        seen_clone.borrow_mut().push(count_clone.value());
    }));

    count.set_value(json!(1));
    count.set_value(json!(2));
    assert_eq!(*seen.borrow(), vec![json!(0), json!(1), json!(2)]);
}

#[test]
fn bulk_set_values_notifies_once_per_observer() {
    let schema = SchemaNode::object()
        .property("x", SchemaNode::number())
        .property("y", SchemaNode::number());
    let (form, adapter) = graph_form(schema, json!({"x": 0, "y": 0}));

    let x = form.field("x").unwrap();
    let y = form.field("y").unwrap();
    let runs = Rc::new(Cell::new(0u32));
    let runs_clone = Rc::clone(&runs);
    let _sub = adapter.autorun(Box::new(move || {
        let _ = x.value();
        let _ = y.value();
        runs_clone.set(runs_clone.get() + 1);
    }));
    assert_eq!(runs.get(), 1);

    form.set_values(json!({"x": 5, "y": 7})).unwrap();
    // both mutations land in one recomputation
    assert_eq!(runs.get(), 2);
    assert_eq!(form.get_values(), json!({"x": 5, "y": 7}));
}

#[test]
fn pattern_inheritance_and_override() {
    let schema = SchemaNode::object().property(
        "section",
        SchemaNode::object().property("field", SchemaNode::string()),
    );
    let (form, _) = graph_form(schema, json!({}));
    let field = form.field("section.field").unwrap();

    assert_eq!(field.effective_pattern(), Pattern::Editable);

    form.set_pattern(Pattern::ReadOnly);
    assert_eq!(field.effective_pattern(), Pattern::ReadOnly);

    form.field("section")
        .unwrap()
        .set_pattern(Some(Pattern::Disabled));
    assert_eq!(field.effective_pattern(), Pattern::Disabled);

    field.set_pattern(Some(Pattern::Editable));
    assert_eq!(field.effective_pattern(), Pattern::Editable);

    // back to inheriting from the section
    field.set_pattern(None);
    assert_eq!(field.effective_pattern(), Pattern::Disabled);
}

#[test]
fn visibility_condition_gates_submission() {
    let schema = SchemaNode::object()
        .property("newsletter", SchemaNode::boolean())
        .property(
            "frequency",
            SchemaNode::string()
                .require()
                .visible_when("newsletter", json!(true)),
        );
    let (form, _) = graph_form(schema, json!({"newsletter": false, "frequency": ""}));

    // hidden: the empty required field neither validates nor submits
    let result = block_on(form.submit()).unwrap();
    assert!(result.is_ok());
    assert_eq!(result.values, json!({"newsletter": false}));

    form.field("newsletter").unwrap().set_value(json!(true));
    let result = block_on(form.submit()).unwrap();
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].path, "frequency");
}

#[test]
fn deferred_validators_all_settle() {
    let schema = SchemaNode::object()
        .property("first", SchemaNode::string())
        .property("second", SchemaNode::string());
    let (form, _) = graph_form(schema, json!({"first": "x", "second": "y"}));

    for path in ["first", "second"] {
        form.field(path)
            .unwrap()
            .add_validator(Validator::deferred(move |_| {
                Box::pin(async move { Ok(Some(format!("{path} rejected"))) })
            }));
    }

    let result = block_on(form.submit()).unwrap();
    // no fail-fast: both errors present, tree order
    let messages: Vec<&str> = result.errors.iter().map(|f| f.message.as_str()).collect();
    assert_eq!(messages, ["first rejected", "second rejected"]);
}

#[test]
fn concurrent_submissions_are_rejected() {
    let schema = SchemaNode::object().property("a", SchemaNode::string());
    let (form, _) = graph_form(schema, json!({"a": "x"}));

    let gate = Rc::new(Cell::new(false));
    let gate_clone = Rc::clone(&gate);
    form.field("a")
        .unwrap()
        .add_validator(Validator::deferred(move |_| {
            let gate = Rc::clone(&gate_clone);
            Box::pin(futures::future::poll_fn(move |_| {
                if gate.get() {
                    std::task::Poll::Ready(Ok(None))
                } else {
                    std::task::Poll::Pending
                }
            }))
        }));

    let mut first = Box::pin(form.submit());
    assert!(first.as_mut().now_or_never().is_none());
    assert!(matches!(
        Box::pin(form.submit()).now_or_never(),
        Some(Err(FormError::SubmitInProgress))
    ));

    gate.set(true);
    assert!(first.now_or_never().unwrap().unwrap().is_ok());
}

#[test]
fn reset_returns_to_last_clean_snapshot() {
    let schema = SchemaNode::object()
        .property("name", SchemaNode::string())
        .property("role", SchemaNode::string().with_default(json!("viewer")));
    let (form, _) = graph_form(schema, json!({"name": "Ada"}));

    // defaults are part of the baseline
    form.set_values(json!({"name": "Grace", "role": "admin"})).unwrap();
    form.reset();
    assert_eq!(form.get_values(), json!({"name": "Ada", "role": "viewer"}));

    form.set_values(json!({"name": "Grace"})).unwrap();
    assert!(block_on(form.submit()).unwrap().is_ok());
    form.set_values(json!({"name": "Edsger"})).unwrap();
    form.reset();
    assert_eq!(form.get_values()["name"], json!("Grace"));
}

#[test]
fn debounced_reactions_ride_the_virtual_clock() {
    let schema = SchemaNode::object().property("query", SchemaNode::string());
    let (form, adapter) = graph_form(schema, json!({"query": ""}));

    let query = form.field("query").unwrap();
    let fired: Rc<RefCell<Vec<Value>>> = Rc::new(RefCell::new(Vec::new()));
    let fired_clone = Rc::clone(&fired);
    let query_clone = Rc::clone(&query);
    let _sub = adapter.reaction(
        Box::new(move || query_clone.value()),
        Box::new(move |value| fired_clone.borrow_mut().push(value)),
        formwork::ReactionOptions::debounced(std::time::Duration::from_millis(200)),
    );

    query.set_value(json!("a"));
    query.set_value(json!("ab"));
    query.set_value(json!("abc"));
    adapter.advance(std::time::Duration::from_millis(199));
    assert!(fired.borrow().is_empty());
    adapter.advance(std::time::Duration::from_millis(1));
    assert_eq!(*fired.borrow(), vec![json!("abc")]);
}

#[test]
fn array_paths_resolve_and_collect() {
    let schema = SchemaNode::object().property(
        "rows",
        SchemaNode::array(
            SchemaNode::object()
                .property("id", SchemaNode::number())
                .property("label", SchemaNode::string()),
        ),
    );
    let (form, _) = graph_form(
        schema,
        json!({"rows": [{"id": 1, "label": "one"}, {"id": 2, "label": "two"}]}),
    );

    let label = form.field("rows[1].label").unwrap();
    assert_eq!(label.value(), json!("two"));
    label.set_value(json!("TWO"));

    let result = block_on(form.submit()).unwrap();
    assert_eq!(
        result.values,
        json!({"rows": [{"id": 1, "label": "one"}, {"id": 2, "label": "TWO"}]})
    );
}

#[test]
fn dispose_is_terminal_and_idempotent() {
    let schema = SchemaNode::object().property("a", SchemaNode::string());
    let (form, _) = graph_form(schema, json!({"a": "x"}));
    let a = form.field("a").unwrap();

    form.dispose();
    assert!(form.is_disposed());
    assert!(a.is_disposed());
    form.dispose();
    a.dispose();
    assert!(form.is_disposed());
}
