//! # formwork
//!
//! Schema-driven reactive form engine for Rust.
//!
//! A declarative schema tree is lazily materialized into a tree of reactive
//! field nodes. Every piece of field state (value, pattern, visibility,
//! validation feedback) lives in an observable cell provided by a pluggable
//! reactive adapter, so any dependency-tracking runtime can drive the engine.
//!
//! ## Architecture
//!
//! ```text
//! SchemaNode tree → FieldTree (lazy materialization) → FieldNode cells
//!                                                     → validation pipeline
//!                                                     → submission protocol
//! ```
//!
//! The engine is single-threaded cooperative: `Rc`/`RefCell` ownership, no
//! OS threads, deferred validators as local futures. A built-in
//! dependency-tracking adapter ([`reactive::GraphAdapter`]) is included;
//! embedders may register their own through [`reactive::set_reactive_adapter`]
//! or inject one per form with [`reactive::ReactiveContext`].
//!
//! ## Modules
//!
//! - [`types`] - Core types (Pattern, Feedback, SubmitResult, etc.)
//! - [`schema`] - The declarative schema tree
//! - [`path`] - Field addressing (`user.addresses[0].street`)
//! - [`reactive`] - Adapter trait, registry, and the built-in graph adapter
//! - [`node`] - FieldNode, the unit of observable form state
//! - [`tree`] - Lazy field-tree materialization and resolution
//! - [`validate`] - Per-field validators and feedback
//! - [`form`] - FormInstance: values, reset, submission

pub mod error;
pub mod form;
pub mod node;
pub mod path;
pub mod reactive;
pub mod schema;
pub mod tree;
pub mod types;
pub mod validate;

// Re-export commonly used items
pub use types::*;

pub use error::{FormError, ValidationRuleError};
pub use form::FormInstance;
pub use node::{FieldNode, NodeFlags};
pub use path::{FieldPath, Segment};
pub use reactive::{
    Disposer, GraphAdapter, ReactionOptions, ReactiveAdapter, ReactiveContext,
    get_reactive_adapter, has_reactive_adapter, reset_reactive_adapter, set_reactive_adapter,
};
pub use schema::{SchemaKind, SchemaNode, VisibleWhen};
pub use tree::FieldTree;
pub use validate::Validator;
