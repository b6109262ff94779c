//! Pluggable reactive substrate.
//!
//! The engine never talks to a concrete observable runtime directly; it
//! depends on the [`ReactiveAdapter`] capability set and on the opaque cell
//! handles it returns. Exactly one adapter is active per process (see
//! [`registry`]); swapping adapters while any field node is alive is a
//! documented usage contract, not something the type system enforces.
//!
//! The built-in implementation is [`graph::GraphAdapter`], a fine-grained
//! dependency-tracking graph. Cells carry `serde_json::Value` so the
//! interface stays object-safe; the field layer provides the typed views.

pub mod graph;
pub mod registry;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use serde_json::Value;

pub use graph::GraphAdapter;
pub use registry::{
    ReactiveContext, get_reactive_adapter, has_reactive_adapter, reset_reactive_adapter,
    set_reactive_adapter,
};

// =============================================================================
// Cell handles
// =============================================================================

/// A mutable observable cell.
///
/// Reading through [`get`](ValueCell::get) inside a computed/autorun/reaction
/// establishes a dependency; [`peek`](ValueCell::peek) reads without
/// tracking.
pub trait ValueCell {
    fn get(&self) -> Value;
    fn peek(&self) -> Value;
    fn set(&self, value: Value);
}

/// Shared handle to an observable cell.
pub type ObservableValue = Rc<dyn ValueCell>;

/// A derived, read-only value. Reading tracks like a cell read.
pub trait ComputedCell {
    fn get(&self) -> Value;
}

/// Shared handle to a computed value. Dropping the last handle ends the
/// underlying subscription.
pub type ComputedValue = Rc<dyn ComputedCell>;

// =============================================================================
// Reaction options
// =============================================================================

/// Tuning for [`ReactiveAdapter::reaction`].
#[derive(Clone, Default)]
pub struct ReactionOptions {
    /// Run the effect on the first (tracking) pass, not only on changes.
    pub fire_immediately: bool,
    /// Custom change comparator; defaults to `PartialEq` on the values.
    pub equals: Option<Rc<dyn Fn(&Value, &Value) -> bool>>,
    /// Trailing-edge debounce window. Newer tracked changes inside the
    /// window cancel and reschedule the pending effect; disposing the
    /// reaction cancels both the pending call and the subscription.
    pub debounce: Option<Duration>,
}

impl ReactionOptions {
    /// Options with `fire_immediately` set.
    pub fn immediate() -> Self {
        Self {
            fire_immediately: true,
            ..Self::default()
        }
    }

    /// Options with a debounce window.
    pub fn debounced(window: Duration) -> Self {
        Self {
            debounce: Some(window),
            ..Self::default()
        }
    }

    pub fn with_equals(mut self, equals: impl Fn(&Value, &Value) -> bool + 'static) -> Self {
        self.equals = Some(Rc::new(equals));
        self
    }
}

impl fmt::Debug for ReactionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactionOptions")
            .field("fire_immediately", &self.fire_immediately)
            .field("equals", &self.equals.as_ref().map(|_| "<fn>"))
            .field("debounce", &self.debounce)
            .finish()
    }
}

// =============================================================================
// Adapter capability set
// =============================================================================

/// The capability set a reactive substrate must provide.
pub trait ReactiveAdapter {
    /// A cell that skips notification when the new value compares equal.
    fn observable(&self, initial: Value) -> ObservableValue;

    /// A cell that always notifies on `set`, without deep comparison.
    /// Suited to large composite values where equality checks are wasteful.
    fn shallow_observable(&self, initial: Value) -> ObservableValue;

    /// Convert an existing plain value into an observable cell. Equivalent
    /// to [`observable`](ReactiveAdapter::observable) for value-cell
    /// substrates; exists for parity with annotation-driven runtimes.
    fn make_observable(&self, target: Value) -> ObservableValue;

    /// A derived value recomputed when any tracked dependency changes.
    fn computed(&self, getter: Box<dyn Fn() -> Value>) -> ComputedValue;

    /// Run `effect` now and again whenever any cell it read changes.
    fn autorun(&self, effect: Box<dyn FnMut()>) -> Disposer;

    /// Track `track`; when its result changes (per the options' comparator),
    /// run `effect` with the new value.
    fn reaction(
        &self,
        track: Box<dyn Fn() -> Value>,
        effect: Box<dyn FnMut(Value)>,
        options: ReactionOptions,
    ) -> Disposer;

    /// Run `work` as a unit: dependents observe the mutations only after
    /// the call returns, in at most one recomputation pass each.
    fn batch(&self, work: Box<dyn FnOnce() + '_>);

    /// Run `work` as an atomic, untracked mutation. Same visibility
    /// guarantee as [`batch`](ReactiveAdapter::batch).
    fn action(&self, work: Box<dyn FnOnce() + '_>);
}

// =============================================================================
// Disposer
// =============================================================================

/// Owned handle to a subscription's teardown.
///
/// Disposing twice is a no-op. Dropping an undisposed `Disposer` also tears
/// the subscription down.
pub struct Disposer {
    tear_down: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl Disposer {
    pub fn new(tear_down: impl FnOnce() + 'static) -> Self {
        Self {
            tear_down: RefCell::new(Some(Box::new(tear_down))),
        }
    }

    /// A disposer with nothing to tear down.
    pub fn noop() -> Self {
        Self {
            tear_down: RefCell::new(None),
        }
    }

    pub fn dispose(&self) {
        if let Some(tear_down) = self.tear_down.borrow_mut().take() {
            tear_down();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.tear_down.borrow().is_none()
    }
}

impl Drop for Disposer {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposer")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn disposer_runs_once() {
        let count = Rc::new(Cell::new(0u32));
        let count_clone = Rc::clone(&count);
        let disposer = Disposer::new(move || count_clone.set(count_clone.get() + 1));

        assert!(!disposer.is_disposed());
        disposer.dispose();
        disposer.dispose();
        assert!(disposer.is_disposed());
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn disposer_drop_tears_down() {
        let count = Rc::new(Cell::new(0u32));
        let count_clone = Rc::clone(&count);
        {
            let _disposer = Disposer::new(move || count_clone.set(count_clone.get() + 1));
        }
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn noop_disposer() {
        let disposer = Disposer::noop();
        assert!(disposer.is_disposed());
        disposer.dispose();
    }
}
