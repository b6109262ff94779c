//! Reactive Adapter Registry - process-wide single adapter slot.
//!
//! Components that need reactivity resolve the active adapter lazily through
//! this registry; form construction resolves once and caches the handle for
//! the form's lifetime. Exactly one adapter is active at any instant; no
//! concurrent-adapter mode is supported, and callers must not swap adapters
//! while any form instance is alive (documented contract, not enforced).
//!
//! For explicit injection (test isolation, multiple adapters in one
//! process), wrap an adapter in a [`ReactiveContext`] and pass it to form
//! construction directly instead of going through the registry.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use super::ReactiveAdapter;
use crate::error::FormError;

thread_local! {
    /// The active adapter. The engine is single-threaded cooperative, so a
    /// thread-local slot covers the whole runtime.
    static ACTIVE_ADAPTER: RefCell<Option<Rc<dyn ReactiveAdapter>>> = const { RefCell::new(None) };
}

/// Replace the active adapter.
///
/// Subsequent [`get_reactive_adapter`] calls return the new instance.
/// Existing field nodes keep the subscriptions they registered through the
/// previous adapter; nothing is migrated.
pub fn set_reactive_adapter(adapter: Rc<dyn ReactiveAdapter>) {
    debug!("reactive adapter registered");
    ACTIVE_ADAPTER.with(|slot| {
        *slot.borrow_mut() = Some(adapter);
    });
}

/// The active adapter, or [`FormError::NotConfigured`] if none was set.
pub fn get_reactive_adapter() -> Result<Rc<dyn ReactiveAdapter>, FormError> {
    ACTIVE_ADAPTER.with(|slot| slot.borrow().clone().ok_or(FormError::NotConfigured))
}

/// Non-throwing existence probe.
pub fn has_reactive_adapter() -> bool {
    ACTIVE_ADAPTER.with(|slot| slot.borrow().is_some())
}

/// Clear the slot (intended for test isolation only).
pub fn reset_reactive_adapter() {
    ACTIVE_ADAPTER.with(|slot| {
        *slot.borrow_mut() = None;
    });
}

// =============================================================================
// ReactiveContext
// =============================================================================

/// An explicit adapter binding injected into form construction.
///
/// Resolved once (from the registry or a direct adapter handle) and cached
/// for the owning form's lifetime.
#[derive(Clone)]
pub struct ReactiveContext {
    adapter: Rc<dyn ReactiveAdapter>,
}

impl ReactiveContext {
    pub fn new(adapter: Rc<dyn ReactiveAdapter>) -> Self {
        Self { adapter }
    }

    /// Bind to the registry's active adapter.
    pub fn from_registry() -> Result<Self, FormError> {
        Ok(Self {
            adapter: get_reactive_adapter()?,
        })
    }

    pub fn adapter(&self) -> &Rc<dyn ReactiveAdapter> {
        &self.adapter
    }
}

impl fmt::Debug for ReactiveContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveContext").finish_non_exhaustive()
    }
}
