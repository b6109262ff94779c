//! Built-in dependency-tracking adapter.
//!
//! A fine-grained observer graph: cells record which observers read them
//! (dependency collection happens on every observer run), and notify exactly
//! those observers on change. Batching defers reruns until the outermost
//! batch exits, deduplicated per observer.
//!
//! Scheduling is single-threaded cooperative; no OS threads are created.
//! Debounced reactions run off a virtual millisecond clock that embedders
//! (and tests) drive with [`GraphAdapter::advance`].

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use std::time::Duration;

use serde_json::Value;
use tracing::trace;

use super::{
    ComputedCell, ComputedValue, Disposer, ObservableValue, ReactionOptions, ReactiveAdapter,
    ValueCell,
};

// =============================================================================
// Runtime
// =============================================================================

type DebouncedEffect = Rc<RefCell<Box<dyn FnMut(Value)>>>;

struct Runtime {
    /// Stack of observers currently collecting dependencies.
    active: RefCell<Vec<Rc<Observer>>>,
    batch_depth: Cell<u32>,
    /// Observers awaiting rerun at the end of the outermost batch.
    queue: RefCell<VecDeque<Rc<Observer>>>,
    clock_ms: Cell<u64>,
    timers: RefCell<Vec<TimerEntry>>,
    next_observer_id: Cell<u64>,
    next_timer_id: Cell<u64>,
}

impl Runtime {
    fn new() -> Rc<Self> {
        Rc::new(Self {
            active: RefCell::new(Vec::new()),
            batch_depth: Cell::new(0),
            queue: RefCell::new(VecDeque::new()),
            clock_ms: Cell::new(0),
            timers: RefCell::new(Vec::new()),
            next_observer_id: Cell::new(1),
            next_timer_id: Cell::new(1),
        })
    }

    fn schedule(&self, observer: Rc<Observer>) {
        if observer.disposed.get() {
            return;
        }
        if self.batch_depth.get() > 0 {
            let mut queue = self.queue.borrow_mut();
            if !queue.iter().any(|queued| queued.id == observer.id) {
                queue.push_back(observer);
            }
        } else {
            observer.run();
        }
    }

    fn drain(&self) {
        loop {
            let next = self.queue.borrow_mut().pop_front();
            match next {
                Some(observer) => observer.run(),
                None => break,
            }
        }
    }

    fn remove_timer(&self, timer_id: u64) {
        self.timers.borrow_mut().retain(|timer| timer.id != timer_id);
    }
}

// =============================================================================
// Observers
// =============================================================================

/// A closure that re-collects its dependencies on every run.
struct Observer {
    id: u64,
    /// Bumped per run; cell subscriptions from older generations are stale.
    generation: Cell<u64>,
    /// Shared with the owning disposer and any pending debounce timers.
    disposed: Rc<Cell<bool>>,
    running: Cell<bool>,
    action: RefCell<Box<dyn FnMut()>>,
    runtime: Weak<Runtime>,
}

impl Observer {
    fn run(self: &Rc<Self>) {
        if self.disposed.get() || self.running.get() {
            return;
        }
        let Some(runtime) = self.runtime.upgrade() else {
            return;
        };
        self.generation.set(self.generation.get() + 1);
        self.running.set(true);
        runtime.active.borrow_mut().push(Rc::clone(self));
        (self.action.borrow_mut())();
        runtime.active.borrow_mut().pop();
        self.running.set(false);
    }
}

// =============================================================================
// Cells
// =============================================================================

struct Subscriber {
    observer_id: u64,
    observer: Weak<Observer>,
    generation: u64,
}

struct CellState {
    value: RefCell<Value>,
    /// Deep cells skip notification when the new value compares equal.
    deep: bool,
    subscribers: RefCell<Vec<Subscriber>>,
    runtime: Weak<Runtime>,
}

impl CellState {
    /// Record the innermost running observer as a dependent.
    fn track(&self) {
        let Some(runtime) = self.runtime.upgrade() else {
            return;
        };
        let active = runtime.active.borrow();
        let Some(observer) = active.last() else {
            return;
        };
        let generation = observer.generation.get();
        let mut subscribers = self.subscribers.borrow_mut();
        match subscribers
            .iter_mut()
            .find(|entry| entry.observer_id == observer.id)
        {
            Some(entry) => entry.generation = generation,
            None => subscribers.push(Subscriber {
                observer_id: observer.id,
                observer: Rc::downgrade(observer),
                generation,
            }),
        }
    }

    fn notify(&self) {
        let Some(runtime) = self.runtime.upgrade() else {
            return;
        };
        let live: Vec<Rc<Observer>> = {
            let mut subscribers = self.subscribers.borrow_mut();
            subscribers.retain(|entry| match entry.observer.upgrade() {
                Some(observer) => {
                    !observer.disposed.get() && observer.generation.get() == entry.generation
                }
                None => false,
            });
            subscribers
                .iter()
                .filter_map(|entry| entry.observer.upgrade())
                .collect()
        };
        for observer in live {
            runtime.schedule(observer);
        }
    }
}

struct GraphCell {
    state: Rc<CellState>,
}

impl Clone for GraphCell {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl ValueCell for GraphCell {
    fn get(&self) -> Value {
        self.state.track();
        self.state.value.borrow().clone()
    }

    fn peek(&self) -> Value {
        self.state.value.borrow().clone()
    }

    fn set(&self, value: Value) {
        {
            let current = self.state.value.borrow();
            if self.state.deep && *current == value {
                return;
            }
        }
        *self.state.value.borrow_mut() = value;
        self.state.notify();
    }
}

/// Computed output: an eager cell kept current by an internal observer.
struct GraphComputed {
    output: GraphCell,
    _subscription: Disposer,
}

impl ComputedCell for GraphComputed {
    fn get(&self) -> Value {
        self.output.get()
    }
}

// =============================================================================
// Debounce timers
// =============================================================================

struct TimerEntry {
    id: u64,
    deadline_ms: u64,
    owner_disposed: Rc<Cell<bool>>,
    /// Cleared when this timer fires or is replaced.
    pending_slot: Rc<Cell<Option<u64>>>,
    payload: Value,
    effect: Weak<RefCell<Box<dyn FnMut(Value)>>>,
}

// =============================================================================
// Adapter
// =============================================================================

/// The built-in dependency-tracking reactive adapter.
///
/// Cloning shares the same runtime.
pub struct GraphAdapter {
    runtime: Rc<Runtime>,
}

impl Clone for GraphAdapter {
    fn clone(&self) -> Self {
        Self {
            runtime: Rc::clone(&self.runtime),
        }
    }
}

impl Default for GraphAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphAdapter {
    pub fn new() -> Self {
        Self {
            runtime: Runtime::new(),
        }
    }

    fn cell(&self, initial: Value, deep: bool) -> GraphCell {
        GraphCell {
            state: Rc::new(CellState {
                value: RefCell::new(initial),
                deep,
                subscribers: RefCell::new(Vec::new()),
                runtime: Rc::downgrade(&self.runtime),
            }),
        }
    }

    fn observer(&self, action: Box<dyn FnMut()>, disposed: Rc<Cell<bool>>) -> Rc<Observer> {
        let id = self.runtime.next_observer_id.get();
        self.runtime.next_observer_id.set(id + 1);
        Rc::new(Observer {
            id,
            generation: Cell::new(0),
            disposed,
            running: Cell::new(false),
            action: RefCell::new(action),
            runtime: Rc::downgrade(&self.runtime),
        })
    }

    fn disposer_for(observer: Rc<Observer>) -> Disposer {
        let disposed = Rc::clone(&observer.disposed);
        Disposer::new(move || {
            disposed.set(true);
            drop(observer);
        })
    }

    /// Advance the virtual clock, firing any debounced effects that come
    /// due. Effects fire in deadline order (ties break by creation order).
    pub fn advance(&self, by: Duration) {
        let now = self.runtime.clock_ms.get() + by.as_millis() as u64;
        self.runtime.clock_ms.set(now);
        loop {
            let due = {
                let mut timers = self.runtime.timers.borrow_mut();
                let position = timers
                    .iter()
                    .enumerate()
                    .filter(|(_, timer)| timer.deadline_ms <= now)
                    .min_by_key(|(_, timer)| (timer.deadline_ms, timer.id))
                    .map(|(position, _)| position);
                position.map(|position| timers.remove(position))
            };
            let Some(timer) = due else { break };
            timer.pending_slot.set(None);
            if timer.owner_disposed.get() {
                continue;
            }
            if let Some(effect) = timer.effect.upgrade() {
                (effect.borrow_mut())(timer.payload);
            }
        }
    }

    /// Current virtual time in milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.runtime.clock_ms.get()
    }

    /// Number of debounced effects still waiting to fire.
    pub fn pending_timer_count(&self) -> usize {
        self.runtime.timers.borrow().len()
    }
}

impl ReactiveAdapter for GraphAdapter {
    fn observable(&self, initial: Value) -> ObservableValue {
        Rc::new(self.cell(initial, true))
    }

    fn shallow_observable(&self, initial: Value) -> ObservableValue {
        Rc::new(self.cell(initial, false))
    }

    fn make_observable(&self, target: Value) -> ObservableValue {
        self.observable(target)
    }

    fn computed(&self, getter: Box<dyn Fn() -> Value>) -> ComputedValue {
        let output = self.cell(Value::Null, true);
        let output_for_effect = output.clone();
        let subscription = self.autorun(Box::new(move || {
            output_for_effect.set(getter());
        }));
        Rc::new(GraphComputed {
            output,
            _subscription: subscription,
        })
    }

    fn autorun(&self, effect: Box<dyn FnMut()>) -> Disposer {
        let observer = self.observer(effect, Rc::new(Cell::new(false)));
        observer.run();
        Self::disposer_for(observer)
    }

    fn reaction(
        &self,
        track: Box<dyn Fn() -> Value>,
        effect: Box<dyn FnMut(Value)>,
        options: ReactionOptions,
    ) -> Disposer {
        let runtime = Rc::downgrade(&self.runtime);
        let effect: DebouncedEffect = Rc::new(RefCell::new(effect));
        let previous: Rc<RefCell<Option<Value>>> = Rc::new(RefCell::new(None));
        let pending: Rc<Cell<Option<u64>>> = Rc::new(Cell::new(None));
        let disposed = Rc::new(Cell::new(false));

        let ReactionOptions {
            fire_immediately,
            equals,
            debounce,
        } = options;

        let action = {
            let runtime = runtime.clone();
            let effect = Rc::clone(&effect);
            let previous = Rc::clone(&previous);
            let pending = Rc::clone(&pending);
            let disposed = Rc::clone(&disposed);
            Box::new(move || {
                let value = track();
                let should_fire = match &*previous.borrow() {
                    None => fire_immediately,
                    Some(old) => match &equals {
                        Some(eq) => !eq(old, &value),
                        None => *old != value,
                    },
                };
                *previous.borrow_mut() = Some(value.clone());
                if !should_fire {
                    return;
                }
                match debounce {
                    Some(window) if !window.is_zero() => {
                        let Some(runtime) = runtime.upgrade() else {
                            return;
                        };
                        // Trailing edge: a newer change replaces the pending call.
                        if let Some(stale) = pending.take() {
                            runtime.remove_timer(stale);
                        }
                        let timer_id = runtime.next_timer_id.get();
                        runtime.next_timer_id.set(timer_id + 1);
                        runtime.timers.borrow_mut().push(TimerEntry {
                            id: timer_id,
                            deadline_ms: runtime.clock_ms.get() + window.as_millis() as u64,
                            owner_disposed: Rc::clone(&disposed),
                            pending_slot: Rc::clone(&pending),
                            payload: value,
                            effect: Rc::downgrade(&effect),
                        });
                        pending.set(Some(timer_id));
                    }
                    _ => (effect.borrow_mut())(value),
                }
            }) as Box<dyn FnMut()>
        };

        let observer = self.observer(action, Rc::clone(&disposed));
        observer.run();

        Disposer::new(move || {
            disposed.set(true);
            if let (Some(runtime), Some(timer_id)) = (runtime.upgrade(), pending.take()) {
                runtime.remove_timer(timer_id);
            }
            drop(observer);
        })
    }

    fn batch(&self, work: Box<dyn FnOnce() + '_>) {
        self.runtime.batch_depth.set(self.runtime.batch_depth.get() + 1);
        // The depth unwinds and the queue drains even when `work` panics.
        let _close = BatchGuard {
            runtime: Rc::clone(&self.runtime),
        };
        work();
    }

    fn action(&self, work: Box<dyn FnOnce() + '_>) {
        // Untracked: reads inside `work` must not register the enclosing
        // observer as a dependent.
        let saved = std::mem::take(&mut *self.runtime.active.borrow_mut());
        let _restore = UntrackGuard {
            runtime: Rc::clone(&self.runtime),
            saved,
        };
        self.batch(work);
    }
}

/// Closes one batch level on drop, draining deferred reruns at depth zero.
struct BatchGuard {
    runtime: Rc<Runtime>,
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        self.runtime
            .batch_depth
            .set(self.runtime.batch_depth.get() - 1);
        if self.runtime.batch_depth.get() == 0 {
            trace!("batch closed, draining reruns");
            self.runtime.drain();
        }
    }
}

/// Restores the dependency-collection stack suspended by `action`.
struct UntrackGuard {
    runtime: Rc<Runtime>,
    saved: Vec<Rc<Observer>>,
}

impl Drop for UntrackGuard {
    fn drop(&mut self) {
        *self.runtime.active.borrow_mut() = std::mem::take(&mut self.saved);
    }
}
