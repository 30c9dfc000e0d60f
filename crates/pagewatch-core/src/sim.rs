//! In-memory [`PageHost`] for tests and the simulation tool.
//!
//! Stands in for a browser page: it owns document properties, the ready
//! state, the attached listeners and an optional hybrid bridge, and lets the
//! caller fire raw events at will.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::host::{HybridListener, Listener, ListenerTarget, PageHost};
use crate::lifecycle::DocumentReadyState;

/// Simulated page environment.
#[derive(Default)]
pub struct SimulatedHost {
    no_document: bool,
    /// Hidden-flag properties, with the change event each one pairs with.
    properties: RefCell<HashMap<String, (bool, String)>>,
    ready_state: Cell<DocumentReadyState>,
    listeners: RefCell<Vec<(ListenerTarget, String, Listener)>>,
    bridge_available: Cell<bool>,
    hybrid_listeners: RefCell<Vec<HybridListener>>,
}

impl SimulatedHost {
    /// A standards-compliant page that is still loading and visible.
    pub fn new() -> Self {
        let host = Self::default();
        host.define_property("hidden", false);
        host
    }

    /// A page whose only visibility API is the given vendor-prefixed one
    /// (`webkitHidden`, `mozHidden`, ...).
    pub fn with_vendor_prefix(hidden_property: &str) -> Self {
        let host = Self::default();
        host.define_property(hidden_property, false);
        host
    }

    /// An environment without a document object.
    pub fn without_document() -> Self {
        Self {
            no_document: true,
            ..Self::default()
        }
    }

    /// Builder form of [`set_ready_state`](Self::set_ready_state).
    pub fn with_ready_state(self, state: DocumentReadyState) -> Self {
        self.ready_state.set(state);
        self
    }

    /// Add a hidden-flag property; its change event is derived from the
    /// vendor prefix (`mozHidden` pairs with `mozvisibilitychange`).
    pub fn define_property(&self, name: &str, value: bool) {
        let prefix = name.strip_suffix("Hidden").unwrap_or("");
        let event = format!("{}visibilitychange", prefix.to_ascii_lowercase());
        self.properties
            .borrow_mut()
            .insert(name.to_string(), (value, event));
    }

    pub fn set_ready_state(&self, state: DocumentReadyState) {
        self.ready_state.set(state);
    }

    /// Set every hidden-flag property without firing anything.
    pub fn set_hidden(&self, hidden: bool) {
        for (value, _) in self.properties.borrow_mut().values_mut() {
            *value = hidden;
        }
    }

    /// Deliver a raw event to every listener attached for it.
    pub fn fire(&self, target: ListenerTarget, event: &str) {
        // Clone first: a listener may attach or detach while running.
        let matching: Vec<Listener> = self
            .listeners
            .borrow()
            .iter()
            .filter(|(t, e, _)| *t == target && e == event)
            .map(|(_, _, listener)| Rc::clone(listener))
            .collect();

        for listener in matching {
            listener();
        }
    }

    /// Flip the hidden flag and fire the matching change events.
    pub fn change_visibility(&self, hidden: bool) {
        self.set_hidden(hidden);
        let events: Vec<String> = self
            .properties
            .borrow()
            .values()
            .map(|(_, event)| event.clone())
            .collect();
        for event in events {
            self.fire(ListenerTarget::Document, &event);
        }
    }

    pub fn focus(&self) {
        self.fire(ListenerTarget::Window, "focus");
    }

    pub fn blur(&self) {
        self.fire(ListenerTarget::Window, "blur");
    }

    /// Mark the document complete and fire `load`.
    pub fn load(&self) {
        self.ready_state.set(DocumentReadyState::Complete);
        self.fire(ListenerTarget::Window, "load");
    }

    pub fn before_unload(&self) {
        self.fire(ListenerTarget::Window, "beforeunload");
    }

    pub fn unload(&self) {
        self.fire(ListenerTarget::Window, "unload");
    }

    /// Make a native bridge available for the engine's probe to find.
    pub fn install_bridge(&self) {
        self.bridge_available.set(true);
    }

    /// Report host-app foreground/background through the bridge.
    pub fn report_hybrid(&self, visible: bool) {
        let listeners: Vec<HybridListener> =
            self.hybrid_listeners.borrow().iter().cloned().collect();
        for listener in listeners {
            listener(visible);
        }
    }

    /// Total attached raw listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    pub fn listener_count_for(&self, target: ListenerTarget, event: &str) -> usize {
        self.listeners
            .borrow()
            .iter()
            .filter(|(t, e, _)| *t == target && e == event)
            .count()
    }

    pub fn hybrid_listener_count(&self) -> usize {
        self.hybrid_listeners.borrow().len()
    }
}

impl PageHost for SimulatedHost {
    fn has_document(&self) -> bool {
        !self.no_document
    }

    fn has_document_property(&self, name: &str) -> bool {
        self.properties.borrow().contains_key(name)
    }

    fn document_flag(&self, name: &str) -> bool {
        self.properties
            .borrow()
            .get(name)
            .map_or(false, |(value, _)| *value)
    }

    fn ready_state(&self) -> DocumentReadyState {
        self.ready_state.get()
    }

    fn add_listener(&self, target: ListenerTarget, event: &str, listener: Listener) {
        self.listeners
            .borrow_mut()
            .push((target, event.to_string(), listener));
    }

    fn remove_listener(&self, target: ListenerTarget, event: &str, listener: &Listener) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let position = listeners
            .iter()
            .position(|(t, e, l)| *t == target && e == event && Rc::ptr_eq(l, listener));
        match position {
            Some(index) => {
                listeners.remove(index);
                true
            }
            None => false,
        }
    }

    fn hybrid_bridge_available(&self) -> bool {
        self.bridge_available.get()
    }

    fn attach_hybrid_listener(&self, listener: HybridListener) {
        self.hybrid_listeners.borrow_mut().push(listener);
    }

    fn detach_hybrid_listener(&self, listener: &HybridListener) -> bool {
        let mut listeners = self.hybrid_listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|l| !Rc::ptr_eq(l, listener));
        before != listeners.len()
    }
}

impl std::fmt::Debug for SimulatedHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedHost")
            .field("has_document", &!self.no_document)
            .field("ready_state", &self.ready_state.get())
            .field("listener_count", &self.listeners.borrow().len())
            .field("bridge_available", &self.bridge_available.get())
            .finish()
    }
}
