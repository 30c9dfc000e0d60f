//! The visibility engine and its owning context.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::bindings::TriggerBindings;
use crate::config::VisibilityConfig;
use crate::dispatch;
use crate::env::{resolve_visibility_props, VisibilityProps};
use crate::host::{HybridListener, PageHost};
use crate::lifecycle::{
    DocumentReadyState, LifecycleEventType, PageLifecycle, PageState, Transition, TransitionEvent,
    Trigger, TriggerSource,
};
use crate::registry::{CallbackId, CallbackOptions, CallbackRegistry, Handler, RegistryStats};

/// When a scheduled pass selects its callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SnapshotAt {
    /// At the transition; later registrations miss it.
    Transition,
    /// When the pass starts running. Only the synthesized initial load uses
    /// this, so subscribers added right after startup still see it.
    Dispatch,
}

/// Shared state behind every [`PageVisibility`] handle.
pub(crate) struct EngineState {
    pub(crate) config: VisibilityConfig,
    pub(crate) host: Rc<dyn PageHost>,
    pub(crate) props: VisibilityProps,
    pub(crate) registry: RefCell<CallbackRegistry>,
    pub(crate) lifecycle: RefCell<PageLifecycle>,
    pub(crate) destroyed: Cell<bool>,
    pub(crate) bindings: RefCell<Option<TriggerBindings>>,
    pub(crate) hybrid_listener: RefCell<Option<HybridListener>>,
    pub(crate) hybrid_probe: RefCell<Option<JoinHandle<()>>>,
    inflight: RefCell<Vec<JoinHandle<()>>>,
    origin: Instant,
}

impl EngineState {
    /// Milliseconds since the engine was created.
    pub(crate) fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    /// Run a raw signal through the state machine and schedule a dispatch if
    /// the state changed. Returns whether a transition was recorded.
    pub(crate) fn handle_trigger(self: &Rc<Self>, trigger: Trigger) -> bool {
        self.transition(trigger, SnapshotAt::Transition)
    }

    fn transition(self: &Rc<Self>, trigger: Trigger, snapshot_at: SnapshotAt) -> bool {
        if self.is_destroyed() {
            return false;
        }

        let Some(transition) = self.lifecycle.borrow_mut().apply(trigger) else {
            if self.config.debug {
                trace!(source = %trigger.source(), "Redundant signal ignored");
            }
            return false;
        };

        if self.config.debug {
            debug!(
                source = %transition.source,
                event = %transition.event_type,
                previous = %transition.previous_state,
                current = %transition.current_state,
                "Page state changed"
            );
        }

        self.schedule(transition, snapshot_at);
        true
    }

    fn schedule(self: &Rc<Self>, transition: Transition, snapshot_at: SnapshotAt) {
        let event = TransitionEvent::from_transition(transition, self.now_ms());
        let records = match snapshot_at {
            SnapshotAt::Transition => Some(
                self.registry
                    .borrow()
                    .snapshot_for_type(event.event_type),
            ),
            SnapshotAt::Dispatch => None,
        };
        let handle =
            tokio::task::spawn_local(dispatch::dispatch(Rc::clone(self), event, records));

        let mut inflight = self.inflight.borrow_mut();
        inflight.retain(|pending| !pending.is_finished());
        inflight.push(handle);
    }

    /// Attach to the hybrid bridge if the host has one. Returns true once
    /// attached.
    pub(crate) fn try_attach_hybrid(self: &Rc<Self>) -> bool {
        if self.hybrid_listener.borrow().is_some() {
            return true;
        }
        if !self.host.hybrid_bridge_available() {
            return false;
        }

        let weak = Rc::downgrade(self);
        let listener: HybridListener = Rc::new(move |visible: bool| {
            if let Some(state) = weak.upgrade() {
                state.handle_trigger(Trigger::Hybrid { visible });
            }
        });
        self.host.attach_hybrid_listener(Rc::clone(&listener));
        *self.hybrid_listener.borrow_mut() = Some(listener);

        if self.config.debug {
            debug!("Hybrid bridge attached");
        }
        true
    }

    fn take_inflight(&self) -> Vec<JoinHandle<()>> {
        self.inflight.borrow_mut().drain(..).collect()
    }
}

/// Handle to a live visibility engine. Cheap to clone; all clones share state.
///
/// Construction spawns tasks with [`tokio::task::spawn_local`], so the engine
/// must be created and driven inside a [`tokio::task::LocalSet`].
#[derive(Clone)]
pub struct PageVisibility {
    state: Rc<EngineState>,
}

impl PageVisibility {
    /// Create an engine, bind every trigger source and run the initial
    /// ready-state check.
    pub(crate) fn new(host: Rc<dyn PageHost>, config: VisibilityConfig) -> Self {
        let props = resolve_visibility_props(host.as_ref());
        let state = Rc::new(EngineState {
            config,
            host,
            props,
            registry: RefCell::new(CallbackRegistry::new()),
            lifecycle: RefCell::new(PageLifecycle::new()),
            destroyed: Cell::new(false),
            bindings: RefCell::new(None),
            hybrid_listener: RefCell::new(None),
            hybrid_probe: RefCell::new(None),
            inflight: RefCell::new(Vec::new()),
            origin: Instant::now(),
        });

        let bindings = TriggerBindings::bind(&state);
        *state.bindings.borrow_mut() = Some(bindings);

        if !state.try_attach_hybrid() {
            let probe = TriggerBindings::start_hybrid_probe(&state);
            *state.hybrid_probe.borrow_mut() = Some(probe);
        }

        info!(
            hidden_property = state.props.hidden_property,
            change_event = state.props.change_event,
            "Visibility engine started"
        );

        if state.host.ready_state() == DocumentReadyState::Complete {
            state.transition(Trigger::Load, SnapshotAt::Dispatch);
        }

        Self { state }
    }

    /// Subscribe to `event_type`. Returns `None` after [`destroy`](Self::destroy).
    pub fn on(
        &self,
        event_type: LifecycleEventType,
        handler: Handler,
        options: CallbackOptions,
    ) -> Option<CallbackId> {
        if self.state.is_destroyed() {
            return None;
        }
        let id = self
            .state
            .registry
            .borrow_mut()
            .register(event_type, handler, options);
        if self.state.config.debug {
            if let Some(id) = id {
                debug!(%id, event = %event_type, "Callback registered");
            }
        }
        id
    }

    /// Subscribe for a single successful firing.
    pub fn once(
        &self,
        event_type: LifecycleEventType,
        handler: Handler,
        options: CallbackOptions,
    ) -> Option<CallbackId> {
        self.on(event_type, handler, options.once())
    }

    pub fn off_by_id(&self, id: &CallbackId) -> bool {
        self.state.registry.borrow_mut().remove_by_id(id)
    }

    /// Remove callbacks of `event_type`, narrowed by handler identity and
    /// namespace when given. Returns how many were removed.
    pub fn off(
        &self,
        event_type: LifecycleEventType,
        handler: Option<&Handler>,
        namespace: Option<&str>,
    ) -> usize {
        self.state
            .registry
            .borrow_mut()
            .remove_by_filter(event_type, handler, namespace)
    }

    pub fn off_by_namespace(&self, namespace: &str) -> usize {
        self.state.registry.borrow_mut().remove_by_namespace(namespace)
    }

    pub fn current_state(&self) -> PageState {
        self.state.lifecycle.borrow().current_state()
    }

    pub fn previous_state(&self) -> PageState {
        self.state.lifecycle.borrow().previous_state()
    }

    pub fn status(&self) -> RegistryStats {
        self.state.registry.borrow().stats()
    }

    /// Whether `id` is still registered.
    pub fn is_registered(&self, id: &CallbackId) -> bool {
        self.state.registry.borrow().contains(id)
    }

    /// Dispatch timestamp of the callback's last successful firing.
    pub fn last_triggered_at(&self, id: &CallbackId) -> Option<f64> {
        self.state
            .registry
            .borrow()
            .get(id)
            .and_then(|record| record.last_triggered_at)
    }

    pub fn config(&self) -> &VisibilityConfig {
        &self.state.config
    }

    /// Vendor-resolved visibility names in use.
    pub fn visibility_props(&self) -> VisibilityProps {
        self.state.props
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.is_destroyed()
    }

    /// Feed a raw signal as if the host had delivered it. The dispatch runs
    /// on the local task set; await [`flush`](Self::flush) to wait for it.
    pub fn handle_trigger(&self, trigger: Trigger) -> bool {
        self.state.handle_trigger(trigger)
    }

    /// Fire the callbacks for `event_type` with the current states, without
    /// changing state.
    pub async fn dispatch(&self, event_type: LifecycleEventType, source: TriggerSource) {
        let (previous_state, current_state) = {
            let lifecycle = self.state.lifecycle.borrow();
            (lifecycle.previous_state(), lifecycle.current_state())
        };
        let event = TransitionEvent {
            event_type,
            source,
            timestamp: self.state.now_ms(),
            previous_state,
            current_state,
        };
        dispatch::dispatch(Rc::clone(&self.state), event, None).await;
    }

    /// Wait until every scheduled dispatch has finished, including ones
    /// scheduled by handlers while waiting.
    pub async fn flush(&self) {
        loop {
            let pending = self.state.take_inflight();
            if pending.is_empty() {
                break;
            }
            for handle in pending {
                if let Err(err) = handle.await {
                    error!(error = %err, "Dispatch task failed");
                }
            }
        }
    }

    /// Tear down: clear callbacks, detach every listener, stop the hybrid
    /// probe. Idempotent. State reads keep returning the last state.
    pub fn destroy(&self) {
        let state = &self.state;
        if state.destroyed.replace(true) {
            return;
        }

        {
            let mut registry = state.registry.borrow_mut();
            registry.clear();
            registry.close();
        }

        if let Some(bindings) = state.bindings.borrow_mut().take() {
            bindings.unbind(state.host.as_ref());
        }

        if let Some(listener) = state.hybrid_listener.borrow_mut().take() {
            state.host.detach_hybrid_listener(&listener);
        }

        if let Some(probe) = state.hybrid_probe.borrow_mut().take() {
            probe.abort();
        }

        info!(final_state = %self.current_state(), "Visibility engine destroyed");
    }
}

impl fmt::Debug for PageVisibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageVisibility")
            .field("current_state", &self.current_state())
            .field("previous_state", &self.previous_state())
            .field("destroyed", &self.is_destroyed())
            .field("registry", &*self.state.registry.borrow())
            .finish()
    }
}

/// Owner of the one live engine. Create one per page and pass it to the code
/// that needs the engine.
#[derive(Default)]
pub struct VisibilityContext {
    slot: RefCell<Option<PageVisibility>>,
}

impl VisibilityContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live engine, creating it on first use. The configuration
    /// only applies at creation; later calls ignore it. A configuration that
    /// fails [`VisibilityConfig::validate`] is replaced by the defaults, keeping
    /// only its `debug` flag.
    pub fn get_instance(
        &self,
        host: Rc<dyn PageHost>,
        config: Option<VisibilityConfig>,
    ) -> PageVisibility {
        if let Some(engine) = self.get() {
            if config.is_some() {
                debug!("Visibility engine already running; config ignored");
            }
            return engine;
        }

        let config = config.unwrap_or_default();
        let config = match config.validate() {
            Ok(()) => config,
            Err(err) => {
                warn!(error = %err, "Invalid visibility config; using defaults");
                VisibilityConfig::default().with_debug(config.debug)
            }
        };

        let engine = PageVisibility::new(host, config);
        *self.slot.borrow_mut() = Some(engine.clone());
        engine
    }

    /// The live engine, if any. An engine destroyed through its own handle is
    /// released here.
    pub fn get(&self) -> Option<PageVisibility> {
        let mut slot = self.slot.borrow_mut();
        if slot.as_ref().is_some_and(PageVisibility::is_destroyed) {
            *slot = None;
        }
        slot.clone()
    }

    /// Destroy the live engine and release the slot. Idempotent.
    pub fn destroy(&self) {
        let engine = self.slot.borrow_mut().take();
        if let Some(engine) = engine {
            engine.destroy();
        }
    }
}

impl fmt::Debug for VisibilityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisibilityContext")
            .field("live", &self.slot.borrow().is_some())
            .finish()
    }
}
