//! Trigger source bindings.
//!
//! Each raw host event gets exactly one listener. The `Rc` attached at bind
//! time is kept and handed back verbatim at unbind time; the host matches on
//! pointer identity, so a freshly built closure would never detach anything.

use std::rc::{Rc, Weak};

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::engine::EngineState;
use crate::host::{Listener, ListenerTarget, PageHost};
use crate::lifecycle::Trigger;

struct Binding {
    target: ListenerTarget,
    event: &'static str,
    listener: Listener,
}

/// Listeners attached on behalf of one engine.
pub(crate) struct TriggerBindings {
    bindings: Vec<Binding>,
}

impl TriggerBindings {
    /// Attach every raw listener to the engine's host.
    pub(crate) fn bind(state: &Rc<EngineState>) -> Self {
        let mut bindings = Self {
            bindings: Vec::with_capacity(6),
        };

        bindings.attach(state, ListenerTarget::Document, state.props.change_event, |state| {
            Trigger::VisibilityChange {
                hidden: state.host.document_flag(state.props.hidden_property),
            }
        });
        bindings.attach(state, ListenerTarget::Window, "focus", |_| Trigger::Focus);
        bindings.attach(state, ListenerTarget::Window, "blur", |_| Trigger::Blur);
        bindings.attach(state, ListenerTarget::Window, "load", |_| Trigger::Load);
        bindings.attach(state, ListenerTarget::Window, "beforeunload", |_| {
            Trigger::BeforeUnload
        });
        bindings.attach(state, ListenerTarget::Window, "unload", |_| Trigger::Unload);

        bindings
    }

    fn attach<F>(
        &mut self,
        state: &Rc<EngineState>,
        target: ListenerTarget,
        event: &'static str,
        read_trigger: F,
    ) where
        F: Fn(&EngineState) -> Trigger + 'static,
    {
        let weak: Weak<EngineState> = Rc::downgrade(state);
        let listener: Listener = Rc::new(move || {
            if let Some(state) = weak.upgrade() {
                let trigger = read_trigger(&state);
                state.handle_trigger(trigger);
            }
        });

        state.host.add_listener(target, event, Rc::clone(&listener));
        self.bindings.push(Binding {
            target,
            event,
            listener,
        });
    }

    /// Detach the exact listeners attached by [`bind`](Self::bind).
    pub(crate) fn unbind(self, host: &dyn PageHost) {
        for binding in self.bindings {
            if !host.remove_listener(binding.target, binding.event, &binding.listener) {
                warn!(
                    target_object = ?binding.target,
                    event = binding.event,
                    "Listener was already detached"
                );
            }
        }
    }

    /// Poll for a late hybrid bridge; stops once attached or when the engine
    /// goes away.
    pub(crate) fn start_hybrid_probe(state: &Rc<EngineState>) -> JoinHandle<()> {
        let weak = Rc::downgrade(state);
        let period = state.config.hybrid_check_interval();

        tokio::task::spawn_local(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately; the bridge was already
            // checked at construction.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(state) = weak.upgrade() else {
                    break;
                };
                if state.is_destroyed() {
                    break;
                }
                if state.try_attach_hybrid() {
                    debug!("Hybrid bridge detected; probe stopped");
                    break;
                }
            }
        })
    }
}
