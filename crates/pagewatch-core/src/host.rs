//! Host environment boundary.
//!
//! The engine never touches browser globals directly. Everything it needs
//! from the page (document properties, listener registration, the hybrid
//! bridge) goes through [`PageHost`].

use std::rc::Rc;

use crate::lifecycle::DocumentReadyState;

/// Object a raw listener is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerTarget {
    Document,
    Window,
}

/// A raw event listener. Identity (`Rc` pointer) is what removal matches on.
pub type Listener = Rc<dyn Fn()>;

/// Receives hybrid bridge reports; the argument is `true` when the host app
/// is in the foreground.
pub type HybridListener = Rc<dyn Fn(bool)>;

/// The page environment the engine is bound to.
pub trait PageHost {
    /// Whether a document object exists at all.
    fn has_document(&self) -> bool;

    /// Whether the document exposes a property with this name.
    fn has_document_property(&self, name: &str) -> bool;

    /// Read a boolean document property; missing properties read as `false`.
    fn document_flag(&self, name: &str) -> bool;

    /// Current document ready state.
    fn ready_state(&self) -> DocumentReadyState;

    /// Attach a listener. The same `Rc` is handed back on removal.
    fn add_listener(&self, target: ListenerTarget, event: &str, listener: Listener);

    /// Detach a listener previously attached with the same `Rc`.
    /// Returns whether anything was removed.
    fn remove_listener(&self, target: ListenerTarget, event: &str, listener: &Listener) -> bool;

    /// Whether a native host-app bridge has been injected.
    fn hybrid_bridge_available(&self) -> bool {
        false
    }

    /// Subscribe to foreground/background reports from the bridge.
    fn attach_hybrid_listener(&self, _listener: HybridListener) {}

    /// Unsubscribe a hybrid listener.
    fn detach_hybrid_listener(&self, _listener: &HybridListener) -> bool {
        false
    }
}
