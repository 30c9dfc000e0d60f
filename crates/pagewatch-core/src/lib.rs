//! # PageWatch Core
//!
//! Page visibility tracking and lifecycle callback dispatch.
//!
//! Browsers report "is the user looking at this page" through several
//! overlapping signals: the Page Visibility API (with vendor prefixes), window
//! focus and blur, load and unload, and on some platforms a native host-app
//! bridge. This crate folds them into one [`PageState`] and notifies
//! subscribers when it changes.
//!
//! ## Design Goals
//!
//! 1. **One canonical state**: redundant signals never produce duplicate events
//! 2. **Deterministic ordering**: handlers run by descending priority, ties in
//!    registration order
//! 3. **Bounded dispatch**: asynchronous handlers are waited on for at most the
//!    configured timeout
//! 4. **Isolation**: a failing or panicking handler is logged, never fatal
//! 5. **Structured logging**: Full tracing support
//!
//! ## Example
//!
//! ```no_run
//! use std::rc::Rc;
//! use pagewatch_core::{handler, CallbackOptions, LifecycleEventType, SimulatedHost, VisibilityContext};
//!
//! # async fn run() {
//! let host = Rc::new(SimulatedHost::new());
//! let context = VisibilityContext::new();
//! let engine = context.get_instance(host.clone(), None);
//!
//! engine.on(
//!     LifecycleEventType::ViewHide,
//!     handler(|event| println!("hidden via {}", event.source)),
//!     CallbackOptions::new().priority(10),
//! );
//!
//! host.blur();
//! engine.flush().await;
//! context.destroy();
//! # }
//! ```

pub mod config;
pub mod env;
pub mod host;
pub mod lifecycle;
pub mod registry;
pub mod sim;

mod bindings;
mod dispatch;
mod engine;

pub use config::VisibilityConfig;
pub use engine::{PageVisibility, VisibilityContext};
pub use env::{resolve_visibility_props, VisibilityProps};
pub use host::{HybridListener, Listener, ListenerTarget, PageHost};
pub use lifecycle::*;
pub use registry::{
    async_handler, fallible_handler, handler, CallbackId, CallbackOptions, CallbackRecord,
    CallbackRegistry, Handler, HandlerFuture, HandlerOutcome, Predicate, RegistryStats,
};
pub use sim::SimulatedHost;
