//! Shared helpers for the engine integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

use pagewatch_core::{
    handler, DocumentReadyState, Handler, PageVisibility, SimulatedHost, TransitionEvent,
    VisibilityConfig, VisibilityContext,
};
use tokio::task::LocalSet;

/// Run `future` on a fresh local task set, the way a page event loop would.
pub async fn local<F: Future>(future: F) -> F::Output {
    LocalSet::new().run_until(future).await
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("pagewatch_core=debug")
        .try_init();
}

pub struct Page {
    pub host: Rc<SimulatedHost>,
    pub context: VisibilityContext,
    pub engine: PageVisibility,
}

/// A page that has not finished loading.
pub fn loading_page(config: VisibilityConfig) -> Page {
    page_with(SimulatedHost::new(), config)
}

/// A page whose document was already complete when the engine started.
pub fn ready_page(config: VisibilityConfig) -> Page {
    page_with(
        SimulatedHost::new().with_ready_state(DocumentReadyState::Complete),
        config,
    )
}

pub fn page_with(host: SimulatedHost, config: VisibilityConfig) -> Page {
    init_tracing();
    let host = Rc::new(host);
    let context = VisibilityContext::new();
    let engine = context.get_instance(host.clone(), Some(config));
    Page {
        host,
        context,
        engine,
    }
}

/// Collects labels in invocation order.
#[derive(Clone, Default)]
pub struct Recorder {
    calls: Rc<RefCell<Vec<String>>>,
    events: Rc<RefCell<Vec<TransitionEvent>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A synchronous handler that records `label`.
    pub fn handler(&self, label: &str) -> Handler {
        let calls = self.calls.clone();
        let events = self.events.clone();
        let label = label.to_string();
        handler(move |event| {
            calls.borrow_mut().push(label.clone());
            events.borrow_mut().push(*event);
        })
    }

    pub fn push(&self, label: &str) {
        self.calls.borrow_mut().push(label.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn events(&self) -> Vec<TransitionEvent> {
        self.events.borrow().clone()
    }
}
