//! Page lifecycle state for PageWatch.
//!
//! Collapses the raw host signals:
//! - visibilitychange (standard or vendor-prefixed)
//! - focus / blur
//! - load
//! - beforeunload / unload
//! - hybrid bridge reports
//!
//! into a single canonical [`PageState`], and maps every real change to the
//! semantic [`LifecycleEventType`] delivered to subscribers.

use serde::{Deserialize, Serialize};

/// Document ready state as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentReadyState {
    /// The document is still loading.
    #[default]
    Loading,
    /// The document has finished parsing, but sub-resources are still loading.
    Interactive,
    /// The document and all sub-resources have finished loading.
    Complete,
}

impl DocumentReadyState {
    /// Convert to the host string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentReadyState::Loading => "loading",
            DocumentReadyState::Interactive => "interactive",
            DocumentReadyState::Complete => "complete",
        }
    }
}

/// Canonical page state. Exactly one holds at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageState {
    #[default]
    Loading,
    Visible,
    Hidden,
    Unloading,
    Unloaded,
}

impl PageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageState::Loading => "loading",
            PageState::Visible => "visible",
            PageState::Hidden => "hidden",
            PageState::Unloading => "unloading",
            PageState::Unloaded => "unloaded",
        }
    }
}

impl std::fmt::Display for PageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Semantic event delivered to subscribers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum LifecycleEventType {
    ViewShow,
    ViewHide,
    ViewLoad,
    ViewUnload,
    ViewBeforeUnload,
    InitialLoad,
}

impl LifecycleEventType {
    /// Every event type, in declaration order.
    pub const ALL: [LifecycleEventType; 6] = [
        LifecycleEventType::ViewShow,
        LifecycleEventType::ViewHide,
        LifecycleEventType::ViewLoad,
        LifecycleEventType::ViewUnload,
        LifecycleEventType::ViewBeforeUnload,
        LifecycleEventType::InitialLoad,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEventType::ViewShow => "viewShow",
            LifecycleEventType::ViewHide => "viewHide",
            LifecycleEventType::ViewLoad => "viewLoad",
            LifecycleEventType::ViewUnload => "viewUnload",
            LifecycleEventType::ViewBeforeUnload => "viewBeforeUnload",
            LifecycleEventType::InitialLoad => "initialLoad",
        }
    }
}

impl std::fmt::Display for LifecycleEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw origin of a transition. Diagnostic only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    VisibilityChange,
    Focus,
    Blur,
    Load,
    Unload,
    BeforeUnload,
    Hybrid,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::VisibilityChange => "visibilitychange",
            TriggerSource::Focus => "focus",
            TriggerSource::Blur => "blur",
            TriggerSource::Load => "load",
            TriggerSource::Unload => "unload",
            TriggerSource::BeforeUnload => "beforeunload",
            TriggerSource::Hybrid => "hybrid",
        }
    }
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw host signal, with whatever the host reported alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Visibility API change; `hidden` is the host's hidden flag at delivery.
    VisibilityChange { hidden: bool },
    Focus,
    Blur,
    /// Window load, or the synthesized load when the document is already complete.
    Load,
    BeforeUnload,
    Unload,
    /// Host-app bridge report.
    Hybrid { visible: bool },
}

impl Trigger {
    /// The diagnostic source passed to handlers.
    pub fn source(&self) -> TriggerSource {
        match self {
            Trigger::VisibilityChange { .. } => TriggerSource::VisibilityChange,
            Trigger::Focus => TriggerSource::Focus,
            Trigger::Blur => TriggerSource::Blur,
            Trigger::Load => TriggerSource::Load,
            Trigger::BeforeUnload => TriggerSource::BeforeUnload,
            Trigger::Unload => TriggerSource::Unload,
            Trigger::Hybrid { .. } => TriggerSource::Hybrid,
        }
    }

    /// Target state and the event emitted when the page enters it.
    pub fn target(&self) -> (PageState, LifecycleEventType) {
        match *self {
            Trigger::VisibilityChange { hidden: true }
            | Trigger::Blur
            | Trigger::Hybrid { visible: false } => (PageState::Hidden, LifecycleEventType::ViewHide),
            Trigger::VisibilityChange { hidden: false }
            | Trigger::Focus
            | Trigger::Load
            | Trigger::Hybrid { visible: true } => {
                (PageState::Visible, LifecycleEventType::ViewShow)
            }
            Trigger::BeforeUnload => (PageState::Unloading, LifecycleEventType::ViewBeforeUnload),
            Trigger::Unload => (PageState::Unloaded, LifecycleEventType::ViewUnload),
        }
    }
}

/// A recorded state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub event_type: LifecycleEventType,
    pub source: TriggerSource,
    pub previous_state: PageState,
    pub current_state: PageState,
}

/// Immutable snapshot handed to every handler of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionEvent {
    #[serde(rename = "type")]
    pub event_type: LifecycleEventType,
    pub source: TriggerSource,
    /// Milliseconds since the engine was created.
    pub timestamp: f64,
    pub previous_state: PageState,
    pub current_state: PageState,
}

impl TransitionEvent {
    pub fn from_transition(transition: Transition, timestamp: f64) -> Self {
        Self {
            event_type: transition.event_type,
            source: transition.source,
            timestamp,
            previous_state: transition.previous_state,
            current_state: transition.current_state,
        }
    }
}

/// Page lifecycle state machine.
#[derive(Debug, Default)]
pub struct PageLifecycle {
    current: PageState,
    previous: PageState,
}

impl PageLifecycle {
    /// Create a state machine in the `Loading` state.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_state(&self) -> PageState {
        self.current
    }

    pub fn previous_state(&self) -> PageState {
        self.previous
    }

    /// Move to `new_state`. Returns false, and changes nothing, when the page
    /// is already there.
    pub fn apply_transition(&mut self, new_state: PageState) -> bool {
        if self.current == new_state {
            return false;
        }
        self.previous = self.current;
        self.current = new_state;
        true
    }

    /// Run a raw signal through the transition table.
    pub fn apply(&mut self, trigger: Trigger) -> Option<Transition> {
        let (new_state, event_type) = trigger.target();
        if !self.apply_transition(new_state) {
            return None;
        }
        Some(Transition {
            event_type,
            source: trigger.source(),
            previous_state: self.previous,
            current_state: self.current,
        })
    }
}
