//! Callback registry.
//!
//! Records are keyed by a monotonic sequence number, so iteration order is
//! registration order and a stable sort by priority keeps ties in the order
//! callers registered them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use pagewatch_common::Result;
use serde::Serialize;

use crate::lifecycle::{LifecycleEventType, TransitionEvent};

/// Unique registration id. Never reused within one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId {
    seq: u64,
    salt: u32,
}

impl CallbackId {
    /// Sequence number; strictly increasing across registrations.
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event_{}_{:08x}", self.seq, self.salt)
    }
}

/// Future returned by an asynchronous handler.
pub type HandlerFuture = LocalBoxFuture<'static, Result<()>>;

/// What a handler produced when invoked.
pub enum HandlerOutcome {
    /// Finished synchronously.
    Ready(Result<()>),
    /// Still running; the dispatcher waits for it, bounded by the callback timeout.
    Pending(HandlerFuture),
}

impl fmt::Debug for HandlerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerOutcome::Ready(result) => f.debug_tuple("Ready").field(result).finish(),
            HandlerOutcome::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

/// A subscriber. `off` matches handlers by `Rc` identity, so keep a clone of
/// the `Rc` if you intend to remove it that way.
pub type Handler = Rc<dyn Fn(&TransitionEvent) -> HandlerOutcome>;

/// Gate evaluated right before a handler would run.
pub type Predicate = Rc<dyn Fn() -> bool>;

/// Wrap an infallible synchronous closure.
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&TransitionEvent) + 'static,
{
    Rc::new(move |event: &TransitionEvent| {
        f(event);
        HandlerOutcome::Ready(Ok(()))
    })
}

/// Wrap a synchronous closure that can fail.
pub fn fallible_handler<F>(f: F) -> Handler
where
    F: Fn(&TransitionEvent) -> Result<()> + 'static,
{
    Rc::new(move |event: &TransitionEvent| HandlerOutcome::Ready(f(event)))
}

/// Wrap an asynchronous closure.
pub fn async_handler<F, Fut>(f: F) -> Handler
where
    F: Fn(TransitionEvent) -> Fut + 'static,
    Fut: Future<Output = Result<()>> + 'static,
{
    Rc::new(move |event: &TransitionEvent| {
        HandlerOutcome::Pending(Box::pin(f(*event)))
    })
}

/// Registration options.
#[derive(Clone, Default)]
pub struct CallbackOptions {
    pub once: bool,
    pub namespace: String,
    pub priority: i32,
    pub predicate: Option<Predicate>,
}

impl CallbackOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove the callback after its first successful firing.
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Higher fires first.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Only fire while `predicate` returns true.
    pub fn when<F>(mut self, predicate: F) -> Self
    where
        F: Fn() -> bool + 'static,
    {
        self.predicate = Some(Rc::new(predicate));
        self
    }
}

impl fmt::Debug for CallbackOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackOptions")
            .field("once", &self.once)
            .field("namespace", &self.namespace)
            .field("priority", &self.priority)
            .field("has_predicate", &self.predicate.is_some())
            .finish()
    }
}

/// A registered callback.
#[derive(Clone)]
pub struct CallbackRecord {
    pub id: CallbackId,
    pub event_type: LifecycleEventType,
    pub handler: Handler,
    pub once: bool,
    pub namespace: String,
    pub priority: i32,
    pub predicate: Option<Predicate>,
    /// Dispatch timestamp of the last successful firing.
    pub last_triggered_at: Option<f64>,
}

impl CallbackRecord {
    /// Evaluate the predicate; records without one always pass.
    pub fn should_fire(&self) -> bool {
        self.predicate.as_ref().map_or(true, |predicate| predicate())
    }
}

impl fmt::Debug for CallbackRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRecord")
            .field("id", &self.id)
            .field("event_type", &self.event_type)
            .field("once", &self.once)
            .field("namespace", &self.namespace)
            .field("priority", &self.priority)
            .field("last_triggered_at", &self.last_triggered_at)
            .finish_non_exhaustive()
    }
}

/// Aggregate counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub total: usize,
    /// Every event type is present, zero-filled.
    pub by_type: BTreeMap<LifecycleEventType, usize>,
    /// Only non-empty namespaces are counted.
    pub by_namespace: BTreeMap<String, usize>,
}

/// Callback store owned by one engine.
#[derive(Default)]
pub struct CallbackRegistry {
    records: BTreeMap<u64, CallbackRecord>,
    /// One-shot records a dispatch pass is currently running.
    claimed: BTreeSet<u64>,
    next_seq: u64,
    closed: bool,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a callback. Returns `None` once the registry has been closed.
    pub fn register(
        &mut self,
        event_type: LifecycleEventType,
        handler: Handler,
        options: CallbackOptions,
    ) -> Option<CallbackId> {
        if self.closed {
            return None;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let id = CallbackId {
            seq,
            salt: rand::random(),
        };

        self.records.insert(
            seq,
            CallbackRecord {
                id,
                event_type,
                handler,
                once: options.once,
                namespace: options.namespace,
                priority: options.priority,
                predicate: options.predicate,
                last_triggered_at: None,
            },
        );
        Some(id)
    }

    /// `register` with `once` forced on.
    pub fn register_once(
        &mut self,
        event_type: LifecycleEventType,
        handler: Handler,
        options: CallbackOptions,
    ) -> Option<CallbackId> {
        self.register(event_type, handler, options.once())
    }

    pub fn get(&self, id: &CallbackId) -> Option<&CallbackRecord> {
        self.records.get(&id.seq).filter(|record| record.id == *id)
    }

    pub fn contains(&self, id: &CallbackId) -> bool {
        self.get(id).is_some()
    }

    pub fn remove_by_id(&mut self, id: &CallbackId) -> bool {
        if !self.contains(id) {
            return false;
        }
        self.claimed.remove(&id.seq);
        self.records.remove(&id.seq).is_some()
    }

    /// Reserve a registered one-shot record for one dispatch pass. Returns
    /// false if the record is gone or another pass already holds it.
    pub fn claim(&mut self, id: &CallbackId) -> bool {
        self.contains(id) && self.claimed.insert(id.seq)
    }

    /// Give back a claim without consuming the record.
    pub fn release(&mut self, id: &CallbackId) {
        self.claimed.remove(&id.seq);
    }

    pub fn is_claimed(&self, id: &CallbackId) -> bool {
        self.claimed.contains(&id.seq)
    }

    /// Remove every record of `event_type`, narrowed by handler identity and
    /// namespace when given. An empty namespace does not narrow.
    pub fn remove_by_filter(
        &mut self,
        event_type: LifecycleEventType,
        handler: Option<&Handler>,
        namespace: Option<&str>,
    ) -> usize {
        let namespace = namespace.filter(|ns| !ns.is_empty());
        self.remove_where(|record| {
            record.event_type == event_type
                && handler.map_or(true, |h| Rc::ptr_eq(h, &record.handler))
                && namespace.map_or(true, |ns| record.namespace == ns)
        })
    }

    pub fn remove_by_namespace(&mut self, namespace: &str) -> usize {
        self.remove_where(|record| record.namespace == namespace)
    }

    fn remove_where(&mut self, mut matches: impl FnMut(&CallbackRecord) -> bool) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| !matches(record));
        let records = &self.records;
        self.claimed.retain(|seq| records.contains_key(seq));
        before - self.records.len()
    }

    /// Records for `event_type`, highest priority first, ties in
    /// registration order.
    pub fn snapshot_for_type(&self, event_type: LifecycleEventType) -> Vec<CallbackRecord> {
        let mut records: Vec<CallbackRecord> = self
            .records
            .values()
            .filter(|record| record.event_type == event_type)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.priority.cmp(&a.priority));
        records
    }

    /// Record a successful firing. Returns false if the record is gone.
    pub fn mark_triggered(&mut self, id: &CallbackId, timestamp: f64) -> bool {
        match self.records.get_mut(&id.seq) {
            Some(record) if record.id == *id => {
                record.last_triggered_at = Some(timestamp);
                true
            }
            _ => false,
        }
    }

    pub fn stats(&self) -> RegistryStats {
        let mut by_type: BTreeMap<LifecycleEventType, usize> = LifecycleEventType::ALL
            .iter()
            .map(|event_type| (*event_type, 0))
            .collect();
        let mut by_namespace = BTreeMap::new();

        for record in self.records.values() {
            *by_type.entry(record.event_type).or_default() += 1;
            if !record.namespace.is_empty() {
                *by_namespace.entry(record.namespace.clone()).or_default() += 1;
            }
        }

        RegistryStats {
            total: self.records.len(),
            by_type,
            by_namespace,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop every record. Sequence numbers keep counting.
    pub fn clear(&mut self) {
        self.records.clear();
        self.claimed.clear();
    }

    /// Refuse further registrations.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("callback_count", &self.records.len())
            .field("claimed", &self.claimed.len())
            .field("next_seq", &self.next_seq)
            .field("closed", &self.closed)
            .finish()
    }
}
