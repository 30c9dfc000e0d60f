//! Callback dispatch.
//!
//! One pass per transition: the matching callbacks are snapshotted when the
//! transition happens, then run one at a time in priority order. A failing,
//! panicking or slow handler is logged and skipped; it never stops the pass.
//!
//! Passes may overlap while an async handler is pending. A one-shot record is
//! claimed for the duration of its run so an overlapping pass skips it.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use pagewatch_common::{with_timeout, PageWatchError, Result};
use tracing::{debug, error, trace, warn};

use crate::engine::EngineState;
use crate::lifecycle::TransitionEvent;
use crate::registry::{CallbackRecord, HandlerOutcome};

/// Run one pass. `records` is the snapshot taken at transition time; `None`
/// snapshots now.
pub(crate) async fn dispatch(
    state: Rc<EngineState>,
    event: TransitionEvent,
    records: Option<Vec<CallbackRecord>>,
) {
    if state.is_destroyed() {
        return;
    }

    let records = match records {
        Some(records) => records,
        None => state.registry.borrow().snapshot_for_type(event.event_type),
    };
    if state.config.debug {
        debug!(
            event = %event.event_type,
            source = %event.source,
            callbacks = records.len(),
            "Dispatching"
        );
    }

    for record in records {
        if state.is_destroyed() {
            break;
        }

        if record.once && !state.registry.borrow_mut().claim(&record.id) {
            if state.config.debug {
                trace!(id = %record.id, "One-shot callback running or removed; skipped");
            }
            continue;
        }

        match guarded(|| record.should_fire()) {
            Ok(true) => {}
            Ok(false) => {
                if state.config.debug {
                    trace!(id = %record.id, "Predicate declined; skipped");
                }
                release(&state, &record);
                continue;
            }
            Err(err) => {
                error!(id = %record.id, event = %event.event_type, error = %err, "Predicate failed");
                release(&state, &record);
                continue;
            }
        }

        let outcome = run_handler(&state, &record, &event).await;
        if outcome.is_err() {
            release(&state, &record);
        }

        match outcome {
            Ok(()) => {
                let mut registry = state.registry.borrow_mut();
                registry.mark_triggered(&record.id, event.timestamp);
                if record.once {
                    registry.remove_by_id(&record.id);
                }
            }
            Err(err) if err.is_timeout() => {
                warn!(
                    id = %record.id,
                    event = %event.event_type,
                    error = %err,
                    "Callback timed out; continuing without it"
                );
            }
            Err(err) => {
                error!(
                    id = %record.id,
                    event = %event.event_type,
                    category = err.category(),
                    error = %err,
                    "Error in callback"
                );
            }
        }
    }
}

/// Invoke one handler. Pending results race the callback timeout; the
/// handler task is detached, so losing the race only stops the waiting.
async fn run_handler(
    state: &EngineState,
    record: &CallbackRecord,
    event: &TransitionEvent,
) -> Result<()> {
    match guarded(|| (record.handler)(event))? {
        HandlerOutcome::Ready(result) => result,
        HandlerOutcome::Pending(future) => {
            let task = tokio::task::spawn_local(future);
            match with_timeout(state.config.max_callback_execution_time(), task).await? {
                Ok(result) => result,
                Err(join_err) if join_err.is_panic() => {
                    Err(PageWatchError::panicked(&*join_err.into_panic()))
                }
                Err(join_err) => Err(PageWatchError::handler(join_err.to_string())),
            }
        }
    }
}

fn release(state: &EngineState, record: &CallbackRecord) {
    if record.once {
        state.registry.borrow_mut().release(&record.id);
    }
}

fn guarded<T>(f: impl FnOnce() -> T) -> Result<T> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| PageWatchError::panicked(&*payload))
}
