//! Dispatch ordering, timeout and isolation tests.

mod common;

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use common::{loading_page, local, ready_page, Recorder};
use pagewatch_common::{PageWatchError, Result};
use pagewatch_core::{
    async_handler, fallible_handler, handler, CallbackOptions, LifecycleEventType, PageState,
    TransitionEvent, Trigger, TriggerSource, VisibilityConfig,
};
use tokio::time::{sleep, Instant};

async fn never_settles(_: TransitionEvent) -> Result<()> {
    std::future::pending().await
}

async fn rejects(_: TransitionEvent) -> Result<()> {
    Err(PageWatchError::handler("rejected"))
}

async fn explodes(_: TransitionEvent) -> Result<()> {
    panic!("async handler exploded")
}

fn short_timeout() -> VisibilityConfig {
    VisibilityConfig::default().with_max_callback_execution_time(Duration::from_millis(100))
}

/// Register A (priority 10) and B (priority 1) on viewHide, blur while visible.
#[tokio::test(start_paused = true)]
async fn test_blur_fires_by_priority() {
    local(async {
        let page = ready_page(VisibilityConfig::default());
        page.engine.flush().await;
        assert_eq!(page.engine.current_state(), PageState::Visible);

        let recorder = Recorder::new();
        page.engine.on(
            LifecycleEventType::ViewHide,
            recorder.handler("B"),
            CallbackOptions::new().priority(1),
        );
        page.engine.on(
            LifecycleEventType::ViewHide,
            recorder.handler("A"),
            CallbackOptions::new().priority(10),
        );

        page.host.blur();
        page.engine.flush().await;

        assert_eq!(recorder.calls(), vec!["A", "B"]);
        assert_eq!(page.engine.current_state(), PageState::Hidden);
        assert_eq!(page.engine.previous_state(), PageState::Visible);

        let event = recorder.events()[0];
        assert_eq!(event.event_type, LifecycleEventType::ViewHide);
        assert_eq!(event.source, TriggerSource::Blur);
        assert_eq!(event.previous_state, PageState::Visible);
        assert_eq!(event.current_state, PageState::Hidden);
    })
    .await;
}

/// Equal priorities fire in registration order.
#[tokio::test(start_paused = true)]
async fn test_equal_priority_keeps_registration_order() {
    local(async {
        let page = loading_page(VisibilityConfig::default());
        let recorder = Recorder::new();
        let labels: Vec<String> = (0..8).map(|i| format!("cb{i}")).collect();

        for label in &labels {
            page.engine.on(
                LifecycleEventType::ViewShow,
                recorder.handler(label),
                CallbackOptions::new().priority(5),
            );
        }
        page.engine.on(
            LifecycleEventType::ViewShow,
            recorder.handler("low"),
            CallbackOptions::new().priority(-1),
        );
        page.engine.on(
            LifecycleEventType::ViewShow,
            recorder.handler("high"),
            CallbackOptions::new().priority(6),
        );

        page.host.focus();
        page.engine.flush().await;

        let mut expected = vec!["high".to_string()];
        expected.extend(labels);
        expected.push("low".to_string());
        assert_eq!(recorder.calls(), expected);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_once_fires_exactly_once() {
    local(async {
        let page = loading_page(VisibilityConfig::default());
        let recorder = Recorder::new();
        let id = page
            .engine
            .once(LifecycleEventType::ViewShow, recorder.handler("once"), CallbackOptions::new())
            .unwrap();
        page.engine.on(
            LifecycleEventType::ViewShow,
            recorder.handler("always"),
            CallbackOptions::new(),
        );

        for _ in 0..3 {
            page.host.focus();
            page.host.blur();
            page.engine.flush().await;
        }

        assert_eq!(recorder.calls(), vec!["once", "always", "always", "always"]);
        assert!(!page.engine.is_registered(&id));
        assert!(!page.engine.off_by_id(&id));
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_last_triggered_recorded() {
    local(async {
        let page = loading_page(VisibilityConfig::default());
        let recorder = Recorder::new();
        let id = page
            .engine
            .on(LifecycleEventType::ViewShow, recorder.handler("a"), CallbackOptions::new())
            .unwrap();
        assert_eq!(page.engine.last_triggered_at(&id), None);

        sleep(Duration::from_millis(40)).await;
        page.host.focus();
        page.engine.flush().await;

        let first = page.engine.last_triggered_at(&id).unwrap();
        assert!(first >= 40.0);
        assert_eq!(recorder.events()[0].timestamp, first);

        sleep(Duration::from_millis(10)).await;
        page.host.blur();
        page.host.focus();
        page.engine.flush().await;
        assert!(page.engine.last_triggered_at(&id).unwrap() > first);
    })
    .await;
}

/// A handler that never settles costs at most one timeout each.
#[tokio::test(start_paused = true)]
async fn test_pending_handlers_bounded_by_timeout() {
    local(async {
        let page = loading_page(short_timeout());
        let recorder = Recorder::new();

        for _ in 0..3 {
            page.engine.on(
                LifecycleEventType::ViewShow,
                async_handler(never_settles),
                CallbackOptions::new().priority(10),
            );
        }
        page.engine.on(
            LifecycleEventType::ViewShow,
            recorder.handler("after"),
            CallbackOptions::new(),
        );

        let start = Instant::now();
        page.host.focus();
        page.engine.flush().await;
        let elapsed = start.elapsed();

        assert_eq!(recorder.calls(), vec!["after"]);
        assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(400), "{elapsed:?}");
    })
    .await;
}

/// Losing the race stops the waiting, not the handler.
#[tokio::test(start_paused = true)]
async fn test_timed_out_handler_keeps_running() {
    local(async {
        let page = loading_page(short_timeout());
        let finished = Rc::new(Cell::new(false));

        let finished_clone = finished.clone();
        let id = page
            .engine
            .once(
                LifecycleEventType::ViewShow,
                async_handler(move |_| {
                    let finished = finished_clone.clone();
                    async move {
                        sleep(Duration::from_millis(250)).await;
                        finished.set(true);
                        Ok::<_, PageWatchError>(())
                    }
                }),
                CallbackOptions::new(),
            )
            .unwrap();

        page.host.focus();
        page.engine.flush().await;

        assert!(!finished.get());
        // A timeout is a failure: not consumed, not marked.
        assert!(page.engine.is_registered(&id));
        assert_eq!(page.engine.last_triggered_at(&id), None);

        sleep(Duration::from_millis(300)).await;
        assert!(finished.get());
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_async_handler_completes_within_budget() {
    local(async {
        let page = loading_page(short_timeout());
        let recorder = Recorder::new();

        let slow = recorder.clone();
        page.engine.once(
            LifecycleEventType::ViewShow,
            async_handler(move |_| {
                let slow = slow.clone();
                async move {
                    sleep(Duration::from_millis(50)).await;
                    slow.push("slow");
                    Ok::<_, PageWatchError>(())
                }
            }),
            CallbackOptions::new().priority(2),
        );
        page.engine.on(
            LifecycleEventType::ViewShow,
            recorder.handler("next"),
            CallbackOptions::new().priority(1),
        );

        page.host.focus();
        page.engine.flush().await;

        // Sequential: the async handler finished before the next one started.
        assert_eq!(recorder.calls(), vec!["slow", "next"]);
        assert_eq!(page.engine.status().total, 1);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_failures_are_isolated() {
    local(async {
        let page = loading_page(short_timeout());
        let recorder = Recorder::new();

        page.engine.on(
            LifecycleEventType::ViewShow,
            handler(|_| panic!("handler exploded")),
            CallbackOptions::new().priority(40),
        );
        let failing = page
            .engine
            .once(
                LifecycleEventType::ViewShow,
                fallible_handler(|_| Err(PageWatchError::handler("refused"))),
                CallbackOptions::new().priority(30),
            )
            .unwrap();
        page.engine.on(
            LifecycleEventType::ViewShow,
            async_handler(rejects),
            CallbackOptions::new().priority(20),
        );
        page.engine.on(
            LifecycleEventType::ViewShow,
            async_handler(explodes),
            CallbackOptions::new().priority(15),
        );
        page.engine.on(
            LifecycleEventType::ViewShow,
            recorder.handler("survivor"),
            CallbackOptions::new().priority(10),
        );

        page.host.focus();
        page.engine.flush().await;

        assert_eq!(recorder.calls(), vec!["survivor"]);
        assert_eq!(page.engine.current_state(), PageState::Visible);
        // Failed one-shot callbacks stay registered.
        assert!(page.engine.is_registered(&failing));
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_predicate_gates_without_consuming() {
    local(async {
        let page = loading_page(VisibilityConfig::default());
        let recorder = Recorder::new();
        let enabled = Rc::new(Cell::new(false));

        let gate = enabled.clone();
        let id = page
            .engine
            .once(
                LifecycleEventType::ViewShow,
                recorder.handler("gated"),
                CallbackOptions::new().when(move || gate.get()),
            )
            .unwrap();

        page.host.focus();
        page.engine.flush().await;
        assert!(recorder.calls().is_empty());
        assert!(page.engine.is_registered(&id));
        assert_eq!(page.engine.last_triggered_at(&id), None);

        enabled.set(true);
        page.host.blur();
        page.host.focus();
        page.engine.flush().await;
        assert_eq!(recorder.calls(), vec!["gated"]);
        assert!(!page.engine.is_registered(&id));
    })
    .await;
}

/// Registry changes made by a handler apply from the next pass on.
#[tokio::test(start_paused = true)]
async fn test_mutation_during_dispatch_uses_snapshot() {
    local(async {
        let page = loading_page(VisibilityConfig::default());
        let recorder = Recorder::new();

        let late = recorder.handler("late");
        let victim = recorder.handler("victim");
        let engine = page.engine.clone();
        let registrar = recorder.clone();
        let late_clone = late.clone();
        let victim_clone = victim.clone();
        page.engine.once(
            LifecycleEventType::ViewShow,
            handler(move |_| {
                registrar.push("first");
                engine.on(
                    LifecycleEventType::ViewShow,
                    late_clone.clone(),
                    CallbackOptions::new(),
                );
                engine.off(LifecycleEventType::ViewShow, Some(&victim_clone), None);
            }),
            CallbackOptions::new().priority(10),
        );
        page.engine.on(LifecycleEventType::ViewShow, victim, CallbackOptions::new());

        page.host.focus();
        page.engine.flush().await;
        assert_eq!(recorder.calls(), vec!["first", "victim"]);

        page.host.blur();
        page.host.focus();
        page.engine.flush().await;
        assert_eq!(recorder.calls(), vec!["first", "victim", "late"]);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_off_removes_only_matching_handler() {
    local(async {
        let page = loading_page(VisibilityConfig::default());
        let recorder = Recorder::new();
        let a = recorder.handler("A");
        let b = recorder.handler("B");
        page.engine.on(LifecycleEventType::ViewHide, a.clone(), CallbackOptions::new());
        page.engine.on(LifecycleEventType::ViewHide, b, CallbackOptions::new());

        assert_eq!(page.engine.off(LifecycleEventType::ViewHide, Some(&a), None), 1);

        page.host.blur();
        page.engine.flush().await;
        assert_eq!(recorder.calls(), vec!["B"]);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_manual_dispatch_keeps_state() {
    local(async {
        let page = loading_page(VisibilityConfig::default());
        let recorder = Recorder::new();
        page.engine.on(
            LifecycleEventType::InitialLoad,
            recorder.handler("initial"),
            CallbackOptions::new(),
        );

        page.engine
            .dispatch(LifecycleEventType::InitialLoad, TriggerSource::Load)
            .await;

        assert_eq!(recorder.calls(), vec!["initial"]);
        let event = recorder.events()[0];
        assert_eq!(event.current_state, PageState::Loading);
        assert_eq!(page.engine.current_state(), PageState::Loading);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_injected_trigger() {
    local(async {
        let page = loading_page(VisibilityConfig::default().with_debug(true));
        let recorder = Recorder::new();
        page.engine.on(
            LifecycleEventType::ViewBeforeUnload,
            recorder.handler("before"),
            CallbackOptions::new(),
        );
        page.engine.on(
            LifecycleEventType::ViewUnload,
            recorder.handler("unload"),
            CallbackOptions::new(),
        );

        assert!(page.engine.handle_trigger(Trigger::BeforeUnload));
        assert!(!page.engine.handle_trigger(Trigger::BeforeUnload));
        assert!(page.engine.handle_trigger(Trigger::Unload));
        page.engine.flush().await;

        assert_eq!(recorder.calls(), vec!["before", "unload"]);
        assert_eq!(page.engine.current_state(), PageState::Unloaded);
        assert_eq!(page.engine.previous_state(), PageState::Unloading);
    })
    .await;
}

/// Callbacks are selected when the transition happens, not when its pass
/// gets to run.
#[tokio::test(start_paused = true)]
async fn test_callbacks_selected_at_transition() {
    local(async {
        let page = ready_page(VisibilityConfig::default());
        page.engine.flush().await;
        let recorder = Recorder::new();

        let early = page
            .engine
            .on(LifecycleEventType::ViewHide, recorder.handler("early"), CallbackOptions::new())
            .unwrap();

        page.host.blur();
        page.engine.on(
            LifecycleEventType::ViewHide,
            recorder.handler("late"),
            CallbackOptions::new(),
        );
        assert!(page.engine.off_by_id(&early));
        page.engine.flush().await;
        assert_eq!(recorder.calls(), vec!["early"]);

        page.host.focus();
        page.host.blur();
        page.engine.flush().await;
        assert_eq!(recorder.calls(), vec!["early", "late"]);
    })
    .await;
}

/// A pass that starts while a slow one-shot handler from the previous pass
/// is still pending skips it and does not wait for it.
#[tokio::test(start_paused = true)]
async fn test_overlapping_passes_run_once_handler_once() {
    local(async {
        let page = ready_page(VisibilityConfig::default());
        page.engine.flush().await;
        let recorder = Recorder::new();

        let slow = recorder.clone();
        let id = page
            .engine
            .once(
                LifecycleEventType::ViewHide,
                async_handler(move |_| {
                    let slow = slow.clone();
                    async move {
                        slow.push("once:start");
                        sleep(Duration::from_millis(100)).await;
                        slow.push("once:end");
                        Ok::<_, PageWatchError>(())
                    }
                }),
                CallbackOptions::new().priority(10),
            )
            .unwrap();
        page.engine.on(
            LifecycleEventType::ViewHide,
            recorder.handler("always"),
            CallbackOptions::new(),
        );

        page.host.blur();
        sleep(Duration::from_millis(10)).await;
        page.host.focus();
        page.host.blur();
        page.engine.flush().await;

        // Second pass ran its remaining handler while the first was waiting.
        assert_eq!(
            recorder.calls(),
            vec!["once:start", "always", "once:end", "always"]
        );
        assert!(!page.engine.is_registered(&id));

        page.host.focus();
        page.host.blur();
        page.engine.flush().await;
        assert_eq!(recorder.calls().len(), 5);
    })
    .await;
}

/// A one-shot handler that timed out is released and fires on a later pass.
#[tokio::test(start_paused = true)]
async fn test_timed_out_once_handler_fires_later() {
    local(async {
        let page = ready_page(short_timeout());
        page.engine.flush().await;
        let attempts = Rc::new(Cell::new(0u32));

        let counter = attempts.clone();
        let id = page
            .engine
            .once(
                LifecycleEventType::ViewHide,
                async_handler(move |_| {
                    let counter = counter.clone();
                    async move {
                        counter.set(counter.get() + 1);
                        if counter.get() == 1 {
                            std::future::pending::<()>().await;
                        }
                        Ok::<_, PageWatchError>(())
                    }
                }),
                CallbackOptions::new(),
            )
            .unwrap();

        page.host.blur();
        page.engine.flush().await;
        assert_eq!(attempts.get(), 1);
        assert!(page.engine.is_registered(&id));

        page.host.focus();
        page.host.blur();
        page.engine.flush().await;
        assert_eq!(attempts.get(), 2);
        assert!(!page.engine.is_registered(&id));
        assert!(page.engine.last_triggered_at(&id).is_none());
    })
    .await;
}
