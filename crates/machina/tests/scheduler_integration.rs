//! End-to-end scenarios, mirroring the exmachina `test_machina.py` suite:
//! exact iteration counts, double-start/force-stop semantics, execute
//! invocation through an `Event`, and fail-fast error propagation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use machina::{BodyError, DependencyResolver, EmitOptions, GroupLimits, Machina, MachinaError};

#[tokio::test]
async fn emit_runs_exactly_count_times_then_stays_done() {
    let bot = Machina::new();
    let count = Arc::new(AtomicU64::new(0));
    let counted = Arc::clone(&count);

    bot.emit(
        "ticker",
        EmitOptions {
            count: Some(3),
            interval: std::time::Duration::from_millis(5),
            alive: true,
        },
        move |_event| {
            let counted = Arc::clone(&counted);
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok::<(), BodyError>(())
            }
        },
    )
    .unwrap();

    bot.run().await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 3);

    // A second run() must not invoke an already-exhausted emit again.
    bot.run().await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn duplicate_emit_name_is_rejected() {
    let bot = Machina::new();
    bot.emit("dup", EmitOptions::default(), |_event| async { Ok::<(), BodyError>(()) })
        .unwrap();
    let err = bot
        .emit("dup", EmitOptions::default(), |_event| async { Ok::<(), BodyError>(()) })
        .unwrap_err();
    assert!(matches!(err, MachinaError::Registration(_)));
}

#[tokio::test]
async fn duplicate_concurrent_group_name_is_rejected() {
    let bot = Machina::new();
    bot.create_concurrent_group("g", GroupLimits::default()).unwrap();
    let err = bot
        .create_concurrent_group("g", GroupLimits::default())
        .unwrap_err();
    assert!(matches!(err, MachinaError::Registration(_)));
}

#[tokio::test]
async fn execute_registration_rejects_unknown_group() {
    let bot = Machina::new();
    let err = bot
        .execute::<i32, i32, _, _>("needs-group", &["nope"], |x| async move {
            Ok::<i32, BodyError>(x)
        })
        .unwrap_err();
    assert!(matches!(err, MachinaError::Registration(_)));
}

#[tokio::test]
async fn force_stop_prevents_any_further_body_invocation() {
    // Scenario 5 (§8): emit A starts B, then force-stops it before B's
    // first iteration has a chance to run. B's body must fire zero times.
    let bot = Machina::new();
    let b_count = Arc::new(AtomicU64::new(0));
    let counted = Arc::clone(&b_count);

    bot.emit(
        "b",
        EmitOptions {
            count: Some(1),
            alive: false,
            ..Default::default()
        },
        move |_event| {
            let counted = Arc::clone(&counted);
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok::<(), BodyError>(())
            }
        },
    )
    .unwrap();

    bot.emit(
        "a",
        EmitOptions {
            count: Some(1),
            ..Default::default()
        },
        move |event| async move {
            event.start("b").unwrap();
            event.stop("b", true).unwrap();
            Ok::<(), BodyError>(())
        },
    )
    .unwrap();

    bot.run().await.unwrap();
    assert_eq!(b_count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn soft_stop_lets_the_current_iteration_finish() {
    // Scenario 6 (§8): soft stop only clears `alive`; the iteration already
    // running when it's issued still completes.
    let bot = Machina::new();
    let b_count = Arc::new(AtomicU64::new(0));
    let counted = Arc::clone(&b_count);

    bot.emit(
        "b",
        EmitOptions {
            count: Some(1),
            alive: false,
            ..Default::default()
        },
        move |_event| {
            let counted = Arc::clone(&counted);
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok::<(), BodyError>(())
            }
        },
    )
    .unwrap();

    bot.emit(
        "a",
        EmitOptions {
            count: Some(1),
            ..Default::default()
        },
        move |event| async move {
            event.start("b").unwrap();
            event.stop("b", false).unwrap();
            Ok::<(), BodyError>(())
        },
    )
    .unwrap();

    bot.run().await.unwrap();
    assert_eq!(b_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn double_start_on_a_running_emit_is_a_no_op() {
    let bot = Machina::new();
    let count = Arc::new(AtomicU64::new(0));
    let counted = Arc::clone(&count);

    bot.emit(
        "c",
        EmitOptions {
            count: Some(1),
            alive: false,
            ..Default::default()
        },
        move |_event| {
            let counted = Arc::clone(&counted);
            async move {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                counted.fetch_add(1, Ordering::SeqCst);
                Ok::<(), BodyError>(())
            }
        },
    )
    .unwrap();

    bot.emit(
        "driver",
        EmitOptions {
            count: Some(1),
            ..Default::default()
        },
        move |event| async move {
            event.start("c").unwrap();
            // The second start, while "c" is still mid-iteration, must not
            // spawn a second driver.
            event.start("c").unwrap();
            Ok::<(), BodyError>(())
        },
    )
    .unwrap();

    bot.run().await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn event_execute_invokes_the_named_execute_and_returns_its_value() {
    let bot = Machina::new();
    bot.execute::<i32, i32, _, _>("double", &[], |x| async move { Ok::<i32, BodyError>(x * 2) })
        .unwrap();

    bot.emit(
        "caller",
        EmitOptions {
            count: Some(1),
            ..Default::default()
        },
        move |event| async move {
            let handle = event.execute::<i32, i32>("double", 21).unwrap();
            let out = handle.await.unwrap();
            assert_eq!(out, 42);
            Ok::<(), BodyError>(())
        },
    )
    .unwrap();

    bot.run().await.unwrap();
}

#[tokio::test]
async fn event_execute_on_unknown_name_is_a_lookup_error() {
    let bot = Machina::new();
    bot.emit(
        "caller",
        EmitOptions {
            count: Some(1),
            ..Default::default()
        },
        move |event| async move {
            let err = event.execute::<(), ()>("missing", ()).unwrap_err();
            assert!(matches!(err, MachinaError::Lookup(_)));
            Ok::<(), BodyError>(())
        },
    )
    .unwrap();
    bot.run().await.unwrap();
}

struct TaggingResolver;

#[async_trait]
impl DependencyResolver for TaggingResolver {
    async fn resolve(&self) -> Result<machina::ResolvedArgs, MachinaError> {
        let mut args: machina::ResolvedArgs = HashMap::new();
        args.insert("tag".to_string(), Box::new(7_i32));
        Ok(args)
    }
}

#[tokio::test]
async fn a_resolvers_output_reaches_the_emit_body_through_the_event() {
    let bot = Machina::with_resolver(TaggingResolver);
    let seen = Arc::new(AtomicU64::new(0));
    let captured = Arc::clone(&seen);

    bot.emit(
        "tagged",
        EmitOptions {
            count: Some(1),
            ..Default::default()
        },
        move |event| {
            let captured = Arc::clone(&captured);
            async move {
                let tag = *event.get_resolved::<i32>("tag").expect("resolver value");
                captured.store(tag as u64, Ordering::SeqCst);
                Ok::<(), BodyError>(())
            }
        },
    )
    .unwrap();

    bot.run().await.unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 7);
}

#[derive(Debug, thiserror::Error)]
#[error("boom")]
struct Boom;

#[tokio::test]
async fn a_failing_body_makes_run_propagate_the_error() {
    let bot = Machina::new();
    bot.emit(
        "faulty",
        EmitOptions {
            count: Some(1),
            ..Default::default()
        },
        |_event| async { Err::<(), BodyError>(BodyError::new(Boom)) },
    )
    .unwrap();

    let err = bot.run().await.unwrap_err();
    assert!(matches!(err, MachinaError::Body(_)));
    assert!(err.to_string().contains("boom"));
}
