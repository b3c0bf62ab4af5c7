//! Unwind maneuver driven through the engine and the actor handle.

use cable_wrap::{
    actor::EngineActor,
    config::EngineConfig,
    engine::{EngineEvent, WrapEngine},
    error::{UnwindError, WrapError},
    mount::{MockMount, MountCommand},
    persistence::{MemoryStore, StateStore},
    sample::PositionSample,
    state::{whole_wraps, RotationState},
    unwind::{CancellationToken, UnwindOutcome, UnwindPhase},
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap() + ChronoDuration::seconds(secs)
}

/// Tracking sample from a site at 40°N with the given raw azimuth fallback.
fn sited(secs: i64) -> PositionSample {
    PositionSample {
        timestamp: at(secs),
        connected: true,
        slewing: false,
        tracking_enabled: true,
        at_home: false,
        ra_hours: 4.0,
        dec_degrees: 30.0,
        lst_hours: 5.0,
        site_lat_degrees: 40.0,
        site_lon_degrees: -105.0,
        raw_azimuth_degrees: 0.0,
    }
}

fn store_with_total(total: f64) -> Arc<MemoryStore> {
    let mut state = RotationState::zeroed(at(0));
    state.total_degrees = total;
    state.last_logged_wrap_count = whole_wraps(total);
    Arc::new(MemoryStore::with_state(state))
}

fn config(step_pause: Duration) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.unwind.step_pause = step_pause;
    config
}

#[tokio::test]
async fn test_unwind_from_500_in_bounded_steps() {
    let store = store_with_total(500.0);
    let engine = WrapEngine::new(&config(Duration::ZERO), store.clone());
    engine.process_sample(&sited(0));
    let mut events = engine.subscribe();

    let mount = MockMount::new();
    let outcome = engine
        .begin_unwind(&mount, &CancellationToken::new())
        .await
        .unwrap();
    assert!(matches!(outcome, UnwindOutcome::Completed { .. }));

    let mut remaining = vec![500.0];
    let mut phases = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            EngineEvent::UnwindProgress { remaining_degrees } => remaining.push(remaining_degrees),
            EngineEvent::Unwind(phase) => phases.push(phase),
            _ => {}
        }
    }
    for pair in remaining.windows(2) {
        let step = pair[0] - pair[1];
        assert!(step > 0.0 && step <= 60.0, "step {step}");
    }
    assert_eq!(remaining.last(), Some(&0.0));
    assert_eq!(phases.first(), Some(&UnwindPhase::SafePositioning));
    assert_eq!(phases.last(), Some(&UnwindPhase::Idle));
    assert!(phases.contains(&UnwindPhase::Homing));

    assert_eq!(mount.commands().await.last(), Some(&MountCommand::GoHome));
    let saved = store.load_state().unwrap().unwrap();
    assert_eq!(saved.total_degrees, 0.0);
    assert!(!saved.alert_fired);
    assert!(!engine.maneuver_in_progress());
}

#[tokio::test]
async fn test_cancel_mid_maneuver_keeps_partial_value() {
    let store = store_with_total(-300.0);
    let engine = Arc::new(WrapEngine::new(&config(Duration::from_millis(300)), store.clone()));
    engine.process_sample(&sited(0));
    let mut events = engine.subscribe();

    let cancel = CancellationToken::new();
    let maneuver = {
        let engine = Arc::clone(&engine);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mount = MockMount::new().with_timing(Duration::from_millis(10), Duration::ZERO);
            engine.begin_unwind(&mount, &cancel).await
        })
    };

    let mut progress = 0;
    while progress < 2 {
        if let EngineEvent::UnwindProgress { .. } = events.recv().await.unwrap() {
            progress += 1;
        }
    }
    assert!(engine.maneuver_in_progress());
    cancel.cancel();

    let outcome = timeout(Duration::from_secs(5), maneuver)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(
        outcome,
        UnwindOutcome::Cancelled {
            remaining_degrees: -180.0
        }
    );

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.total_degrees, -180.0);
    assert_eq!(snapshot.unwind_phase, UnwindPhase::Cancelled);
    assert!(!snapshot.maneuver_in_progress);
    assert!(snapshot.history.iter().any(|e| e.note.contains("cancelled")));
    assert_eq!(store.load_state().unwrap().unwrap().total_degrees, -180.0);
}

#[tokio::test]
async fn test_samples_during_maneuver_do_not_accumulate() {
    let store = store_with_total(130.0);
    let engine = Arc::new(WrapEngine::new(&config(Duration::from_millis(100)), store));
    engine.process_sample(&sited(0));
    let mut events = engine.subscribe();

    let maneuver = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            engine
                .begin_unwind(&MockMount::new(), &CancellationToken::new())
                .await
        })
    };

    // Wait for the first confirmed step, then feed tracking motion
    loop {
        if let EngineEvent::UnwindProgress { .. } = events.recv().await.unwrap() {
            break;
        }
    }
    let mut drifting = sited(10);
    for i in 0..4 {
        drifting.timestamp = at(10 + 5 * i);
        drifting.lst_hours += 0.01;
        engine.process_sample(&drifting);
    }
    assert_eq!(engine.snapshot().total_degrees, 70.0);

    let outcome = timeout(Duration::from_secs(5), maneuver)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(outcome, UnwindOutcome::Completed { steps: 3 });
    assert_eq!(engine.snapshot().total_degrees, 0.0);
}

#[tokio::test]
async fn test_actor_unwind_failure_surfaces_typed_error() {
    let store = store_with_total(250.0);
    let engine = Arc::new(WrapEngine::new(&config(Duration::ZERO), store));
    let mount = Arc::new(MockMount::new().failing_on_command(5));
    let (handle, task) =
        EngineActor::new(Arc::clone(&engine), mount.clone(), Duration::from_secs(30)).spawn();

    handle.send_sample(sited(0)).await.unwrap();
    let err = handle
        .begin_unwind(CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WrapError::Unwind(UnwindError::StepCommand { step: 4, .. })
    ));

    // 250 → 190 → 130 → 70, the fourth step failed
    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.total_degrees, 70.0);
    assert!(!snapshot.maneuver_in_progress);
    assert_eq!(snapshot.unwind_phase, UnwindPhase::Failed);

    // Suppression released: a second attempt runs to completion
    let outcome = handle.begin_unwind(CancellationToken::new()).await.unwrap();
    assert_eq!(outcome, UnwindOutcome::Completed { steps: 2 });

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_second_request_while_running_is_noop() {
    let store = store_with_total(400.0);
    let engine = Arc::new(WrapEngine::new(&config(Duration::from_millis(50)), store));
    let mount = Arc::new(MockMount::new().with_timing(Duration::from_millis(20), Duration::ZERO));
    let (handle, _task) =
        EngineActor::new(Arc::clone(&engine), mount.clone(), Duration::from_secs(30)).spawn();
    handle.send_sample(sited(0)).await.unwrap();
    let _ = handle.snapshot().await.unwrap();

    let first = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.begin_unwind(CancellationToken::new()).await })
    };
    while !engine.maneuver_in_progress() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let second = handle.begin_unwind(CancellationToken::new()).await.unwrap();
    assert_eq!(second, UnwindOutcome::AlreadyRunning);

    let first = first.await.unwrap().unwrap();
    assert_eq!(first, UnwindOutcome::Completed { steps: 7 });
    assert_eq!(handle.snapshot().await.unwrap().total_degrees, 0.0);
}
