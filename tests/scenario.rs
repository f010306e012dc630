use std::path::PathBuf;
use std::sync::Arc;

use ulid::Ulid;

use rostra::clock::ManualClock;
use rostra::directory::InMemoryDirectory;
use rostra::engine::{Engine, EngineError, EngineSettings, ErrorKind};
use rostra::model::*;

const H: Ms = HOUR_MS;

// ── Test infrastructure ──────────────────────────────────────

fn data_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("rostra_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn draft(title: &str, start: Ms, end: Ms) -> ActivityDraft {
    ActivityDraft {
        title: title.into(),
        description: "Community event".into(),
        location: "Civic centre".into(),
        is_on_site: true,
        start_at: start,
        end_at: end,
    }
}

fn shift(activity_id: Ulid, user_id: Ulid, start: Ms, end: Ms, role: &str) -> ShiftDraft {
    ShiftDraft {
        activity_id,
        user_id,
        start_shift: start,
        end_shift: end,
        activity_role: role.into(),
    }
}

/// A week in the life of a volunteer roster: planning, sign-ups, the day
/// itself, the nightly finalizer, and a restart.
#[tokio::test]
async fn volunteer_week() {
    let monday = 2000 * DAY_MS;
    let saturday = monday + 5 * DAY_MS;
    let sunday = monday + 6 * DAY_MS;

    let wal_path = data_dir().join("rostra.wal");
    let clock = Arc::new(ManualClock::new(monday + 9 * H));
    let dir = Arc::new(InMemoryDirectory::new());
    let engine = Engine::new(
        wal_path.clone(),
        EngineSettings::default(),
        clock.clone(),
        dir.clone(),
    )
    .unwrap();

    let olga = dir.add_member("olga");
    let petra = dir.add_member("petra");
    let vera = dir.add_member("vera");
    let pia = dir.add_member("pia");
    let root = dir.add_admin("root");

    // Planning.
    let market = engine
        .create_activity(draft("Food market", saturday + 8 * H, saturday + 16 * H), &olga)
        .await
        .unwrap();
    let repair = engine
        .create_activity(draft("Repair cafe", saturday + 10 * H, saturday + 14 * H), &petra)
        .await
        .unwrap();
    let err = engine
        .create_activity(draft("Book swap", saturday + 15 * H, saturday + 18 * H), &olga)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    let picnic = engine
        .create_activity(draft("Picnic", sunday + 12 * H, sunday + 16 * H), &olga)
        .await
        .unwrap();
    assert_eq!(engine.list_active(0).await.total_elements, 3);

    // Sign-ups.
    let setup = engine
        .create_shift(shift(market.id, vera.id, saturday + 8 * H, saturday + 11 * H, "Setup"), &vera)
        .await
        .unwrap();
    engine
        .create_shift(shift(repair.id, vera.id, saturday + 11 * H, saturday + 14 * H, "Fixer"), &vera)
        .await
        .unwrap();
    let batch = engine
        .create_batch(
            picnic.id,
            vec![
                shift(picnic.id, vera.id, sunday + 12 * H, sunday + 14 * H, "Grill"),
                shift(picnic.id, pia.id, sunday + 14 * H, sunday + 16 * H, "Games"),
            ],
            &olga,
        )
        .await
        .unwrap();
    assert_eq!(batch.len(), 2);

    let err = engine
        .create_shift(shift(market.id, vera.id, saturday + 8 * H, saturday + 8 * H + 30 * MINUTE_MS, "Setup"), &vera)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ShiftLength { .. }));

    let mine = engine.my_pending_shifts(vera.id, 0).await;
    let starts: Vec<Ms> = mine.items.iter().map(|s| s.start_shift).collect();
    assert_eq!(starts, vec![saturday + 8 * H, saturday + 11 * H, sunday + 12 * H]);

    engine
        .update_shift(setup.id, saturday + 8 * H, saturday + 10 * H, "Setup".into())
        .await
        .unwrap();

    let market_shifts = engine.shifts_for_activity(market.id, &olga, 0).await.unwrap();
    assert_eq!(market_shifts.total_elements, 2);
    assert!(matches!(
        engine.shifts_for_activity(market.id, &vera, 0).await,
        Err(EngineError::Forbidden(_))
    ));

    // Enrolments.
    let p_market = engine.enroll(market.id, &pia).await.unwrap();
    let p_repair = engine.enroll(repair.id, &pia).await.unwrap();
    let p_picnic = engine.enroll(picnic.id, &pia).await.unwrap();
    assert_eq!(engine.my_participations(pia.id, 0).await.total_elements, 3);

    // Saturday.
    clock.set(saturday + 9 * H);
    assert!(matches!(
        engine.enroll(market.id, &vera).await,
        Err(EngineError::AlreadyStarted { .. })
    ));
    engine.begin(p_market.id, &pia).await.unwrap();
    engine.cancel(p_repair.id, &pia).await.unwrap();

    // Saturday night finalizer.
    clock.set(saturday + 23 * H + 50 * MINUTE_MS);
    let report = engine.finalize_overdue(engine.now()).await;
    assert_eq!(report.activities_finalized, 2);
    assert_eq!(report.completed, 1);
    assert_eq!(report.cancelled, 0);
    assert_eq!(report.failures, 0);

    assert_eq!(
        engine.get_participation(p_market.id).await.unwrap().state,
        ParticipationState::Completed
    );
    assert!(matches!(
        engine.begin(p_picnic.id, &vera).await,
        Err(EngineError::NotOwner { .. })
    ));
    assert_eq!(engine.list_active(0).await.items, vec![picnic.clone()]);

    // Running it again changes nothing.
    let again = engine.finalize_overdue(engine.now()).await;
    assert!(again.is_empty());

    // Restart from the WAL.
    drop(engine);
    let engine = Engine::new(wal_path, EngineSettings::default(), clock.clone(), dir.clone()).unwrap();
    assert!(engine.get_activity(market.id).await.unwrap().is_finalized);
    assert_eq!(
        engine.get_participation(p_picnic.id).await.unwrap().state,
        ParticipationState::Pending
    );
    assert_eq!(engine.my_pending_shifts(vera.id, 0).await.total_elements, 1);

    // Sunday night: the picnic closes, the pending enrolment is cancelled.
    clock.set(sunday + 23 * H + 50 * MINUTE_MS);
    let report = engine.finalize_overdue(engine.now()).await;
    assert_eq!(report.activities_finalized, 1);
    assert_eq!(report.cancelled, 1);
    assert_eq!(engine.list_active(0).await.total_elements, 0);

    // Admin cleanup of a closed activity.
    engine.delete_activity(repair.id, &root).await.unwrap();
    assert!(matches!(
        engine.get_activity(repair.id).await,
        Err(EngineError::NotFound { .. })
    ));
}
