mod common;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use chrono::Duration;
use common::{Device, MemoryBackend, RemoteTables};
use habitual_core::store::lock_store;
use habitual_core::{
    Clock, CompletionValue, HabitPatch, MergePolicy, NewHabit, SkipReason, SyncOutcome, SyncPhase,
    SyncTrigger,
};
use reconcile::SyncStatus;

fn rename(name: &str) -> HabitPatch {
    HabitPatch {
        name: Some(name.to_string()),
        ..HabitPatch::default()
    }
}

#[tokio::test]
async fn two_devices_converge_on_the_later_edit() {
    let tables = Arc::new(Mutex::new(RemoteTables::default()));
    let phone = Device::new(MemoryBackend::sharing(&tables), MergePolicy::default());
    let laptop = Device::new(MemoryBackend::sharing(&tables), MergePolicy::default());

    let habit = lock_store(&phone.store)
        .add_habit(NewHabit::daily("Read"))
        .unwrap();
    assert!(matches!(
        phone.sync.sync_now(SyncTrigger::Manual).await,
        SyncOutcome::Completed(_)
    ));
    laptop.sync.sync_now(SyncTrigger::Manual).await;
    assert_eq!(lock_store(&laptop.store).habit(&habit.id), Some(&habit));

    // Both edit offline; the laptop edits later.
    phone.clock.advance(Duration::minutes(1));
    lock_store(&phone.store)
        .update_habit(&habit.id, rename("Read 20 pages"))
        .unwrap();
    laptop.clock.advance(Duration::minutes(2));
    lock_store(&laptop.store)
        .update_habit(&habit.id, rename("Read 30 pages"))
        .unwrap();

    phone.sync.sync_now(SyncTrigger::Foreground).await;
    laptop.sync.sync_now(SyncTrigger::Foreground).await;
    phone.sync.sync_now(SyncTrigger::Foreground).await;

    for device in [&phone, &laptop] {
        let store = lock_store(&device.store);
        assert_eq!(store.habit(&habit.id).unwrap().name, "Read 30 pages");
        assert_eq!(store.unsynced_count(), 0);
    }
    assert_eq!(
        tables.lock().unwrap().habits[&habit.id].name,
        "Read 30 pages"
    );
}

#[tokio::test]
async fn completions_from_both_devices_are_kept() {
    let tables = Arc::new(Mutex::new(RemoteTables::default()));
    let phone = Device::new(MemoryBackend::sharing(&tables), MergePolicy::default());
    let laptop = Device::new(MemoryBackend::sharing(&tables), MergePolicy::default());

    let habit = lock_store(&phone.store)
        .add_habit(NewHabit::daily("Walk"))
        .unwrap();
    phone.sync.sync_now(SyncTrigger::Manual).await;
    laptop.sync.sync_now(SyncTrigger::Manual).await;

    let today = phone.clock.today();
    lock_store(&phone.store)
        .set_completion(&habit.id, today, CompletionValue::Done(true))
        .unwrap();
    phone.sync.sync_now(SyncTrigger::Manual).await;
    laptop.sync.sync_now(SyncTrigger::Manual).await;

    let laptop_store = lock_store(&laptop.store);
    assert_eq!(laptop_store.current_streak(None).unwrap(), 1);
    assert_eq!(laptop_store.total_completions(Some(&habit.id)).unwrap(), 1);
}

#[tokio::test]
async fn concurrent_triggers_are_coalesced() {
    let device = Device::new(MemoryBackend::default(), MergePolicy::default());
    let gate = device.backend().hold_fetches();

    let sync = Arc::clone(&device.sync);
    let first = tokio::spawn(async move { sync.sync_now(SyncTrigger::Periodic).await });
    device.backend().entered.notified().await;

    assert_eq!(device.sync.phase(), SyncPhase::Syncing);
    assert_eq!(
        device.sync.sync_now(SyncTrigger::Foreground).await,
        SyncOutcome::Skipped(SkipReason::AlreadySyncing)
    );

    gate.notify_one();
    assert!(matches!(first.await.unwrap(), SyncOutcome::Completed(_)));
    assert_eq!(device.sync.phase(), SyncPhase::Idle);
    assert_eq!(device.backend().fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_fetch_leaves_local_state_untouched() {
    let device = Device::new(MemoryBackend::default(), MergePolicy::default());
    let habit = lock_store(&device.store)
        .add_habit(NewHabit::daily("Stretch"))
        .unwrap();
    let before = lock_store(&device.store).snapshot();

    device.backend().fail_fetch.store(true, Ordering::SeqCst);
    let outcome = device.sync.sync_now(SyncTrigger::Manual).await;
    assert!(matches!(outcome, SyncOutcome::Failed(_)));

    {
        let store = lock_store(&device.store);
        assert_eq!(store.snapshot(), before);
        assert_eq!(store.snapshot().habits.status(&habit.id), Some(SyncStatus::Dirty));
        assert!(store.sync_state().last_error.is_some());
        assert!(!store.sync_state().in_progress);
    }
    assert_eq!(device.backend().pushes.load(Ordering::SeqCst), 0);

    // The next trigger simply tries again.
    device.backend().fail_fetch.store(false, Ordering::SeqCst);
    assert!(matches!(
        device.sync.sync_now(SyncTrigger::Periodic).await,
        SyncOutcome::Completed(report) if report.pushed >= 1
    ));
    assert!(lock_store(&device.store).sync_state().last_error.is_none());
}

#[tokio::test]
async fn logging_out_discards_an_in_flight_sync() {
    let tables = Arc::new(Mutex::new(RemoteTables::default()));
    let other = Device::new(MemoryBackend::sharing(&tables), MergePolicy::default());
    lock_store(&other.store)
        .add_habit(NewHabit::daily("Floss"))
        .unwrap();
    other.sync.sync_now(SyncTrigger::Manual).await;

    let device = Device::new(MemoryBackend::sharing(&tables), MergePolicy::default());
    let gate = device.backend().hold_fetches();
    let sync = Arc::clone(&device.sync);
    let pending = tokio::spawn(async move { sync.sync_now(SyncTrigger::Login).await });
    device.backend().entered.notified().await;

    device.sync.set_user(None);
    gate.notify_one();

    assert_eq!(pending.await.unwrap(), SyncOutcome::Discarded);
    assert!(lock_store(&device.store).active_habits().is_empty());
    assert_eq!(
        device.sync.sync_now(SyncTrigger::Manual).await,
        SyncOutcome::Skipped(SkipReason::NotLoggedIn)
    );
}

#[tokio::test]
async fn newer_remote_edit_replaces_unpushed_local_edit() {
    let tables = Arc::new(Mutex::new(RemoteTables::default()));
    let phone = Device::new(MemoryBackend::sharing(&tables), MergePolicy::default());
    let laptop = Device::new(MemoryBackend::sharing(&tables), MergePolicy::default());
    let habit = lock_store(&phone.store)
        .add_habit(NewHabit::daily("Journal"))
        .unwrap();
    phone.sync.sync_now(SyncTrigger::Manual).await;
    laptop.sync.sync_now(SyncTrigger::Manual).await;

    // The phone edits first but syncs last.
    phone.clock.advance(Duration::minutes(1));
    lock_store(&phone.store)
        .update_habit(&habit.id, rename("Journal (old)"))
        .unwrap();
    laptop.clock.advance(Duration::minutes(5));
    lock_store(&laptop.store)
        .update_habit(&habit.id, rename("Journal (new)"))
        .unwrap();
    laptop.sync.sync_now(SyncTrigger::Manual).await;

    let outcome = phone.sync.sync_now(SyncTrigger::Manual).await;
    let SyncOutcome::Completed(report) = outcome else {
        panic!("sync failed: {outcome:?}");
    };
    assert_eq!(report.merged.updated, 1);
    assert_eq!(report.pushed, 0);
    assert_eq!(
        lock_store(&phone.store).habit(&habit.id).unwrap().name,
        "Journal (new)"
    );
}

#[tokio::test]
async fn manual_policy_parks_conflicts_until_resolved() {
    let tables = Arc::new(Mutex::new(RemoteTables::default()));
    let phone = Device::new(MemoryBackend::sharing(&tables), MergePolicy::manual());
    let laptop = Device::new(MemoryBackend::sharing(&tables), MergePolicy::manual());
    let habit = lock_store(&phone.store)
        .add_habit(NewHabit::daily("Piano"))
        .unwrap();
    phone.sync.sync_now(SyncTrigger::Manual).await;
    laptop.sync.sync_now(SyncTrigger::Manual).await;

    laptop.clock.advance(Duration::minutes(1));
    lock_store(&laptop.store)
        .update_habit(&habit.id, rename("Piano scales"))
        .unwrap();
    laptop.sync.sync_now(SyncTrigger::Manual).await;

    phone.clock.advance(Duration::minutes(2));
    lock_store(&phone.store)
        .update_habit(&habit.id, rename("Piano pieces"))
        .unwrap();
    phone.sync.sync_now(SyncTrigger::Manual).await;

    {
        let mut store = lock_store(&phone.store);
        assert_eq!(store.conflict_count(), 1);
        let (local, remote) = store.habit_conflicts().remove(0);
        assert_eq!(local.name, "Piano pieces");
        assert_eq!(remote.name, "Piano scales");

        store.resolve_habit_conflict(&habit.id, true).unwrap();
        assert_eq!(store.conflict_count(), 0);
        assert_eq!(store.habit(&habit.id).unwrap().name, "Piano scales");
        assert!(store.resolve_habit_conflict(&habit.id, true).is_err());
    }
}

#[tokio::test]
async fn a_completion_edited_on_both_devices_converges_on_the_later_value() {
    let tables = Arc::new(Mutex::new(RemoteTables::default()));
    let phone = Device::new(MemoryBackend::sharing(&tables), MergePolicy::default());
    let laptop = Device::new(MemoryBackend::sharing(&tables), MergePolicy::default());
    let habit = lock_store(&phone.store)
        .add_habit(NewHabit::daily("Water"))
        .unwrap();
    phone.sync.sync_now(SyncTrigger::Manual).await;
    laptop.sync.sync_now(SyncTrigger::Manual).await;
    let today = phone.clock.today();

    phone.clock.advance(Duration::minutes(1));
    lock_store(&phone.store)
        .set_completion(&habit.id, today, CompletionValue::Done(true))
        .unwrap();
    laptop.clock.advance(Duration::minutes(3));
    lock_store(&laptop.store)
        .set_completion(&habit.id, today, CompletionValue::Done(false))
        .unwrap();

    phone.sync.sync_now(SyncTrigger::Manual).await;
    laptop.sync.sync_now(SyncTrigger::Manual).await;
    phone.sync.sync_now(SyncTrigger::Manual).await;

    for device in [&phone, &laptop] {
        let store = lock_store(&device.store);
        let completion = store.snapshot().completion(&habit.id, today).cloned().unwrap();
        assert_eq!(completion.value, CompletionValue::Done(false));
        assert_eq!(store.current_streak(Some(&habit.id)).unwrap(), 0);
        assert_eq!(store.unsynced_count(), 0);
    }
    assert_eq!(
        tables.lock().unwrap().completions[&(habit.id.clone(), today)].value,
        CompletionValue::Done(false)
    );
}

#[tokio::test]
async fn the_remote_copy_wins_a_timestamp_tie() {
    let tables = Arc::new(Mutex::new(RemoteTables::default()));
    let phone = Device::new(MemoryBackend::sharing(&tables), MergePolicy::default());
    let laptop = Device::new(MemoryBackend::sharing(&tables), MergePolicy::default());
    let habit = lock_store(&phone.store)
        .add_habit(NewHabit::daily("Stretch"))
        .unwrap();
    phone.sync.sync_now(SyncTrigger::Manual).await;
    laptop.sync.sync_now(SyncTrigger::Manual).await;
    let today = phone.clock.today();

    // Same instant on both devices.
    phone.clock.advance(Duration::minutes(1));
    laptop.clock.advance(Duration::minutes(1));
    let on_phone = lock_store(&phone.store)
        .set_completion(&habit.id, today, CompletionValue::Done(true))
        .unwrap();
    let on_laptop = lock_store(&laptop.store)
        .set_completion(&habit.id, today, CompletionValue::Done(false))
        .unwrap();
    assert_eq!(on_phone.modified_at, on_laptop.modified_at);

    phone.sync.sync_now(SyncTrigger::Manual).await;
    let SyncOutcome::Completed(report) = laptop.sync.sync_now(SyncTrigger::Manual).await else {
        panic!("laptop sync failed");
    };
    assert_eq!(report.pushed, 0);

    for device in [&phone, &laptop] {
        let store = lock_store(&device.store);
        let completion = store.snapshot().completion(&habit.id, today).cloned().unwrap();
        assert_eq!(completion.value, CompletionValue::Done(true));
    }
    assert_eq!(
        tables.lock().unwrap().completions[&(habit.id.clone(), today)].value,
        CompletionValue::Done(true)
    );
}

#[tokio::test]
async fn switching_users_mid_sync_applies_nothing_from_the_old_user() {
    let tables = Arc::new(Mutex::new(RemoteTables::default()));
    let other = Device::new(MemoryBackend::sharing(&tables), MergePolicy::default());
    lock_store(&other.store)
        .add_habit(NewHabit::daily("Old user's habit"))
        .unwrap();
    other.sync.sync_now(SyncTrigger::Manual).await;

    let device = Device::new(MemoryBackend::sharing(&tables), MergePolicy::default());
    let gate = device.backend().hold_fetches();
    let sync = Arc::clone(&device.sync);
    let pending = tokio::spawn(async move { sync.sync_now(SyncTrigger::Periodic).await });
    device.backend().entered.notified().await;

    device.sync.set_user(Some("user-2".to_string()));
    gate.notify_one();

    assert_eq!(pending.await.unwrap(), SyncOutcome::Discarded);
    let store = lock_store(&device.store);
    assert_eq!(store.owner(), Some("user-2"));
    assert!(store.active_habits().is_empty());
}

