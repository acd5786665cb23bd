use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use studyalert_core::{
    Clock, EngineConfig, InMemoryGateway, LogNotifier, Notification, NotificationEngine,
    NotificationKind, Notifier, NotifyError, PersistenceGateway, SystemClock, Task, User,
};

/// Blocks inside `send` long enough for a stop request to land mid-cycle.
#[derive(Default)]
struct SlowNotifier {
    entered: AtomicBool,
    finished: AtomicBool,
}

impl Notifier for SlowNotifier {
    fn send(&self, _to: &str, _subject: &str, _body: &str) -> Result<(), NotifyError> {
        self.entered.store(true, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(300));
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn engine_with_tick(tick: Duration) -> (Arc<InMemoryGateway>, Arc<NotificationEngine>) {
    let gateway = Arc::new(InMemoryGateway::new());
    let config = EngineConfig {
        tick_interval: tick,
        ..EngineConfig::default()
    };
    let engine = NotificationEngine::with_config(gateway.clone(), Arc::new(LogNotifier), config);
    (gateway, Arc::new(engine))
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn running_engine_raises_notifications_until_stopped() {
    let (gateway, engine) = engine_with_tick(Duration::from_millis(10));
    let due_at = SystemClock.now_ms() + 60 * 60 * 1000;
    let task = gateway
        .create_task(Task::new("user-1", "Reading", due_at))
        .expect("task fixture should persist");

    let handle = engine.start().expect("engine should start");
    assert!(wait_for(|| handle.cycles_completed() >= 3));
    assert!(gateway
        .find_notification(&task.id, NotificationKind::TaskDue)
        .is_ok());
    let inbox = gateway
        .list_notifications("user-1")
        .expect("inbox listing should succeed");
    assert_eq!(inbox.len(), 1);

    handle.stop();
}

#[test]
fn no_cycles_run_after_stop_returns() {
    let (gateway, engine) = engine_with_tick(Duration::from_millis(10));
    let handle = engine.start().expect("engine should start");
    assert!(wait_for(|| handle.cycles_completed() >= 1));
    handle.stop();

    let due_at = SystemClock.now_ms() + 60 * 60 * 1000;
    let task = gateway
        .create_task(Task::new("user-1", "Added after stop", due_at))
        .expect("task fixture should persist");
    thread::sleep(Duration::from_millis(100));
    assert!(gateway
        .find_notification(&task.id, NotificationKind::TaskDue)
        .unwrap_err()
        .is_not_found());
}

#[test]
fn first_cycle_waits_one_tick() {
    let (_gateway, engine) = engine_with_tick(Duration::from_secs(60));
    let handle = engine.start().expect("engine should start");
    thread::sleep(Duration::from_millis(50));
    assert_eq!(handle.cycles_completed(), 0);

    let started = Instant::now();
    handle.stop();
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn dropping_the_handle_stops_the_worker() {
    let (gateway, engine) = engine_with_tick(Duration::from_millis(10));
    {
        let handle = engine.clone().start().expect("engine should start");
        assert!(wait_for(|| handle.cycles_completed() >= 1));
    }

    let due_at = SystemClock.now_ms() + 60 * 60 * 1000;
    let task = gateway
        .create_task(Task::new("user-1", "Added after drop", due_at))
        .expect("task fixture should persist");
    thread::sleep(Duration::from_millis(100));
    assert!(gateway
        .find_notification(&task.id, NotificationKind::TaskDue)
        .unwrap_err()
        .is_not_found());
    assert_eq!(Arc::strong_count(&engine), 1);
}

#[test]
fn zero_tick_is_rejected() {
    let (_gateway, engine) = engine_with_tick(Duration::ZERO);
    let err = engine.start().err().expect("zero tick must be rejected");
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
}

#[test]
fn unschedulable_tick_is_rejected() {
    let (_gateway, engine) = engine_with_tick(Duration::MAX);
    let err = engine
        .start()
        .err()
        .expect("a tick past the clock range must be rejected");
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
}

#[test]
fn stop_waits_for_the_in_flight_cycle() {
    let gateway = Arc::new(InMemoryGateway::new());
    let mut owner = User::unverified("Ada", "ada@example.com", "hash", "token");
    owner.id = "user-1".to_string();
    owner.is_verified = true;
    gateway
        .create_user(owner)
        .expect("user fixture should persist");
    let mut stale = Notification::pending(
        "user-1",
        NotificationKind::TaskDue,
        "task-1",
        "Task 'Reading' is due in less than 24 hours!",
    );
    stale.created_at = SystemClock.now_ms() - 2 * 60 * 60 * 1000;
    let stale = gateway
        .create_notification(stale)
        .expect("notification fixture should persist");

    let notifier = Arc::new(SlowNotifier::default());
    let config = EngineConfig {
        tick_interval: Duration::from_millis(10),
        ..EngineConfig::default()
    };
    let engine = Arc::new(NotificationEngine::with_config(
        gateway.clone(),
        notifier.clone(),
        config,
    ));
    let handle = engine.start().expect("engine should start");
    assert!(wait_for(|| notifier.entered.load(Ordering::SeqCst)));
    handle.stop();

    assert!(notifier.finished.load(Ordering::SeqCst));
    let stored = gateway
        .find_notification(&stale.reference_id, NotificationKind::TaskDue)
        .expect("notification should exist");
    assert!(stored.emailed);
}
