//! Black-box contract suite shared by every gateway backend.
//!
//! The in-process backend always runs. MongoDB joins when
//! `STUDYALERT_TEST_MONGO_URI` is set; each run uses a throwaway database.

use std::sync::Arc;
use std::time::Duration;
use studyalert_core::{
    Event, GatewayError, InMemoryGateway, ManualClock, MongoConfig, MongoGateway, Notification,
    NotificationKind, PersistenceGateway, Task, User, UserUpdate, WorkItem, WorkItemKind,
};
use uuid::Uuid;

const NOW: i64 = 1_700_000_000_000;
const MINUTE_MS: i64 = 60_000;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY: Duration = Duration::from_secs(24 * 60 * 60);
const HOUR: Duration = Duration::from_secs(60 * 60);

struct Backend {
    name: &'static str,
    clock: Arc<ManualClock>,
    gateway: Arc<dyn PersistenceGateway>,
    mongo: Option<Arc<MongoGateway>>,
}

impl Drop for Backend {
    fn drop(&mut self) {
        if let Some(mongo) = &self.mongo {
            let _ = mongo.drop_database();
        }
    }
}

fn memory_backend() -> Backend {
    let clock = Arc::new(ManualClock::new(NOW));
    Backend {
        name: "memory",
        gateway: Arc::new(InMemoryGateway::with_clock(clock.clone())),
        clock,
        mongo: None,
    }
}

fn mongo_backend() -> Option<Backend> {
    let uri = std::env::var("STUDYALERT_TEST_MONGO_URI")
        .ok()
        .filter(|uri| !uri.trim().is_empty())?;
    let mut config = MongoConfig::new(uri);
    config.database = format!("studyalert_test_{}", Uuid::new_v4().simple());
    let clock = Arc::new(ManualClock::new(NOW));
    let mongo = Arc::new(
        MongoGateway::connect_with_clock(&config, clock.clone())
            .expect("STUDYALERT_TEST_MONGO_URI is set but the server is unreachable"),
    );
    Some(Backend {
        name: "mongo",
        gateway: mongo.clone(),
        clock,
        mongo: Some(mongo),
    })
}

fn backends() -> Vec<Backend> {
    let mut backends = vec![memory_backend()];
    backends.extend(mongo_backend());
    backends
}

fn task_with_id(id: &str, owner: &str, due_at: i64) -> Task {
    let mut task = Task::new(owner, format!("task {id}"), due_at);
    task.id = id.to_string();
    task
}

fn event_with_id(id: &str, owner: &str, start_at: i64) -> Event {
    let mut event = Event::new(owner, format!("event {id}"), "class", start_at, start_at + HOUR_MS);
    event.id = id.to_string();
    event
}

fn user_with_id(id: &str, email: &str, verified: bool) -> User {
    let mut user = User::unverified("Ada", email, "hash", format!("token-{id}"));
    user.id = id.to_string();
    if verified {
        user.is_verified = true;
        user.verification_token = None;
    }
    user
}

fn pending(owner: &str, kind: NotificationKind, reference: &str) -> Notification {
    Notification::pending(owner, kind, reference, format!("about {reference}"))
}

fn ids(items: &[WorkItem]) -> Vec<&str> {
    items.iter().map(WorkItem::id).collect()
}

#[test]
fn task_crud_roundtrip_and_not_found() {
    for backend in backends() {
        let gateway = &backend.gateway;
        let created = gateway
            .create_task(Task::new("user-1", "Problem Set", NOW + HOUR_MS))
            .expect("task fixture should persist");
        assert!(!created.id.is_empty(), "{}", backend.name);

        let loaded = gateway.get_task(&created.id).expect("task should exist");
        assert_eq!(loaded, created, "{}", backend.name);

        let mut changed = loaded.clone();
        changed.title = "Problem Set 2".to_string();
        changed.set_completed(true, NOW);
        changed.id = "ignored".to_string();
        let updated = gateway
            .update_task(&created.id, changed)
            .expect("task update should succeed");
        assert_eq!(updated.id, created.id, "{}", backend.name);
        let fetched = gateway
            .get_task(&created.id)
            .expect("task should exist");
        assert_eq!(fetched, updated, "{}", backend.name);

        gateway.delete_task(&created.id).expect("task delete should succeed");
        let err = gateway.get_task(&created.id).unwrap_err();
        assert!(err.is_not_found(), "{}: {err}", backend.name);
        assert!(gateway.delete_task(&created.id).unwrap_err().is_not_found());
        assert!(gateway
            .update_task("missing", Task::new("user-1", "x", NOW))
            .unwrap_err()
            .is_not_found());
    }
}

#[test]
fn create_with_existing_id_conflicts() {
    for backend in backends() {
        let gateway = &backend.gateway;
        gateway
            .create_task(task_with_id("t-1", "user-1", NOW))
            .expect("task fixture should persist");
        let err = gateway
            .create_task(task_with_id("t-1", "user-1", NOW))
            .unwrap_err();
        assert!(
            matches!(err, GatewayError::Conflict { .. }),
            "{}: {err}",
            backend.name
        );
    }
}

#[test]
fn writes_reject_invalid_records() {
    for backend in backends() {
        let gateway = &backend.gateway;
        let err = gateway
            .create_task(Task::new("user-1", "  ", NOW))
            .unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)), "{}", backend.name);

        let reversed = Event::new("user-1", "Lab", "class", NOW, NOW - 1);
        let err = gateway.create_event(reversed).unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)), "{}", backend.name);
    }
}

#[test]
fn event_crud_and_owner_listing_order() {
    for backend in backends() {
        let gateway = &backend.gateway;
        gateway
            .create_event(event_with_id("e-b", "user-1", NOW + 2 * HOUR_MS))
            .expect("event fixture should persist");
        gateway
            .create_event(event_with_id("e-a", "user-1", NOW + HOUR_MS))
            .expect("event fixture should persist");
        gateway
            .create_event(event_with_id("e-c", "user-2", NOW))
            .expect("event fixture should persist");

        let listed: Vec<String> = gateway
            .list_events("user-1")
            .expect("event listing should succeed")
            .into_iter()
            .map(|event| event.id)
            .collect();
        assert_eq!(listed, vec!["e-a", "e-b"], "{}", backend.name);

        let mut moved = gateway.get_event("e-b").expect("event should exist");
        moved.start_at = NOW + 3 * HOUR_MS;
        moved.end_at = NOW + 4 * HOUR_MS;
        gateway.update_event("e-b", moved.clone()).expect("event update should succeed");
        let fetched = gateway.get_event("e-b").expect("event should exist");
        assert_eq!(fetched, moved, "{}", backend.name);

        gateway.delete_event("e-a").expect("event delete should succeed");
        assert!(gateway.get_event("e-a").unwrap_err().is_not_found());
        assert!(gateway.delete_event("e-a").unwrap_err().is_not_found());
    }
}

#[test]
fn list_tasks_orders_by_deadline_then_id() {
    for backend in backends() {
        let gateway = &backend.gateway;
        gateway
            .create_task(task_with_id("t-2", "user-1", NOW + HOUR_MS))
            .expect("task fixture should persist");
        gateway
            .create_task(task_with_id("t-1", "user-1", NOW + HOUR_MS))
            .expect("task fixture should persist");
        gateway
            .create_task(task_with_id("t-0", "user-1", NOW + 2 * HOUR_MS))
            .expect("task fixture should persist");
        gateway
            .create_task(task_with_id("t-9", "user-2", NOW))
            .expect("task fixture should persist");

        let listed: Vec<String> = gateway
            .list_tasks("user-1")
            .expect("task listing should succeed")
            .into_iter()
            .map(|task| task.id)
            .collect();
        assert_eq!(listed, vec!["t-1", "t-2", "t-0"], "{}", backend.name);
    }
}

#[test]
fn user_lookups_updates_and_verification() {
    for backend in backends() {
        let gateway = &backend.gateway;
        let created = gateway
            .create_user(user_with_id("u-1", "ada@example.com", false))
            .expect("user fixture should persist");

        let fetched = gateway.get_user("u-1").expect("user should exist");
        assert_eq!(fetched, created, "{}", backend.name);
        let by_email = gateway
            .get_user_by_email("ada@example.com")
            .expect("user should be found by email");
        assert_eq!(by_email.id, "u-1");
        assert_eq!(
            gateway
                .get_user_by_verification_token("token-u-1")
                .expect("user should be found by token").id,
            "u-1"
        );

        let renamed = gateway
            .update_user(
                "u-1",
                &UserUpdate {
                    name: Some("Ada L.".to_string()),
                    email: None,
                },
            )
            .expect("user update should succeed");
        assert_eq!(renamed.name, "Ada L.", "{}", backend.name);
        assert_eq!(renamed.email, "ada@example.com", "{}", backend.name);
        assert_eq!(renamed.password_hash, "hash", "{}", backend.name);

        let unchanged = gateway
            .update_user("u-1", &UserUpdate::default())
            .expect("user update should succeed");
        assert_eq!(unchanged, renamed, "{}", backend.name);

        let rehashed = gateway
            .update_user_password("u-1", "hash-2")
            .expect("password update should succeed");
        assert_eq!(rehashed.password_hash, "hash-2", "{}", backend.name);

        gateway.mark_user_verified("u-1").expect("verification should succeed");
        let verified = gateway.get_user("u-1").expect("user should exist");
        assert!(verified.is_verified, "{}", backend.name);
        assert_eq!(verified.verification_token, None, "{}", backend.name);
        assert!(gateway
            .get_user_by_verification_token("token-u-1")
            .unwrap_err()
            .is_not_found());

        assert!(gateway.get_user("u-404").unwrap_err().is_not_found());
        assert!(gateway
            .get_user_by_email("nobody@example.com")
            .unwrap_err()
            .is_not_found());
        assert!(gateway
            .update_user("u-404", &UserUpdate::default())
            .unwrap_err()
            .is_not_found());
        assert!(gateway
            .update_user_password("u-404", "x")
            .unwrap_err()
            .is_not_found());
        assert!(gateway.mark_user_verified("u-404").unwrap_err().is_not_found());
    }
}

#[test]
fn notification_dedup_lookup_and_flags() {
    for backend in backends() {
        let gateway = &backend.gateway;
        let err = gateway
            .find_notification("t-1", NotificationKind::TaskDue)
            .unwrap_err();
        assert!(err.is_not_found(), "{}: {err}", backend.name);

        let created = gateway
            .create_notification(pending("user-1", NotificationKind::TaskDue, "t-1"))
            .expect("notification fixture should persist");
        assert!(!created.id.is_empty(), "{}", backend.name);
        assert_eq!(created.created_at, NOW, "{}", backend.name);
        assert!(!created.read && !created.emailed, "{}", backend.name);

        let found = gateway
            .find_notification("t-1", NotificationKind::TaskDue)
            .expect("notification should exist");
        assert_eq!(found, created, "{}", backend.name);
        assert!(gateway
            .find_notification("t-1", NotificationKind::EventStart)
            .unwrap_err()
            .is_not_found());

        gateway.mark_emailed(&created.id).expect("mark_emailed should succeed");
        gateway.mark_emailed(&created.id).expect("mark_emailed should succeed");
        gateway.mark_notification_read(&created.id).expect("mark read should succeed");
        gateway.mark_notification_read(&created.id).expect("mark read should succeed");
        let flagged = gateway
            .find_notification("t-1", NotificationKind::TaskDue)
            .expect("notification should exist");
        assert!(flagged.emailed && flagged.read, "{}", backend.name);

        assert!(gateway.mark_emailed("n-404").unwrap_err().is_not_found());
        assert!(gateway
            .mark_notification_read("n-404")
            .unwrap_err()
            .is_not_found());
    }
}

#[test]
fn list_notifications_is_newest_first() {
    for backend in backends() {
        let gateway = &backend.gateway;
        let first = gateway
            .create_notification(pending("user-1", NotificationKind::TaskDue, "t-1"))
            .expect("notification fixture should persist");
        backend.clock.advance(Duration::from_secs(60));
        let second = gateway
            .create_notification(pending("user-1", NotificationKind::EventStart, "e-1"))
            .expect("notification fixture should persist");
        gateway
            .create_notification(pending("user-2", NotificationKind::TaskDue, "t-2"))
            .expect("notification fixture should persist");

        let listed: Vec<String> = gateway
            .list_notifications("user-1")
            .expect("inbox listing should succeed")
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(listed, vec![second.id, first.id], "{}", backend.name);
    }
}

/// (id, deadline offset from now, completed, expected in due window)
const TASK_WINDOW_FIXTURES: &[(&str, i64, bool, bool)] = &[
    ("past", -HOUR_MS, false, false),
    ("at-now", 0, false, false),
    ("just-after-now", 1, false, true),
    ("in-two-hours", 2 * HOUR_MS, false, true),
    ("completed", 2 * HOUR_MS, true, false),
    ("at-window-end", 24 * HOUR_MS, false, true),
    ("after-window-end", 24 * HOUR_MS + 1, false, false),
];

#[test]
fn due_window_boundaries_match_across_backends() {
    let mut results: Vec<(&'static str, Vec<String>)> = Vec::new();
    for backend in backends() {
        let gateway = &backend.gateway;
        for (id, offset, completed, _) in TASK_WINDOW_FIXTURES {
            let mut task = task_with_id(id, "user-1", NOW + offset);
            task.set_completed(*completed, NOW);
            gateway.create_task(task).expect("task fixture should persist");
            gateway
                .create_event(event_with_id(id, "user-1", NOW + offset))
                .expect("event fixture should persist");
        }

        let due_tasks = gateway
            .list_due_work_items(WorkItemKind::Task, DAY)
            .expect("due listing should succeed");
        let expected_tasks: Vec<&str> = TASK_WINDOW_FIXTURES
            .iter()
            .filter(|(_, _, _, included)| *included)
            .map(|(id, ..)| *id)
            .collect();
        assert_eq!(ids(&due_tasks), expected_tasks, "{}", backend.name);
        assert!(due_tasks
            .iter()
            .all(|item| item.kind() == WorkItemKind::Task));

        // Events have no completion flag, so "completed" is due as an event.
        let due_events = gateway
            .list_due_work_items(WorkItemKind::Event, DAY)
            .expect("due listing should succeed");
        assert_eq!(
            ids(&due_events),
            vec![
                "just-after-now",
                "completed",
                "in-two-hours",
                "at-window-end"
            ],
            "{}",
            backend.name
        );

        results.push((
            backend.name,
            due_tasks
                .iter()
                .chain(due_events.iter())
                .map(|item| item.id().to_string())
                .collect(),
        ));
    }

    for pair in results.windows(2) {
        assert_eq!(pair[0].1, pair[1].1, "{} vs {}", pair[0].0, pair[1].0);
    }
}

#[test]
fn stale_unread_respects_cutoff_flags_and_owner() {
    for backend in backends() {
        let gateway = &backend.gateway;
        let clock = &backend.clock;

        let earliest = gateway
            .create_notification(pending("user-1", NotificationKind::TaskDue, "t-1"))
            .expect("notification fixture should persist");
        clock.advance(Duration::from_millis(1));
        let boundary = gateway
            .create_notification(pending("user-1", NotificationKind::TaskDue, "t-0"))
            .expect("notification fixture should persist");
        let read = gateway
            .create_notification(pending("user-1", NotificationKind::TaskDue, "t-2"))
            .expect("notification fixture should persist");
        let emailed = gateway
            .create_notification(pending("user-1", NotificationKind::TaskDue, "t-3"))
            .expect("notification fixture should persist");
        let other_owner = gateway
            .create_notification(pending("user-2", NotificationKind::EventStart, "e-1"))
            .expect("notification fixture should persist");
        gateway.mark_notification_read(&read.id).expect("mark read should succeed");
        gateway.mark_emailed(&emailed.id).expect("mark_emailed should succeed");

        // `boundary` sits exactly at the cutoff and is not stale yet.
        clock.set(boundary.created_at + HOUR_MS);
        let stale: Vec<String> = gateway
            .list_stale_unread(HOUR, None)
            .expect("stale listing should succeed")
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(stale, vec![earliest.id.clone()], "{}", backend.name);

        clock.advance(Duration::from_millis(1));
        let mut stale: Vec<String> = gateway
            .list_stale_unread(HOUR, None)
            .expect("stale listing should succeed")
            .into_iter()
            .map(|n| n.id)
            .collect();
        stale.sort();
        let mut expected = vec![earliest.id.clone(), boundary.id.clone(), other_owner.id.clone()];
        expected.sort();
        assert_eq!(stale, expected, "{}", backend.name);

        let scoped: Vec<String> = gateway
            .list_stale_unread(HOUR, Some("user-2"))
            .expect("stale listing should succeed")
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(scoped, vec![other_owner.id.clone()], "{}", backend.name);

        gateway.mark_emailed(&earliest.id).expect("mark_emailed should succeed");
        let remaining = gateway
            .list_stale_unread(HOUR, Some("user-1"))
            .expect("stale listing should succeed");
        assert_eq!(remaining.len(), 1, "{}", backend.name);
        assert_eq!(remaining[0].id, boundary.id, "{}", backend.name);
    }
}

#[test]
fn zero_durations_are_validation_errors() {
    for backend in backends() {
        let gateway = &backend.gateway;
        let err = gateway
            .list_due_work_items(WorkItemKind::Task, Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)), "{}", backend.name);
        let err = gateway.list_stale_unread(Duration::ZERO, None).unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)), "{}", backend.name);
    }
}

/// Runs one fixed call sequence and renders every observable result without
/// generated ids.
fn parity_script(backend: &Backend) -> Vec<String> {
    let gateway = &backend.gateway;
    let mut out = Vec::new();

    gateway
        .create_user(user_with_id("u-1", "ada@example.com", true))
        .expect("user fixture should persist");
    gateway
        .create_task(task_with_id("t-1", "u-1", NOW + 3 * HOUR_MS))
        .expect("task fixture should persist");
    gateway
        .create_task(task_with_id("t-2", "u-1", NOW + 30 * HOUR_MS))
        .expect("task fixture should persist");
    gateway
        .create_event(event_with_id("e-1", "u-1", NOW + HOUR_MS))
        .expect("event fixture should persist");

    for kind in [WorkItemKind::Task, WorkItemKind::Event] {
        for item in gateway.list_due_work_items(kind, DAY).expect("due listing should succeed") {
            out.push(format!("due {:?} {} {}", kind, item.id(), item.deadline()));
            let notification_kind = kind.notification_kind();
            if gateway
                .find_notification(item.id(), notification_kind)
                .is_err()
            {
                gateway
                    .create_notification(pending(item.owner_id(), notification_kind, item.id()))
                    .expect("notification fixture should persist");
            }
        }
    }

    backend.clock.advance(2 * HOUR);
    // Equal created_at values tie-break on generated ids, so compare as sets.
    let mut stale_lines = Vec::new();
    for n in gateway.list_stale_unread(HOUR, None).expect("stale listing should succeed") {
        stale_lines.push(format!("stale {} {:?} {}", n.reference_id, n.kind, n.created_at));
        gateway.mark_emailed(&n.id).expect("mark_emailed should succeed");
    }
    stale_lines.sort();
    out.extend(stale_lines);
    out.push(format!(
        "stale-after-mark {}",
        gateway.list_stale_unread(HOUR, None).expect("stale listing should succeed").len()
    ));
    let mut inbox: Vec<String> = gateway
        .list_notifications("u-1")
        .expect("inbox listing should succeed")
        .into_iter()
        .map(|n| {
            format!(
                "inbox {} {:?} read={} emailed={}",
                n.reference_id, n.kind, n.read, n.emailed
            )
        })
        .collect();
    inbox.sort();
    out.extend(inbox);
    out.push(format!(
        "missing-user {}",
        gateway.get_user("u-2").unwrap_err().is_not_found()
    ));
    out
}

#[test]
fn same_call_sequence_yields_same_observations() {
    let observations: Vec<(&'static str, Vec<String>)> = backends()
        .iter()
        .map(|backend| (backend.name, parity_script(backend)))
        .collect();

    let (_, memory) = &observations[0];
    assert!(memory.contains(&"stale-after-mark 0".to_string()));
    assert!(memory.iter().any(|line| line.starts_with("due Task t-1")));
    assert!(!memory.iter().any(|line| line.starts_with("due Task t-2")));

    for (name, observed) in &observations[1..] {
        assert_eq!(observed, memory, "{name} diverges from memory");
    }
}

#[test]
fn mongo_gateway_drops_cleanly_inside_async_code() {
    let Some(backend) = mongo_backend() else {
        return;
    };
    let mongo = backend
        .mongo
        .clone()
        .expect("mongo backend should expose its gateway");
    drop(backend);
    assert_eq!(Arc::strong_count(&mongo), 1);

    let outer = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("outer runtime should build");
    outer.block_on(async move {
        drop(mongo);
    });
}
