//! Deadline notification engine.
//!
//! # Responsibility
//! - Raise one notification per due work item and kind.
//! - Email stale unread notifications to verified owners, once.
//! - Run the scans as one cycle per tick on a cancellable worker thread.
//!
//! # Invariants
//! - Within a cycle: task scan, then event scan, then stale-unread scan.
//! - One item failing never aborts its scan; one scan failing never aborts the cycle.
//! - `emailed` is set after a successful send, or right away for unverified owners
//!   and for verified owners without an address.
//!   A failed send leaves it unset so the next cycle retries.
//! - The engine never branches on which gateway backend it holds.

use crate::gateway::{GatewayError, GatewayResult, PersistenceGateway};
use crate::model::notification::Notification;
use crate::model::work_item::{WorkItem, WorkItemKind};
use crate::notifier::Notifier;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

mod runner;

pub use runner::EngineHandle;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_DUE_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_EMAIL_SUBJECT: &str = "You have an unread notification";

/// Engine timing and content settings. The three durations are independent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Period between cycle starts.
    pub tick_interval: Duration,
    /// Look-ahead for due tasks and starting events.
    pub due_window: Duration,
    /// Age after which an unread notification is emailed.
    pub stale_after: Duration,
    pub email_subject: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            due_window: DEFAULT_DUE_WINDOW,
            stale_after: DEFAULT_STALE_AFTER,
            email_subject: DEFAULT_EMAIL_SUBJECT.to_string(),
        }
    }
}

/// Outcome counters for one task or event scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub examined: usize,
    pub created: usize,
    pub already_notified: usize,
    pub failed: usize,
    /// The listing call itself failed; no item was examined.
    pub step_failed: bool,
}

/// Outcome counters for one stale-unread scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaleScanReport {
    pub examined: usize,
    pub emailed: usize,
    pub skipped_unverified: usize,
    /// Verified owner without an address on record.
    pub skipped_no_email: usize,
    pub send_failed: usize,
    pub failed: usize,
    pub step_failed: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub tasks: ScanReport,
    pub events: ScanReport,
    pub stale: StaleScanReport,
}

enum Delivery {
    Emailed,
    SkippedUnverified,
    SkippedNoEmail,
    SendFailed,
}

/// Periodic scanner over an injected gateway and notifier.
pub struct NotificationEngine {
    gateway: Arc<dyn PersistenceGateway>,
    notifier: Arc<dyn Notifier>,
    config: EngineConfig,
}

impl NotificationEngine {
    /// Creates an engine with default timing.
    pub fn new(gateway: Arc<dyn PersistenceGateway>, notifier: Arc<dyn Notifier>) -> Self {
        Self::with_config(gateway, notifier, EngineConfig::default())
    }

    pub fn with_config(
        gateway: Arc<dyn PersistenceGateway>,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Self {
        Self {
            gateway,
            notifier,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs the three scans in order and returns their reports.
    pub fn run_cycle(&self) -> CycleReport {
        let started_at = Instant::now();
        debug!(
            "event=engine_cycle module=engine status=start backend={}",
            self.gateway.backend_name()
        );

        let report = CycleReport {
            tasks: self.run_task_scan(),
            events: self.run_event_scan(),
            stale: self.run_stale_unread_scan(),
        };

        info!(
            "event=engine_cycle module=engine status=ok duration_ms={} tasks_created={} events_created={} emailed={}",
            started_at.elapsed().as_millis(),
            report.tasks.created,
            report.events.created,
            report.stale.emailed
        );
        report
    }

    /// Raises `TASK_DUE` notifications for open tasks inside the due window.
    pub fn run_task_scan(&self) -> ScanReport {
        self.run_due_scan(WorkItemKind::Task)
    }

    /// Raises `EVENT_START` notifications for events starting inside the due window.
    pub fn run_event_scan(&self) -> ScanReport {
        self.run_due_scan(WorkItemKind::Event)
    }

    /// Emails every stale unread notification.
    pub fn run_stale_unread_scan(&self) -> StaleScanReport {
        self.run_stale_scan(None)
    }

    /// Emails the stale unread notifications of one user ("check now").
    pub fn run_stale_unread_scan_for_user(&self, owner_id: &str) -> StaleScanReport {
        self.run_stale_scan(Some(owner_id))
    }

    fn run_due_scan(&self, kind: WorkItemKind) -> ScanReport {
        let started_at = Instant::now();
        let scan = kind.as_str();
        let mut report = ScanReport::default();

        let items = match self
            .gateway
            .list_due_work_items(kind, self.config.due_window)
        {
            Ok(items) => items,
            Err(err) => {
                error!(
                    "event=due_scan module=engine status=error kind={scan} error_code={} error={err}",
                    err.code()
                );
                report.step_failed = true;
                return report;
            }
        };

        for item in &items {
            report.examined += 1;
            match self.raise_if_absent(item) {
                Ok(Some(notification)) => {
                    report.created += 1;
                    info!(
                        "event=notification_created module=engine status=ok kind={scan} reference_id={} notification_id={}",
                        item.id(),
                        notification.id
                    );
                }
                Ok(None) => report.already_notified += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        "event=notification_created module=engine status=error kind={scan} reference_id={} error_code={} error={err}",
                        item.id(),
                        err.code()
                    );
                }
            }
        }

        info!(
            "event=due_scan module=engine status=ok kind={scan} duration_ms={} examined={} created={} already_notified={} failed={}",
            started_at.elapsed().as_millis(),
            report.examined,
            report.created,
            report.already_notified,
            report.failed
        );
        report
    }

    /// Creates the notification for `item` unless its dedup key already exists.
    fn raise_if_absent(&self, item: &WorkItem) -> GatewayResult<Option<Notification>> {
        let kind = item.kind().notification_kind();
        match self.gateway.find_notification(item.id(), kind) {
            Ok(_) => return Ok(None),
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }

        let notification =
            Notification::pending(item.owner_id(), kind, item.id(), self.message_for(item));
        self.gateway.create_notification(notification).map(Some)
    }

    fn message_for(&self, item: &WorkItem) -> String {
        let window = describe_window(self.config.due_window);
        match item {
            WorkItem::Task(task) => {
                format!("Task '{}' is due in less than {window}!", task.title)
            }
            WorkItem::Event(event) => {
                format!("Event '{}' is starting in less than {window}!", event.title)
            }
        }
    }

    fn run_stale_scan(&self, owner_id: Option<&str>) -> StaleScanReport {
        let started_at = Instant::now();
        let scope = owner_id.unwrap_or("all");
        let mut report = StaleScanReport::default();

        let pending = match self
            .gateway
            .list_stale_unread(self.config.stale_after, owner_id)
        {
            Ok(pending) => pending,
            Err(err) => {
                error!(
                    "event=stale_scan module=engine status=error scope={scope} error_code={} error={err}",
                    err.code()
                );
                report.step_failed = true;
                return report;
            }
        };

        for notification in &pending {
            report.examined += 1;
            match self.deliver(notification) {
                Ok(Delivery::Emailed) => report.emailed += 1,
                Ok(Delivery::SkippedUnverified) => report.skipped_unverified += 1,
                Ok(Delivery::SkippedNoEmail) => report.skipped_no_email += 1,
                Ok(Delivery::SendFailed) => report.send_failed += 1,
                Err(err) => {
                    report.failed += 1;
                    log_delivery_error(notification, &err);
                }
            }
        }

        info!(
            "event=stale_scan module=engine status=ok scope={scope} duration_ms={} examined={} emailed={} skipped_unverified={} skipped_no_email={} send_failed={} failed={}",
            started_at.elapsed().as_millis(),
            report.examined,
            report.emailed,
            report.skipped_unverified,
            report.skipped_no_email,
            report.send_failed,
            report.failed
        );
        report
    }

    fn deliver(&self, notification: &Notification) -> GatewayResult<Delivery> {
        let user = self.gateway.get_user(&notification.owner_id)?;

        if !user.is_verified {
            self.gateway.mark_emailed(&notification.id)?;
            info!(
                "event=email_skipped module=engine status=skip reason=unverified user_id={} notification_id={}",
                user.id, notification.id
            );
            return Ok(Delivery::SkippedUnverified);
        }

        if !user.has_email() {
            self.gateway.mark_emailed(&notification.id)?;
            warn!(
                "event=email_skipped module=engine status=skip reason=no_email user_id={} notification_id={}",
                user.id, notification.id
            );
            return Ok(Delivery::SkippedNoEmail);
        }

        if let Err(err) =
            self.notifier
                .send(&user.email, &self.config.email_subject, &notification.message)
        {
            warn!(
                "event=email_send module=engine status=error user_id={} notification_id={} error={err}",
                user.id, notification.id
            );
            return Ok(Delivery::SendFailed);
        }

        self.gateway.mark_emailed(&notification.id)?;
        info!(
            "event=email_send module=engine status=ok user_id={} notification_id={}",
            user.id, notification.id
        );
        Ok(Delivery::Emailed)
    }
}

fn log_delivery_error(notification: &Notification, err: &GatewayError) {
    if err.is_not_found() {
        warn!(
            "event=email_send module=engine status=skip reason=owner_missing user_id={} notification_id={}",
            notification.owner_id, notification.id
        );
    } else {
        warn!(
            "event=email_send module=engine status=error notification_id={} error_code={} error={err}",
            notification.id,
            err.code()
        );
    }
}

/// Renders a window length for notification text ("24 hours", "90 minutes").
fn describe_window(window: Duration) -> String {
    let secs = window.as_secs();
    let (value, unit) = if secs >= 3600 && secs % 3600 == 0 {
        (secs / 3600, "hour")
    } else if secs >= 60 && secs % 60 == 0 {
        (secs / 60, "minute")
    } else {
        (secs, "second")
    };
    if value == 1 {
        format!("1 {unit}")
    } else {
        format!("{value} {unit}s")
    }
}

#[cfg(test)]
mod tests {
    use super::describe_window;
    use std::time::Duration;

    #[test]
    fn describe_window_picks_largest_whole_unit() {
        assert_eq!(describe_window(Duration::from_secs(24 * 3600)), "24 hours");
        assert_eq!(describe_window(Duration::from_secs(3600)), "1 hour");
        assert_eq!(describe_window(Duration::from_secs(90 * 60)), "90 minutes");
        assert_eq!(describe_window(Duration::from_secs(45)), "45 seconds");
    }
}
