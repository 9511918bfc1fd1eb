//! Notification delivery capability.
//!
//! Delivery is fire-and-forget: [`Notifier::dispatch`] hands the message to a
//! spawned task and only logs failures. Nothing is retried.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::ledger::UserId;

/// What happened, from the recipient's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    PaymentHeld,
    EarningsReleased,
    RefundIssued,
    WithdrawalRequested,
    TopUpCompleted,
    BookingRequested,
    BookingConfirmed,
    BookingPaid,
    BookingStarted,
    BookingCompleted,
    BookingCancelled,
    BookingDisputed,
    DisputeResolved,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::PaymentHeld => "payment_held",
            NotificationKind::EarningsReleased => "earnings_released",
            NotificationKind::RefundIssued => "refund_issued",
            NotificationKind::WithdrawalRequested => "withdrawal_requested",
            NotificationKind::TopUpCompleted => "top_up_completed",
            NotificationKind::BookingRequested => "booking_requested",
            NotificationKind::BookingConfirmed => "booking_confirmed",
            NotificationKind::BookingPaid => "booking_paid",
            NotificationKind::BookingStarted => "booking_started",
            NotificationKind::BookingCompleted => "booking_completed",
            NotificationKind::BookingCancelled => "booking_cancelled",
            NotificationKind::BookingDisputed => "booking_disputed",
            NotificationKind::DisputeResolved => "dispute_resolved",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Somewhere notifications can be delivered
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(
        &self,
        user_id: UserId,
        kind: NotificationKind,
        payload: serde_json::Value,
    ) -> anyhow::Result<()>;
}

/// Sink that writes every notification to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn notify(
        &self,
        user_id: UserId,
        kind: NotificationKind,
        payload: serde_json::Value,
    ) -> anyhow::Result<()> {
        log::info!("Notify {user_id}: {kind} {payload}");
        Ok(())
    }
}

/// A delivered (or attempted) notification
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub user_id: UserId,
    pub kind: NotificationKind,
    pub payload: serde_json::Value,
}

/// Sink that records notifications in memory
///
/// A failing sink still records each attempt before returning an error.
#[derive(Debug, Default)]
pub struct MemoryNotificationSink {
    sent: Mutex<Vec<Notification>>,
    fail: bool,
}

impl MemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every delivery fails
    pub fn failing() -> Self {
        Self {
            sent: Mutex::default(),
            fail: true,
        }
    }

    /// Everything recorded so far
    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Notifications recorded for one user
    pub fn sent_to(&self, user_id: UserId) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|n| n.user_id == user_id)
            .collect()
    }

    /// Wait until at least `count` notifications were recorded
    ///
    /// Returns false if `timeout` elapses first.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let poll = async {
            while self.sent().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(timeout, poll).await.is_ok()
    }
}

#[async_trait]
impl NotificationSink for MemoryNotificationSink {
    async fn notify(
        &self,
        user_id: UserId,
        kind: NotificationKind,
        payload: serde_json::Value,
    ) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Notification {
                user_id,
                kind,
                payload,
            });
        if self.fail {
            anyhow::bail!("notification sink unavailable");
        }
        Ok(())
    }
}

/// Dispatches notifications off the request path
#[derive(Clone)]
pub struct Notifier {
    sink: Arc<dyn NotificationSink>,
}

impl Notifier {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }

    /// Deliver on a spawned task; failures are logged and dropped
    pub fn dispatch(
        &self,
        user_id: UserId,
        kind: NotificationKind,
        payload: serde_json::Value,
    ) -> JoinHandle<()> {
        let sink = self.sink.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.notify(user_id, kind, payload).await {
                log::warn!("Failed to deliver {kind} notification to {user_id}: {e:#}");
            }
        })
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(Arc::new(LogNotificationSink))
    }
}
