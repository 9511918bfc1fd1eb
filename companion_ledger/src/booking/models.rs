//! Booking data models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::ledger::{BookingId, UserId};

/// Booking status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    /// Requested by the customer, awaiting the partner
    Pending,
    /// Accepted by the partner, awaiting payment
    Confirmed,
    /// Paid; funds held in escrow
    Paid,
    /// Service under way
    InProgress,
    /// Service delivered; funds released
    Completed,
    /// Called off; funds refunded if paid
    Cancelled,
    /// Under admin review
    Disputed,
}

impl BookingStatus {
    /// Whether the machine allows `self -> to` for some actor
    pub fn can_transition_to(self, to: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, to),
            (Pending, Confirmed)
                | (Confirmed, Paid)
                | (Paid, InProgress)
                | (Paid | InProgress, Completed)
                | (Pending | Confirmed | Paid, Cancelled)
                | (Paid | InProgress, Disputed)
                | (Disputed, Completed | Cancelled)
        )
    }

    /// Column stamped when a booking enters this status
    pub fn timestamp_column(self) -> Option<&'static str> {
        match self {
            BookingStatus::Confirmed => Some("confirmed_at"),
            BookingStatus::Paid => Some("paid_at"),
            BookingStatus::InProgress => Some("started_at"),
            BookingStatus::Completed => Some("completed_at"),
            BookingStatus::Cancelled => Some("cancelled_at"),
            BookingStatus::Pending | BookingStatus::Disputed => None,
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Paid => "PAID",
            BookingStatus::InProgress => "IN_PROGRESS",
            BookingStatus::Completed => "COMPLETED",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::Disputed => "DISPUTED",
        };
        f.write_str(s)
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(BookingStatus::Pending),
            "CONFIRMED" => Ok(BookingStatus::Confirmed),
            "PAID" => Ok(BookingStatus::Paid),
            "IN_PROGRESS" => Ok(BookingStatus::InProgress),
            "COMPLETED" => Ok(BookingStatus::Completed),
            "CANCELLED" => Ok(BookingStatus::Cancelled),
            "DISPUTED" => Ok(BookingStatus::Disputed),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

/// A booking as driven by the payment lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    /// Customer; pays
    pub user_id: UserId,
    /// Partner; gets paid
    pub partner_id: UserId,
    pub status: BookingStatus,
    pub start_time: DateTime<Utc>,
    pub subtotal: Decimal,
    pub service_fee: Decimal,
    pub total_amount: Decimal,
    /// `None` with a cancelled status means an admin cancelled it
    pub cancelled_by: Option<UserId>,
    pub cancel_reason: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// A new PENDING booking
    pub fn new(
        user_id: UserId,
        partner_id: UserId,
        start_time: DateTime<Utc>,
        subtotal: Decimal,
        service_fee: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            partner_id,
            status: BookingStatus::Pending,
            start_time,
            subtotal,
            service_fee,
            total_amount: subtotal + service_fee,
            cancelled_by: None,
            cancel_reason: None,
            confirmed_at: None,
            paid_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The other party of the booking, if `user` is one of them
    pub fn counterparty(&self, user: UserId) -> Option<UserId> {
        if user == self.user_id {
            Some(self.partner_id)
        } else if user == self.partner_id {
            Some(self.user_id)
        } else {
            None
        }
    }
}

/// A status change applied by compare-and-set
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub to: BookingStatus,
    pub at: DateTime<Utc>,
    pub cancelled_by: Option<UserId>,
    pub cancel_reason: Option<String>,
}

impl StatusChange {
    pub fn to(status: BookingStatus) -> Self {
        Self {
            to: status,
            at: Utc::now(),
            cancelled_by: None,
            cancel_reason: None,
        }
    }

    pub fn cancelled(by: Option<UserId>, reason: Option<String>) -> Self {
        Self {
            cancelled_by: by,
            cancel_reason: reason,
            ..Self::to(BookingStatus::Cancelled)
        }
    }

    /// Apply the change to an in-memory booking
    pub fn apply(&self, booking: &mut Booking) {
        booking.status = self.to;
        booking.updated_at = self.at;
        match self.to {
            BookingStatus::Confirmed => booking.confirmed_at = Some(self.at),
            BookingStatus::Paid => booking.paid_at = Some(self.at),
            BookingStatus::InProgress => booking.started_at = Some(self.at),
            BookingStatus::Completed => booking.completed_at = Some(self.at),
            BookingStatus::Cancelled => {
                booking.cancelled_at = Some(self.at);
                booking.cancelled_by = self.cancelled_by;
                booking.cancel_reason = self.cancel_reason.clone();
            }
            BookingStatus::Pending | BookingStatus::Disputed => {}
        }
    }
}

/// Who is asking for a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    User(UserId),
    Admin,
}

impl Actor {
    pub fn user_id(self) -> Option<UserId> {
        match self {
            Actor::User(id) => Some(id),
            Actor::Admin => None,
        }
    }

    pub fn is_admin(self) -> bool {
        matches!(self, Actor::Admin)
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::User(id) => write!(f, "user {id}"),
            Actor::Admin => write!(f, "admin"),
        }
    }
}

/// How an admin settles a dispute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisputeResolution {
    /// Pay the partner
    Complete,
    /// Refund the customer
    Cancel,
}
