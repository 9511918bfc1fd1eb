//! Booking state machine.
//!
//! Drives bookings through their lifecycle and calls the wallet service at
//! the money-moving edges:
//!
//! - `CONFIRMED -> PAID` holds the payment first, then flips the booking.
//!   If a cancellation wins the race the fresh hold is refunded. Any other
//!   flip failure keeps the hold, and a retried pay picks it up.
//! - Cancelling a CONFIRMED booking refunds a hold left behind by a failed
//!   pay.
//! - `-> COMPLETED` and `-> CANCELLED` flip the booking first, then release
//!   or refund. A settlement failure leaves the booking flipped and is
//!   reported in [`SettlementOutcome::Failed`] for reconciliation.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use super::errors::{BookingError, BookingResult};
use super::models::{Actor, Booking, BookingStatus, DisputeResolution, StatusChange};
use super::pricing;
use super::repository::BookingRepository;
use crate::ledger::{BookingId, Transaction, UserId};
use crate::notify::{NotificationKind, Notifier};
use crate::settings::{self, SettingsStore};
use crate::wallet::{EscrowOutcome, HoldOutcome, MAX_AMOUNT, WalletResult, WalletService};

/// Defaults used when the settings store has no value
#[derive(Debug, Clone)]
pub struct BookingPolicy {
    pub cancellation_hours: Decimal,
    pub service_fee_percent: Decimal,
    /// Decimal places of quoted fees
    pub fee_scale: u32,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            cancellation_hours: Decimal::from(24),
            service_fee_percent: Decimal::from(15),
            fee_scale: 0,
        }
    }
}

/// What happened to the booking's money during a transition
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SettlementOutcome {
    /// This transition moved money
    Settled { transaction: Transaction },
    /// An earlier call already moved it
    AlreadySettled,
    /// The transition does not touch money
    NotRequired,
    /// The booking moved but the money did not; needs reconciliation
    Failed { reason: String },
}

/// A booking after a successful transition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionOutcome {
    pub booking: Booking,
    pub settlement: SettlementOutcome,
}

impl TransitionOutcome {
    fn without_settlement(booking: Booking) -> Self {
        Self {
            booking,
            settlement: SettlementOutcome::NotRequired,
        }
    }
}

/// Booking state machine
#[derive(Clone)]
pub struct BookingStateMachine {
    bookings: Arc<dyn BookingRepository>,
    wallets: WalletService,
    settings: Arc<dyn SettingsStore>,
    notifier: Notifier,
    policy: BookingPolicy,
}

impl BookingStateMachine {
    pub fn new(
        bookings: Arc<dyn BookingRepository>,
        wallets: WalletService,
        settings: Arc<dyn SettingsStore>,
        notifier: Notifier,
        policy: BookingPolicy,
    ) -> Self {
        Self {
            bookings,
            wallets,
            settings,
            notifier,
            policy,
        }
    }

    /// Create a PENDING booking priced with the current service fee
    ///
    /// Both parties get a wallet if they have none yet.
    pub async fn create_booking(
        &self,
        customer_id: UserId,
        partner_id: UserId,
        subtotal: Decimal,
        start_time: DateTime<Utc>,
    ) -> BookingResult<Booking> {
        if subtotal <= Decimal::ZERO {
            return Err(BookingError::InvalidInput(
                "subtotal must be positive".to_string(),
            ));
        }
        if subtotal > MAX_AMOUNT {
            return Err(BookingError::InvalidInput(format!(
                "subtotal must not exceed {MAX_AMOUNT}"
            )));
        }
        if customer_id == partner_id {
            return Err(BookingError::InvalidInput(
                "a partner cannot book themselves".to_string(),
            ));
        }
        if start_time <= Utc::now() {
            return Err(BookingError::InvalidInput(
                "start_time must be in the future".to_string(),
            ));
        }

        let fee_percent = self
            .settings
            .get_number(settings::SERVICE_FEE_PERCENT, self.policy.service_fee_percent)
            .await;
        let quote = pricing::quote(subtotal, fee_percent, self.policy.fee_scale);

        self.wallets.get_or_create_wallet(customer_id).await?;
        self.wallets.get_or_create_wallet(partner_id).await?;

        let booking = Booking::new(
            customer_id,
            partner_id,
            start_time,
            quote.subtotal,
            quote.service_fee,
        );
        self.bookings.insert(&booking).await?;

        log::info!(
            "Booking {} created: {} -> {} for {} + fee {}",
            booking.id,
            customer_id,
            partner_id,
            booking.subtotal,
            booking.service_fee
        );
        self.notify(partner_id, NotificationKind::BookingRequested, &booking);
        Ok(booking)
    }

    /// Get a booking
    pub async fn get_booking(&self, booking_id: BookingId) -> BookingResult<Booking> {
        self.bookings
            .find(booking_id)
            .await?
            .ok_or(BookingError::NotFound(booking_id))
    }

    /// PENDING -> CONFIRMED, by the partner
    pub async fn confirm(
        &self,
        booking_id: BookingId,
        actor: Actor,
    ) -> BookingResult<TransitionOutcome> {
        let booking = self.get_booking(booking_id).await?;
        require_user(&booking, actor, &[booking.partner_id], "confirm")?;
        let booking = self
            .flip(&booking, StatusChange::to(BookingStatus::Confirmed))
            .await?;
        self.notify(booking.user_id, NotificationKind::BookingConfirmed, &booking);
        Ok(TransitionOutcome::without_settlement(booking))
    }

    /// CONFIRMED -> PAID, by the customer; holds the total in escrow
    pub async fn pay(&self, booking_id: BookingId, actor: Actor) -> BookingResult<TransitionOutcome> {
        let booking = self.get_booking(booking_id).await?;
        require_user(&booking, actor, &[booking.user_id], "pay for")?;
        ensure_edge(&booking, BookingStatus::Paid)?;

        // Booking stays CONFIRMED if this fails.
        let hold = self
            .wallets
            .pay_and_hold_escrow(
                booking.user_id,
                booking.partner_id,
                booking.subtotal,
                booking.service_fee,
                booking.id,
            )
            .await?;

        let paid = match self
            .flip(&booking, StatusChange::to(BookingStatus::Paid))
            .await
        {
            Ok(paid) => paid,
            Err(e) => {
                // Only a cancelled booking can no longer use the hold. After
                // a concurrent pay the escrow belongs to the booking; after a
                // store error the booking is still CONFIRMED and retryable.
                let cancelled = matches!(
                    e,
                    BookingError::InvalidTransition {
                        from: BookingStatus::Cancelled,
                        ..
                    }
                );
                if matches!(hold, HoldOutcome::Held { .. }) && cancelled {
                    log::warn!(
                        "Booking {booking_id} changed while paying; refunding the new hold"
                    );
                    let compensation = self.wallets.refund_escrow(booking_id).await;
                    self.settlement(booking_id, "compensating refund", compensation);
                }
                return Err(e);
            }
        };

        let settlement = match hold {
            HoldOutcome::Held { transaction, .. } => SettlementOutcome::Settled { transaction },
            HoldOutcome::AlreadyHeld(_) => SettlementOutcome::AlreadySettled,
        };
        self.notify(paid.partner_id, NotificationKind::BookingPaid, &paid);
        Ok(TransitionOutcome {
            booking: paid,
            settlement,
        })
    }

    /// PAID -> IN_PROGRESS, by either party
    pub async fn start(
        &self,
        booking_id: BookingId,
        actor: Actor,
    ) -> BookingResult<TransitionOutcome> {
        let booking = self.get_booking(booking_id).await?;
        require_user(
            &booking,
            actor,
            &[booking.user_id, booking.partner_id],
            "start",
        )?;
        let booking = self
            .flip(&booking, StatusChange::to(BookingStatus::InProgress))
            .await?;
        self.notify_counterparty(&booking, actor, NotificationKind::BookingStarted);
        Ok(TransitionOutcome::without_settlement(booking))
    }

    /// PAID or IN_PROGRESS -> COMPLETED, by the customer; releases escrow
    pub async fn complete(
        &self,
        booking_id: BookingId,
        actor: Actor,
    ) -> BookingResult<TransitionOutcome> {
        let booking = self.get_booking(booking_id).await?;
        require_user(&booking, actor, &[booking.user_id], "complete")?;
        ensure_from(
            &booking,
            &[BookingStatus::Paid, BookingStatus::InProgress],
            BookingStatus::Completed,
        )?;
        let booking = self
            .flip(&booking, StatusChange::to(BookingStatus::Completed))
            .await?;

        let released = self.wallets.release_escrow(booking_id).await;
        let settlement = self.settlement(booking_id, "release", released);
        self.notify(booking.partner_id, NotificationKind::BookingCompleted, &booking);
        Ok(TransitionOutcome {
            booking,
            settlement,
        })
    }

    /// PENDING, CONFIRMED or PAID -> CANCELLED; refunds a paid booking
    ///
    /// Customers and partners must cancel at least `cancellation_hours`
    /// before the start time. Admins may cancel at any time.
    pub async fn cancel(
        &self,
        booking_id: BookingId,
        actor: Actor,
        reason: Option<String>,
    ) -> BookingResult<TransitionOutcome> {
        let booking = self.get_booking(booking_id).await?;
        if !actor.is_admin() {
            require_user(
                &booking,
                actor,
                &[booking.user_id, booking.partner_id],
                "cancel",
            )?;
        }
        // Disputed bookings are cancelled through `resolve`.
        ensure_from(
            &booking,
            &[
                BookingStatus::Pending,
                BookingStatus::Confirmed,
                BookingStatus::Paid,
            ],
            BookingStatus::Cancelled,
        )?;
        if !actor.is_admin() {
            self.check_cancellation_window(&booking).await?;
        }

        let was_paid = booking.status == BookingStatus::Paid;
        let cancelled = self
            .flip(
                &booking,
                StatusChange::cancelled(actor.user_id(), reason),
            )
            .await?;

        let settlement = if was_paid {
            let refunded = self.wallets.refund_escrow(booking_id).await;
            self.settlement(booking_id, "refund", refunded)
        } else if booking.status == BookingStatus::Confirmed {
            // A pay whose flip failed may have left a hold behind.
            match self.wallets.refund_escrow(booking_id).await {
                Ok(EscrowOutcome::NotFound) => SettlementOutcome::NotRequired,
                refunded => self.settlement(booking_id, "refund", refunded),
            }
        } else {
            SettlementOutcome::NotRequired
        };

        match actor {
            Actor::User(_) => {
                self.notify_counterparty(&cancelled, actor, NotificationKind::BookingCancelled)
            }
            Actor::Admin => {
                self.notify(cancelled.user_id, NotificationKind::BookingCancelled, &cancelled);
                self.notify(
                    cancelled.partner_id,
                    NotificationKind::BookingCancelled,
                    &cancelled,
                );
            }
        }
        Ok(TransitionOutcome {
            booking: cancelled,
            settlement,
        })
    }

    /// PAID or IN_PROGRESS -> DISPUTED, by either party
    pub async fn dispute(
        &self,
        booking_id: BookingId,
        actor: Actor,
        reason: Option<String>,
    ) -> BookingResult<TransitionOutcome> {
        let booking = self.get_booking(booking_id).await?;
        require_user(
            &booking,
            actor,
            &[booking.user_id, booking.partner_id],
            "dispute",
        )?;
        let booking = self
            .flip(&booking, StatusChange::to(BookingStatus::Disputed))
            .await?;
        log::warn!(
            "Booking {booking_id} disputed by {actor}: {}",
            reason.as_deref().unwrap_or("no reason given")
        );
        self.notify_counterparty(&booking, actor, NotificationKind::BookingDisputed);
        Ok(TransitionOutcome::without_settlement(booking))
    }

    /// DISPUTED -> COMPLETED or CANCELLED, by an admin
    pub async fn resolve(
        &self,
        booking_id: BookingId,
        actor: Actor,
        resolution: DisputeResolution,
    ) -> BookingResult<TransitionOutcome> {
        if !actor.is_admin() {
            return Err(BookingError::Forbidden(format!(
                "{actor} cannot resolve disputes"
            )));
        }
        let booking = self.get_booking(booking_id).await?;
        if booking.status != BookingStatus::Disputed {
            let to = match resolution {
                DisputeResolution::Complete => BookingStatus::Completed,
                DisputeResolution::Cancel => BookingStatus::Cancelled,
            };
            return Err(BookingError::InvalidTransition {
                from: booking.status,
                to,
            });
        }

        let (booking, settlement) = match resolution {
            DisputeResolution::Complete => {
                let booking = self
                    .flip(&booking, StatusChange::to(BookingStatus::Completed))
                    .await?;
                let released = self.wallets.release_escrow(booking_id).await;
                (booking, self.settlement(booking_id, "release", released))
            }
            DisputeResolution::Cancel => {
                let booking = self
                    .flip(
                        &booking,
                        StatusChange::cancelled(None, Some("dispute resolved".to_string())),
                    )
                    .await?;
                let refunded = self.wallets.refund_escrow(booking_id).await;
                (booking, self.settlement(booking_id, "refund", refunded))
            }
        };

        self.notify(booking.user_id, NotificationKind::DisputeResolved, &booking);
        self.notify(booking.partner_id, NotificationKind::DisputeResolved, &booking);
        Ok(TransitionOutcome {
            booking,
            settlement,
        })
    }

    async fn check_cancellation_window(&self, booking: &Booking) -> BookingResult<()> {
        let hours = self
            .settings
            .get_number(settings::CANCELLATION_HOURS, self.policy.cancellation_hours)
            .await;
        let notice_secs = (hours * Decimal::from(3600))
            .trunc()
            .to_i64()
            .unwrap_or(i64::MAX);
        let notice = ChronoDuration::try_seconds(notice_secs).unwrap_or(ChronoDuration::MAX);

        if booking.start_time - Utc::now() < notice {
            return Err(BookingError::CancellationWindow { hours });
        }
        Ok(())
    }

    /// Compare-and-set the booking from its observed status
    async fn flip(&self, booking: &Booking, change: StatusChange) -> BookingResult<Booking> {
        let to = change.to;
        ensure_edge(booking, to)?;
        match self
            .bookings
            .transition(booking.id, booking.status, change)
            .await?
        {
            Some(updated) => {
                log::info!("Booking {}: {} -> {}", booking.id, booking.status, to);
                Ok(updated)
            }
            None => {
                let current = self.get_booking(booking.id).await?;
                Err(BookingError::InvalidTransition {
                    from: current.status,
                    to,
                })
            }
        }
    }

    fn settlement(
        &self,
        booking_id: BookingId,
        action: &str,
        result: WalletResult<EscrowOutcome>,
    ) -> SettlementOutcome {
        match result {
            Ok(EscrowOutcome::Released { transaction, .. })
            | Ok(EscrowOutcome::Refunded { transaction, .. }) => {
                SettlementOutcome::Settled { transaction }
            }
            Ok(EscrowOutcome::AlreadyResolved(escrow)) => {
                log::info!(
                    "Escrow for booking {booking_id} was already {}; {action} skipped",
                    escrow.status
                );
                SettlementOutcome::AlreadySettled
            }
            Ok(EscrowOutcome::NotFound) => {
                log::error!(
                    "Booking {booking_id} has no escrow holding to {action}; needs reconciliation"
                );
                SettlementOutcome::Failed {
                    reason: "no escrow holding for booking".to_string(),
                }
            }
            Err(e) => {
                log::error!(
                    "Escrow {action} failed for booking {booking_id}, needs manual reconciliation: {e}"
                );
                SettlementOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    fn notify(&self, user_id: UserId, kind: NotificationKind, booking: &Booking) {
        self.notifier.dispatch(
            user_id,
            kind,
            json!({
                "booking_id": booking.id,
                "status": booking.status,
                "total_amount": booking.total_amount,
            }),
        );
    }

    fn notify_counterparty(&self, booking: &Booking, actor: Actor, kind: NotificationKind) {
        if let Some(other) = actor.user_id().and_then(|id| booking.counterparty(id)) {
            self.notify(other, kind, booking);
        }
    }
}

fn ensure_edge(booking: &Booking, to: BookingStatus) -> BookingResult<()> {
    if booking.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(BookingError::InvalidTransition {
            from: booking.status,
            to,
        })
    }
}

/// Like `ensure_edge`, limited to the given source statuses
fn ensure_from(booking: &Booking, from: &[BookingStatus], to: BookingStatus) -> BookingResult<()> {
    if from.contains(&booking.status) {
        ensure_edge(booking, to)
    } else {
        Err(BookingError::InvalidTransition {
            from: booking.status,
            to,
        })
    }
}

fn require_user(
    booking: &Booking,
    actor: Actor,
    allowed: &[UserId],
    action: &str,
) -> BookingResult<()> {
    match actor {
        Actor::User(id) if allowed.contains(&id) => Ok(()),
        _ => Err(BookingError::Forbidden(format!(
            "{actor} cannot {action} booking {}",
            booking.id
        ))),
    }
}
