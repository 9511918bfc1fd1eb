//! Booking persistence.
//!
//! Status changes are compare-and-set on the status column: a change only
//! lands if the booking is still in the status the caller last saw.
#![allow(clippy::needless_raw_string_hashes)]

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::errors::{BookingError, BookingResult};
use super::models::{Booking, BookingStatus, StatusChange};
use crate::ledger::BookingId;

/// Booking storage
#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn insert(&self, booking: &Booking) -> BookingResult<()>;

    async fn find(&self, id: BookingId) -> BookingResult<Option<Booking>>;

    /// Apply `change` only if the booking is still `expected`
    ///
    /// Returns the updated booking, or `None` if the booking is missing or
    /// its status moved on.
    async fn transition(
        &self,
        id: BookingId,
        expected: BookingStatus,
        change: StatusChange,
    ) -> BookingResult<Option<Booking>>;
}

/// Bookings held in process memory
#[derive(Debug, Default)]
pub struct MemoryBookingRepository {
    bookings: RwLock<HashMap<BookingId, Booking>>,
}

impl MemoryBookingRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookingRepository for MemoryBookingRepository {
    async fn insert(&self, booking: &Booking) -> BookingResult<()> {
        let mut bookings = self.bookings.write().unwrap_or_else(PoisonError::into_inner);
        if bookings.contains_key(&booking.id) {
            return Err(BookingError::InvalidInput(format!(
                "booking {} already exists",
                booking.id
            )));
        }
        bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn find(&self, id: BookingId) -> BookingResult<Option<Booking>> {
        Ok(self
            .bookings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned())
    }

    async fn transition(
        &self,
        id: BookingId,
        expected: BookingStatus,
        change: StatusChange,
    ) -> BookingResult<Option<Booking>> {
        let mut bookings = self.bookings.write().unwrap_or_else(PoisonError::into_inner);
        match bookings.get_mut(&id) {
            Some(booking) if booking.status == expected => {
                change.apply(booking);
                Ok(Some(booking.clone()))
            }
            _ => Ok(None),
        }
    }
}

const BOOKING_COLUMNS: &str = "id, user_id, partner_id, status, start_time, subtotal, \
    service_fee, total_amount, cancelled_by, cancel_reason, confirmed_at, paid_at, started_at, \
    completed_at, cancelled_at, created_at, updated_at";

fn booking_from_row(row: &PgRow) -> BookingResult<Booking> {
    let status: String = row.try_get("status")?;
    Ok(Booking {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        partner_id: row.try_get("partner_id")?,
        status: status
            .parse()
            .map_err(|e: String| BookingError::Database(sqlx::Error::Decode(e.into())))?,
        start_time: row.try_get("start_time")?,
        subtotal: row.try_get("subtotal")?,
        service_fee: row.try_get("service_fee")?,
        total_amount: row.try_get("total_amount")?,
        cancelled_by: row.try_get("cancelled_by")?,
        cancel_reason: row.try_get("cancel_reason")?,
        confirmed_at: row.try_get("confirmed_at")?,
        paid_at: row.try_get("paid_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        cancelled_at: row.try_get("cancelled_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Bookings stored in the `bookings` table
#[derive(Clone)]
pub struct PgBookingRepository {
    pool: Arc<PgPool>,
}

impl PgBookingRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BookingRepository for PgBookingRepository {
    async fn insert(&self, booking: &Booking) -> BookingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO bookings (id, user_id, partner_id, status, start_time, subtotal,
                                  service_fee, total_amount, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
            "#,
        )
        .bind(booking.id)
        .bind(booking.user_id)
        .bind(booking.partner_id)
        .bind(booking.status.to_string())
        .bind(booking.start_time)
        .bind(booking.subtotal)
        .bind(booking.service_fee)
        .bind(booking.total_amount)
        .bind(booking.created_at)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    async fn find(&self, id: BookingId) -> BookingResult<Option<Booking>> {
        let query = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(self.pool.as_ref())
            .await?;
        row.as_ref().map(booking_from_row).transpose()
    }

    async fn transition(
        &self,
        id: BookingId,
        expected: BookingStatus,
        change: StatusChange,
    ) -> BookingResult<Option<Booking>> {
        let stamp = change
            .to
            .timestamp_column()
            .map(|column| format!(", {column} = $4"))
            .unwrap_or_default();
        let cancel = if change.to == BookingStatus::Cancelled {
            ", cancelled_by = $5, cancel_reason = $6"
        } else {
            ""
        };
        let query = format!(
            "UPDATE bookings SET status = $3, updated_at = $4{stamp}{cancel} \
             WHERE id = $1 AND status = $2 \
             RETURNING {BOOKING_COLUMNS}"
        );

        let mut statement = sqlx::query(&query)
            .bind(id)
            .bind(expected.to_string())
            .bind(change.to.to_string())
            .bind(change.at);
        if change.to == BookingStatus::Cancelled {
            statement = statement
                .bind(change.cancelled_by)
                .bind(change.cancel_reason.clone());
        }

        let row = statement.fetch_optional(self.pool.as_ref()).await?;
        row.as_ref().map(booking_from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn booking() -> Booking {
        Booking::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Utc::now(),
            dec!(300000),
            dec!(45000),
        )
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_set() {
        let repo = MemoryBookingRepository::new();
        let booking = booking();
        repo.insert(&booking).await.unwrap();

        let confirmed = repo
            .transition(
                booking.id,
                BookingStatus::Pending,
                StatusChange::to(BookingStatus::Confirmed),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(confirmed.status, BookingStatus::Confirmed);
        assert!(confirmed.confirmed_at.is_some());

        // Stale expectation loses.
        let stale = repo
            .transition(
                booking.id,
                BookingStatus::Pending,
                StatusChange::cancelled(None, None),
            )
            .await
            .unwrap();
        assert!(stale.is_none());
        assert_eq!(
            repo.find(booking.id).await.unwrap().unwrap().status,
            BookingStatus::Confirmed
        );
    }

    #[tokio::test]
    async fn test_missing_booking() {
        let repo = MemoryBookingRepository::new();
        assert!(repo.find(Uuid::new_v4()).await.unwrap().is_none());
        let none = repo
            .transition(
                Uuid::new_v4(),
                BookingStatus::Pending,
                StatusChange::to(BookingStatus::Confirmed),
            )
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let repo = MemoryBookingRepository::new();
        let booking = booking();
        repo.insert(&booking).await.unwrap();
        assert!(matches!(
            repo.insert(&booking).await,
            Err(BookingError::InvalidInput(_))
        ));
    }
}
