//! Booking lifecycle as it relates to payment.
//!
//! ```text
//! PENDING -> CONFIRMED -> PAID -> IN_PROGRESS -> COMPLETED
//!    |           |          |          |
//!    +-----------+----------+--> CANCELLED       (PAID refunds)
//!                           |          |
//!                           +----------+--> DISPUTED -> COMPLETED | CANCELLED
//! ```

pub mod errors;
pub mod machine;
pub mod models;
pub mod pricing;
pub mod repository;

pub use errors::{BookingError, BookingResult};
pub use machine::{BookingPolicy, BookingStateMachine, SettlementOutcome, TransitionOutcome};
pub use models::{Actor, Booking, BookingStatus, DisputeResolution, StatusChange};
pub use pricing::{FeeQuote, quote};
pub use repository::{BookingRepository, MemoryBookingRepository, PgBookingRepository};
