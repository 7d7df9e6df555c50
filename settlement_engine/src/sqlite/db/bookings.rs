use chrono::Utc;
use log::*;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use crate::{
    db_types::{Booking, BookingId, BookingStatus, BookingUpdate, ChainBookingId, NewBooking},
    traits::LedgerStoreError,
};

/// Inserts a new booking. The on-chain identifier is derived from the booking id here, and never again.
pub async fn insert_booking(booking: NewBooking, conn: &mut SqliteConnection) -> Result<Booking, LedgerStoreError> {
    let id = booking.id.clone();
    let chain_id = ChainBookingId::derive(&booking.id);
    let now = Utc::now();
    let rows: Vec<Booking> = sqlx::query_as(
        r#"
            INSERT INTO bookings (
                id,
                chain_booking_id,
                customer_id,
                customer_wallet,
                provider_id,
                provider_wallet,
                referrer_id,
                referrer_wallet,
                status,
                scheduled_at,
                total_amount,
                meeting_link,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING *;
        "#,
    )
    .bind(booking.id)
    .bind(chain_id)
    .bind(booking.customer_id)
    .bind(booking.customer_wallet)
    .bind(booking.provider_id)
    .bind(booking.provider_wallet)
    .bind(booking.referrer_id)
    .bind(booking.referrer_wallet)
    .bind(BookingStatus::Pending)
    .bind(booking.scheduled_at)
    .bind(booking.total_amount)
    .bind(booking.meeting_link)
    .bind(now)
    .bind(now)
    .fetch_all(conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(err) if err.is_unique_violation() => LedgerStoreError::BookingAlreadyExists(id),
        _ => LedgerStoreError::from(e),
    })?;
    let booking = rows.into_iter().next().ok_or(sqlx::Error::RowNotFound)?;
    debug!("🗃️ Booking {} saved with on-chain id {}", booking.id, booking.chain_booking_id);
    Ok(booking)
}

pub async fn fetch_booking(id: &BookingId, conn: &mut SqliteConnection) -> Result<Option<Booking>, sqlx::Error> {
    let booking = sqlx::query_as("SELECT * FROM bookings WHERE id = $1").bind(id.as_str()).fetch_optional(conn).await?;
    Ok(booking)
}

pub async fn fetch_booking_by_chain_id(
    id: &ChainBookingId,
    conn: &mut SqliteConnection,
) -> Result<Option<Booking>, sqlx::Error> {
    let booking =
        sqlx::query_as("SELECT * FROM bookings WHERE chain_booking_id = $1").bind(*id).fetch_optional(conn).await?;
    Ok(booking)
}

/// Applies the non-empty fields of `update`. Returns `None` if the booking does not exist.
pub async fn update_booking(
    id: &BookingId,
    update: BookingUpdate,
    conn: &mut SqliteConnection,
) -> Result<Option<Booking>, sqlx::Error> {
    update_booking_from(id, &[], update, conn).await
}

/// As [`update_booking`], but the row is only touched while its status is one of `from`. An empty `from` matches any
/// status. Returns `None` if the booking does not exist or is in another state.
pub async fn update_booking_from(
    id: &BookingId,
    from: &[BookingStatus],
    update: BookingUpdate,
    conn: &mut SqliteConnection,
) -> Result<Option<Booking>, sqlx::Error> {
    if update.is_empty() {
        let booking = fetch_booking(id, conn).await?;
        return Ok(booking.filter(|b| from.is_empty() || from.contains(&b.status)));
    }
    let mut builder = QueryBuilder::<Sqlite>::new("UPDATE bookings SET updated_at = ");
    builder.push_bind(Utc::now());
    if let Some(status) = update.status {
        builder.push(", status = ").push_bind(status);
    }
    if let Some(amount) = update.paid_amount {
        builder.push(", paid_amount = ").push_bind(amount);
    }
    if let Some(rate) = update.platform_fee_rate {
        builder.push(", platform_fee_rate = ").push_bind(rate);
    }
    if let Some(rate) = update.referrer_fee_rate {
        builder.push(", referrer_fee_rate = ").push_bind(rate);
    }
    if let Some(hash) = update.payment_tx_hash {
        builder.push(", payment_tx_hash = ").push_bind(hash);
    }
    if let Some(at) = update.paid_at {
        builder.push(", paid_at = ").push_bind(at);
    }
    if let Some(hash) = update.completion_tx_hash {
        builder.push(", completion_tx_hash = ").push_bind(hash);
    }
    if let Some(at) = update.completed_at {
        builder.push(", completed_at = ").push_bind(at);
    }
    if let Some(hash) = update.cancellation_tx_hash {
        builder.push(", cancellation_tx_hash = ").push_bind(hash);
    }
    if let Some(reason) = update.cancellation_reason {
        builder.push(", cancellation_reason = ").push_bind(reason);
    }
    if let Some(by) = update.cancelled_by {
        builder.push(", cancelled_by = ").push_bind(by);
    }
    if let Some(at) = update.cancelled_at {
        builder.push(", cancelled_at = ").push_bind(at);
    }
    if let Some(link) = update.meeting_link {
        builder.push(", meeting_link = ").push_bind(link);
    }
    builder.push(" WHERE id = ").push_bind(id.as_str().to_string());
    if !from.is_empty() {
        builder.push(" AND status IN (");
        let mut statuses = builder.separated(", ");
        for status in from {
            statuses.push_bind(*status);
        }
        statuses.push_unseparated(")");
    }
    builder.push(" RETURNING *;");
    trace!("🗃️ Executing query: {}", builder.sql());
    let rows = builder.build_query_as::<Booking>().fetch_all(conn).await?;
    Ok(rows.into_iter().next())
}
