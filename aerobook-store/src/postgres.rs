use std::str::FromStr;

use aerobook_core::models::*;
use aerobook_core::repository::{ReferenceData, Store, StoreTx, UserDirectory};
use aerobook_core::{CoreError, CoreResult};
use aerobook_shared::Masked;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgConnection;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::error;

/// PostgreSQL-backed store. Row locks come from `SELECT ... FOR UPDATE`
/// and `FOR SHARE`, always taken in ascending id order.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_err(err: sqlx::Error) -> CoreError {
    error!("Database error: {}", err);
    CoreError::Storage(err.to_string())
}

fn constraint_of(err: &sqlx::Error) -> Option<&str> {
    match err {
        sqlx::Error::Database(db) => db.constraint(),
        _ => None,
    }
}

fn parse_column<T: FromStr>(value: &str) -> CoreResult<T> {
    value
        .parse()
        .map_err(|_| CoreError::Storage(format!("unexpected column value: {}", value)))
}

fn flight_ids(ids: &[FlightId]) -> Vec<i64> {
    ids.iter().map(|id| id.0).collect()
}

fn ticket_ids(ids: &[TicketId]) -> Vec<i64> {
    ids.iter().map(|id| id.0).collect()
}

// Rows

#[derive(sqlx::FromRow)]
struct AirplaneRow {
    id: i64,
    model: String,
    seat_capacity: i32,
    airline: String,
}

impl From<AirplaneRow> for Airplane {
    fn from(row: AirplaneRow) -> Self {
        Airplane {
            id: AirplaneId(row.id),
            model: row.model,
            seat_capacity: row.seat_capacity,
            airline: row.airline,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AirportRow {
    id: i64,
    code: String,
    name: String,
    city: String,
    country: String,
}

impl From<AirportRow> for Airport {
    fn from(row: AirportRow) -> Self {
        Airport {
            id: AirportId(row.id),
            code: row.code,
            name: row.name,
            city: row.city,
            country: row.country,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TicketTypeRow {
    id: i64,
    name: String,
    price_multiplier: Decimal,
}

impl From<TicketTypeRow> for TicketType {
    fn from(row: TicketTypeRow) -> Self {
        TicketType {
            id: TicketTypeId(row.id),
            name: row.name,
            price_multiplier: row.price_multiplier,
        }
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    email: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: UserId(row.id),
            username: row.username,
            email: Masked(row.email),
        }
    }
}

#[derive(sqlx::FromRow)]
struct FlightRow {
    id: i64,
    airplane_id: i64,
    departure_airport_id: i64,
    arrival_airport_id: i64,
    departure_time: DateTime<Utc>,
    arrival_time: DateTime<Utc>,
    base_price: Decimal,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<FlightRow> for Flight {
    type Error = CoreError;

    fn try_from(row: FlightRow) -> CoreResult<Self> {
        Ok(Flight {
            id: FlightId(row.id),
            airplane_id: AirplaneId(row.airplane_id),
            departure_airport_id: AirportId(row.departure_airport_id),
            arrival_airport_id: AirportId(row.arrival_airport_id),
            departure_time: row.departure_time,
            arrival_time: row.arrival_time,
            base_price: row.base_price,
            status: parse_column(&row.status)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TicketRow {
    id: i64,
    flight_id: i64,
    ticket_type_id: i64,
    seat_number: String,
    status: String,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = CoreError;

    fn try_from(row: TicketRow) -> CoreResult<Self> {
        Ok(Ticket {
            id: TicketId(row.id),
            flight_id: FlightId(row.flight_id),
            ticket_type_id: TicketTypeId(row.ticket_type_id),
            seat_number: row.seat_number,
            status: parse_column(&row.status)?,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: i64,
    user_id: i64,
    booking_date: NaiveDateTime,
    total_amount: Decimal,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = CoreError;

    fn try_from(row: BookingRow) -> CoreResult<Self> {
        Ok(Booking {
            id: BookingId(row.id),
            user_id: UserId(row.user_id),
            booking_date: row.booking_date,
            total_amount: row.total_amount,
            status: parse_column(&row.status)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: i64,
    booking_id: i64,
    amount: Decimal,
    transaction_id: String,
    method: String,
    status: String,
    paid_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = CoreError;

    fn try_from(row: PaymentRow) -> CoreResult<Self> {
        Ok(Payment {
            id: PaymentId(row.id),
            booking_id: BookingId(row.booking_id),
            amount: row.amount,
            transaction_id: row.transaction_id,
            method: parse_column(&row.method)?,
            status: parse_column(&row.status)?,
            paid_at: row.paid_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> CoreResult<Vec<T>>
where
    T: TryFrom<R, Error = CoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

fn convert_opt<R, T>(row: Option<R>) -> CoreResult<Option<T>>
where
    T: TryFrom<R, Error = CoreError>,
{
    row.map(T::try_from).transpose()
}

const FLIGHT_COLUMNS: &str = "id, airplane_id, departure_airport_id, arrival_airport_id, \
    departure_time, arrival_time, base_price, status, created_at, updated_at";
const TICKET_COLUMNS: &str = "id, flight_id, ticket_type_id, seat_number, status, updated_at";
const BOOKING_COLUMNS: &str =
    "id, user_id, booking_date, total_amount, status, created_at, updated_at";
const PAYMENT_COLUMNS: &str = "id, booking_id, amount, transaction_id, method, status, \
    paid_at, created_at, updated_at";

#[async_trait]
impl ReferenceData for PgStore {
    async fn airplane(&self, id: AirplaneId) -> CoreResult<Airplane> {
        sqlx::query_as::<_, AirplaneRow>(
            "SELECT id, model, seat_capacity, airline FROM airplane WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .map(Airplane::from)
        .ok_or(CoreError::AirplaneNotFound(id))
    }

    async fn airport(&self, id: AirportId) -> CoreResult<Airport> {
        sqlx::query_as::<_, AirportRow>(
            "SELECT id, code, name, city, country FROM airport WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .map(Airport::from)
        .ok_or(CoreError::AirportNotFound(id))
    }

    async fn ticket_type(&self, id: TicketTypeId) -> CoreResult<TicketType> {
        sqlx::query_as::<_, TicketTypeRow>(
            "SELECT id, name, price_multiplier FROM ticket_type WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .map(TicketType::from)
        .ok_or(CoreError::TicketTypeNotFound(id))
    }

    async fn ticket_types(&self) -> CoreResult<Vec<TicketType>> {
        let rows = sqlx::query_as::<_, TicketTypeRow>(
            "SELECT id, name, price_multiplier FROM ticket_type ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(TicketType::from).collect())
    }
}

#[async_trait]
impl UserDirectory for PgStore {
    async fn user(&self, id: UserId) -> CoreResult<User> {
        sqlx::query_as::<_, UserRow>("SELECT id, username, email FROM app_user WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(User::from)
            .ok_or_else(|| CoreError::UserNotFound(id.to_string()))
    }

    async fn user_by_username(&self, username: &str) -> CoreResult<User> {
        sqlx::query_as::<_, UserRow>(
            "SELECT id, username, email FROM app_user WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .map(User::from)
        .ok_or_else(|| CoreError::UserNotFound(username.to_string()))
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> CoreResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await.map_err(db_err)?;
        Ok(Box::new(PgTx { tx: Some(tx) }))
    }
}

/// Open database transaction. sqlx rolls it back when dropped uncommitted.
pub struct PgTx {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgTx {
    fn conn(&mut self) -> CoreResult<&mut PgConnection> {
        self.tx
            .as_mut()
            .map(|tx| &mut **tx)
            .ok_or_else(|| CoreError::Storage("transaction already committed".to_string()))
    }

    async fn fetch_flight(&mut self, sql: &str, id: i64) -> CoreResult<Option<Flight>> {
        let row = sqlx::query_as::<_, FlightRow>(sql)
            .bind(id)
            .fetch_optional(self.conn()?)
            .await
            .map_err(db_err)?;
        convert_opt(row)
    }

    async fn fetch_tickets(&mut self, sql: &str, ids: Vec<i64>) -> CoreResult<Vec<Ticket>> {
        let rows = sqlx::query_as::<_, TicketRow>(sql)
            .bind(ids)
            .fetch_all(self.conn()?)
            .await
            .map_err(db_err)?;
        convert_all(rows)
    }

    async fn fetch_booking(&mut self, sql: &str, id: i64) -> CoreResult<Option<Booking>> {
        let row = sqlx::query_as::<_, BookingRow>(sql)
            .bind(id)
            .fetch_optional(self.conn()?)
            .await
            .map_err(db_err)?;
        convert_opt(row)
    }

    async fn fetch_payment(&mut self, sql: &str, id: i64) -> CoreResult<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(sql)
            .bind(id)
            .fetch_optional(self.conn()?)
            .await
            .map_err(db_err)?;
        convert_opt(row)
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn airplane(&mut self, id: AirplaneId) -> CoreResult<Option<Airplane>> {
        let row = sqlx::query_as::<_, AirplaneRow>(
            "SELECT id, model, seat_capacity, airline FROM airplane WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(self.conn()?)
        .await
        .map_err(db_err)?;
        Ok(row.map(Airplane::from))
    }

    async fn ticket_types(&mut self) -> CoreResult<Vec<TicketType>> {
        let rows = sqlx::query_as::<_, TicketTypeRow>(
            "SELECT id, name, price_multiplier FROM ticket_type ORDER BY id",
        )
        .fetch_all(self.conn()?)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(TicketType::from).collect())
    }

    async fn flight(&mut self, id: FlightId) -> CoreResult<Option<Flight>> {
        let sql = format!("SELECT {} FROM flight WHERE id = $1", FLIGHT_COLUMNS);
        self.fetch_flight(&sql, id.0).await
    }

    async fn lock_flight(&mut self, id: FlightId) -> CoreResult<Option<Flight>> {
        let sql = format!("SELECT {} FROM flight WHERE id = $1 FOR UPDATE", FLIGHT_COLUMNS);
        self.fetch_flight(&sql, id.0).await
    }

    async fn lock_flights_shared(&mut self, ids: &[FlightId]) -> CoreResult<Vec<Flight>> {
        let sql = format!(
            "SELECT {} FROM flight WHERE id = ANY($1) ORDER BY id FOR SHARE",
            FLIGHT_COLUMNS
        );
        let rows = sqlx::query_as::<_, FlightRow>(&sql)
            .bind(flight_ids(ids))
            .fetch_all(self.conn()?)
            .await
            .map_err(db_err)?;
        convert_all(rows)
    }

    async fn insert_flight(&mut self, flight: &NewFlight) -> CoreResult<Flight> {
        let sql = format!(
            r#"
            INSERT INTO flight (airplane_id, departure_airport_id, arrival_airport_id,
                                departure_time, arrival_time, base_price, status)
            VALUES ($1, $2, $3, $4, $5, $6, 'SCHEDULED')
            RETURNING {}
            "#,
            FLIGHT_COLUMNS
        );
        let row = sqlx::query_as::<_, FlightRow>(&sql)
            .bind(flight.airplane_id.0)
            .bind(flight.departure_airport_id.0)
            .bind(flight.arrival_airport_id.0)
            .bind(flight.departure_time)
            .bind(flight.arrival_time)
            .bind(flight.base_price)
            .fetch_one(self.conn()?)
            .await
            .map_err(db_err)?;
        Flight::try_from(row)
    }

    async fn set_flight_status(&mut self, id: FlightId, status: FlightStatus) -> CoreResult<Flight> {
        let sql = format!(
            "UPDATE flight SET status = $1, updated_at = NOW() WHERE id = $2 RETURNING {}",
            FLIGHT_COLUMNS
        );
        let row = sqlx::query_as::<_, FlightRow>(&sql)
            .bind(status.as_str())
            .bind(id.0)
            .fetch_optional(self.conn()?)
            .await
            .map_err(db_err)?
            .ok_or(CoreError::FlightNotFound(id))?;
        Flight::try_from(row)
    }

    async fn delete_flight(&mut self, id: FlightId) -> CoreResult<()> {
        sqlx::query("DELETE FROM flight WHERE id = $1")
            .bind(id.0)
            .execute(self.conn()?)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn tickets(&mut self, ids: &[TicketId]) -> CoreResult<Vec<Ticket>> {
        let sql = format!(
            "SELECT {} FROM ticket WHERE id = ANY($1) ORDER BY id",
            TICKET_COLUMNS
        );
        self.fetch_tickets(&sql, ticket_ids(ids)).await
    }

    async fn lock_tickets(&mut self, ids: &[TicketId]) -> CoreResult<Vec<Ticket>> {
        let sql = format!(
            "SELECT {} FROM ticket WHERE id = ANY($1) ORDER BY id FOR UPDATE",
            TICKET_COLUMNS
        );
        self.fetch_tickets(&sql, ticket_ids(ids)).await
    }

    async fn flight_tickets(&mut self, flight_id: FlightId) -> CoreResult<Vec<Ticket>> {
        let sql = format!(
            "SELECT {} FROM ticket WHERE flight_id = $1 ORDER BY id",
            TICKET_COLUMNS
        );
        let rows = sqlx::query_as::<_, TicketRow>(&sql)
            .bind(flight_id.0)
            .fetch_all(self.conn()?)
            .await
            .map_err(db_err)?;
        convert_all(rows)
    }

    async fn lock_flight_tickets(
        &mut self,
        flight_id: FlightId,
        statuses: &[TicketStatus],
    ) -> CoreResult<Vec<Ticket>> {
        let sql = format!(
            "SELECT {} FROM ticket WHERE flight_id = $1 AND status = ANY($2) ORDER BY id FOR UPDATE",
            TICKET_COLUMNS
        );
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let rows = sqlx::query_as::<_, TicketRow>(&sql)
            .bind(flight_id.0)
            .bind(statuses)
            .fetch_all(self.conn()?)
            .await
            .map_err(db_err)?;
        convert_all(rows)
    }

    async fn insert_tickets(&mut self, tickets: &[NewTicket]) -> CoreResult<u64> {
        let flights: Vec<i64> = tickets.iter().map(|t| t.flight_id.0).collect();
        let seats: Vec<String> = tickets.iter().map(|t| t.seat_number.clone()).collect();
        let types: Vec<i64> = tickets.iter().map(|t| t.ticket_type_id.0).collect();
        let result = sqlx::query(
            r#"
            INSERT INTO ticket (flight_id, seat_number, ticket_type_id)
            SELECT * FROM UNNEST($1::BIGINT[], $2::VARCHAR[], $3::BIGINT[])
            ON CONFLICT ON CONSTRAINT ticket_seat_unique DO NOTHING
            "#,
        )
        .bind(flights)
        .bind(seats)
        .bind(types)
        .execute(self.conn()?)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn set_ticket_status(&mut self, ids: &[TicketId], status: TicketStatus) -> CoreResult<()> {
        sqlx::query("UPDATE ticket SET status = $1, updated_at = NOW() WHERE id = ANY($2)")
            .bind(status.as_str())
            .bind(ticket_ids(ids))
            .execute(self.conn()?)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn delete_flight_tickets(&mut self, flight_id: FlightId) -> CoreResult<u64> {
        let result = sqlx::query("DELETE FROM ticket WHERE flight_id = $1")
            .bind(flight_id.0)
            .execute(self.conn()?)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn booking(&mut self, id: BookingId) -> CoreResult<Option<Booking>> {
        let sql = format!("SELECT {} FROM booking WHERE id = $1", BOOKING_COLUMNS);
        self.fetch_booking(&sql, id.0).await
    }

    async fn lock_booking(&mut self, id: BookingId) -> CoreResult<Option<Booking>> {
        let sql = format!("SELECT {} FROM booking WHERE id = $1 FOR UPDATE", BOOKING_COLUMNS);
        self.fetch_booking(&sql, id.0).await
    }

    async fn bookings_for_user(&mut self, user_id: UserId) -> CoreResult<Vec<Booking>> {
        let sql = format!(
            "SELECT {} FROM booking WHERE user_id = $1 ORDER BY id",
            BOOKING_COLUMNS
        );
        let rows = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(user_id.0)
            .fetch_all(self.conn()?)
            .await
            .map_err(db_err)?;
        convert_all(rows)
    }

    async fn bookings_by_status(&mut self, status: BookingStatus) -> CoreResult<Vec<Booking>> {
        let sql = format!(
            "SELECT {} FROM booking WHERE status = $1 ORDER BY id",
            BOOKING_COLUMNS
        );
        let rows = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(status.as_str())
            .fetch_all(self.conn()?)
            .await
            .map_err(db_err)?;
        convert_all(rows)
    }

    async fn insert_booking(&mut self, booking: &NewBooking) -> CoreResult<Booking> {
        let sql = format!(
            "INSERT INTO booking (user_id, booking_date, total_amount, status) \
             VALUES ($1, $2, 0, 'PENDING') RETURNING {}",
            BOOKING_COLUMNS
        );
        let row = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(booking.user_id.0)
            .bind(booking.booking_date)
            .fetch_one(self.conn()?)
            .await
            .map_err(db_err)?;
        Booking::try_from(row)
    }

    async fn update_booking(&mut self, booking: &Booking) -> CoreResult<Booking> {
        let sql = format!(
            "UPDATE booking SET booking_date = $1, total_amount = $2, status = $3, \
             updated_at = NOW() WHERE id = $4 RETURNING {}",
            BOOKING_COLUMNS
        );
        let row = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(booking.booking_date)
            .bind(booking.total_amount)
            .bind(booking.status.as_str())
            .bind(booking.id.0)
            .fetch_optional(self.conn()?)
            .await
            .map_err(db_err)?
            .ok_or(CoreError::BookingNotFound(booking.id))?;
        Booking::try_from(row)
    }

    async fn delete_booking(&mut self, id: BookingId) -> CoreResult<()> {
        // booking_ticket and payment rows go with it (ON DELETE CASCADE)
        sqlx::query("DELETE FROM booking WHERE id = $1")
            .bind(id.0)
            .execute(self.conn()?)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn link_tickets(&mut self, booking_id: BookingId, ids: &[TicketId]) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO booking_ticket (booking_id, ticket_id) \
             SELECT $1, UNNEST($2::BIGINT[]) ON CONFLICT DO NOTHING",
        )
        .bind(booking_id.0)
        .bind(ticket_ids(ids))
        .execute(self.conn()?)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn booking_ticket_ids(&mut self, booking_id: BookingId) -> CoreResult<Vec<TicketId>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT ticket_id FROM booking_ticket WHERE booking_id = $1 ORDER BY ticket_id",
        )
        .bind(booking_id.0)
        .fetch_all(self.conn()?)
        .await
        .map_err(db_err)?;
        Ok(ids.into_iter().map(TicketId).collect())
    }

    async fn lock_active_bookings_holding(
        &mut self,
        ids: &[TicketId],
    ) -> CoreResult<Vec<Booking>> {
        let sql = format!(
            r#"
            SELECT {} FROM booking
            WHERE status <> 'CANCELED'
              AND id IN (SELECT booking_id FROM booking_ticket WHERE ticket_id = ANY($1))
            ORDER BY id
            FOR UPDATE
            "#,
            BOOKING_COLUMNS
        );
        let rows = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(ticket_ids(ids))
            .fetch_all(self.conn()?)
            .await
            .map_err(db_err)?;
        convert_all(rows)
    }

    async fn payment(&mut self, id: PaymentId) -> CoreResult<Option<Payment>> {
        let sql = format!("SELECT {} FROM payment WHERE id = $1", PAYMENT_COLUMNS);
        self.fetch_payment(&sql, id.0).await
    }

    async fn lock_payment(&mut self, id: PaymentId) -> CoreResult<Option<Payment>> {
        let sql = format!("SELECT {} FROM payment WHERE id = $1 FOR UPDATE", PAYMENT_COLUMNS);
        self.fetch_payment(&sql, id.0).await
    }

    async fn payment_by_transaction_id(&mut self, transaction_id: &str) -> CoreResult<Option<Payment>> {
        let sql = format!(
            "SELECT {} FROM payment WHERE transaction_id = $1",
            PAYMENT_COLUMNS
        );
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(transaction_id)
            .fetch_optional(self.conn()?)
            .await
            .map_err(db_err)?;
        convert_opt(row)
    }

    async fn payments_for_booking(&mut self, booking_id: BookingId) -> CoreResult<Vec<Payment>> {
        let sql = format!(
            "SELECT {} FROM payment WHERE booking_id = $1 ORDER BY id",
            PAYMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(booking_id.0)
            .fetch_all(self.conn()?)
            .await
            .map_err(db_err)?;
        convert_all(rows)
    }

    async fn pending_payments_before(&mut self, threshold: DateTime<Utc>) -> CoreResult<Vec<Payment>> {
        let sql = format!(
            "SELECT {} FROM payment WHERE status = 'PENDING' AND created_at < $1 ORDER BY id",
            PAYMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(threshold)
            .fetch_all(self.conn()?)
            .await
            .map_err(db_err)?;
        convert_all(rows)
    }

    async fn insert_payment(&mut self, payment: &NewPayment) -> CoreResult<Payment> {
        let sql = format!(
            "INSERT INTO payment (booking_id, amount, transaction_id, method, status) \
             VALUES ($1, $2, $3, $4, 'PENDING') RETURNING {}",
            PAYMENT_COLUMNS
        );
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(payment.booking_id.0)
            .bind(payment.amount)
            .bind(payment.transaction_id.as_str())
            .bind(payment.method.as_str())
            .fetch_one(self.conn()?)
            .await
            .map_err(|e| match constraint_of(&e) {
                Some("payment_transaction_id_key") => {
                    CoreError::DuplicateTransactionId(payment.transaction_id.clone())
                }
                Some("payment_booking_id_fkey") => CoreError::BookingNotFound(payment.booking_id),
                _ => db_err(e),
            })?;
        Payment::try_from(row)
    }

    async fn update_payment(&mut self, payment: &Payment) -> CoreResult<Payment> {
        let sql = format!(
            "UPDATE payment SET status = $1, paid_at = $2, updated_at = NOW() \
             WHERE id = $3 RETURNING {}",
            PAYMENT_COLUMNS
        );
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(payment.status.as_str())
            .bind(payment.paid_at)
            .bind(payment.id.0)
            .fetch_optional(self.conn()?)
            .await
            .map_err(|e| match constraint_of(&e) {
                Some("payment_one_success_per_booking") => CoreError::IdempotencyViolation {
                    booking_id: payment.booking_id,
                    current_status: PaymentStatus::Success,
                },
                _ => db_err(e),
            })?
            .ok_or(CoreError::PaymentNotFound(payment.id))?;
        Payment::try_from(row)
    }

    async fn commit(&mut self) -> CoreResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| CoreError::Storage("transaction already committed".to_string()))?;
        tx.commit().await.map_err(db_err)
    }
}
