//! PostgreSQL store
//!
//! Each unit of work wraps one `sqlx` transaction. Rows read through
//! `lock_*` are selected `FOR UPDATE`, and idempotent inserts rely on unique
//! constraints with `ON CONFLICT DO NOTHING` so that concurrent deliveries of
//! the same event serialise on the index rather than double-apply.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use shared::models::{
    AlertType, Allocation, DeliveryNote, DeliveryNoteFilter, MovementFilter, NewDeliveryNote,
    NewMovement, NewNotification, NewPartnerRebate, NewPayment, NewRoyalty, NewStockAlert, Order,
    OrderLine, OrderPaymentUpdate, OrderStatus, Payment, RateRule, StockAlert, StockMovement,
    UnknownVariant, ValidationDetails, Withdrawal, WithdrawalKind, Work,
};
use shared::Pagination;
use sqlx::{postgres::PgPool, FromRow, Postgres, Transaction};
use uuid::Uuid;

use super::{Store, StoreError, StoreResult, UnitOfWork};

#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &PgPool {
        &self.db
    }
}

fn corrupt(err: UnknownVariant) -> StoreError {
    StoreError::Corrupt(err.to_string())
}

/// Map unique violations to [`StoreError::UniqueViolation`]
fn classify(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            let constraint = db_err.constraint().unwrap_or("unique").to_string();
            return StoreError::UniqueViolation(constraint);
        }
    }
    StoreError::Database(err)
}

// ============================================================================
// Row mapping
// ============================================================================

const WORK_COLUMNS: &str = "id, title, isbn, author_id, price, stock, physical_stock, \
     min_stock, max_stock, updated_at";

const MOVEMENT_COLUMNS: &str = "id, work_id, movement_type, source, quantity, applied_delta, \
     reason, reference, performed_by, is_correction, partner_id, unit_price, created_at";

const ALLOCATION_COLUMNS: &str = "id, partner_id, work_id, allocated_quantity, sold_quantity, \
     returned_quantity, created_at, updated_at";

const ALERT_COLUMNS: &str =
    "id, work_id, alert_type, severity, message, is_resolved, resolved_at, created_at";

const ORDER_COLUMNS: &str = "id, user_id, partner_id, status, payment_status, payment_reference, \
     total, amount_paid, remaining_amount, full_payment_date, created_at";

const NOTE_COLUMNS: &str = "id, reference, order_id, status, period, notes, generated_by, \
     validated_by, validated_at, controlled_by, controlled_at, completed_at, cancelled_at, \
     reason, destination, book_condition, transport, planned_date, created_at, updated_at";

const RATE_COLUMNS: &str =
    "id, kind, scope, scope_id, rate, is_active, valid_from, valid_until, created_at";

const WITHDRAWAL_COLUMNS: &str =
    "id, kind, user_id, amount, status, rejection_reason, paid_at, payout_reference";

#[derive(FromRow)]
struct WorkRow {
    id: Uuid,
    title: String,
    isbn: Option<String>,
    author_id: Option<Uuid>,
    price: Decimal,
    stock: i32,
    physical_stock: i32,
    min_stock: i32,
    max_stock: Option<i32>,
    updated_at: DateTime<Utc>,
}

impl From<WorkRow> for Work {
    fn from(row: WorkRow) -> Self {
        Work {
            id: row.id,
            title: row.title,
            isbn: row.isbn,
            author_id: row.author_id,
            price: row.price,
            stock: row.stock,
            physical_stock: row.physical_stock,
            min_stock: row.min_stock,
            max_stock: row.max_stock,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct MovementRow {
    id: Uuid,
    work_id: Uuid,
    movement_type: String,
    source: String,
    quantity: i32,
    applied_delta: i32,
    reason: Option<String>,
    reference: Option<String>,
    performed_by: Option<Uuid>,
    is_correction: bool,
    partner_id: Option<Uuid>,
    unit_price: Option<Decimal>,
    created_at: DateTime<Utc>,
}

impl TryFrom<MovementRow> for StockMovement {
    type Error = StoreError;

    fn try_from(row: MovementRow) -> Result<Self, Self::Error> {
        Ok(StockMovement {
            id: row.id,
            work_id: row.work_id,
            movement_type: row.movement_type.parse().map_err(corrupt)?,
            source: row.source.parse().map_err(corrupt)?,
            quantity: row.quantity,
            applied_delta: row.applied_delta,
            reason: row.reason,
            reference: row.reference,
            performed_by: row.performed_by,
            is_correction: row.is_correction,
            partner_id: row.partner_id,
            unit_price: row.unit_price,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct AllocationRow {
    id: Uuid,
    partner_id: Uuid,
    work_id: Uuid,
    allocated_quantity: i32,
    sold_quantity: i32,
    returned_quantity: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<AllocationRow> for Allocation {
    fn from(row: AllocationRow) -> Self {
        Allocation {
            id: row.id,
            partner_id: row.partner_id,
            work_id: row.work_id,
            allocated_quantity: row.allocated_quantity,
            sold_quantity: row.sold_quantity,
            returned_quantity: row.returned_quantity,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct AlertRow {
    id: Uuid,
    work_id: Uuid,
    alert_type: String,
    severity: String,
    message: String,
    is_resolved: bool,
    resolved_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<AlertRow> for StockAlert {
    type Error = StoreError;

    fn try_from(row: AlertRow) -> Result<Self, Self::Error> {
        Ok(StockAlert {
            id: row.id,
            work_id: row.work_id,
            alert_type: row.alert_type.parse().map_err(corrupt)?,
            severity: row.severity.parse().map_err(corrupt)?,
            message: row.message,
            is_resolved: row.is_resolved,
            resolved_at: row.resolved_at,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct OrderRow {
    id: Uuid,
    user_id: Uuid,
    partner_id: Option<Uuid>,
    status: String,
    payment_status: String,
    payment_reference: Option<String>,
    total: Decimal,
    amount_paid: Decimal,
    remaining_amount: Decimal,
    full_payment_date: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct OrderLineRow {
    work_id: Uuid,
    quantity: i32,
    unit_price: Decimal,
    author_id: Option<Uuid>,
}

impl OrderRow {
    fn into_order(self, lines: Vec<OrderLineRow>) -> StoreResult<Order> {
        Ok(Order {
            id: self.id,
            user_id: self.user_id,
            partner_id: self.partner_id,
            status: self.status.parse().map_err(corrupt)?,
            payment_status: self.payment_status.parse().map_err(corrupt)?,
            payment_reference: self.payment_reference,
            total: self.total,
            amount_paid: self.amount_paid,
            remaining_amount: self.remaining_amount,
            full_payment_date: self.full_payment_date,
            lines: lines
                .into_iter()
                .map(|l| OrderLine {
                    work_id: l.work_id,
                    quantity: l.quantity,
                    unit_price: l.unit_price,
                    author_id: l.author_id,
                })
                .collect(),
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct NoteRow {
    id: Uuid,
    reference: String,
    order_id: Uuid,
    status: String,
    period: Option<String>,
    notes: Option<String>,
    generated_by: Uuid,
    validated_by: Option<Uuid>,
    validated_at: Option<DateTime<Utc>>,
    controlled_by: Option<Uuid>,
    controlled_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    reason: Option<String>,
    destination: Option<String>,
    book_condition: Option<String>,
    transport: Option<String>,
    planned_date: Option<NaiveDate>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<NoteRow> for DeliveryNote {
    type Error = StoreError;

    fn try_from(row: NoteRow) -> Result<Self, Self::Error> {
        Ok(DeliveryNote {
            id: row.id,
            reference: row.reference,
            order_id: row.order_id,
            status: row.status.parse().map_err(corrupt)?,
            period: row.period,
            notes: row.notes,
            generated_by: row.generated_by,
            validated_by: row.validated_by,
            validated_at: row.validated_at,
            controlled_by: row.controlled_by,
            controlled_at: row.controlled_at,
            completed_at: row.completed_at,
            cancelled_at: row.cancelled_at,
            validation: ValidationDetails {
                reason: row.reason,
                destination: row.destination,
                book_condition: row.book_condition,
                transport: row.transport,
                planned_date: row.planned_date,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct RateRow {
    id: Uuid,
    kind: String,
    scope: String,
    scope_id: Option<Uuid>,
    rate: Decimal,
    is_active: bool,
    valid_from: Option<DateTime<Utc>>,
    valid_until: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<RateRow> for RateRule {
    type Error = StoreError;

    fn try_from(row: RateRow) -> Result<Self, Self::Error> {
        Ok(RateRule {
            id: row.id,
            kind: row.kind.parse().map_err(corrupt)?,
            scope: row.scope.parse().map_err(corrupt)?,
            scope_id: row.scope_id,
            rate: row.rate,
            is_active: row.is_active,
            valid_from: row.valid_from,
            valid_until: row.valid_until,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct WithdrawalRow {
    id: Uuid,
    kind: String,
    user_id: Uuid,
    amount: Decimal,
    status: String,
    rejection_reason: Option<String>,
    paid_at: Option<DateTime<Utc>>,
    payout_reference: Option<String>,
}

impl TryFrom<WithdrawalRow> for Withdrawal {
    type Error = StoreError;

    fn try_from(row: WithdrawalRow) -> Result<Self, Self::Error> {
        Ok(Withdrawal {
            id: row.id,
            kind: row.kind.parse().map_err(corrupt)?,
            user_id: row.user_id,
            amount: row.amount,
            status: row.status.parse().map_err(corrupt)?,
            rejection_reason: row.rejection_reason,
            paid_at: row.paid_at,
            payout_reference: row.payout_reference,
        })
    }
}

fn collect<R, T>(rows: Vec<R>) -> StoreResult<Vec<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// `ILIKE` pattern for a free-text search
fn like_pattern(search: Option<&str>) -> Option<String> {
    search
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{}%", s.replace('%', "\\%").replace('_', "\\_")))
}

// ============================================================================
// Store
// ============================================================================

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        let tx = self.db.begin().await?;
        Ok(Box::new(PgUnit { tx }))
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.db).await?;
        Ok(())
    }

    async fn list_works(&self) -> StoreResult<Vec<Work>> {
        let rows = sqlx::query_as::<_, WorkRow>(&format!(
            "SELECT {} FROM works ORDER BY title, id",
            WORK_COLUMNS
        ))
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(Work::from).collect())
    }

    async fn list_movements(
        &self,
        filter: &MovementFilter,
        limit: i64,
    ) -> StoreResult<Vec<StockMovement>> {
        let rows = sqlx::query_as::<_, MovementRow>(&format!(
            r#"
            SELECT {}
            FROM stock_movements
            WHERE ($1::uuid IS NULL OR work_id = $1)
              AND ($2::text IS NULL OR movement_type = $2)
              AND ($3::timestamptz IS NULL OR created_at >= $3)
            ORDER BY created_at DESC
            LIMIT $4
            "#,
            MOVEMENT_COLUMNS
        ))
        .bind(filter.work_id)
        .bind(filter.movement_type.map(|t| t.as_str()))
        .bind(filter.since)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;
        collect(rows)
    }

    async fn outbound_quantity_since(&self, since: DateTime<Utc>) -> StoreResult<i64> {
        let total: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT SUM(quantity)::bigint
            FROM stock_movements
            WHERE movement_type = 'OUTBOUND' AND created_at >= $1
            "#,
        )
        .bind(since)
        .fetch_one(&self.db)
        .await?;
        Ok(total.unwrap_or(0))
    }

    async fn list_alerts(&self, include_resolved: bool) -> StoreResult<Vec<StockAlert>> {
        let rows = sqlx::query_as::<_, AlertRow>(&format!(
            r#"
            SELECT {}
            FROM stock_alerts
            WHERE $1 OR is_resolved = FALSE
            ORDER BY (severity = 'ERROR') DESC, created_at DESC
            "#,
            ALERT_COLUMNS
        ))
        .bind(include_resolved)
        .fetch_all(&self.db)
        .await?;
        collect(rows)
    }

    async fn list_allocations(&self, partner_id: Option<Uuid>) -> StoreResult<Vec<Allocation>> {
        let rows = sqlx::query_as::<_, AllocationRow>(&format!(
            r#"
            SELECT {}
            FROM partner_allocations
            WHERE ($1::uuid IS NULL OR partner_id = $1)
            ORDER BY updated_at DESC
            "#,
            ALLOCATION_COLUMNS
        ))
        .bind(partner_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(Allocation::from).collect())
    }

    async fn get_order(&self, id: Uuid) -> StoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE id = $1",
            ORDER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let lines = sqlx::query_as::<_, OrderLineRow>(ORDER_LINES_SQL)
            .bind(id)
            .fetch_all(&self.db)
            .await?;
        row.into_order(lines).map(Some)
    }

    async fn orders_missing_delivery_note(
        &self,
        statuses: &[OrderStatus],
    ) -> StoreResult<Vec<Uuid>> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT o.id
            FROM orders o
            WHERE o.status = ANY($1)
              AND NOT EXISTS (SELECT 1 FROM delivery_notes dn WHERE dn.order_id = o.id)
            ORDER BY o.created_at, o.id
            "#,
        )
        .bind(statuses)
        .fetch_all(&self.db)
        .await?;
        Ok(ids)
    }

    async fn get_delivery_note(&self, id: Uuid) -> StoreResult<Option<DeliveryNote>> {
        let row = sqlx::query_as::<_, NoteRow>(&format!(
            "SELECT {} FROM delivery_notes WHERE id = $1",
            NOTE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        row.map(DeliveryNote::try_from).transpose()
    }

    async fn list_delivery_notes(
        &self,
        filter: &DeliveryNoteFilter,
        pagination: Pagination,
    ) -> StoreResult<(Vec<DeliveryNote>, i64)> {
        let status = filter.status.map(|s| s.as_str());
        let search = like_pattern(filter.search.as_deref());

        let rows = sqlx::query_as::<_, NoteRow>(&format!(
            r#"
            SELECT {}
            FROM delivery_notes
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR period = $2)
              AND ($3::text IS NULL OR reference ILIKE $3 OR notes ILIKE $3)
            ORDER BY created_at DESC
            LIMIT $4 OFFSET $5
            "#,
            NOTE_COLUMNS
        ))
        .bind(status)
        .bind(filter.period.as_deref())
        .bind(search.as_deref())
        .bind(i64::from(pagination.limit))
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM delivery_notes
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR period = $2)
              AND ($3::text IS NULL OR reference ILIKE $3 OR notes ILIKE $3)
            "#,
        )
        .bind(status)
        .bind(filter.period.as_deref())
        .bind(search.as_deref())
        .fetch_one(&self.db)
        .await?;

        Ok((collect(rows)?, total))
    }
}

const ORDER_LINES_SQL: &str = r#"
    SELECT oi.work_id, oi.quantity, oi.price AS unit_price, w.author_id
    FROM order_items oi
    JOIN works w ON w.id = oi.work_id
    WHERE oi.order_id = $1
    ORDER BY oi.id
"#;

// ============================================================================
// Unit of work
// ============================================================================

struct PgUnit {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnit {
    async fn lock_work(&mut self, id: Uuid) -> StoreResult<Option<Work>> {
        let row = sqlx::query_as::<_, WorkRow>(&format!(
            "SELECT {} FROM works WHERE id = $1 FOR UPDATE",
            WORK_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(Work::from))
    }

    async fn set_work_stock(
        &mut self,
        id: Uuid,
        stock: i32,
        physical_stock: i32,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE works SET stock = $2, physical_stock = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(stock)
        .bind(physical_stock)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_movement(&mut self, movement: NewMovement) -> StoreResult<StockMovement> {
        let row = sqlx::query_as::<_, MovementRow>(&format!(
            r#"
            INSERT INTO stock_movements (
                id, work_id, movement_type, source, quantity, applied_delta, reason,
                reference, performed_by, is_correction, partner_id, unit_price
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {}
            "#,
            MOVEMENT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(movement.work_id)
        .bind(movement.movement_type.as_str())
        .bind(movement.source.as_str())
        .bind(movement.quantity)
        .bind(movement.applied_delta)
        .bind(movement.reason)
        .bind(movement.reference)
        .bind(movement.performed_by)
        .bind(movement.is_correction)
        .bind(movement.partner_id)
        .bind(movement.unit_price)
        .fetch_one(&mut *self.tx)
        .await?;
        row.try_into()
    }

    async fn lock_movement(&mut self, id: Uuid) -> StoreResult<Option<StockMovement>> {
        let row = sqlx::query_as::<_, MovementRow>(&format!(
            "SELECT {} FROM stock_movements WHERE id = $1 FOR UPDATE",
            MOVEMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(StockMovement::try_from).transpose()
    }

    async fn delete_movement(&mut self, id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM stock_movements WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn lock_allocation(
        &mut self,
        partner_id: Uuid,
        work_id: Uuid,
    ) -> StoreResult<Option<Allocation>> {
        let row = sqlx::query_as::<_, AllocationRow>(&format!(
            r#"
            SELECT {}
            FROM partner_allocations
            WHERE partner_id = $1 AND work_id = $2
            FOR UPDATE
            "#,
            ALLOCATION_COLUMNS
        ))
        .bind(partner_id)
        .bind(work_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(Allocation::from))
    }

    async fn save_allocation(&mut self, allocation: &Allocation) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO partner_allocations (
                id, partner_id, work_id, allocated_quantity, sold_quantity,
                returned_quantity, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (partner_id, work_id) DO UPDATE SET
                allocated_quantity = EXCLUDED.allocated_quantity,
                sold_quantity = EXCLUDED.sold_quantity,
                returned_quantity = EXCLUDED.returned_quantity,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(allocation.id)
        .bind(allocation.partner_id)
        .bind(allocation.work_id)
        .bind(allocation.allocated_quantity)
        .bind(allocation.sold_quantity)
        .bind(allocation.returned_quantity)
        .bind(allocation.created_at)
        .bind(allocation.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn all_works(&mut self) -> StoreResult<Vec<Work>> {
        let rows = sqlx::query_as::<_, WorkRow>(&format!(
            "SELECT {} FROM works ORDER BY id",
            WORK_COLUMNS
        ))
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(Work::from).collect())
    }

    async fn unresolved_alerts(&mut self, work_ids: &[Uuid]) -> StoreResult<Vec<StockAlert>> {
        let rows = sqlx::query_as::<_, AlertRow>(&format!(
            r#"
            SELECT {}
            FROM stock_alerts
            WHERE is_resolved = FALSE AND work_id = ANY($1)
            "#,
            ALERT_COLUMNS
        ))
        .bind(work_ids)
        .fetch_all(&mut *self.tx)
        .await?;
        collect(rows)
    }

    async fn resolve_alerts(
        &mut self,
        alert_type: AlertType,
        work_ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE stock_alerts
            SET is_resolved = TRUE, resolved_at = $1
            WHERE alert_type = $2 AND work_id = ANY($3) AND is_resolved = FALSE
            "#,
        )
        .bind(at)
        .bind(alert_type.as_str())
        .bind(work_ids)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn insert_alerts(&mut self, alerts: &[NewStockAlert]) -> StoreResult<u64> {
        if alerts.is_empty() {
            return Ok(0);
        }

        let ids: Vec<Uuid> = alerts.iter().map(|_| Uuid::new_v4()).collect();
        let work_ids: Vec<Uuid> = alerts.iter().map(|a| a.work_id).collect();
        let types: Vec<&str> = alerts.iter().map(|a| a.alert_type.as_str()).collect();
        let severities: Vec<&str> = alerts.iter().map(|a| a.severity.as_str()).collect();
        let messages: Vec<&str> = alerts.iter().map(|a| a.message.as_str()).collect();

        // the partial unique index on unresolved (work_id, alert_type) absorbs duplicates
        let result = sqlx::query(
            r#"
            INSERT INTO stock_alerts (id, work_id, alert_type, severity, message)
            SELECT * FROM UNNEST($1::uuid[], $2::uuid[], $3::text[], $4::text[], $5::text[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&ids)
        .bind(&work_ids)
        .bind(&types)
        .bind(&severities)
        .bind(&messages)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn lock_order(&mut self, id: Uuid) -> StoreResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE id = $1 FOR UPDATE",
            ORDER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let lines = sqlx::query_as::<_, OrderLineRow>(ORDER_LINES_SQL)
            .bind(id)
            .fetch_all(&mut *self.tx)
            .await?;
        row.into_order(lines).map(Some)
    }

    async fn update_order_payment(
        &mut self,
        id: Uuid,
        update: &OrderPaymentUpdate,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE orders SET
                status = $2,
                payment_status = $3,
                payment_reference = COALESCE($4, payment_reference),
                amount_paid = COALESCE($5, amount_paid),
                remaining_amount = COALESCE($6, remaining_amount),
                full_payment_date = COALESCE($7, full_payment_date),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(update.status.as_str())
        .bind(update.payment_status.as_str())
        .bind(update.payment_reference.as_deref())
        .bind(update.amount_paid)
        .bind(update.remaining_amount)
        .bind(update.full_payment_date)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_payment(&mut self, payment: NewPayment) -> StoreResult<Payment> {
        let id = Uuid::new_v4();
        let paid_at: DateTime<Utc> = sqlx::query_scalar(
            r#"
            INSERT INTO payments (id, order_id, amount, payment_method, payment_reference, recorded_by)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING paid_at
            "#,
        )
        .bind(id)
        .bind(payment.order_id)
        .bind(payment.amount)
        .bind(&payment.payment_method)
        .bind(&payment.payment_reference)
        .bind(payment.recorded_by)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(Payment {
            id,
            order_id: payment.order_id,
            amount: payment.amount,
            payment_method: payment.payment_method,
            payment_reference: payment.payment_reference,
            paid_at,
            recorded_by: payment.recorded_by,
        })
    }

    async fn delivery_note_for_order(
        &mut self,
        order_id: Uuid,
    ) -> StoreResult<Option<DeliveryNote>> {
        let row = sqlx::query_as::<_, NoteRow>(&format!(
            "SELECT {} FROM delivery_notes WHERE order_id = $1",
            NOTE_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(DeliveryNote::try_from).transpose()
    }

    async fn count_delivery_notes_with_prefix(&mut self, prefix: &str) -> StoreResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM delivery_notes WHERE reference LIKE $1")
                .bind(format!("{}%", prefix))
                .fetch_one(&mut *self.tx)
                .await?;
        Ok(count)
    }

    async fn insert_delivery_note(&mut self, note: NewDeliveryNote) -> StoreResult<DeliveryNote> {
        let row = sqlx::query_as::<_, NoteRow>(&format!(
            r#"
            INSERT INTO delivery_notes (id, reference, order_id, status, period, notes, generated_by)
            VALUES ($1, $2, $3, 'PENDING', $4, $5, $6)
            RETURNING {}
            "#,
            NOTE_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&note.reference)
        .bind(note.order_id)
        .bind(note.period.as_deref())
        .bind(note.notes.as_deref())
        .bind(note.generated_by)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(classify)?;
        row.try_into()
    }

    async fn lock_delivery_note(&mut self, id: Uuid) -> StoreResult<Option<DeliveryNote>> {
        let row = sqlx::query_as::<_, NoteRow>(&format!(
            "SELECT {} FROM delivery_notes WHERE id = $1 FOR UPDATE",
            NOTE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(DeliveryNote::try_from).transpose()
    }

    async fn update_delivery_note(&mut self, note: &DeliveryNote) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE delivery_notes SET
                status = $2,
                validated_by = $3,
                validated_at = $4,
                controlled_by = $5,
                controlled_at = $6,
                completed_at = $7,
                cancelled_at = $8,
                reason = $9,
                destination = $10,
                book_condition = $11,
                transport = $12,
                planned_date = $13,
                updated_at = $14
            WHERE id = $1
            "#,
        )
        .bind(note.id)
        .bind(note.status.as_str())
        .bind(note.validated_by)
        .bind(note.validated_at)
        .bind(note.controlled_by)
        .bind(note.controlled_at)
        .bind(note.completed_at)
        .bind(note.cancelled_at)
        .bind(note.validation.reason.as_deref())
        .bind(note.validation.destination.as_deref())
        .bind(note.validation.book_condition.as_deref())
        .bind(note.validation.transport.as_deref())
        .bind(note.validation.planned_date)
        .bind(note.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn claim_idempotency_key(&mut self, key: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO processed_events (key) VALUES ($1) ON CONFLICT (key) DO NOTHING",
        )
        .bind(key)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn active_rate_rules(&mut self) -> StoreResult<Vec<RateRule>> {
        let rows = sqlx::query_as::<_, RateRow>(&format!(
            "SELECT {} FROM rate_rules WHERE is_active = TRUE",
            RATE_COLUMNS
        ))
        .fetch_all(&mut *self.tx)
        .await?;
        collect(rows)
    }

    async fn insert_royalty(&mut self, royalty: NewRoyalty) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO royalties (id, work_id, user_id, order_id, amount, rate)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (order_id, work_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(royalty.work_id)
        .bind(royalty.user_id)
        .bind(royalty.order_id)
        .bind(royalty.amount)
        .bind(royalty.rate)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_rebate(&mut self, rebate: NewPartnerRebate) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO partner_rebates (id, partner_id, order_id, work_id, amount, rate, status)
            VALUES ($1, $2, $3, $4, $5, $6, 'PENDING')
            ON CONFLICT (order_id, work_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(rebate.partner_id)
        .bind(rebate.order_id)
        .bind(rebate.work_id)
        .bind(rebate.amount)
        .bind(rebate.rate)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn lock_withdrawal(
        &mut self,
        kind: WithdrawalKind,
        id: Uuid,
    ) -> StoreResult<Option<Withdrawal>> {
        let row = sqlx::query_as::<_, WithdrawalRow>(&format!(
            "SELECT {} FROM withdrawals WHERE id = $1 AND kind = $2 FOR UPDATE",
            WITHDRAWAL_COLUMNS
        ))
        .bind(id)
        .bind(kind.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Withdrawal::try_from).transpose()
    }

    async fn update_withdrawal(&mut self, withdrawal: &Withdrawal) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE withdrawals SET
                status = $2,
                rejection_reason = $3,
                paid_at = $4,
                payout_reference = $5,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(withdrawal.id)
        .bind(withdrawal.status.as_str())
        .bind(withdrawal.rejection_reason.as_deref())
        .bind(withdrawal.paid_at)
        .bind(withdrawal.payout_reference.as_deref())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn mark_royalties_paid(&mut self, user_id: Uuid, at: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE royalties SET paid = TRUE, paid_at = $2
            WHERE user_id = $1 AND approved = TRUE AND paid = FALSE
            "#,
        )
        .bind(user_id)
        .bind(at)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn partner_for_user(&mut self, user_id: Uuid) -> StoreResult<Option<Uuid>> {
        let id = sqlx::query_scalar("SELECT id FROM partners WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(id)
    }

    async fn mark_rebates_paid(
        &mut self,
        partner_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE partner_rebates SET status = 'PAID', paid_at = $2
            WHERE partner_id = $1 AND status = 'VALIDATED'
            "#,
        )
        .bind(partner_id)
        .bind(at)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn insert_notification(&mut self, notification: &NewNotification) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, title, message, kind, data)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(notification.user_id)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.kind.as_str())
        .bind(&notification.data)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
