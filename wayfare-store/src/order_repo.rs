use crate::database::{corrupt, is_unique_violation, persistence};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;
use wayfare_core::content::Passenger;
use wayfare_core::{CoreError, CoreResult};
use wayfare_order::{
    ChangeActor, InsertOutcome, Order, OrderChange, OrderRepository, OrderStatus, StatusChange,
    TransitionOutcome,
};
use wayfare_shared::{Currency, Money};

const ORDER_COLUMNS: &str = "id, provider_order_id, booking_reference, status, total_amount_minor, \
    currency, user_id, offer_ids, passengers, idempotency_key, request_fingerprint, raw, \
    created_at, updated_at";

pub struct StoreOrderRepository {
    pool: PgPool,
}

impl StoreOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_where(&self, filter: &str, value: &str) -> CoreResult<Option<Order>> {
        let sql = format!("SELECT {} FROM orders WHERE {} = $1", ORDER_COLUMNS, filter);
        sqlx::query_as::<_, OrderRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence("load order"))?
            .map(OrderRow::into_order)
            .transpose()
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    provider_order_id: String,
    booking_reference: Option<String>,
    status: String,
    total_amount_minor: i64,
    currency: String,
    user_id: String,
    offer_ids: Value,
    passengers: Value,
    idempotency_key: String,
    request_fingerprint: String,
    raw: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_order(self) -> CoreResult<Order> {
        let offer_ids: Vec<String> =
            serde_json::from_value(self.offer_ids).map_err(|e| corrupt("orders.offer_ids", e))?;
        let passengers: Vec<Passenger> =
            serde_json::from_value(self.passengers).map_err(|e| corrupt("orders.passengers", e))?;
        Ok(Order {
            id: self.id,
            provider_order_id: self.provider_order_id,
            booking_reference: self.booking_reference,
            status: self.status.parse().map_err(|e| corrupt("orders.status", e))?,
            total: money(self.total_amount_minor, &self.currency)?,
            user_id: self.user_id,
            offer_ids,
            passengers,
            idempotency_key: self.idempotency_key,
            request_fingerprint: self.request_fingerprint,
            raw: self.raw,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ChangeRow {
    id: Uuid,
    order_id: Uuid,
    change_type: String,
    previous_status: Option<String>,
    new_status: String,
    actor: String,
    reason: Option<String>,
    created_at: DateTime<Utc>,
}

impl ChangeRow {
    fn into_change(self) -> CoreResult<OrderChange> {
        let previous_status = match self.previous_status {
            Some(s) => Some(
                s.parse::<OrderStatus>()
                    .map_err(|e| corrupt("order_changes.previous_status", e))?,
            ),
            None => None,
        };
        Ok(OrderChange {
            id: self.id,
            order_id: self.order_id,
            change_type: self.change_type,
            previous_status,
            new_status: self
                .new_status
                .parse()
                .map_err(|e| corrupt("order_changes.new_status", e))?,
            actor: self
                .actor
                .parse::<ChangeActor>()
                .map_err(|e| corrupt("order_changes.actor", e))?,
            reason: self.reason,
            created_at: self.created_at,
        })
    }
}

pub(crate) fn money(amount_minor: i64, currency: &str) -> CoreResult<Money> {
    let currency = Currency::parse(currency).map_err(|e| corrupt("currency", e))?;
    Ok(Money::new(amount_minor, currency))
}

fn json(value: &impl serde::Serialize, what: &str) -> CoreResult<Value> {
    serde_json::to_value(value).map_err(|e| CoreError::Internal(format!("encode {}: {}", what, e)))
}

#[async_trait]
impl OrderRepository for StoreOrderRepository {
    async fn insert_order(&self, order: &Order) -> CoreResult<InsertOutcome<Order>> {
        let sql = format!(
            r#"
            INSERT INTO orders (id, provider_order_id, booking_reference, status, total_amount_minor,
                currency, user_id, offer_ids, passengers, idempotency_key, request_fingerprint, raw,
                created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING {}
            "#,
            ORDER_COLUMNS
        );
        let inserted = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(order.id)
            .bind(&order.provider_order_id)
            .bind(&order.booking_reference)
            .bind(order.status.as_str())
            .bind(order.total.amount_minor)
            .bind(order.total.currency.as_str())
            .bind(&order.user_id)
            .bind(json(&order.offer_ids, "offer ids")?)
            .bind(json(&order.passengers, "passengers")?)
            .bind(&order.idempotency_key)
            .bind(&order.request_fingerprint)
            .bind(&order.raw)
            .bind(order.created_at)
            .bind(order.updated_at)
            .fetch_optional(&self.pool)
            .await;

        match inserted {
            Ok(Some(row)) => Ok(InsertOutcome::Inserted(row.into_order()?)),
            // Lost the race on the idempotency key: hand back the winner
            Ok(None) => self
                .find_order_by_key(&order.idempotency_key)
                .await?
                .map(InsertOutcome::Existing)
                .ok_or_else(|| CoreError::Persistence("order vanished after conflict".to_string())),
            Err(e) if is_unique_violation(&e) => Err(CoreError::Conflict(format!(
                "provider order {} already recorded",
                order.provider_order_id
            ))),
            Err(e) => Err(persistence("insert order")(e)),
        }
    }

    async fn get_order(&self, id: Uuid) -> CoreResult<Option<Order>> {
        let sql = format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS);
        sqlx::query_as::<_, OrderRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence("load order"))?
            .map(OrderRow::into_order)
            .transpose()
    }

    async fn find_order_by_key(&self, idempotency_key: &str) -> CoreResult<Option<Order>> {
        self.fetch_where("idempotency_key", idempotency_key).await
    }

    async fn find_order_by_provider_id(&self, provider_order_id: &str) -> CoreResult<Option<Order>> {
        self.fetch_where("provider_order_id", provider_order_id).await
    }

    async fn list_orders_for_user(&self, user_id: &str) -> CoreResult<Vec<Order>> {
        let sql = format!(
            "SELECT {} FROM orders WHERE user_id = $1 ORDER BY created_at DESC",
            ORDER_COLUMNS
        );
        sqlx::query_as::<_, OrderRow>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(persistence("list orders"))?
            .into_iter()
            .map(OrderRow::into_order)
            .collect()
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: &[OrderStatus],
        to: OrderStatus,
        change: &StatusChange,
    ) -> CoreResult<TransitionOutcome> {
        let mut tx = self.pool.begin().await.map_err(persistence("begin transition"))?;

        // 1. Lock the row
        let sql = format!("SELECT {} FROM orders WHERE id = $1 FOR UPDATE", ORDER_COLUMNS);
        let Some(row) = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(persistence("lock order"))?
        else {
            return Ok(TransitionOutcome::Missing);
        };
        let current = row.into_order()?;
        if !from.contains(&current.status) {
            return Ok(TransitionOutcome::Unchanged(current));
        }

        // 2. Move it and write the audit row in the same transaction
        let sql = format!(
            "UPDATE orders SET status = $1, updated_at = NOW() WHERE id = $2 RETURNING {}",
            ORDER_COLUMNS
        );
        let updated = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(to.as_str())
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(persistence("update order status"))?
            .into_order()?;

        let audit = OrderChange::transition(id, current.status, to, change);
        insert_change(&mut *tx, &audit).await?;

        tx.commit().await.map_err(persistence("commit transition"))?;
        Ok(TransitionOutcome::Applied(updated))
    }

    async fn transition_by_provider_id(
        &self,
        provider_order_id: &str,
        from: &[OrderStatus],
        to: OrderStatus,
        change: &StatusChange,
    ) -> CoreResult<TransitionOutcome> {
        match self.find_order_by_provider_id(provider_order_id).await? {
            Some(order) => self.transition_status(order.id, from, to, change).await,
            None => Ok(TransitionOutcome::Missing),
        }
    }

    async fn list_stale_orders(
        &self,
        status: OrderStatus,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> CoreResult<Vec<Order>> {
        let sql = format!(
            "SELECT {} FROM orders WHERE status = $1 AND updated_at < $2 ORDER BY updated_at ASC LIMIT $3",
            ORDER_COLUMNS
        );
        sqlx::query_as::<_, OrderRow>(&sql)
            .bind(status.as_str())
            .bind(older_than)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(persistence("list stale orders"))?
            .into_iter()
            .map(OrderRow::into_order)
            .collect()
    }

    async fn record_change(&self, change: &OrderChange) -> CoreResult<()> {
        insert_change(&self.pool, change).await
    }

    async fn list_changes(&self, order_id: Uuid) -> CoreResult<Vec<OrderChange>> {
        sqlx::query_as::<_, ChangeRow>(
            r#"
            SELECT id, order_id, change_type, previous_status, new_status, actor, reason, created_at
            FROM order_changes WHERE order_id = $1 ORDER BY created_at ASC
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(persistence("list order changes"))?
        .into_iter()
        .map(ChangeRow::into_change)
        .collect()
    }
}

async fn insert_change<'e, E>(executor: E, change: &OrderChange) -> CoreResult<()>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO order_changes (id, order_id, change_type, previous_status, new_status, actor, reason, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(change.id)
    .bind(change.order_id)
    .bind(&change.change_type)
    .bind(change.previous_status.map(|s| s.as_str()))
    .bind(change.new_status.as_str())
    .bind(change.actor.as_str())
    .bind(&change.reason)
    .bind(change.created_at)
    .execute(executor)
    .await
    .map_err(persistence("record order change"))?;
    Ok(())
}
