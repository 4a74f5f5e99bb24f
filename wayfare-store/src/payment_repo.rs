use crate::database::{corrupt, is_unique_violation, persistence};
use crate::order_repo::money;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;
use wayfare_core::{CoreError, CoreResult};
use wayfare_order::{InsertOutcome, Payment, PaymentRepository, PaymentStatus, Refund, RefundRepository};

const PAYMENT_COLUMNS: &str = "id, order_id, customer_id, provider_payment_id, provider_settlement_id, \
    amount_minor, currency, status, method, idempotency_key, request_fingerprint, raw, created_at, updated_at";

const REFUND_COLUMNS: &str = "id, order_id, provider_refund_id, amount_minor, currency, status, \
    idempotency_key, request_fingerprint, raw, created_at, updated_at";

pub struct StorePaymentRepository {
    pool: PgPool,
}

impl StorePaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_by_key(&self, idempotency_key: &str) -> CoreResult<Option<Payment>> {
        let sql = format!("SELECT {} FROM payments WHERE idempotency_key = $1", PAYMENT_COLUMNS);
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(idempotency_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence("load payment"))?
            .map(PaymentRow::into_payment)
            .transpose()
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    order_id: Option<Uuid>,
    customer_id: Option<String>,
    provider_payment_id: Option<String>,
    provider_settlement_id: Option<String>,
    amount_minor: i64,
    currency: String,
    status: String,
    method: String,
    idempotency_key: String,
    request_fingerprint: String,
    raw: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PaymentRow {
    fn into_payment(self) -> CoreResult<Payment> {
        Ok(Payment {
            id: self.id,
            order_id: self.order_id,
            customer_id: self.customer_id,
            provider_payment_id: self.provider_payment_id,
            provider_settlement_id: self.provider_settlement_id,
            amount: money(self.amount_minor, &self.currency)?,
            status: self.status.parse().map_err(|e| corrupt("payments.status", e))?,
            method: self.method,
            idempotency_key: self.idempotency_key,
            request_fingerprint: self.request_fingerprint,
            raw: self.raw,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[async_trait]
impl PaymentRepository for StorePaymentRepository {
    async fn insert_payment(&self, payment: &Payment) -> CoreResult<InsertOutcome<Payment>> {
        let sql = format!(
            r#"
            INSERT INTO payments (id, order_id, customer_id, provider_payment_id, provider_settlement_id,
                amount_minor, currency, status, method, idempotency_key, request_fingerprint, raw,
                created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING {}
            "#,
            PAYMENT_COLUMNS
        );
        let inserted = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(payment.id)
            .bind(payment.order_id)
            .bind(&payment.customer_id)
            .bind(&payment.provider_payment_id)
            .bind(&payment.provider_settlement_id)
            .bind(payment.amount.amount_minor)
            .bind(payment.amount.currency.as_str())
            .bind(payment.status.as_str())
            .bind(&payment.method)
            .bind(&payment.idempotency_key)
            .bind(&payment.request_fingerprint)
            .bind(&payment.raw)
            .bind(payment.created_at)
            .bind(payment.updated_at)
            .fetch_optional(&self.pool)
            .await;

        match inserted {
            Ok(Some(row)) => Ok(InsertOutcome::Inserted(row.into_payment()?)),
            Ok(None) => self
                .find_by_key(&payment.idempotency_key)
                .await?
                .map(InsertOutcome::Existing)
                .ok_or_else(|| CoreError::Persistence("payment vanished after conflict".to_string())),
            Err(e) if is_unique_violation(&e) => Err(CoreError::Conflict(
                "provider payment already recorded".to_string(),
            )),
            Err(e) => Err(persistence("insert payment")(e)),
        }
    }

    async fn get_payment(&self, id: Uuid) -> CoreResult<Option<Payment>> {
        let sql = format!("SELECT {} FROM payments WHERE id = $1", PAYMENT_COLUMNS);
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence("load payment"))?
            .map(PaymentRow::into_payment)
            .transpose()
    }

    async fn find_payment_by_provider_id(&self, provider_payment_id: &str) -> CoreResult<Option<Payment>> {
        let sql = format!("SELECT {} FROM payments WHERE provider_payment_id = $1", PAYMENT_COLUMNS);
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(provider_payment_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence("load payment"))?
            .map(PaymentRow::into_payment)
            .transpose()
    }

    async fn list_payments_for_order(&self, order_id: Uuid) -> CoreResult<Vec<Payment>> {
        let sql = format!(
            "SELECT {} FROM payments WHERE order_id = $1 ORDER BY created_at ASC",
            PAYMENT_COLUMNS
        );
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(order_id)
            .fetch_all(&self.pool)
            .await
            .map_err(persistence("list payments"))?
            .into_iter()
            .map(PaymentRow::into_payment)
            .collect()
    }

    async fn update_payment(&self, payment: &Payment) -> CoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET provider_payment_id = $1, provider_settlement_id = $2, customer_id = $3,
                status = $4, raw = $5, updated_at = NOW()
            WHERE id = $6
            "#,
        )
        .bind(&payment.provider_payment_id)
        .bind(&payment.provider_settlement_id)
        .bind(&payment.customer_id)
        .bind(payment.status.as_str())
        .bind(&payment.raw)
        .bind(payment.id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => {
                Err(CoreError::NotFound(format!("payment {}", payment.id)))
            }
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(CoreError::Conflict(
                "provider payment already recorded".to_string(),
            )),
            Err(e) => Err(persistence("update payment")(e)),
        }
    }

    async fn upsert_payment_by_provider_id(&self, payment: &Payment) -> CoreResult<Payment> {
        let sql = format!(
            r#"
            INSERT INTO payments (id, order_id, customer_id, provider_payment_id, provider_settlement_id,
                amount_minor, currency, status, method, idempotency_key, request_fingerprint, raw,
                created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (provider_payment_id)
            DO UPDATE SET status = EXCLUDED.status, raw = EXCLUDED.raw, updated_at = NOW()
            RETURNING {}
            "#,
            PAYMENT_COLUMNS
        );
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(payment.id)
            .bind(payment.order_id)
            .bind(&payment.customer_id)
            .bind(&payment.provider_payment_id)
            .bind(&payment.provider_settlement_id)
            .bind(payment.amount.amount_minor)
            .bind(payment.amount.currency.as_str())
            .bind(payment.status.as_str())
            .bind(&payment.method)
            .bind(&payment.idempotency_key)
            .bind(&payment.request_fingerprint)
            .bind(&payment.raw)
            .bind(payment.created_at)
            .bind(payment.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(persistence("upsert payment"))?
            .into_payment()
    }
}

pub struct StoreRefundRepository {
    pool: PgPool,
}

impl StoreRefundRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct RefundRow {
    id: Uuid,
    order_id: Uuid,
    provider_refund_id: String,
    amount_minor: i64,
    currency: String,
    status: String,
    idempotency_key: String,
    request_fingerprint: String,
    raw: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RefundRow {
    fn into_refund(self) -> CoreResult<Refund> {
        Ok(Refund {
            id: self.id,
            order_id: self.order_id,
            provider_refund_id: self.provider_refund_id,
            amount: money(self.amount_minor, &self.currency)?,
            status: self.status.parse().map_err(|e| corrupt("refunds.status", e))?,
            idempotency_key: self.idempotency_key,
            request_fingerprint: self.request_fingerprint,
            raw: self.raw,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[async_trait]
impl RefundRepository for StoreRefundRepository {
    async fn insert_refund(&self, refund: &Refund) -> CoreResult<InsertOutcome<Refund>> {
        let sql = format!(
            r#"
            INSERT INTO refunds (id, order_id, provider_refund_id, amount_minor, currency, status,
                idempotency_key, request_fingerprint, raw, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING {}
            "#,
            REFUND_COLUMNS
        );
        let inserted = sqlx::query_as::<_, RefundRow>(&sql)
            .bind(refund.id)
            .bind(refund.order_id)
            .bind(&refund.provider_refund_id)
            .bind(refund.amount.amount_minor)
            .bind(refund.amount.currency.as_str())
            .bind(refund.status.as_str())
            .bind(&refund.idempotency_key)
            .bind(&refund.request_fingerprint)
            .bind(&refund.raw)
            .bind(refund.created_at)
            .bind(refund.updated_at)
            .fetch_optional(&self.pool)
            .await;

        match inserted {
            Ok(Some(row)) => Ok(InsertOutcome::Inserted(row.into_refund()?)),
            Ok(None) => self
                .find_refund_by_key(&refund.idempotency_key)
                .await?
                .map(InsertOutcome::Existing)
                .ok_or_else(|| CoreError::Persistence("refund vanished after conflict".to_string())),
            Err(e) if is_unique_violation(&e) => Err(CoreError::Conflict(format!(
                "provider refund {} already recorded",
                refund.provider_refund_id
            ))),
            Err(e) => Err(persistence("insert refund")(e)),
        }
    }

    async fn find_refund_by_key(&self, idempotency_key: &str) -> CoreResult<Option<Refund>> {
        let sql = format!("SELECT {} FROM refunds WHERE idempotency_key = $1", REFUND_COLUMNS);
        sqlx::query_as::<_, RefundRow>(&sql)
            .bind(idempotency_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence("load refund"))?
            .map(RefundRow::into_refund)
            .transpose()
    }

    async fn find_refund_by_provider_id(&self, provider_refund_id: &str) -> CoreResult<Option<Refund>> {
        let sql = format!("SELECT {} FROM refunds WHERE provider_refund_id = $1", REFUND_COLUMNS);
        sqlx::query_as::<_, RefundRow>(&sql)
            .bind(provider_refund_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence("load refund"))?
            .map(RefundRow::into_refund)
            .transpose()
    }

    async fn list_refunds_for_order(&self, order_id: Uuid) -> CoreResult<Vec<Refund>> {
        let sql = format!(
            "SELECT {} FROM refunds WHERE order_id = $1 ORDER BY created_at ASC",
            REFUND_COLUMNS
        );
        sqlx::query_as::<_, RefundRow>(&sql)
            .bind(order_id)
            .fetch_all(&self.pool)
            .await
            .map_err(persistence("list refunds"))?
            .into_iter()
            .map(RefundRow::into_refund)
            .collect()
    }

    async fn update_refund_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
        raw: Option<&Value>,
    ) -> CoreResult<()> {
        let done = sqlx::query(
            "UPDATE refunds SET status = $1, raw = COALESCE($2, raw), updated_at = NOW() WHERE id = $3",
        )
        .bind(status.as_str())
        .bind(raw)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(persistence("update refund"))?;

        if done.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("refund {}", id)));
        }
        Ok(())
    }
}
