use crate::database::{corrupt, persistence};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;
use wayfare_core::{CoreError, CoreResult};
use wayfare_order::webhooks::{WebhookEvent, WebhookProvider, WebhookStatus};
use wayfare_order::{InsertOutcome, WebhookEventRepository};

const EVENT_COLUMNS: &str = "id, provider, event_id, event_type, body, signature, status, attempts, \
    next_attempt_at, last_error, received_at, processed_at, claimed_at";

pub struct StoreWebhookRepository {
    pool: PgPool,
}

impl StoreWebhookRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: WebhookStatus,
        attempts: Option<i32>,
        next_attempt_at: Option<DateTime<Utc>>,
        error: Option<&str>,
        processed: bool,
    ) -> CoreResult<()> {
        let done = sqlx::query(
            r#"
            UPDATE webhook_events
            SET status = $1,
                attempts = COALESCE($2, attempts),
                next_attempt_at = $3,
                last_error = COALESCE($4, last_error),
                processed_at = CASE WHEN $5 THEN NOW() ELSE processed_at END
            WHERE id = $6
            "#,
        )
        .bind(status.as_str())
        .bind(attempts)
        .bind(next_attempt_at)
        .bind(error)
        .bind(processed)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(persistence("update webhook event"))?;

        if done.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("webhook event {}", id)));
        }
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    provider: String,
    event_id: String,
    event_type: String,
    body: Value,
    signature: String,
    status: String,
    attempts: i32,
    next_attempt_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    received_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    claimed_at: Option<DateTime<Utc>>,
}

impl EventRow {
    fn into_event(self) -> CoreResult<WebhookEvent> {
        Ok(WebhookEvent {
            id: self.id,
            provider: self
                .provider
                .parse()
                .map_err(|e| corrupt("webhook_events.provider", e))?,
            event_id: self.event_id,
            event_type: self.event_type,
            body: self.body,
            signature: self.signature,
            status: self.status.parse().map_err(|e| corrupt("webhook_events.status", e))?,
            attempts: self.attempts,
            next_attempt_at: self.next_attempt_at,
            last_error: self.last_error,
            received_at: self.received_at,
            processed_at: self.processed_at,
            claimed_at: self.claimed_at,
        })
    }
}

#[async_trait]
impl WebhookEventRepository for StoreWebhookRepository {
    async fn register_event(&self, event: &WebhookEvent) -> CoreResult<InsertOutcome<WebhookEvent>> {
        let sql = format!(
            r#"
            INSERT INTO webhook_events (id, provider, event_id, event_type, body, signature, status,
                attempts, next_attempt_at, last_error, received_at, processed_at, claimed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (provider, event_id) DO NOTHING
            RETURNING {}
            "#,
            EVENT_COLUMNS
        );
        let inserted = sqlx::query_as::<_, EventRow>(&sql)
            .bind(event.id)
            .bind(event.provider.as_str())
            .bind(&event.event_id)
            .bind(&event.event_type)
            .bind(&event.body)
            .bind(&event.signature)
            .bind(event.status.as_str())
            .bind(event.attempts)
            .bind(event.next_attempt_at)
            .bind(&event.last_error)
            .bind(event.received_at)
            .bind(event.processed_at)
            .bind(event.claimed_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence("register webhook event"))?;

        match inserted {
            Some(row) => Ok(InsertOutcome::Inserted(row.into_event()?)),
            None => self
                .find_event(event.provider, &event.event_id)
                .await?
                .map(InsertOutcome::Existing)
                .ok_or_else(|| CoreError::Persistence("webhook event vanished after conflict".to_string())),
        }
    }

    async fn find_event(
        &self,
        provider: WebhookProvider,
        event_id: &str,
    ) -> CoreResult<Option<WebhookEvent>> {
        let sql = format!(
            "SELECT {} FROM webhook_events WHERE provider = $1 AND event_id = $2",
            EVENT_COLUMNS
        );
        sqlx::query_as::<_, EventRow>(&sql)
            .bind(provider.as_str())
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence("load webhook event"))?
            .map(EventRow::into_event)
            .transpose()
    }

    async fn claim_event(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> CoreResult<Option<WebhookEvent>> {
        // SET sees the pre-update status, so a failed event starts its attempts over
        let sql = format!(
            r#"
            UPDATE webhook_events
            SET status = 'processing',
                attempts = CASE WHEN status = 'failed' THEN 0 ELSE attempts END,
                next_attempt_at = NULL,
                claimed_at = $2
            WHERE id = $1
              AND (status IN ('verified', 'failed')
                   OR (status = 'processing' AND (claimed_at IS NULL OR claimed_at < $3)))
            RETURNING {}
            "#,
            EVENT_COLUMNS
        );
        sqlx::query_as::<_, EventRow>(&sql)
            .bind(id)
            .bind(now)
            .bind(stale_before)
            .fetch_optional(&self.pool)
            .await
            .map_err(persistence("claim webhook event"))?
            .map(EventRow::into_event)
            .transpose()
    }

    async fn release_event(&self, id: Uuid) -> CoreResult<()> {
        sqlx::query(
            "UPDATE webhook_events SET status = 'verified', claimed_at = NULL WHERE id = $1 AND status = 'processing'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(persistence("release webhook event"))?;
        Ok(())
    }

    async fn mark_applied(&self, id: Uuid) -> CoreResult<()> {
        self.set_status(id, WebhookStatus::Applied, None, None, None, true).await
    }

    async fn mark_deferred(
        &self,
        id: Uuid,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> CoreResult<()> {
        self.set_status(
            id,
            WebhookStatus::Deferred,
            Some(attempts),
            Some(next_attempt_at),
            Some(error),
            false,
        )
        .await
    }

    async fn mark_failed(&self, id: Uuid, attempts: i32, error: &str) -> CoreResult<()> {
        self.set_status(id, WebhookStatus::Failed, Some(attempts), None, Some(error), true)
            .await
    }

    async fn claim_due_events(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> CoreResult<Vec<WebhookEvent>> {
        let sql = format!(
            r#"
            UPDATE webhook_events
            SET status = 'processing', claimed_at = $1
            WHERE id IN (
                SELECT id FROM webhook_events
                WHERE (status = 'deferred' AND next_attempt_at <= $1)
                   OR (status = 'processing' AND (claimed_at IS NULL OR claimed_at < $2))
                ORDER BY next_attempt_at ASC NULLS FIRST
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {}
            "#,
            EVENT_COLUMNS
        );
        sqlx::query_as::<_, EventRow>(&sql)
            .bind(now)
            .bind(stale_before)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(persistence("claim deferred webhook events"))?
            .into_iter()
            .map(EventRow::into_event)
            .collect()
    }
}
