use crate::database::{is_unique_violation, persistence};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;
use wayfare_core::{CoreError, CoreResult};
use wayfare_order::{LoyaltyAccount, LoyaltyAccountRepository};
use wayfare_shared::Masked;

pub struct StoreLoyaltyRepository {
    pool: PgPool,
}

impl StoreLoyaltyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: Uuid,
    user_id: String,
    airline_iata_code: String,
    account_number: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<AccountRow> for LoyaltyAccount {
    fn from(row: AccountRow) -> Self {
        LoyaltyAccount {
            id: row.id,
            user_id: row.user_id,
            airline_iata_code: row.airline_iata_code,
            account_number: Masked::new(row.account_number),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl LoyaltyAccountRepository for StoreLoyaltyRepository {
    async fn list_accounts(&self, user_id: &str) -> CoreResult<Vec<LoyaltyAccount>> {
        let rows = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT id, user_id, airline_iata_code, account_number, created_at, updated_at
            FROM loyalty_accounts WHERE user_id = $1 ORDER BY airline_iata_code
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(persistence("list loyalty accounts"))?;

        Ok(rows.into_iter().map(LoyaltyAccount::from).collect())
    }

    async fn get_account(&self, user_id: &str, id: Uuid) -> CoreResult<Option<LoyaltyAccount>> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT id, user_id, airline_iata_code, account_number, created_at, updated_at
            FROM loyalty_accounts WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(persistence("load loyalty account"))?;

        Ok(row.map(LoyaltyAccount::from))
    }

    async fn create_account(&self, account: &LoyaltyAccount) -> CoreResult<LoyaltyAccount> {
        let created = sqlx::query_as::<_, AccountRow>(
            r#"
            INSERT INTO loyalty_accounts (id, user_id, airline_iata_code, account_number, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, user_id, airline_iata_code, account_number, created_at, updated_at
            "#,
        )
        .bind(account.id)
        .bind(&account.user_id)
        .bind(&account.airline_iata_code)
        .bind(account.account_number.expose())
        .bind(account.created_at)
        .bind(account.updated_at)
        .fetch_one(&self.pool)
        .await;

        match created {
            Ok(row) => Ok(row.into()),
            Err(e) if is_unique_violation(&e) => Err(CoreError::Conflict(format!(
                "loyalty account for {} already exists",
                account.airline_iata_code
            ))),
            Err(e) => Err(persistence("create loyalty account")(e)),
        }
    }

    async fn update_account_number(
        &self,
        user_id: &str,
        id: Uuid,
        account_number: &str,
    ) -> CoreResult<Option<LoyaltyAccount>> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            UPDATE loyalty_accounts SET account_number = $1, updated_at = NOW()
            WHERE id = $2 AND user_id = $3
            RETURNING id, user_id, airline_iata_code, account_number, created_at, updated_at
            "#,
        )
        .bind(account_number)
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(persistence("update loyalty account"))?;

        Ok(row.map(LoyaltyAccount::from))
    }

    async fn delete_account(&self, user_id: &str, id: Uuid) -> CoreResult<bool> {
        let done = sqlx::query("DELETE FROM loyalty_accounts WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(persistence("delete loyalty account"))?;

        Ok(done.rows_affected() > 0)
    }
}
