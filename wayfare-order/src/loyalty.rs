use crate::models::LoyaltyAccount;
use crate::repository::LoyaltyAccountRepository;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;
use wayfare_core::content::LoyaltyProgrammeAccount;
use wayfare_core::{CoreError, CoreResult};

const MAX_ACCOUNT_NUMBER_LEN: usize = 64;

/// Frequent-flyer accounts saved per user, attached to lead passengers at booking time.
pub struct LoyaltyService {
    accounts: Arc<dyn LoyaltyAccountRepository>,
}

impl LoyaltyService {
    pub fn new(accounts: Arc<dyn LoyaltyAccountRepository>) -> Self {
        Self { accounts }
    }

    pub async fn list(&self, user_id: &str) -> CoreResult<Vec<LoyaltyAccount>> {
        self.accounts.list_accounts(user_id).await
    }

    pub async fn get(&self, user_id: &str, id: Uuid) -> CoreResult<LoyaltyAccount> {
        self.accounts
            .get_account(user_id, id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("loyalty account {}", id)))
    }

    pub async fn create(
        &self,
        user_id: &str,
        airline_iata_code: &str,
        account_number: &str,
    ) -> CoreResult<LoyaltyAccount> {
        let now = Utc::now();
        let account = LoyaltyAccount {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            airline_iata_code: airline_code(airline_iata_code)?,
            account_number: account_number_value(account_number)?.into(),
            created_at: now,
            updated_at: now,
        };
        let created = self.accounts.create_account(&account).await?;
        tracing::info!("Loyalty account {} added for airline {}", created.id, created.airline_iata_code);
        Ok(created)
    }

    pub async fn update(&self, user_id: &str, id: Uuid, account_number: &str) -> CoreResult<LoyaltyAccount> {
        let number = account_number_value(account_number)?;
        self.accounts
            .update_account_number(user_id, id, &number)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("loyalty account {}", id)))
    }

    pub async fn delete(&self, user_id: &str, id: Uuid) -> CoreResult<()> {
        if self.accounts.delete_account(user_id, id).await? {
            Ok(())
        } else {
            Err(CoreError::NotFound(format!("loyalty account {}", id)))
        }
    }

    /// Saved accounts in the shape the content provider expects on a passenger.
    pub async fn programme_accounts(&self, user_id: &str) -> CoreResult<Vec<LoyaltyProgrammeAccount>> {
        Ok(self
            .accounts
            .list_accounts(user_id)
            .await?
            .into_iter()
            .map(|a| LoyaltyProgrammeAccount {
                airline_iata_code: a.airline_iata_code,
                account_number: a.account_number,
            })
            .collect())
    }
}

/// Two-character airline designator, letters or digits (`IB`, `U2`, `3K`).
fn airline_code(raw: &str) -> CoreResult<String> {
    let code = raw.trim().to_ascii_uppercase();
    if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(CoreError::Validation(
            "airline_iata_code must be a 2-character IATA designator".to_string(),
        ));
    }
    Ok(code)
}

fn account_number_value(raw: &str) -> CoreResult<String> {
    let number = raw.trim();
    if number.is_empty() || number.len() > MAX_ACCOUNT_NUMBER_LEN {
        return Err(CoreError::Validation(format!(
            "account_number must be 1-{} characters",
            MAX_ACCOUNT_NUMBER_LEN
        )));
    }
    Ok(number.to_string())
}
