use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A marketplace seller account mirrored by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    /// Upstream seller identity.
    pub external_ref: String,
    pub display_name: String,
    pub active: bool,
    /// Families relevant to this account; empty means every registered family.
    pub data_families: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(external_ref: &str, display_name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            external_ref: external_ref.to_string(),
            display_name: display_name.to_string(),
            active: true,
            data_families: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn wants_family(&self, data_family: &str) -> bool {
        self.data_families.is_empty() || self.data_families.iter().any(|f| f == data_family)
    }
}

/// Access token issued for an account by the external authorization flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountCredential {
    pub account_id: Uuid,
    #[serde(skip_serializing)]
    pub access_token: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl AccountCredential {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.trim().is_empty() && self.expires_at.map_or(true, |exp| exp > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn empty_family_list_means_all() {
        let mut account = Account::new("A1", "Seller One");
        assert!(account.wants_family("orders"));

        account.data_families = vec!["orders".to_string()];
        assert!(account.wants_family("orders"));
        assert!(!account.wants_family("messages"));
    }

    #[test]
    fn credential_validity_checks_token_and_expiry() {
        let now = Utc::now();
        let mut cred = AccountCredential {
            account_id: Uuid::new_v4(),
            access_token: "tok".to_string(),
            expires_at: Some(now + Duration::minutes(5)),
            updated_at: now,
        };
        assert!(cred.is_valid_at(now));

        cred.expires_at = Some(now - Duration::seconds(1));
        assert!(!cred.is_valid_at(now));

        cred.expires_at = None;
        cred.access_token = "  ".to_string();
        assert!(!cred.is_valid_at(now));
    }
}
