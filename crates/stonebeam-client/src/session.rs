//! Resolving the signed-in account.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use stonebeam_core::{Role, UserId};

/// Storage key of the signed-in customer record.
pub const CURRENT_USER_KEY: &str = "currentUser";
/// Storage key of the signed-in dealer record.
pub const CURRENT_DEALER_KEY: &str = "currentDealer";

/// Anything that can tell who is signed in.
pub trait CurrentUser: Send + Sync {
    fn current_user(&self) -> Option<UserId>;
}

impl CurrentUser for UserId {
    fn current_user(&self) -> Option<UserId> {
        Some(self.clone())
    }
}

impl CurrentUser for Option<UserId> {
    fn current_user(&self) -> Option<UserId> {
        self.clone()
    }
}

/// A signed-in account as stored in the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: UserId,
    pub role: Role,
    pub name: Option<String>,
}

/// Session-scoped key/value store of JSON-encoded strings.
#[derive(Debug, Default)]
pub struct SessionStorage {
    items: RwLock<HashMap<String, String>>,
}

impl SessionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_item(&self, key: impl Into<String>, value: impl Into<String>) {
        self.items
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into());
    }

    pub fn get_item(&self, key: &str) -> Option<String> {
        self.items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn remove_item(&self, key: &str) -> Option<String> {
        self.items
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    /// Store `account` under the key for its role.
    pub fn sign_in(&self, account: &Account) {
        let key = match account.role {
            Role::Customer => CURRENT_USER_KEY,
            Role::Dealer => CURRENT_DEALER_KEY,
        };
        let record = serde_json::json!({
            "id": account.id.as_str(),
            "name": account.name,
        });
        self.set_item(key, record.to_string());
    }

    pub fn sign_out(&self) {
        self.remove_item(CURRENT_USER_KEY);
        self.remove_item(CURRENT_DEALER_KEY);
    }

    /// The customer record if present, otherwise the dealer record.
    pub fn current_account(&self) -> Option<Account> {
        self.read_account(CURRENT_USER_KEY, Role::Customer)
            .or_else(|| self.read_account(CURRENT_DEALER_KEY, Role::Dealer))
    }

    fn read_account(&self, key: &str, role: Role) -> Option<Account> {
        let raw = self.get_item(key)?;
        let record: Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("ignoring corrupt {} record: {}", key, e);
                return None;
            }
        };
        let id = match record.get("id")? {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let id = UserId::new(id).ok()?;
        let name = record.get("name").and_then(Value::as_str).map(str::to_string);
        Some(Account { id, role, name })
    }
}

impl CurrentUser for SessionStorage {
    fn current_user(&self) -> Option<UserId> {
        self.current_account().map(|a| a.id)
    }
}
