use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::invitation::normalize_email;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>, // NULL until a password is set
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: String, first_name: String, last_name: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email,
            first_name,
            last_name,
            password_hash: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Display name used in notifications; falls back to the email address.
    pub fn full_name(&self) -> String {
        let name = format!("{} {}", self.first_name.trim(), self.last_name.trim());
        let name = name.trim();
        if name.is_empty() {
            self.email.clone()
        } else {
            name.to_string()
        }
    }

    /// Compares in the same normalized form invitations are stored in.
    pub fn has_email(&self, email: &str) -> bool {
        normalize_email(&self.email) == normalize_email(email)
    }
}

/// Name fields to merge into an existing identity. Only fields that are
/// currently empty on the identity are taken.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NameUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl NameUpdate {
    pub fn fill_empty(user: &User, first_name: Option<&str>, last_name: Option<&str>) -> Self {
        let pick = |current: &str, supplied: Option<&str>| {
            supplied
                .map(str::trim)
                .filter(|value| current.trim().is_empty() && !value.is_empty())
                .map(str::to_string)
        };

        Self {
            first_name: pick(&user.first_name, first_name),
            last_name: pick(&user.last_name, last_name),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.first_name.is_none() && self.last_name.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
}

impl From<User> for UserInfo {
    fn from(user: User) -> Self {
        let full_name = user.full_name();
        Self {
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            full_name,
        }
    }
}
