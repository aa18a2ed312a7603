mod repository;
mod service;

pub use repository::*;
pub use service::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::resource::Model;

pub const DEFAULT_PHOTO: &str = "default.jpg";

/// Access level of a [`User`].
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "user_role", rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    #[default]
    User,
    Guide,
    LeadGuide,
    Admin,
}

/// User as saved on database. Credential fields never serialize.
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub photo: String,
    pub role: Role,
    #[serde(skip)]
    pub password: String,
    #[serde(skip)]
    pub password_changed_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub password_reset_token: Option<String>,
    #[serde(skip)]
    pub password_reset_expires_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Whether a token issued at `iat` (unix seconds) predates the last
    /// password change, making it stale.
    pub fn changed_password_after(&self, iat: u64) -> bool {
        self.password_changed_at
            .map(|changed_at| changed_at.timestamp() > iat as i64)
            .unwrap_or(false)
    }
}

impl Model for User {
    const TABLE: &'static str = "users";
    const NAME: &'static str = "user";
    const FILTERABLE: &'static [&'static str] = &["name", "email", "role"];
    const SORTABLE: &'static [&'static str] = &["name", "created_at"];
    const SCOPE: Option<&'static str> = Some("active = TRUE");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(changed_at: Option<DateTime<Utc>>) -> User {
        User {
            id: Uuid::new_v4(),
            name: "Ines".into(),
            email: "ines@example.com".into(),
            photo: DEFAULT_PHOTO.into(),
            role: Role::User,
            password: "$argon2id$...".into(),
            password_changed_at: changed_at,
            password_reset_token: None,
            password_reset_expires_at: None,
            active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_password_change_staleness() {
        let issued_at = Utc::now().timestamp() as u64;

        let never_changed = user(None);
        assert!(!never_changed.changed_password_after(issued_at));

        let changed_later =
            user(Some(Utc::now() + chrono::Duration::hours(1)));
        assert!(changed_later.changed_password_after(issued_at));

        let changed_before =
            user(Some(Utc::now() - chrono::Duration::hours(1)));
        assert!(!changed_before.changed_password_after(issued_at));
    }

    #[test]
    fn test_credentials_never_serialize() {
        let value = serde_json::to_value(user(None)).unwrap();
        let object = value.as_object().unwrap();

        assert!(object.contains_key("name"));
        assert!(object.contains_key("email"));
        assert!(!object.contains_key("password"));
        assert!(!object.contains_key("password_reset_token"));
        assert!(!object.contains_key("active"));
    }

    #[test]
    fn test_role_wire_format() {
        assert_eq!(
            serde_json::to_string(&Role::LeadGuide).unwrap(),
            "\"lead-guide\""
        );
    }
}
