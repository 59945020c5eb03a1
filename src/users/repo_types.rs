use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Access level of a user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
    Owner,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            "owner" => Some(Role::Owner),
            _ => None,
        }
    }

    pub fn is_staff(self) -> bool {
        matches!(self, Role::Admin | Role::Owner)
    }
}

/// User record in the database.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub password_hash: String, // argon2 PHC string, never serialized
    pub phone: String,
    pub avatar: Option<String>, // file name under the images dir
    pub bio: Option<String>,
    pub role: Role,
    pub online: bool,
    pub active: bool,
    pub tokens: Vec<String>, // issued session JWTs, newest first
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl User {
    pub fn holds_token(&self, token: &str) -> bool {
        self.tokens.iter().any(|t| t == token)
    }

    pub fn push_token(&mut self, token: String) {
        self.tokens.insert(0, token);
    }

    pub fn drop_token(&mut self, token: &str) {
        self.tokens.retain(|t| t != token);
    }
}

/// Column updates for one user. `None` leaves the stored value alone, so a
/// write never clobbers fields it did not mean to touch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserChanges {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub avatar: Option<Option<String>>,
    pub bio: Option<Option<String>>,
    pub role: Option<Role>,
    pub online: Option<bool>,
    pub active: Option<bool>,
}

impl UserChanges {
    pub fn apply_to(&self, user: &mut User) {
        if let Some(v) = &self.full_name {
            user.full_name = v.clone();
        }
        if let Some(v) = &self.email {
            user.email = v.clone();
        }
        if let Some(v) = &self.phone {
            user.phone = v.clone();
        }
        if let Some(v) = &self.avatar {
            user.avatar = v.clone();
        }
        if let Some(v) = &self.bio {
            user.bio = v.clone();
        }
        if let Some(v) = self.role {
            user.role = v;
        }
        if let Some(v) = self.online {
            user.online = v;
        }
        if let Some(v) = self.active {
            user.active = v;
        }
    }
}

/// Insert payload for a freshly registered user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub password_hash: String,
    pub phone: String,
    pub role: Role,
    pub tokens: Vec<String>,
}

/// Equality filters accepted by the user listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserFilter {
    pub role: Option<Role>,
    pub active: Option<bool>,
    pub online: Option<bool>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl UserFilter {
    pub fn matches(&self, user: &User) -> bool {
        self.role.map_or(true, |r| user.role == r)
            && self.active.map_or(true, |a| user.active == a)
            && self.online.map_or(true, |o| user.online == o)
            && self.email.as_deref().map_or(true, |e| user.email == e)
            && self.phone.as_deref().map_or(true, |p| user.phone == p)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,  // 1-based
    pub limit: i64,
}

impl PageRequest {
    pub const DEFAULT_LIMIT: i64 = 10;
    pub const MAX_LIMIT: i64 = 100;

    /// Saturates instead of overflowing; a huge page just reads past the end.
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            limit: Self::DEFAULT_LIMIT,
        }
    }
}
