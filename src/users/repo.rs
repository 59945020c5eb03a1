use anyhow::Context;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::users::repo_types::{NewUser, PageRequest, User, UserChanges, UserFilter};

const USER_COLUMNS: &str = "id, full_name, email, password_hash, phone, avatar, bio, role, \
                            online, active, tokens, created_at, updated_at";

/// Persistence seam for users. Entity functions only talk to this trait.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn insert(&self, new: NewUser) -> anyhow::Result<User>;
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    /// Finds the user only while `token` is still in its token list.
    async fn find_by_token(&self, id: Uuid, token: &str) -> anyhow::Result<Option<User>>;
    async fn find(&self, filter: &UserFilter, page: PageRequest) -> anyhow::Result<(Vec<User>, i64)>;
    /// Writes only the columns set in `changes`. `None` if the user is gone.
    async fn update(&self, id: Uuid, changes: &UserChanges) -> anyhow::Result<Option<User>>;
    /// Prepends `token` to the token list and marks the user online.
    async fn open_session(&self, id: Uuid, token: &str) -> anyhow::Result<Option<User>>;
    /// Removes `token` from the token list and marks the user offline.
    async fn close_session(&self, id: Uuid, token: &str) -> anyhow::Result<Option<User>>;
    async fn remove(&self, id: Uuid) -> anyhow::Result<Option<User>>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &UserFilter) {
    qb.push(" WHERE TRUE");
    if let Some(role) = filter.role {
        qb.push(" AND role = ").push_bind(role);
    }
    if let Some(active) = filter.active {
        qb.push(" AND active = ").push_bind(active);
    }
    if let Some(online) = filter.online {
        qb.push(" AND online = ").push_bind(online);
    }
    if let Some(email) = &filter.email {
        qb.push(" AND email = ").push_bind(email.clone());
    }
    if let Some(phone) = &filter.phone {
        qb.push(" AND phone = ").push_bind(phone.clone());
    }
}

fn push_changes(qb: &mut QueryBuilder<'_, Postgres>, id: Uuid, changes: &UserChanges) {
    qb.push("UPDATE users SET updated_at = now()");
    if let Some(v) = &changes.full_name {
        qb.push(", full_name = ").push_bind(v.clone());
    }
    if let Some(v) = &changes.email {
        qb.push(", email = ").push_bind(v.clone());
    }
    if let Some(v) = &changes.phone {
        qb.push(", phone = ").push_bind(v.clone());
    }
    if let Some(v) = &changes.avatar {
        qb.push(", avatar = ").push_bind(v.clone());
    }
    if let Some(v) = &changes.bio {
        qb.push(", bio = ").push_bind(v.clone());
    }
    if let Some(v) = changes.role {
        qb.push(", role = ").push_bind(v);
    }
    if let Some(v) = changes.online {
        qb.push(", online = ").push_bind(v);
    }
    if let Some(v) = changes.active {
        qb.push(", active = ").push_bind(v);
    }
    qb.push(" WHERE id = ").push_bind(id);
    qb.push(" RETURNING ").push(USER_COLUMNS);
}

const OPEN_SESSION_SQL: &str = "UPDATE users \
     SET tokens = array_prepend($2, tokens), online = TRUE, updated_at = now() \
     WHERE id = $1 RETURNING ";

const CLOSE_SESSION_SQL: &str = "UPDATE users \
     SET tokens = array_remove(tokens, $2), online = FALSE, updated_at = now() \
     WHERE id = $1 RETURNING ";

#[async_trait]
impl UserStore for PgUserStore {
    async fn insert(&self, new: NewUser) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, full_name, email, password_hash, phone, role, tokens)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(new.id)
        .bind(&new.full_name)
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(&new.phone)
        .bind(new.role)
        .bind(&new.tokens)
        .fetch_one(&self.db)
        .await
        .context("insert user")?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find user by id")?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    async fn find_by_token(&self, id: Uuid, token: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND $2 = ANY(tokens)"
        ))
        .bind(id)
        .bind(token)
        .fetch_optional(&self.db)
        .await
        .context("find user by token")?;
        Ok(user)
    }

    async fn find(&self, filter: &UserFilter, page: PageRequest) -> anyhow::Result<(Vec<User>, i64)> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users");
        push_filter(&mut count, filter);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.db)
            .await
            .context("count users")?;

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT {USER_COLUMNS} FROM users"));
        push_filter(&mut select, filter);
        select
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(page.limit)
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows = select
            .build_query_as::<User>()
            .fetch_all(&self.db)
            .await
            .context("list users")?;

        Ok((rows, total))
    }

    async fn update(&self, id: Uuid, changes: &UserChanges) -> anyhow::Result<Option<User>> {
        let mut qb = QueryBuilder::<Postgres>::new("");
        push_changes(&mut qb, id, changes);
        let user = qb
            .build_query_as::<User>()
            .fetch_optional(&self.db)
            .await
            .with_context(|| format!("update user {id}"))?;
        Ok(user)
    }

    async fn open_session(&self, id: Uuid, token: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!("{OPEN_SESSION_SQL}{USER_COLUMNS}"))
            .bind(id)
            .bind(token)
            .fetch_optional(&self.db)
            .await
            .with_context(|| format!("open session for user {id}"))?;
        Ok(user)
    }

    async fn close_session(&self, id: Uuid, token: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!("{CLOSE_SESSION_SQL}{USER_COLUMNS}"))
            .bind(id)
            .bind(token)
            .fetch_optional(&self.db)
            .await
            .with_context(|| format!("close session for user {id}"))?;
        Ok(user)
    }

    async fn remove(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "DELETE FROM users WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("delete user")?;
        Ok(user)
    }
}
