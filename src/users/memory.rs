use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::users::repo::UserStore;
use crate::users::repo_types::{NewUser, PageRequest, User, UserChanges, UserFilter};

/// In-process `UserStore` used by tests. Mirrors the unique indexes on
/// email and phone.
#[derive(Default)]
pub struct InMemoryUserStore {
    users: RwLock<Vec<User>>,
}

impl InMemoryUserStore {
    fn check_unique(users: &[User], id: Uuid, email: &str, phone: &str) -> anyhow::Result<()> {
        for other in users.iter().filter(|u| u.id != id) {
            if other.email == email {
                anyhow::bail!("duplicate key value violates unique constraint \"users_email_key\"");
            }
            if other.phone == phone {
                anyhow::bail!("duplicate key value violates unique constraint \"users_phone_key\"");
            }
        }
        Ok(())
    }

    async fn touch(&self, id: Uuid, edit: impl FnOnce(&mut User)) -> Option<User> {
        let mut users = self.users.write().await;
        let slot = users.iter_mut().find(|u| u.id == id)?;
        edit(slot);
        slot.updated_at = OffsetDateTime::now_utc();
        Some(slot.clone())
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn insert(&self, new: NewUser) -> anyhow::Result<User> {
        let mut users = self.users.write().await;
        Self::check_unique(&users, new.id, &new.email, &new.phone)?;
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: new.id,
            full_name: new.full_name,
            email: new.email,
            password_hash: new.password_hash,
            phone: new.phone,
            avatar: None,
            bio: None,
            role: new.role,
            online: false,
            active: true,
            tokens: new.tokens,
            created_at: now,
            updated_at: now,
        };
        users.push(user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.users.read().await.iter().find(|u| u.id == id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        Ok(self.users.read().await.iter().find(|u| u.email == email).cloned())
    }

    async fn find_by_token(&self, id: Uuid, token: &str) -> anyhow::Result<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .iter()
            .find(|u| u.id == id && u.holds_token(token))
            .cloned())
    }

    async fn find(&self, filter: &UserFilter, page: PageRequest) -> anyhow::Result<(Vec<User>, i64)> {
        let users = self.users.read().await;
        let mut matching: Vec<User> = users.iter().filter(|u| filter.matches(u)).cloned().collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = matching.len() as i64;
        let docs = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit as usize)
            .collect();
        Ok((docs, total))
    }

    async fn update(&self, id: Uuid, changes: &UserChanges) -> anyhow::Result<Option<User>> {
        let mut users = self.users.write().await;
        let Some(current) = users.iter().find(|u| u.id == id) else {
            return Ok(None);
        };
        let mut next = current.clone();
        changes.apply_to(&mut next);
        Self::check_unique(&users, id, &next.email, &next.phone)?;
        next.updated_at = OffsetDateTime::now_utc();
        let slot = users.iter_mut().find(|u| u.id == id);
        Ok(slot.map(|slot| {
            *slot = next;
            slot.clone()
        }))
    }

    async fn open_session(&self, id: Uuid, token: &str) -> anyhow::Result<Option<User>> {
        Ok(self.touch(id, |u| {
            u.push_token(token.to_string());
            u.online = true;
        })
        .await)
    }

    async fn close_session(&self, id: Uuid, token: &str) -> anyhow::Result<Option<User>> {
        Ok(self.touch(id, |u| {
            u.drop_token(token);
            u.online = false;
        })
        .await)
    }

    async fn remove(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let mut users = self.users.write().await;
        let idx = users.iter().position(|u| u.id == id);
        Ok(idx.map(|i| users.remove(i)))
    }
}
