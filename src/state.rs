use std::sync::Arc;

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::auth::JwtKeys;
use crate::config::AppConfig;
use crate::socket::hub::SocketHub;
use crate::storage::{ImageStore, LocalImageStore};
use crate::users::repo::{PgUserStore, UserStore};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn UserStore>,
    pub images: Arc<dyn ImageStore>,
    pub config: Arc<AppConfig>,
    /// Built once from `config.jwt`.
    pub jwt: Arc<JwtKeys>,
    pub hub: SocketHub,
}

impl AppState {
    /// Connects to Postgres and prepares the images directory.
    /// Returns the pool as well so the caller can run migrations.
    pub async fn init() -> anyhow::Result<(Self, PgPool)> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        let images = Arc::new(LocalImageStore::new(&config.images_dir).await?) as Arc<dyn ImageStore>;
        let store = Arc::new(PgUserStore::new(db.clone())) as Arc<dyn UserStore>;

        Ok((Self::from_parts(store, images, config), db))
    }

    pub fn from_parts(
        store: Arc<dyn UserStore>,
        images: Arc<dyn ImageStore>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            store,
            images,
            jwt: Arc::new(JwtKeys::from(&config.jwt)),
            config,
            hub: SocketHub::default(),
        }
    }
}
