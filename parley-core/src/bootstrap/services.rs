//! Collaborator construction

use anyhow::Result;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    service::{IdentityService, JwtIdentityService, MemoryPersistence, PersistenceService, PgPersistence},
    Config,
};

use super::init_database;

/// External collaborators the relay consumes
#[derive(Clone)]
pub struct CoreServices {
    pub identity: Arc<dyn IdentityService>,
    pub persistence: Arc<dyn PersistenceService>,
    /// Present when persistence is database-backed; closed on shutdown
    pub pool: Option<PgPool>,
}

/// Build the identity service and pick a persistence backend.
pub async fn init_services(config: &Config) -> Result<CoreServices> {
    let identity = Arc::new(JwtIdentityService::from_config(&config.auth)?);

    let (persistence, pool): (Arc<dyn PersistenceService>, Option<PgPool>) =
        if config.uses_database() {
            let pool = init_database(config).await?;
            info!("Using PostgreSQL persistence");
            (Arc::new(PgPersistence::new(pool.clone())), Some(pool))
        } else {
            warn!("database.url is empty, chat history and rooms are kept in memory only");
            (Arc::new(MemoryPersistence::new()), None)
        };

    Ok(CoreServices {
        identity,
        persistence,
        pool,
    })
}
