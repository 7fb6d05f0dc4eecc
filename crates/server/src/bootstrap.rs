use std::sync::Arc;

use deedline_core::config::{AppConfig, ConfigError, LoadOptions};
use deedline_core::{AccessGrantWorkflow, GrantPolicy, TicketError, TicketSigner};
use deedline_db::{connect_from_config, migrations, DbPool, SqlGrantStore, SqlPropertyDirectory};
use thiserror::Error;
use tracing::info;

use crate::auth::{ConfiguredTokens, IdentityResolver};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub workflow: AccessGrantWorkflow,
    pub identities: Arc<dyn IdentityResolver>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("download ticket signer could not be built: {0}")]
    Tickets(#[source] TicketError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    let db_pool =
        connect_from_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let workflow = build_workflow(&config, &db_pool)?;
    let identities = ConfiguredTokens::from_config(&config.auth.tokens);
    info!(
        event_name = "system.bootstrap.workflow_ready",
        correlation_id = "bootstrap",
        configured_tokens = identities.len(),
        max_downloads_per_document = workflow.policy().max_downloads_per_document,
        default_expiry_days = workflow.policy().default_expiry_days,
        "access grant workflow ready"
    );

    Ok(Application { config, db_pool, workflow, identities: Arc::new(identities) })
}

pub fn build_workflow(
    config: &AppConfig,
    db_pool: &DbPool,
) -> Result<AccessGrantWorkflow, BootstrapError> {
    let signer = TicketSigner::new(&config.auth.ticket_secret, config.grants.ticket_ttl_hours)
        .map_err(BootstrapError::Tickets)?;

    Ok(AccessGrantWorkflow::new(
        Arc::new(SqlGrantStore::new(db_pool.clone())),
        Arc::new(SqlPropertyDirectory::new(db_pool.clone())),
        signer,
    )
    .with_policy(GrantPolicy::from(&config.grants)))
}
