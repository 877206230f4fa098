use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use signoff_core::audit::{AuditEntry, AuditRecorder};
use signoff_core::config::{AppConfig, ConfigError, DirectoryConfig, LoadOptions};
use signoff_core::directory::{DirectoryUser, InMemoryDirectory};
use signoff_core::notify::{Notification, Notifier};
use signoff_core::timeout::RemindPolicy;
use signoff_db::repositories::RepositoryError;
use signoff_db::{connect_with_settings, migrations, seed_demo_workflow, DbPool};
use signoff_engine::Engine;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub engine: Engine,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("demo data seeding failed: {0}")]
    Seed(#[source] RepositoryError),
}

/// Audit sink that writes entries to the structured log. Replaced by a
/// persistent recorder once an audit store is provisioned.
pub struct TracingAuditRecorder;

impl AuditRecorder for TracingAuditRecorder {
    fn record(&self, entry: AuditEntry) {
        info!(
            event_name = "workflow.audit",
            tenant_id = %entry.tenant_id,
            actor_id = entry.actor_id.as_deref().unwrap_or("system"),
            entity_type = %entry.entity_type,
            entity_id = %entry.entity_id,
            action = %entry.action,
            "audit entry recorded"
        );
    }
}

/// Notification sink that logs deliveries instead of sending them. Stands in
/// until a real channel (mail, chat) is wired up.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        info!(
            event_name = "workflow.notification",
            user_id = %notification.user_id,
            template = notification.template.as_str(),
            "notification emitted"
        );
    }
}

fn directory_from_config(config: &DirectoryConfig) -> InMemoryDirectory {
    InMemoryDirectory::with_users(
        config
            .users
            .iter()
            .map(|entry| DirectoryUser {
                user_id: entry.user_id.clone(),
                tenant_id: entry.tenant_id.clone(),
                roles: entry.roles.clone(),
                is_active: entry.is_active,
            })
            .collect(),
    )
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    if config.database.seed_demo_data {
        let seed = seed_demo_workflow(&db_pool).await.map_err(BootstrapError::Seed)?;
        info!(
            event_name = "system.bootstrap.demo_data_seeded",
            tenant_id = %seed.tenant_id,
            flow_id = %seed.flow_id.0,
            "demo workflow seeded"
        );
    }

    let directory = directory_from_config(&config.directory);
    info!(
        event_name = "system.bootstrap.directory_loaded",
        user_count = config.directory.users.len(),
        "static directory roster loaded"
    );

    let engine = Engine::new(
        db_pool.clone(),
        Arc::new(directory),
        Arc::new(TracingAuditRecorder),
        Arc::new(LogNotifier),
        Arc::new(RemindPolicy),
    );

    Ok(Application { config, db_pool, engine })
}
