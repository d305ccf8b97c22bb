use std::sync::Arc;
use std::time::Duration;

use santa_core::config::{AppConfig, ConfigError, LoadOptions};
use santa_core::matching::MatchingEngine;
use santa_db::{connection, migrations, DbPool, SqlParticipantStore};
use santa_slack::{CommandRouter, NotificationError, ResponseUrlNotifier, SecretSantaService};
use thiserror::Error;
use tracing::info;

use crate::routes::SantaRouter;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub commands: Arc<SantaRouter>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("notifier setup failed: {0}")]
    Notifier(#[from] NotificationError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connection::connect_with_config(&config.database)
        .await
        .map_err(BootstrapError::DatabaseConnect)?;
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

    let notifier = ResponseUrlNotifier::new(&config.notifier)?;
    let service = SecretSantaService::new(
        Arc::new(
            SqlParticipantStore::new(db_pool.clone())
                .with_matching_lease(Duration::from_secs(config.matching.lease_secs)),
        ),
        Arc::new(notifier),
        MatchingEngine::new(config.matching.max_redraws),
    );

    Ok(Application { config, db_pool, commands: Arc::new(CommandRouter::new(service)) })
}

#[cfg(test)]
mod tests {
    use santa_core::config::{ConfigOverrides, LoadOptions};

    use crate::bootstrap::{bootstrap, BootstrapError};

    #[tokio::test]
    async fn bootstrap_fails_fast_on_invalid_config() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                port: Some(0),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let error = result.err().expect("invalid port must fail");
        assert!(matches!(error, BootstrapError::Config(_)));
        assert!(error.to_string().contains("server.port"));
    }

    #[tokio::test]
    async fn bootstrap_connects_and_migrates() {
        let app = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await
        .expect("bootstrap should succeed with an in-memory database");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('participant', 'santa_scope')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("tables should be queryable after bootstrap");
        assert_eq!(table_count, 2);

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn unreachable_database_is_reported() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite:///nonexistent-dir/santa.db".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        assert!(matches!(result, Err(BootstrapError::DatabaseConnect(_))));
    }
}
