//! Embedded schema migrations.
//!
//! The MySQL migration set under `migrations/mysql` is compiled into the crate,
//! so fixtures work from any working directory.

use sqlx::migrate::Migrator;
use sqlx::MySqlPool;
use tracing::{debug, instrument};

use crate::error::Result;

/// Forward-only MySQL migrations, in version order
pub static MYSQL_MIGRATOR: Migrator = sqlx::migrate!("./migrations/mysql");

/// Tables the migration set creates
pub const MYSQL_TABLES: &[&str] = &[
    "assertion",
    "authorization_model",
    "changelog",
    "store",
    "tuple",
];

/// Apply every embedded migration not yet recorded in the database.
///
/// Already-applied versions are skipped, so running this twice is a no-op.
pub async fn apply_migrations(pool: &MySqlPool) -> Result<()> {
    run_migrator(&MYSQL_MIGRATOR, pool).await
}

/// Apply the pending migrations of `migrator`.
#[instrument(skip_all)]
pub async fn run_migrator(migrator: &Migrator, pool: &MySqlPool) -> Result<()> {
    let latest = migrator.iter().map(|m| m.version).max().unwrap_or(0);
    debug!(latest, "Applying migrations");
    migrator.run(pool).await?;
    Ok(())
}

/// Highest migration version embedded in this crate
pub fn latest_version() -> i64 {
    MYSQL_MIGRATOR
        .iter()
        .map(|migration| migration.version)
        .max()
        .unwrap_or(0)
}

/// Highest migration version successfully applied to the database
pub async fn database_schema_version(pool: &MySqlPool) -> Result<i64> {
    let version = sqlx::query_scalar::<_, i64>(
        "SELECT CAST(COALESCE(MAX(version), 0) AS SIGNED) FROM _sqlx_migrations WHERE success = TRUE",
    )
    .fetch_one(pool)
    .await?;

    Ok(version)
}
