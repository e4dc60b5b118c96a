//! # Database Migration System
//!
//! Applies `migrations/*.sql` files in version order and records each applied
//! version in `orderflow_schema_migrations`.
//!
//! Several scheduler instances may start at once against the same database, so
//! the whole run happens under a PostgreSQL advisory lock:
//!
//! ```sql
//! SELECT pg_advisory_lock(7230581440170655)
//! -- apply outstanding migrations
//! SELECT pg_advisory_unlock(7230581440170655)
//! ```
//!
//! Files follow the `YYYYMMDDHHMMSS_description.sql` naming convention; anything
//! else in the directory is ignored.

use crate::constants::tables;
use sqlx::{PgPool, Row};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const MIGRATION_LOCK_KEY: i64 = 7230581440170655;

/// A single migration file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// Version timestamp (YYYYMMDDHHMMSS format)
    pub version: String,
    /// Human-readable migration name
    pub name: String,
    /// Full path to the SQL file
    pub path: PathBuf,
}

pub struct DatabaseMigrations;

impl DatabaseMigrations {
    /// Apply every outstanding migration found in `migrations_dir`.
    ///
    /// Returns the versions applied by this call.
    pub async fn run_all(pool: &PgPool, migrations_dir: &Path) -> Result<Vec<String>, sqlx::Error> {
        // Session-level lock: pin one connection for lock, work and unlock
        let mut lock_conn = pool.acquire().await?;
        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *lock_conn)
            .await?;

        let result = Self::run_outstanding_migrations(pool, migrations_dir).await;

        let unlock = sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *lock_conn)
            .await
            .map(|_| ());
        if unlock.is_err() {
            // Closing the session releases the lock; it must not go back to the pool
            drop(lock_conn.detach());
        }

        Self::migration_outcome(result, unlock)
    }

    /// A failed unlock is logged; the migration result is what the caller gets
    fn migration_outcome(
        result: Result<Vec<String>, sqlx::Error>,
        unlock: Result<(), sqlx::Error>,
    ) -> Result<Vec<String>, sqlx::Error> {
        if let Err(e) = unlock {
            warn!(error = %e, "Failed to release migration advisory lock");
        }
        result
    }

    async fn run_outstanding_migrations(
        pool: &PgPool,
        migrations_dir: &Path,
    ) -> Result<Vec<String>, sqlx::Error> {
        Self::ensure_migration_table(pool).await?;

        let migrations = Self::discover_migrations(migrations_dir)?;
        let applied_migrations = Self::get_applied_migrations(pool).await?;
        let mut newly_applied = Vec::new();

        for migration in migrations.values() {
            if applied_migrations.contains(&migration.version) {
                debug!(version = %migration.version, "Migration already applied");
                continue;
            }

            info!(
                version = %migration.version,
                name = %migration.name,
                "Applying migration"
            );
            Self::run_migration(pool, migration).await?;
            newly_applied.push(migration.version.clone());
        }

        Ok(newly_applied)
    }

    /// Discover all migration files in `migrations_dir`, keyed by version
    pub fn discover_migrations(
        migrations_dir: &Path,
    ) -> Result<BTreeMap<String, Migration>, sqlx::Error> {
        if !migrations_dir.exists() {
            return Ok(BTreeMap::new());
        }

        let mut migrations = BTreeMap::new();

        for entry in fs::read_dir(migrations_dir).map_err(sqlx::Error::Io)? {
            let entry = entry.map_err(sqlx::Error::Io)?;
            let path = entry.path();

            if path.is_file() && path.extension().map(|s| s == "sql").unwrap_or(false) {
                if let Some(filename) = path.file_stem().and_then(|s| s.to_str()) {
                    if let Some((version, name)) = Self::parse_migration_filename(filename) {
                        migrations.insert(
                            version.clone(),
                            Migration {
                                version,
                                name,
                                path,
                            },
                        );
                    }
                }
            }
        }

        Ok(migrations)
    }

    /// Split `YYYYMMDDHHMMSS_migration_name` into version and readable name
    fn parse_migration_filename(filename: &str) -> Option<(String, String)> {
        if filename.len() < 15 || !filename.is_char_boundary(14) {
            return None;
        }

        let (version_part, name_part) = filename.split_at(14);
        if !version_part.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }

        let name = name_part
            .strip_prefix('_')
            .unwrap_or(name_part)
            .replace('_', " ");

        Some((version_part.to_string(), name))
    }

    async fn ensure_migration_table(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                version VARCHAR(14) PRIMARY KEY,
                applied_at TIMESTAMP WITHOUT TIME ZONE DEFAULT NOW()
            )",
            tables::SCHEMA_MIGRATIONS
        ))
        .execute(pool)
        .await?;

        Ok(())
    }

    async fn get_applied_migrations(pool: &PgPool) -> Result<HashSet<String>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "SELECT version FROM {}",
            tables::SCHEMA_MIGRATIONS
        ))
        .fetch_all(pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>("version"))
            .collect())
    }

    /// Execute one migration and record its version atomically
    async fn run_migration(pool: &PgPool, migration: &Migration) -> Result<(), sqlx::Error> {
        let sql = fs::read_to_string(&migration.path).map_err(sqlx::Error::Io)?;

        let mut tx = pool.begin().await?;
        sqlx::raw_sql(&sql).execute(&mut *tx).await?;
        sqlx::query(&format!(
            "INSERT INTO {} (version) VALUES ($1)",
            tables::SCHEMA_MIGRATIONS
        ))
        .bind(&migration.version)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(())
    }
}
