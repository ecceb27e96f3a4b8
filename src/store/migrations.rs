//! Schema migrations tracked in `_schema_migrations`.
//!
//! Each statement of [`schema::all_schema_statements`] is one migration,
//! recorded with a checksum of its SQL. A recorded migration whose SQL has
//! since changed is a hard error rather than being silently skipped.

use std::collections::HashMap;

use sha2::{Digest, Sha256};
use sqlx::PgPool;
use thiserror::Error;
use tracing::info;

use super::schema;

/// Serializes concurrent `migrate` runs across replicas.
const MIGRATION_LOCK_ID: i64 = 0x636f_6d70_6c69;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Migration '{name}' was applied with checksum {recorded}, current SQL has {current}")]
    ChecksumMismatch {
        name: String,
        recorded: String,
        current: String,
    },
}

/// One schema statement under a stable name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub name: String,
    pub checksum: String,
    pub sql: &'static str,
}

impl Migration {
    fn new(idx: usize, sql: &'static str) -> Self {
        Self {
            name: format!("compliance_v1_part_{}", idx),
            checksum: hex::encode(Sha256::digest(sql.trim().as_bytes())),
            sql,
        }
    }

    /// Every migration in apply order.
    pub fn all() -> Vec<Migration> {
        schema::all_schema_statements()
            .into_iter()
            .enumerate()
            .map(|(idx, sql)| Migration::new(idx, sql))
            .collect()
    }
}

/// What a run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Names applied by this run, in order.
    pub applied: Vec<String>,
    /// Migrations that were already recorded.
    pub up_to_date: usize,
}

/// Selects the migrations not yet recorded, checking recorded ones against
/// their current checksum. Recorded names unknown to this build are ignored.
pub fn pending_migrations<'a>(
    migrations: &'a [Migration],
    recorded: &HashMap<String, String>,
) -> Result<Vec<&'a Migration>, MigrationError> {
    let mut pending = Vec::new();
    for migration in migrations {
        match recorded.get(&migration.name) {
            Some(checksum) if *checksum == migration.checksum => {}
            Some(checksum) => {
                return Err(MigrationError::ChecksumMismatch {
                    name: migration.name.clone(),
                    recorded: checksum.clone(),
                    current: migration.checksum.clone(),
                })
            }
            None => pending.push(migration),
        }
    }
    Ok(pending)
}

pub struct MigrationRunner {
    pool: PgPool,
}

impl MigrationRunner {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies every pending migration in a single transaction.
    pub async fn run_migrations(&self) -> Result<MigrationReport, MigrationError> {
        let migrations = Migration::all();
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(MIGRATION_LOCK_ID)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _schema_migrations (
                name TEXT PRIMARY KEY,
                checksum TEXT NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        let recorded: HashMap<String, String> =
            sqlx::query_as::<_, (String, String)>("SELECT name, checksum FROM _schema_migrations")
                .fetch_all(&mut *tx)
                .await?
                .into_iter()
                .collect();

        let pending = pending_migrations(&migrations, &recorded)?;
        let mut report = MigrationReport {
            applied: Vec::with_capacity(pending.len()),
            up_to_date: migrations.len() - pending.len(),
        };

        for migration in pending {
            sqlx::query(migration.sql)
                .execute(&mut *tx)
                .await
                .map_err(|e| MigrationError::MigrationFailed(format!("{}: {}", migration.name, e)))?;

            sqlx::query("INSERT INTO _schema_migrations (name, checksum) VALUES ($1, $2)")
                .bind(&migration.name)
                .bind(&migration.checksum)
                .execute(&mut *tx)
                .await?;

            info!(migration = %migration.name, "Applied migration");
            report.applied.push(migration.name.clone());
        }

        tx.commit().await?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorded(migrations: &[Migration], count: usize) -> HashMap<String, String> {
        migrations
            .iter()
            .take(count)
            .map(|m| (m.name.clone(), m.checksum.clone()))
            .collect()
    }

    #[test]
    fn test_migrations_have_stable_names_and_distinct_checksums() {
        let migrations = Migration::all();
        assert_eq!(migrations.len(), schema::all_schema_statements().len());
        assert_eq!(migrations[0].name, "compliance_v1_part_0");
        assert_eq!(migrations[0].checksum.len(), 64);
        assert_eq!(Migration::all(), migrations);

        let mut checksums: Vec<&str> = migrations.iter().map(|m| m.checksum.as_str()).collect();
        checksums.sort();
        checksums.dedup();
        assert_eq!(checksums.len(), migrations.len());
    }

    #[test]
    fn test_fresh_database_applies_everything() {
        let migrations = Migration::all();
        let pending = pending_migrations(&migrations, &HashMap::new()).unwrap();
        assert_eq!(pending.len(), migrations.len());
        assert_eq!(pending[0].name, migrations[0].name);
    }

    #[test]
    fn test_only_unrecorded_migrations_are_pending() {
        let migrations = Migration::all();
        let mut applied = recorded(&migrations, 2);
        applied.insert("compliance_v0_retired".to_string(), "abc".to_string());

        let pending = pending_migrations(&migrations, &applied).unwrap();
        let names: Vec<&str> = pending.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names.len(), migrations.len() - 2);
        assert!(!names.contains(&"compliance_v1_part_0"));
        assert!(!names.contains(&"compliance_v1_part_1"));

        let all = recorded(&migrations, migrations.len());
        assert!(pending_migrations(&migrations, &all).unwrap().is_empty());
    }

    #[test]
    fn test_changed_sql_is_rejected() {
        let migrations = Migration::all();
        let mut applied = recorded(&migrations, 1);
        applied.insert(migrations[0].name.clone(), "0".repeat(64));

        let err = pending_migrations(&migrations, &applied).unwrap_err();
        assert!(matches!(err, MigrationError::ChecksumMismatch { ref name, .. } if name == "compliance_v1_part_0"));
        assert!(err.to_string().contains("compliance_v1_part_0"));
    }
}
