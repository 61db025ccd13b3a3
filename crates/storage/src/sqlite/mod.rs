use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

use snafu::ResultExt;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

use super::error::{
    CreateSqliteDirectorySnafu, SqliteConnectOptionsSnafu, SqliteConnectSnafu, SqliteMigrateSnafu,
    SqlitePragmaSnafu, SqliteQuerySnafu, StorageResult,
};
use super::kv::{BoxFuture, KeyValueStore};

/// `kv_entries` table in a single sqlite file.
#[derive(Debug, Clone)]
pub struct SqliteKeyValueStore {
    pool: SqlitePool,
    database_url: String,
}

impl SqliteKeyValueStore {
    pub async fn open(database_location: &str) -> StorageResult<Self> {
        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let connect_options = SqliteConnectOptions::from_str(&database_url)
            .context(SqliteConnectOptionsSnafu {
                stage: "sqlite-open-parse-url",
                database_url: database_url.clone(),
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5_000));

        // One connection: writes are serialized and `:memory:` databases stay shared.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await
            .context(SqliteConnectSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        sqlx::query("PRAGMA busy_timeout = 5000;")
            .execute(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-busy-timeout",
                pragma: "busy_timeout",
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(SqliteMigrateSnafu {
                stage: "sqlite-open-migrate",
            })?;

        tracing::debug!(database_url = %database_url, "opened sqlite key-value store");
        Ok(Self { pool, database_url })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }
}

impl KeyValueStore for SqliteKeyValueStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StorageResult<Option<String>>> {
        Box::pin(async move {
            sqlx::query_scalar::<_, String>("SELECT value FROM kv_entries WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .context(SqliteQuerySnafu {
                    stage: "kv-get-select",
                })
        })
    }

    fn put<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO kv_entries (key, value, updated_at) VALUES (?, ?, ?) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            )
            .bind(key)
            .bind(value)
            .bind(unix_timestamp_seconds())
            .execute(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "kv-put-upsert",
            })?;
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            sqlx::query("DELETE FROM kv_entries WHERE key = ?")
                .bind(key)
                .execute(&self.pool)
                .await
                .context(SqliteQuerySnafu {
                    stage: "kv-delete",
                })?;
            Ok(())
        })
    }
}

fn unix_timestamp_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0_i64, |duration| duration.as_secs() as i64)
}

fn ensure_database_directory(database_location: &str) -> StorageResult<()> {
    if database_location.starts_with("sqlite:") || database_location == ":memory:" {
        return Ok(());
    }

    let path = Path::new(database_location);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateSqliteDirectorySnafu {
            stage: "sqlite-open-create-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    if database_location == ":memory:" {
        return "sqlite::memory:".to_string();
    }

    format!("sqlite://{database_location}")
}
