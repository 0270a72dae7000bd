//! Per-page segment caches.
//!
//! Every page identity owns a set of named stores (`original` plus one per
//! variant) and a version stamp. Whole stores are replaced inside a single
//! transaction; conditional replaces compare the version so results computed
//! against a cleared or re-setup page are discarded.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use crate::core::{
    errors::{AppError, AppResult},
    types::{DocumentIdentity, StoreKey, StoreSummary, ORIGINAL_STORE},
};

fn parse_timestamp(value: String) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|v| v.with_timezone(&Utc))
        .map_err(|err| AppError::Database(format!("invalid timestamp {value}: {err}")))
}

fn clock_version() -> i64 {
    Utc::now().timestamp_millis()
}

/// Makes sure `original` and every name in `names` exist for `identity` and
/// moves the identity to a fresh version. Returns that version.
pub async fn ensure_schema(
    pool: &SqlitePool,
    identity: &DocumentIdentity,
    names: &[String],
) -> AppResult<i64> {
    let next = match current_version(pool, identity).await? {
        Some(current) => clock_version().max(current + 1),
        None => clock_version(),
    };
    ensure_schema_at(pool, identity, names, next).await
}

/// Like [`ensure_schema`] with an explicit version. A version older than the
/// stored one wipes the identity and recreates it at `version`.
pub async fn ensure_schema_at(
    pool: &SqlitePool,
    identity: &DocumentIdentity,
    names: &[String],
    version: i64,
) -> AppResult<i64> {
    let mut tx = pool.begin().await?;

    let stored: Option<i64> = sqlx::query("SELECT version FROM page_identities WHERE identity = ?1")
        .bind(identity.as_str())
        .fetch_optional(&mut *tx)
        .await?
        .map(|row| row.try_get("version"))
        .transpose()?;

    match stored {
        Some(current) if version < current => {
            warn!(
                identity = %identity,
                stored = current,
                requested = version,
                "segment cache version went backwards, recreating"
            );
            sqlx::query("DELETE FROM page_identities WHERE identity = ?1")
                .bind(identity.as_str())
                .execute(&mut *tx)
                .await?;
            insert_identity(&mut *tx, identity, version).await?;
        }
        Some(_) => {
            sqlx::query(
                r#"
                UPDATE page_identities
                SET version = ?2,
                    updated_at = (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
                WHERE identity = ?1
                "#,
            )
            .bind(identity.as_str())
            .bind(version)
            .execute(&mut *tx)
            .await?;
        }
        None => insert_identity(&mut *tx, identity, version).await?,
    }

    let mut created = 0u64;
    for name in std::iter::once(ORIGINAL_STORE).chain(names.iter().map(String::as_str)) {
        created += ensure_store(&mut *tx, identity, name).await?;
    }

    tx.commit().await?;
    debug!(identity = %identity, version, created, "segment cache schema ensured");
    Ok(version)
}

pub async fn current_version(pool: &SqlitePool, identity: &DocumentIdentity) -> AppResult<Option<i64>> {
    let row = sqlx::query("SELECT version FROM page_identities WHERE identity = ?1")
        .bind(identity.as_str())
        .fetch_optional(pool)
        .await?;
    row.map(|row| row.try_get("version").map_err(AppError::from))
        .transpose()
}

pub async fn list_stores(pool: &SqlitePool, identity: &DocumentIdentity) -> AppResult<Vec<StoreSummary>> {
    let rows = sqlx::query(
        r#"
        SELECT s.name, s.updated_at, COUNT(r.id) AS item_count
        FROM segment_stores s
        LEFT JOIN segment_records r
          ON r.identity = s.identity AND r.store_name = s.name
        WHERE s.identity = ?1
        GROUP BY s.name, s.updated_at
        ORDER BY s.name ASC
        "#,
    )
    .bind(identity.as_str())
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let updated_at: String = row.try_get("updated_at")?;
            Ok(StoreSummary {
                name: row.try_get("name")?,
                item_count: row.try_get("item_count")?,
                updated_at: parse_timestamp(updated_at)?,
            })
        })
        .collect()
}

/// Clears the store behind `key` and fills it with `items`, atomically.
/// A destroyed identity or store is recreated.
pub async fn replace_all<T: Serialize>(pool: &SqlitePool, key: &StoreKey, items: &[T]) -> AppResult<usize> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO page_identities (identity, version)
        VALUES (?1, ?2)
        ON CONFLICT(identity) DO NOTHING
        "#,
    )
    .bind(key.identity.as_str())
    .bind(clock_version())
    .execute(&mut *tx)
    .await?;
    ensure_store(&mut *tx, &key.identity, &key.store).await?;

    let written = write_records(&mut *tx, key, items).await?;
    tx.commit().await?;
    debug!(store = %key, written, "segment store replaced");
    Ok(written)
}

/// Conditional [`replace_all`]: does nothing and returns `false` when the
/// identity is gone or no longer at `version`.
pub async fn replace_all_at_version<T: Serialize>(
    pool: &SqlitePool,
    key: &StoreKey,
    version: i64,
    items: &[T],
) -> AppResult<bool> {
    let mut tx = pool.begin().await?;

    let affected = sqlx::query(
        r#"
        UPDATE page_identities
        SET updated_at = (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        WHERE identity = ?1 AND version = ?2
        "#,
    )
    .bind(key.identity.as_str())
    .bind(version)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if affected == 0 {
        tx.rollback().await?;
        info!(store = %key, version, "discarding results for a stale segment cache");
        return Ok(false);
    }

    ensure_store(&mut *tx, &key.identity, &key.store).await?;
    let written = write_records(&mut *tx, key, items).await?;
    tx.commit().await?;
    debug!(store = %key, version, written, "segment store replaced");
    Ok(true)
}

pub async fn fetch_all<T: DeserializeOwned>(pool: &SqlitePool, key: &StoreKey) -> AppResult<Vec<T>> {
    let exists = sqlx::query("SELECT 1 FROM segment_stores WHERE identity = ?1 AND name = ?2")
        .bind(key.identity.as_str())
        .bind(&key.store)
        .fetch_optional(pool)
        .await?
        .is_some();
    if !exists {
        return Err(AppError::NotFound(format!("segment store {key}")));
    }

    let rows = sqlx::query(
        r#"
        SELECT payload_json
        FROM segment_records
        WHERE identity = ?1 AND store_name = ?2
        ORDER BY id ASC
        "#,
    )
    .bind(key.identity.as_str())
    .bind(&key.store)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let payload: String = row.try_get("payload_json")?;
            serde_json::from_str(&payload)
                .map_err(|err| AppError::Database(format!("corrupt record in {key}: {err}")))
        })
        .collect()
}

/// Empties every store of `identity` but keeps the stores themselves.
/// Returns `false` when the identity was never set up.
pub async fn clear_all(pool: &SqlitePool, identity: &DocumentIdentity) -> AppResult<bool> {
    let mut tx = pool.begin().await?;

    let bumped = sqlx::query(
        r#"
        UPDATE page_identities
        SET version = MAX(?2, version + 1),
            updated_at = (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        WHERE identity = ?1
        "#,
    )
    .bind(identity.as_str())
    .bind(clock_version())
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if bumped == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    let removed = sqlx::query("DELETE FROM segment_records WHERE identity = ?1")
        .bind(identity.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();
    sqlx::query(
        r#"
        UPDATE segment_stores
        SET updated_at = (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        WHERE identity = ?1
        "#,
    )
    .bind(identity.as_str())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    info!(identity = %identity, removed, "segment cache cleared");
    Ok(true)
}

/// Removes the identity with all of its stores and records.
pub async fn destroy(pool: &SqlitePool, identity: &DocumentIdentity) -> AppResult<bool> {
    let affected = sqlx::query("DELETE FROM page_identities WHERE identity = ?1")
        .bind(identity.as_str())
        .execute(pool)
        .await?
        .rows_affected();
    if affected > 0 {
        info!(identity = %identity, "segment cache destroyed");
    }
    Ok(affected > 0)
}

async fn insert_identity(
    conn: &mut SqliteConnection,
    identity: &DocumentIdentity,
    version: i64,
) -> AppResult<()> {
    sqlx::query("INSERT INTO page_identities (identity, version) VALUES (?1, ?2)")
        .bind(identity.as_str())
        .bind(version)
        .execute(conn)
        .await?;
    Ok(())
}

async fn ensure_store(conn: &mut SqliteConnection, identity: &DocumentIdentity, name: &str) -> AppResult<u64> {
    let affected = sqlx::query(
        r#"
        INSERT INTO segment_stores (identity, name)
        VALUES (?1, ?2)
        ON CONFLICT(identity, name) DO NOTHING
        "#,
    )
    .bind(identity.as_str())
    .bind(name)
    .execute(conn)
    .await?
    .rows_affected();
    Ok(affected)
}

async fn write_records<T: Serialize>(
    conn: &mut SqliteConnection,
    key: &StoreKey,
    items: &[T],
) -> AppResult<usize> {
    sqlx::query("DELETE FROM segment_records WHERE identity = ?1 AND store_name = ?2")
        .bind(key.identity.as_str())
        .bind(&key.store)
        .execute(&mut *conn)
        .await?;

    for item in items {
        let payload = serde_json::to_string(item)
            .map_err(|err| AppError::Internal(format!("failed to encode record for {key}: {err}")))?;
        sqlx::query(
            r#"
            INSERT INTO segment_records (identity, store_name, payload_json)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(key.identity.as_str())
        .bind(&key.store)
        .bind(payload)
        .execute(&mut *conn)
        .await?;
    }

    sqlx::query(
        r#"
        UPDATE segment_stores
        SET updated_at = (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        WHERE identity = ?1 AND name = ?2
        "#,
    )
    .bind(key.identity.as_str())
    .bind(&key.store)
    .execute(&mut *conn)
    .await?;

    Ok(items.len())
}
