//! Postgres-backed stores.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crux_core::{BoardConnection, BoardType, ImportedClimbKey, NewAscent, NewBoardConnection};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::debug;
use uuid::Uuid;

use crate::{ConnectionStore, DayBatch, DayCommit, ImportStore, StoreError};

const CONNECTION_COLUMNS: &str = "\
    id, user_id, board_type, username, encrypted_password, board_user_id, \
    last_sync_at, sync_enabled, created_at, updated_at";

const UNIQUE_VIOLATION: &str = "23505";

pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(8)
        .connect(database_url)
        .await
        .context("connecting to postgres")
}

pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .context("running database migrations")
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION))
}

fn connection_from_row(row: &PgRow) -> Result<BoardConnection, StoreError> {
    let board_type: String = row.try_get("board_type")?;
    Ok(BoardConnection {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        board_type: board_type
            .parse()
            .map_err(|err| StoreError::Corrupt(format!("board_connections.board_type: {err}")))?,
        username: row.try_get("username")?,
        encrypted_password: row.try_get("encrypted_password")?,
        board_user_id: row.try_get("board_user_id")?,
        last_sync_at: row.try_get("last_sync_at")?,
        sync_enabled: row.try_get("sync_enabled")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

async fn find_or_create_session(
    tx: &mut Transaction<'_, Postgres>,
    batch: &DayBatch,
) -> Result<(Uuid, bool), StoreError> {
    let existing: Option<Uuid> = sqlx::query_scalar(
        "SELECT id FROM sessions \
         WHERE user_id = $1 AND date = $2 AND session_type = $3 \
         ORDER BY created_at ASC LIMIT 1",
    )
    .bind(batch.user_id)
    .bind(batch.date)
    .bind(batch.session_type.as_str())
    .fetch_optional(&mut **tx)
    .await?;

    if let Some(id) = existing {
        return Ok((id, false));
    }

    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO sessions (id, user_id, date, session_type, notes, is_outdoor) \
         VALUES ($1, $2, $3, $4, $5, FALSE)",
    )
    .bind(id)
    .bind(batch.user_id)
    .bind(batch.date)
    .bind(batch.session_type.as_str())
    .bind(&batch.session_note)
    .execute(&mut **tx)
    .await?;
    Ok((id, true))
}

async fn insert_ascent(
    tx: &mut Transaction<'_, Postgres>,
    session_id: Uuid,
    ascent: &NewAscent,
) -> Result<Uuid, StoreError> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO ascents \
            (id, session_id, name, grade, grade_system, normalized_grade, style, attempts, \
             result, board_type, board_angle, board_climb_uuid, board_climb_url, notes, sort_order) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
    )
    .bind(id)
    .bind(session_id)
    .bind(&ascent.name)
    .bind(&ascent.grade)
    .bind(ascent.grade_system.as_str())
    .bind(ascent.normalized_grade)
    .bind(ascent.style.as_str())
    .bind(ascent.attempts)
    .bind(ascent.result.as_str())
    .bind(ascent.board_type.map(|b| b.as_str()))
    .bind(ascent.board_angle)
    .bind(&ascent.board_climb_uuid)
    .bind(&ascent.board_climb_url)
    .bind(&ascent.notes)
    .bind(ascent.sort_order)
    .execute(&mut **tx)
    .await?;
    Ok(id)
}

async fn insert_imported_climb(
    tx: &mut Transaction<'_, Postgres>,
    key: &ImportedClimbKey,
    ascent_id: Uuid,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO imported_climbs \
            (id, user_id, board_type, board_climb_uuid, board_angle, climbed_at, ascent_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(Uuid::new_v4())
    .bind(key.user_id)
    .bind(key.board_type.as_str())
    .bind(&key.climb_uuid)
    .bind(key.angle)
    .bind(&key.climbed_at)
    .bind(ascent_id)
    .execute(&mut **tx)
    .await
    .map_err(|err| {
        if is_unique_violation(&err) {
            StoreError::duplicate(key)
        } else {
            StoreError::Database(err)
        }
    })?;
    Ok(())
}

#[async_trait]
impl ImportStore for PgStore {
    async fn is_imported(&self, key: &ImportedClimbKey) -> Result<bool, StoreError> {
        let found: bool = sqlx::query_scalar(
            "SELECT EXISTS ( \
                SELECT 1 FROM imported_climbs \
                WHERE user_id = $1 AND board_type = $2 AND board_climb_uuid = $3 \
                  AND board_angle = $4 AND climbed_at = $5)",
        )
        .bind(key.user_id)
        .bind(key.board_type.as_str())
        .bind(&key.climb_uuid)
        .bind(key.angle)
        .bind(&key.climbed_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }

    async fn commit_day(&self, batch: &DayBatch) -> Result<DayCommit, StoreError> {
        let mut tx = self.pool.begin().await?;

        let (session_id, session_created) = find_or_create_session(&mut tx, batch).await?;
        let mut ascent_ids = Vec::with_capacity(batch.ascents.len());
        for item in &batch.ascents {
            let ascent_id = insert_ascent(&mut tx, session_id, &item.ascent).await?;
            insert_imported_climb(&mut tx, &item.key, ascent_id).await?;
            ascent_ids.push(ascent_id);
        }

        tx.commit().await?;
        debug!(
            date = %batch.date,
            %session_id,
            session_created,
            ascents = ascent_ids.len(),
            "committed import day"
        );
        Ok(DayCommit {
            session_id,
            session_created,
            ascent_ids,
        })
    }
}

#[async_trait]
impl ConnectionStore for PgStore {
    async fn insert_connection(
        &self,
        connection: &NewBoardConnection,
    ) -> Result<BoardConnection, StoreError> {
        let query = format!(
            "INSERT INTO board_connections \
                (id, user_id, board_type, username, encrypted_password, board_user_id) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {CONNECTION_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(Uuid::new_v4())
            .bind(connection.user_id)
            .bind(connection.board_type.as_str())
            .bind(&connection.username)
            .bind(&connection.encrypted_password)
            .bind(&connection.board_user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    StoreError::Conflict(format!(
                        "{} connection already exists",
                        connection.board_type
                    ))
                } else {
                    StoreError::Database(err)
                }
            })?;
        connection_from_row(&row)
    }

    async fn list_connections(&self, user_id: Uuid) -> Result<Vec<BoardConnection>, StoreError> {
        let query = format!(
            "SELECT {CONNECTION_COLUMNS} FROM board_connections \
             WHERE user_id = $1 ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query(&query).bind(user_id).fetch_all(&self.pool).await?;
        rows.iter().map(connection_from_row).collect()
    }

    async fn find_connection(
        &self,
        user_id: Uuid,
        connection_id: Uuid,
    ) -> Result<Option<BoardConnection>, StoreError> {
        let query = format!(
            "SELECT {CONNECTION_COLUMNS} FROM board_connections WHERE id = $1 AND user_id = $2"
        );
        let row = sqlx::query(&query)
            .bind(connection_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(connection_from_row).transpose()
    }

    async fn find_connection_by_board(
        &self,
        user_id: Uuid,
        board_type: BoardType,
    ) -> Result<Option<BoardConnection>, StoreError> {
        let query = format!(
            "SELECT {CONNECTION_COLUMNS} FROM board_connections \
             WHERE user_id = $1 AND board_type = $2"
        );
        let row = sqlx::query(&query)
            .bind(user_id)
            .bind(board_type.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(connection_from_row).transpose()
    }

    async fn delete_connection(
        &self,
        user_id: Uuid,
        connection_id: Uuid,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM board_connections WHERE id = $1 AND user_id = $2")
            .bind(connection_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_last_sync(
        &self,
        connection_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE board_connections SET last_sync_at = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(connection_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_board_user_id(
        &self,
        connection_id: Uuid,
        board_user_id: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE board_connections SET board_user_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(connection_id)
        .bind(board_user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_sync_enabled(&self) -> Result<Vec<BoardConnection>, StoreError> {
        let query = format!(
            "SELECT {CONNECTION_COLUMNS} FROM board_connections \
             WHERE sync_enabled ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(connection_from_row).collect()
    }
}
