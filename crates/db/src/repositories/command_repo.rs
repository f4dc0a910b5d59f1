//! Repository for the `commands` table, the durable work queue.
//!
//! `dedup_key` is the primary key, so the table itself enforces at most
//! one pending or in-flight command per key. Finished commands are deleted,
//! which frees the key for the next enqueue.

use std::time::Duration;

use sqlx::PgPool;

use crate::models::command::{CommandRow, NewCommand};
use crate::models::status::CommandStatus;

/// Column list for `commands` queries.
const COLUMNS: &str = "\
    dedup_key, kind, subject_id, status_id, attempts, max_attempts, last_error, \
    available_at, claimed_at, created_at, updated_at";

/// Provides queue operations over the `commands` table.
pub struct CommandRepo;

impl CommandRepo {
    /// Insert a pending command unless one with the same key exists.
    ///
    /// Returns `false` when the key is already taken.
    pub async fn enqueue(pool: &PgPool, input: &NewCommand) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO commands (dedup_key, kind, subject_id, status_id, max_attempts) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (dedup_key) DO NOTHING",
        )
        .bind(&input.dedup_key)
        .bind(&input.kind)
        .bind(&input.subject_id)
        .bind(CommandStatus::Pending.id())
        .bind(input.max_attempts)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Atomically claim the oldest available pending command.
    ///
    /// Uses `SELECT FOR UPDATE SKIP LOCKED` so concurrent workers never
    /// claim the same row. Increments `attempts`.
    pub async fn claim_next(pool: &PgPool) -> Result<Option<CommandRow>, sqlx::Error> {
        let query = format!(
            "UPDATE commands \
             SET status_id = $1, claimed_at = NOW(), attempts = attempts + 1 \
             WHERE dedup_key = ( \
                 SELECT dedup_key FROM commands \
                 WHERE status_id = $2 AND available_at <= NOW() \
                 ORDER BY created_at ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, CommandRow>(&query)
            .bind(CommandStatus::Running.id())
            .bind(CommandStatus::Pending.id())
            .fetch_optional(pool)
            .await
    }

    /// Find a queued command by key.
    pub async fn find(pool: &PgPool, dedup_key: &str) -> Result<Option<CommandRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM commands WHERE dedup_key = $1");
        sqlx::query_as::<_, CommandRow>(&query)
            .bind(dedup_key)
            .fetch_optional(pool)
            .await
    }

    /// Remove a command, releasing its key. Used for both success and
    /// abandonment.
    pub async fn delete(pool: &PgPool, dedup_key: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM commands WHERE dedup_key = $1")
            .bind(dedup_key)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Put a claimed command back to pending, available after `delay`.
    pub async fn reschedule(
        pool: &PgPool,
        dedup_key: &str,
        error: &str,
        delay: Duration,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE commands \
             SET status_id = $2, last_error = $3, claimed_at = NULL, \
                 available_at = NOW() + make_interval(secs => $4) \
             WHERE dedup_key = $1",
        )
        .bind(dedup_key)
        .bind(CommandStatus::Pending.id())
        .bind(error)
        .bind(delay.as_secs_f64())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Reset commands claimed longer than `lease` ago to pending.
    ///
    /// Covers workers that died mid-command. Returns the number of rows
    /// recovered.
    pub async fn recover_stale(pool: &PgPool, lease: Duration) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE commands \
             SET status_id = $1, claimed_at = NULL, available_at = NOW() \
             WHERE status_id = $2 \
               AND claimed_at < NOW() - make_interval(secs => $3)",
        )
        .bind(CommandStatus::Pending.id())
        .bind(CommandStatus::Running.id())
        .bind(lease.as_secs_f64())
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
