//! Durable work-queue seam.
//!
//! The queue owns deduplication: [`CommandQueue::push`] refuses a command
//! whose [`dedup_key`](Command::dedup_key) is already pending or claimed,
//! and the key stays taken until the command is completed or abandoned.

use std::time::Duration;

use async_trait::async_trait;
use spiderd_core::commands::Command;
use spiderd_db::models::command::{CommandRow, NewCommand};
use spiderd_db::repositories::CommandRepo;
use sqlx::PgPool;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row that does not decode to a [`Command`]. It has been
    /// dropped from the queue.
    #[error("Malformed command {key}: {reason}")]
    Malformed { key: String, reason: String },
}

/// A command handed to one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedCommand {
    pub command: Command,
    /// 1-based attempt number of this claim.
    pub attempt: u32,
    pub max_attempts: u32,
}

impl ClaimedCommand {
    pub fn key(&self) -> String {
        self.command.dedup_key()
    }
}

#[async_trait]
pub trait CommandQueue: Send + Sync {
    /// Enqueue unless the key is taken. Returns `false` when it is.
    async fn push(&self, command: &Command, max_attempts: u32) -> Result<bool, QueueError>;

    /// Claim the next available command, if any.
    async fn claim(&self) -> Result<Option<ClaimedCommand>, QueueError>;

    /// Drop a command that succeeded, releasing its key.
    async fn complete(&self, key: &str) -> Result<(), QueueError>;

    /// Return a claimed command to the queue after `delay`.
    async fn retry(&self, key: &str, error: &str, delay: Duration) -> Result<(), QueueError>;

    /// Drop a command that will not be retried, releasing its key.
    async fn abandon(&self, key: &str, error: &str) -> Result<(), QueueError>;

    /// Re-queue claims older than `lease`. Returns how many were recovered.
    async fn recover_stale(&self, lease: Duration) -> Result<u64, QueueError>;
}

/// [`CommandQueue`] on the `commands` table.
#[derive(Clone)]
pub struct PgCommandQueue {
    pool: PgPool,
}

impl PgCommandQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn decode(row: CommandRow) -> Result<ClaimedCommand, QueueError> {
    let command =
        Command::from_parts(&row.kind, &row.subject_id).map_err(|e| QueueError::Malformed {
            key: row.dedup_key.clone(),
            reason: e.to_string(),
        })?;

    Ok(ClaimedCommand {
        command,
        attempt: row.attempts.max(1) as u32,
        max_attempts: row.max_attempts.max(1) as u32,
    })
}

#[async_trait]
impl CommandQueue for PgCommandQueue {
    async fn push(&self, command: &Command, max_attempts: u32) -> Result<bool, QueueError> {
        let input = NewCommand {
            dedup_key: command.dedup_key(),
            kind: command.kind().as_str().to_string(),
            subject_id: command.subject_id().to_string(),
            max_attempts: max_attempts.max(1) as i32,
        };
        Ok(CommandRepo::enqueue(&self.pool, &input).await?)
    }

    async fn claim(&self) -> Result<Option<ClaimedCommand>, QueueError> {
        let Some(row) = CommandRepo::claim_next(&self.pool).await? else {
            return Ok(None);
        };

        let key = row.dedup_key.clone();
        match decode(row) {
            Ok(claimed) => Ok(Some(claimed)),
            Err(e) => {
                CommandRepo::delete(&self.pool, &key).await?;
                Err(e)
            }
        }
    }

    async fn complete(&self, key: &str) -> Result<(), QueueError> {
        CommandRepo::delete(&self.pool, key).await?;
        Ok(())
    }

    async fn retry(&self, key: &str, error: &str, delay: Duration) -> Result<(), QueueError> {
        CommandRepo::reschedule(&self.pool, key, error, delay).await?;
        Ok(())
    }

    async fn abandon(&self, key: &str, _error: &str) -> Result<(), QueueError> {
        CommandRepo::delete(&self.pool, key).await?;
        Ok(())
    }

    async fn recover_stale(&self, lease: Duration) -> Result<u64, QueueError> {
        Ok(CommandRepo::recover_stale(&self.pool, lease).await?)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Utc;
    use spiderd_db::models::status::CommandStatus;

    use super::*;

    fn row(kind: &str, subject: &str, attempts: i32) -> CommandRow {
        CommandRow {
            dedup_key: subject.to_string(),
            kind: kind.to_string(),
            subject_id: subject.to_string(),
            status_id: CommandStatus::Running.id(),
            attempts,
            max_attempts: 2,
            last_error: None,
            available_at: Utc::now(),
            claimed_at: Some(Utc::now()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn decodes_stored_rows() {
        let claimed = decode(row("cancel", "abc123", 2)).unwrap();
        assert_eq!(
            claimed.command,
            Command::Cancel {
                job_id: "abc123".into()
            }
        );
        assert_eq!(claimed.attempt, 2);
        assert_eq!(claimed.max_attempts, 2);
        assert_eq!(claimed.key(), "abc123");
    }

    #[test]
    fn unknown_kind_is_malformed() {
        assert_matches!(
            decode(row("reboot", "abc123", 1)),
            Err(QueueError::Malformed { key, .. }) if key == "abc123"
        );
    }
}
