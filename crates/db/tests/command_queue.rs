//! Integration tests for the Postgres-backed command queue.
//!
//! Need a live Postgres via `DATABASE_URL`.

use std::time::Duration;

use sqlx::PgPool;
use spiderd_db::models::command::NewCommand;
use spiderd_db::models::status::CommandStatus;
use spiderd_db::repositories::CommandRepo;

fn execute(job_id: &str) -> NewCommand {
    NewCommand {
        dedup_key: job_id.into(),
        kind: "execute".into(),
        subject_id: job_id.into(),
        max_attempts: 2,
    }
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn duplicate_key_is_rejected(pool: PgPool) {
    assert!(CommandRepo::enqueue(&pool, &execute("abc123")).await.unwrap());
    assert!(!CommandRepo::enqueue(&pool, &execute("abc123")).await.unwrap());

    // Still rejected once claimed (in flight).
    CommandRepo::claim_next(&pool).await.unwrap().unwrap();
    assert!(!CommandRepo::enqueue(&pool, &execute("abc123")).await.unwrap());

    // Released after completion.
    CommandRepo::delete(&pool, "abc123").await.unwrap();
    assert!(CommandRepo::enqueue(&pool, &execute("abc123")).await.unwrap());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn claim_marks_running_and_counts_attempts(pool: PgPool) {
    CommandRepo::enqueue(&pool, &execute("abc123")).await.unwrap();

    let row = CommandRepo::claim_next(&pool).await.unwrap().unwrap();
    assert_eq!(row.dedup_key, "abc123");
    assert_eq!(row.status_id, CommandStatus::Running.id());
    assert_eq!(row.attempts, 1);

    assert!(CommandRepo::claim_next(&pool).await.unwrap().is_none());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn rescheduled_command_waits_for_delay(pool: PgPool) {
    CommandRepo::enqueue(&pool, &execute("abc123")).await.unwrap();
    CommandRepo::claim_next(&pool).await.unwrap().unwrap();

    CommandRepo::reschedule(&pool, "abc123", "engine down", Duration::from_secs(3600))
        .await
        .unwrap();
    assert!(CommandRepo::claim_next(&pool).await.unwrap().is_none());

    let row = CommandRepo::find(&pool, "abc123").await.unwrap().unwrap();
    assert_eq!(row.status_id, CommandStatus::Pending.id());
    assert_eq!(row.last_error.as_deref(), Some("engine down"));

    CommandRepo::reschedule(&pool, "abc123", "engine down", Duration::ZERO)
        .await
        .unwrap();
    let row = CommandRepo::claim_next(&pool).await.unwrap().unwrap();
    assert_eq!(row.attempts, 2);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn stale_claims_are_recovered(pool: PgPool) {
    CommandRepo::enqueue(&pool, &execute("abc123")).await.unwrap();
    CommandRepo::claim_next(&pool).await.unwrap().unwrap();

    assert_eq!(
        CommandRepo::recover_stale(&pool, Duration::from_secs(3600))
            .await
            .unwrap(),
        0
    );

    sqlx::query("UPDATE commands SET claimed_at = NOW() - INTERVAL '2 hours'")
        .execute(&pool)
        .await
        .unwrap();
    assert_eq!(
        CommandRepo::recover_stale(&pool, Duration::from_secs(3600))
            .await
            .unwrap(),
        1
    );
    assert!(CommandRepo::claim_next(&pool).await.unwrap().is_some());
}
