//! Integration tests for job status compare-and-set semantics.
//!
//! Need a live Postgres via `DATABASE_URL`.

use sqlx::PgPool;
use spiderd_db::models::job::{CreateJob, JobListQuery};
use spiderd_db::models::project::CreateProject;
use spiderd_db::models::status::JobStatus;
use spiderd_db::models::version::CreateVersion;
use spiderd_db::repositories::{JobRepo, ProjectRepo, VersionRepo};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn seed_job(pool: &PgPool, job_id: &str) {
    ProjectRepo::create(pool, &CreateProject { id: "p1".into() })
        .await
        .ok();
    VersionRepo::create(
        pool,
        &CreateVersion {
            id: "v1".into(),
            project_id: "p1".into(),
            image: "scrapers/p1:v1".into(),
        },
    )
    .await
    .ok();
    JobRepo::create(
        pool,
        &CreateJob {
            id: job_id.into(),
            project_id: "p1".into(),
            version_id: "v1".into(),
            spider: "news".into(),
            settings: String::new(),
        },
    )
    .await
    .unwrap();
}

async fn status_of(pool: &PgPool, job_id: &str) -> Option<JobStatus> {
    JobRepo::find_by_id(pool, job_id)
        .await
        .unwrap()
        .and_then(|j| j.status())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn new_jobs_start_pending(pool: PgPool) {
    seed_job(&pool, "abc123").await;
    assert_eq!(status_of(&pool, "abc123").await, Some(JobStatus::Pending));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn transition_refuses_terminal_rows(pool: PgPool) {
    seed_job(&pool, "abc123").await;

    let moved = JobRepo::transition(&pool, "abc123", &JobStatus::ACTIVE, JobStatus::Finished)
        .await
        .unwrap();
    assert!(moved);

    let moved = JobRepo::transition(&pool, "abc123", &JobStatus::ACTIVE, JobStatus::Cancelled)
        .await
        .unwrap();
    assert!(!moved);
    assert_eq!(status_of(&pool, "abc123").await, Some(JobStatus::Finished));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn finish_unit_requires_matching_unit(pool: PgPool) {
    seed_job(&pool, "abc123").await;
    assert!(JobRepo::attach_unit(&pool, "abc123", "unit-a").await.unwrap());
    JobRepo::transition(&pool, "abc123", &[JobStatus::Pending], JobStatus::Running)
        .await
        .unwrap();

    assert!(!JobRepo::finish_unit(&pool, "abc123", "unit-old").await.unwrap());
    assert_eq!(status_of(&pool, "abc123").await, Some(JobStatus::Running));

    assert!(JobRepo::finish_unit(&pool, "abc123", "unit-a").await.unwrap());
    assert!(!JobRepo::finish_unit(&pool, "abc123", "unit-a").await.unwrap());
    assert_eq!(status_of(&pool, "abc123").await, Some(JobStatus::Finished));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn attach_unit_only_while_pending(pool: PgPool) {
    seed_job(&pool, "abc123").await;
    JobRepo::transition(&pool, "abc123", &[JobStatus::Pending], JobStatus::Cancelled)
        .await
        .unwrap();

    assert!(!JobRepo::attach_unit(&pool, "abc123", "unit-a").await.unwrap());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn detach_unit_unlinks_only_the_recorded_pending_unit(pool: PgPool) {
    seed_job(&pool, "abc123").await;
    JobRepo::attach_unit(&pool, "abc123", "unit-a").await.unwrap();

    assert!(!JobRepo::detach_unit(&pool, "abc123", "unit-b").await.unwrap());
    assert!(JobRepo::detach_unit(&pool, "abc123", "unit-a").await.unwrap());

    // The old unit's exit no longer touches the job.
    assert!(!JobRepo::finish_unit(&pool, "abc123", "unit-a").await.unwrap());
    let job = JobRepo::find_by_id(&pool, "abc123").await.unwrap().unwrap();
    assert_eq!(job.status(), Some(JobStatus::Pending));
    assert_eq!(job.unit_id, None);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn detach_unit_leaves_running_jobs_alone(pool: PgPool) {
    seed_job(&pool, "abc123").await;
    JobRepo::attach_unit(&pool, "abc123", "unit-a").await.unwrap();
    JobRepo::transition(&pool, "abc123", &[JobStatus::Pending], JobStatus::Running)
        .await
        .unwrap();

    assert!(!JobRepo::detach_unit(&pool, "abc123", "unit-a").await.unwrap());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn count_by_status_groups_jobs(pool: PgPool) {
    seed_job(&pool, "job-1").await;
    seed_job(&pool, "job-2").await;
    seed_job(&pool, "job-3").await;
    JobRepo::transition(&pool, "job-3", &[JobStatus::Pending], JobStatus::Running)
        .await
        .unwrap();

    let counts = JobRepo::count_by_status(&pool).await.unwrap();
    assert_eq!(counts.pending, 2);
    assert_eq!(counts.running, 1);
    assert_eq!(counts.finished, 0);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn rearm_clears_unit_and_status(pool: PgPool) {
    seed_job(&pool, "abc123").await;
    JobRepo::attach_unit(&pool, "abc123", "unit-a").await.unwrap();
    JobRepo::transition(&pool, "abc123", &JobStatus::ACTIVE, JobStatus::Cancelled)
        .await
        .unwrap();

    assert!(JobRepo::rearm(&pool, "abc123").await.unwrap());

    let job = JobRepo::find_by_id(&pool, "abc123").await.unwrap().unwrap();
    assert_eq!(job.status(), Some(JobStatus::Pending));
    assert_eq!(job.unit_id, None);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn deleting_project_cascades_to_jobs(pool: PgPool) {
    seed_job(&pool, "abc123").await;
    assert!(ProjectRepo::delete(&pool, "p1").await.unwrap());
    assert!(JobRepo::find_by_id(&pool, "abc123").await.unwrap().is_none());
    assert!(VersionRepo::find_by_id(&pool, "v1").await.unwrap().is_none());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn list_filters_by_status(pool: PgPool) {
    seed_job(&pool, "job-1").await;
    seed_job(&pool, "job-2").await;
    JobRepo::transition(&pool, "job-2", &[JobStatus::Pending], JobStatus::Running)
        .await
        .unwrap();

    let running = JobRepo::list(
        &pool,
        &JobListQuery {
            status_id: Some(JobStatus::Running.id()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].id, "job-2");

    let listed = JobRepo::list_running(&pool).await.unwrap();
    assert_eq!(listed.len(), 1);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn set_spiders_is_visible_on_version(pool: PgPool) {
    seed_job(&pool, "abc123").await;
    let names = vec!["news".to_string(), "quotes".to_string()];
    assert!(VersionRepo::set_spiders(&pool, "v1", &names).await.unwrap());

    let version = VersionRepo::find_by_id(&pool, "v1").await.unwrap().unwrap();
    assert!(version.has_spider("quotes"));
    assert!(!version.has_spider("weather"));
}
