//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async CRUD methods
//! that accept `&PgPool` as the first argument.

pub mod command_repo;
pub mod job_repo;
pub mod project_repo;
pub mod version_repo;

pub use command_repo::CommandRepo;
pub use job_repo::JobRepo;
pub use project_repo::ProjectRepo;
pub use version_repo::VersionRepo;
