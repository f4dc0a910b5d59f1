pub mod jobs;
pub mod logs;
pub mod projects;
pub mod status;
pub mod versions;
