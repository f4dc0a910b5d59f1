//! Row models and DTOs.
//!
//! Each submodule contains a `FromRow` + `Serialize` entity struct matching
//! the database row and a `Deserialize` create DTO for inserts.

pub mod command;
pub mod job;
pub mod project;
pub mod status;
pub mod version;
