//! Execution-unit naming convention.
//!
//! A unit is named `{job_id}_{project_id}_{version_id}_{task}`. The name is
//! the only correlation key between a job row and the container running
//! it: the worker creates units under it, the event reconciler recovers
//! the job id from it, and the log gateway looks units up by it. Encode and
//! decode therefore live together here and nowhere else.
//!
//! Job ids never contain the delimiter, so the job id is always the text
//! before the first `_`.

use crate::error::CoreError;

/// Separator between the identity fields of a unit name.
pub const UNIT_NAME_DELIMITER: char = '_';

/// Maximum length of a job id.
pub const MAX_JOB_ID_LEN: usize = 64;

/// Maximum length of any other identity field.
const MAX_FIELD_LEN: usize = 128;

/// The identity tuple a unit name is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitIdentity<'a> {
    pub job_id: &'a str,
    pub project_id: &'a str,
    pub version_id: &'a str,
    pub task: &'a str,
}

/// Generate a fresh job id: a v4 UUID rendered as 32 hex characters.
pub fn new_job_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Check that a job id is usable as the leading field of a unit name.
///
/// Allowed: 1..=64 ASCII alphanumerics and `-`, starting with an
/// alphanumeric. The delimiter is rejected outright, which is what makes
/// [`parse_job_id`] unambiguous.
pub fn validate_job_id(job_id: &str) -> Result<(), CoreError> {
    if job_id.is_empty() {
        return Err(CoreError::Validation("job id must not be empty".into()));
    }
    if job_id.len() > MAX_JOB_ID_LEN {
        return Err(CoreError::Validation(format!(
            "job id must be at most {MAX_JOB_ID_LEN} characters"
        )));
    }
    if job_id.contains(UNIT_NAME_DELIMITER) {
        return Err(CoreError::Validation(format!(
            "job id must not contain '{UNIT_NAME_DELIMITER}'"
        )));
    }
    if !job_id.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        return Err(CoreError::Validation(
            "job id must start with a letter or digit".into(),
        ));
    }
    if !job_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(CoreError::Validation(
            "job id may only contain letters, digits and '-'".into(),
        ));
    }
    Ok(())
}

/// Check a non-leading identity field against the engine's name charset.
///
/// Project and version ids are checked with this when they are created, so
/// every stored record can be named.
pub fn validate_field(field: &'static str, value: &str) -> Result<(), CoreError> {
    if value.is_empty() || value.len() > MAX_FIELD_LEN {
        return Err(CoreError::Validation(format!(
            "{field} must be 1..={MAX_FIELD_LEN} characters"
        )));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
    {
        return Err(CoreError::Validation(format!(
            "{field} may only contain letters, digits, '_', '.' and '-'"
        )));
    }
    Ok(())
}

/// Build the unit name for a job.
///
/// # Examples
///
/// ```
/// use spiderd_core::naming::{unit_name, UnitIdentity};
///
/// let name = unit_name(&UnitIdentity {
///     job_id: "abc123",
///     project_id: "p1",
///     version_id: "v1",
///     task: "news",
/// })
/// .unwrap();
/// assert_eq!(name, "abc123_p1_v1_news");
/// ```
pub fn unit_name(identity: &UnitIdentity<'_>) -> Result<String, CoreError> {
    validate_job_id(identity.job_id)?;
    validate_field("project id", identity.project_id)?;
    validate_field("version id", identity.version_id)?;
    validate_field("task name", identity.task)?;

    Ok([
        identity.job_id,
        identity.project_id,
        identity.version_id,
        identity.task,
    ]
    .join(&UNIT_NAME_DELIMITER.to_string()))
}

/// Recover the job id from a unit name.
///
/// Accepts names with the leading `/` the engine adds in listings. Returns
/// `None` for any name [`unit_name`] could not have produced: fewer than
/// four non-empty fields, or a leading field that is not a valid job id.
pub fn parse_job_id(name: &str) -> Option<&str> {
    let name = name.strip_prefix('/').unwrap_or(name);
    let mut fields = name.splitn(4, UNIT_NAME_DELIMITER);
    let job_id = fields.next()?;
    let rest: Vec<&str> = fields.collect();
    if rest.len() != 3 || rest.iter().any(|f| f.is_empty()) {
        return None;
    }
    validate_job_id(job_id).ok()?;
    Some(job_id)
}
