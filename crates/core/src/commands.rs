//! Lifecycle commands carried by the work queue.
//!
//! A [`Command`] is a closed set of variants consumed by one exhaustive
//! handler in the worker. On the wire (the `commands` table) it is stored
//! as a `kind` string plus a subject id, and rebuilt with
//! [`Command::from_parts`].
//!
//! The queue deduplicates on [`Command::dedup_key`]. For every job command
//! the key is the bare job id, so at most one command per job is pending
//! or in flight at any time, whichever its kind. Version and project
//! commands use namespaced keys (`version:{id}`, `project:{id}`), so an
//! inspection and a deletion of the same version cannot overlap.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Prefix of dedup keys for version commands. Job ids cannot contain `:`,
/// so these keys never collide with a job's key.
const VERSION_KEY_PREFIX: &str = "version:";
const PROJECT_KEY_PREFIX: &str = "project:";

/// Discriminant of a [`Command`], as stored in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Execute,
    Cancel,
    Restart,
    Delete,
    InspectVersion,
    DeleteVersion,
    DeleteProject,
}

impl CommandKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::Execute => "execute",
            CommandKind::Cancel => "cancel",
            CommandKind::Restart => "restart",
            CommandKind::Delete => "delete",
            CommandKind::InspectVersion => "inspect_version",
            CommandKind::DeleteVersion => "delete_version",
            CommandKind::DeleteProject => "delete_project",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "execute" => Ok(CommandKind::Execute),
            "cancel" => Ok(CommandKind::Cancel),
            "restart" => Ok(CommandKind::Restart),
            "delete" => Ok(CommandKind::Delete),
            "inspect_version" => Ok(CommandKind::InspectVersion),
            "delete_version" => Ok(CommandKind::DeleteVersion),
            "delete_project" => Ok(CommandKind::DeleteProject),
            other => Err(CoreError::Validation(format!(
                "unknown command kind '{other}'"
            ))),
        }
    }
}

/// A unit of work for the worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create and start the job's unit, then mark the job running.
    Execute { job_id: String },
    /// Stop the job's unit and mark the job cancelled.
    Cancel { job_id: String },
    /// Tear down the job's unit, re-arm the job and execute it again.
    Restart { job_id: String },
    /// Tear down the job's unit and delete the job row.
    Delete { job_id: String },
    /// Discover the task names a version's image exposes.
    InspectVersion { version_id: String },
    /// Remove a version's image and delete the version row.
    DeleteVersion { version_id: String },
    /// Remove the images of every version of a project, then delete it.
    DeleteProject { project_id: String },
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Execute { .. } => CommandKind::Execute,
            Command::Cancel { .. } => CommandKind::Cancel,
            Command::Restart { .. } => CommandKind::Restart,
            Command::Delete { .. } => CommandKind::Delete,
            Command::InspectVersion { .. } => CommandKind::InspectVersion,
            Command::DeleteVersion { .. } => CommandKind::DeleteVersion,
            Command::DeleteProject { .. } => CommandKind::DeleteProject,
        }
    }

    /// The id of the record the command acts on.
    pub fn subject_id(&self) -> &str {
        match self {
            Command::Execute { job_id }
            | Command::Cancel { job_id }
            | Command::Restart { job_id }
            | Command::Delete { job_id } => job_id,
            Command::InspectVersion { version_id } | Command::DeleteVersion { version_id } => {
                version_id
            }
            Command::DeleteProject { project_id } => project_id,
        }
    }

    /// The queue's uniqueness key for this command.
    pub fn dedup_key(&self) -> String {
        match self {
            Command::InspectVersion { version_id } | Command::DeleteVersion { version_id } => {
                format!("{VERSION_KEY_PREFIX}{version_id}")
            }
            Command::DeleteProject { project_id } => format!("{PROJECT_KEY_PREFIX}{project_id}"),
            _ => self.subject_id().to_owned(),
        }
    }

    /// Rebuild a command from its stored kind and subject id.
    pub fn from_parts(kind: &str, subject_id: &str) -> Result<Self, CoreError> {
        let subject = subject_id.to_owned();
        Ok(match kind.parse::<CommandKind>()? {
            CommandKind::Execute => Command::Execute { job_id: subject },
            CommandKind::Cancel => Command::Cancel { job_id: subject },
            CommandKind::Restart => Command::Restart { job_id: subject },
            CommandKind::Delete => Command::Delete { job_id: subject },
            CommandKind::InspectVersion => Command::InspectVersion {
                version_id: subject,
            },
            CommandKind::DeleteVersion => Command::DeleteVersion {
                version_id: subject,
            },
            CommandKind::DeleteProject => Command::DeleteProject {
                project_id: subject,
            },
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind(), self.subject_id())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn job_commands_share_the_job_id_as_key() {
        let id = "abc123".to_string();
        let keys: Vec<String> = [
            Command::Execute { job_id: id.clone() },
            Command::Cancel { job_id: id.clone() },
            Command::Restart { job_id: id.clone() },
            Command::Delete { job_id: id.clone() },
        ]
        .iter()
        .map(Command::dedup_key)
        .collect();

        assert!(keys.iter().all(|k| k == "abc123"));
    }

    #[test]
    fn version_commands_are_namespaced() {
        let cmd = Command::InspectVersion {
            version_id: "abc123".into(),
        };
        assert_eq!(cmd.dedup_key(), "version:abc123");
        assert_eq!(cmd.subject_id(), "abc123");
    }

    #[test]
    fn version_inspection_and_deletion_share_a_key() {
        let inspect = Command::InspectVersion {
            version_id: "v1".into(),
        };
        let delete = Command::DeleteVersion {
            version_id: "v1".into(),
        };
        assert_eq!(inspect.dedup_key(), delete.dedup_key());

        let project = Command::DeleteProject {
            project_id: "v1".into(),
        };
        assert_eq!(project.dedup_key(), "project:v1");
        assert_ne!(project.dedup_key(), delete.dedup_key());
    }

    #[test]
    fn from_parts_restores_deletion_commands() {
        assert_eq!(
            Command::from_parts("delete_project", "p1").unwrap(),
            Command::DeleteProject {
                project_id: "p1".into()
            }
        );
        assert_eq!(
            Command::from_parts("delete_version", "v1").unwrap().kind(),
            CommandKind::DeleteVersion
        );
    }

    #[test]
    fn from_parts_restores_variant() {
        let cmd = Command::from_parts("restart", "job-1").unwrap();
        assert_eq!(
            cmd,
            Command::Restart {
                job_id: "job-1".into()
            }
        );
        assert_eq!(cmd.kind().as_str(), "restart");
    }

    #[test]
    fn from_parts_rejects_unknown_kind() {
        assert_matches!(
            Command::from_parts("explode", "job-1"),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn display_names_kind_and_subject() {
        let cmd = Command::Cancel {
            job_id: "j9".into(),
        };
        assert_eq!(cmd.to_string(), "cancel(j9)");
    }
}
