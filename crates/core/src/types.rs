/// Projects, versions and jobs are keyed by caller-chosen strings.
pub type RecordId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
