/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Identifier of a content definition (flow, checklist, launcher, ...).
pub type ContentId = String;

/// Identifier of an immutable content version.
pub type VersionId = String;

/// Identifier of a runtime content session.
pub type SessionId = String;

/// Identifier of an environment (a project's production/staging space).
pub type EnvironmentId = String;

/// Identifier of a single rules-condition node, unique within its tree.
pub type ConditionId = String;
