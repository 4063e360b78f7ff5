use std::sync::Arc;

/// Opaque, server-assigned identifier of an uploaded image group.
pub type GroupId = String;

/// Opaque, server-assigned identifier of a processing job.
pub type JobId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// A decoded image shared between the session and its snapshots.
pub type SharedImage = Arc<image::DynamicImage>;

/// Which of the two upload groups a batch belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupSlot {
    First,
    Second,
}

impl GroupSlot {
    /// Path segment used by the upload endpoint (`first-group` / `second-group`).
    pub fn endpoint_segment(self) -> &'static str {
        match self {
            Self::First => "first-group",
            Self::Second => "second-group",
        }
    }
}

impl std::fmt::Display for GroupSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::First => f.write_str("first"),
            Self::Second => f.write_str("second"),
        }
    }
}
