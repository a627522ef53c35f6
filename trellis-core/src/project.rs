use serde::{Deserialize, Serialize};

use crate::ids::ProjectKey;

/// The project a canvas belongs to. Archival lives here, never on the
/// canvas itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    pub key: ProjectKey,
    pub name: String,
    pub archived: bool,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
}

impl ProjectRecord {
    pub fn new(key: ProjectKey, name: impl Into<String>, created_at: u64) -> Self {
        Self {
            key,
            name: name.into(),
            archived: false,
            created_at,
        }
    }
}
