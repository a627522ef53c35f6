//! Keys and identities.
//!
//! A document is filed under a key supplied by the host application
//! (a project key for canvases, an optional workspace key for workflows)
//! and carries an opaque [`DocumentId`] assigned at creation.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque document identifier, assigned when a document is first stored.
pub type DocumentId = Uuid;

/// Identity of the party performing a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EditorId(pub String);

impl EditorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EditorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key of a project's canvas.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectKey(pub String);

impl ProjectKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Byte form used by record stores.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.as_bytes().to_vec()
    }
}

impl fmt::Display for ProjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProjectKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Key of a workflow document.
///
/// `None` is the default (global) workflow. It is a key in its own right:
/// lookups match it exactly and it holds at most one document, like any
/// named workspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceKey(pub Option<String>);

impl WorkspaceKey {
    /// The default workflow.
    pub fn global() -> Self {
        Self(None)
    }

    pub fn named(key: impl Into<String>) -> Self {
        Self(Some(key.into()))
    }

    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }

    /// Byte form used by record stores. A leading tag keeps the global key
    /// distinct from a workspace literally named "".
    pub fn to_bytes(&self) -> Vec<u8> {
        match &self.0 {
            None => vec![0],
            Some(name) => {
                let mut bytes = Vec::with_capacity(1 + name.len());
                bytes.push(1);
                bytes.extend_from_slice(name.as_bytes());
                bytes
            }
        }
    }
}

impl fmt::Display for WorkspaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(name) => f.write_str(name),
            None => f.write_str("<global>"),
        }
    }
}

/// Generate an opaque task id.
///
/// Callers must never parse it.
pub fn new_task_id() -> String {
    format!("task-{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_workspace_key_bytes_distinguish_global() {
        assert_eq!(WorkspaceKey::global().to_bytes(), vec![0]);
        assert_eq!(WorkspaceKey::named("").to_bytes(), vec![1]);
        assert_ne!(
            WorkspaceKey::named("ws").to_bytes(),
            WorkspaceKey::global().to_bytes()
        );
    }

    #[test]
    fn test_task_ids_unique_under_burst() {
        let ids: HashSet<String> = (0..10_000).map(|_| new_task_id()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_display() {
        assert_eq!(WorkspaceKey::global().to_string(), "<global>");
        assert_eq!(WorkspaceKey::named("acme").to_string(), "acme");
        assert_eq!(ProjectKey::from("p-1").to_string(), "p-1");
        assert_eq!(EditorId::new("alice").as_str(), "alice");
    }
}
