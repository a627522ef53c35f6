//! Canvas mutations and queries, one canvas per project key.

use serde::{Deserialize, Serialize};
use trellis_core::{
    CanvasDocument, Container, ContainerPatch, DocumentId, EditorId, Node, NodePatch, Outcome,
    ProjectKey, Viewport,
};

use crate::broadcast::Topic;
use crate::error::SyncResult;
use crate::repository::{Absent, Committed, Repository};
use crate::watch::CanvasWatch;

/// Result of a canvas read.
///
/// A project with no canvas yet reads as `Uninitialized` carrying the
/// placeholder document (version 0, nil id, empty collections).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanvasSnapshot {
    Uninitialized(CanvasDocument),
    Initialized(CanvasDocument),
}

impl CanvasSnapshot {
    pub fn document(&self) -> &CanvasDocument {
        match self {
            CanvasSnapshot::Uninitialized(doc) | CanvasSnapshot::Initialized(doc) => doc,
        }
    }

    pub fn into_document(self) -> CanvasDocument {
        match self {
            CanvasSnapshot::Uninitialized(doc) | CanvasSnapshot::Initialized(doc) => doc,
        }
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self, CanvasSnapshot::Initialized(_))
    }

    pub fn version(&self) -> u64 {
        self.document().version
    }
}

pub type CanvasCommit = Committed<CanvasDocument, Outcome>;

#[derive(Clone)]
pub struct CanvasService {
    repo: Repository<CanvasDocument>,
}

impl CanvasService {
    pub fn new(repo: Repository<CanvasDocument>) -> Self {
        Self { repo }
    }

    /// Get-or-create the project's canvas.
    pub async fn init_canvas(&self, key: &ProjectKey) -> SyncResult<DocumentId> {
        Ok(self.repo.create_if_absent(key, |_| ()).await?.id)
    }

    /// Append a node, creating the canvas on first use. Ids are not checked
    /// for duplicates.
    pub async fn add_node(
        &self,
        key: &ProjectKey,
        node: Node,
        editor: Option<&EditorId>,
    ) -> SyncResult<CanvasCommit> {
        self.repo
            .commit(key, Absent::Create, |doc| {
                doc.record_editor(editor);
                doc.add_node(node.clone())
            })
            .await
    }

    pub async fn update_node(
        &self,
        key: &ProjectKey,
        node_id: &str,
        patch: &NodePatch,
        editor: Option<&EditorId>,
    ) -> SyncResult<CanvasCommit> {
        self.repo
            .commit(key, Absent::Fail, |doc| {
                doc.record_editor(editor);
                doc.update_node(node_id, patch)
            })
            .await
    }

    pub async fn delete_node(
        &self,
        key: &ProjectKey,
        node_id: &str,
        editor: Option<&EditorId>,
    ) -> SyncResult<CanvasCommit> {
        self.repo
            .commit(key, Absent::Fail, |doc| {
                doc.record_editor(editor);
                doc.delete_node(node_id)
            })
            .await
    }

    /// Replace the whole node list, creating the canvas if needed.
    pub async fn batch_replace_nodes(
        &self,
        key: &ProjectKey,
        nodes: Vec<Node>,
        editor: Option<&EditorId>,
    ) -> SyncResult<CanvasCommit> {
        self.repo
            .commit(key, Absent::Create, |doc| {
                doc.record_editor(editor);
                doc.replace_nodes(nodes.clone())
            })
            .await
    }

    pub async fn add_container(
        &self,
        key: &ProjectKey,
        container: Container,
        editor: Option<&EditorId>,
    ) -> SyncResult<CanvasCommit> {
        self.repo
            .commit(key, Absent::Create, |doc| {
                doc.record_editor(editor);
                doc.add_container(container.clone())
            })
            .await
    }

    pub async fn update_container(
        &self,
        key: &ProjectKey,
        container_id: &str,
        patch: &ContainerPatch,
        editor: Option<&EditorId>,
    ) -> SyncResult<CanvasCommit> {
        self.repo
            .commit(key, Absent::Fail, |doc| {
                doc.record_editor(editor);
                doc.update_container(container_id, patch)
            })
            .await
    }

    pub async fn delete_container(
        &self,
        key: &ProjectKey,
        container_id: &str,
        editor: Option<&EditorId>,
    ) -> SyncResult<CanvasCommit> {
        self.repo
            .commit(key, Absent::Fail, |doc| {
                doc.record_editor(editor);
                doc.delete_container(container_id)
            })
            .await
    }

    /// Overwrite the viewport. Does nothing when the canvas does not exist;
    /// never touches version or editor. Returns whether a write happened.
    pub async fn update_viewport(&self, key: &ProjectKey, viewport: Viewport) -> SyncResult<bool> {
        let written = self
            .repo
            .commit_view(key, |doc| doc.set_viewport(viewport))
            .await?;
        Ok(written.is_some())
    }

    pub async fn get_by_key(&self, key: &ProjectKey) -> SyncResult<CanvasSnapshot> {
        Ok(match self.repo.get_by_key(key).await? {
            Some(doc) => CanvasSnapshot::Initialized(doc),
            None => CanvasSnapshot::Uninitialized(CanvasDocument::empty(key.clone())),
        })
    }

    pub async fn exists(&self, key: &ProjectKey) -> SyncResult<bool> {
        self.repo.exists(key).await
    }

    /// Live `get_by_key` for the project.
    pub async fn watch(&self, key: &ProjectKey) -> CanvasWatch {
        let subscription = self
            .repo
            .broadcaster()
            .subscribe(Topic::Canvas(key.clone()))
            .await;
        CanvasWatch::new(self.clone(), key.clone(), subscription)
    }
}
