//! Workflow (phase/task tree) mutations and queries.
//!
//! A workflow is filed under an optional workspace key; the unnamed key is
//! the global workflow and is just another distinct key. After
//! `initialize`, mutations address the document by id.

use trellis_core::{
    DocumentId, EditorId, NewTask, Outcome, Phase, PhaseStatus, TaskPatch, WorkflowDocument,
    WorkspaceKey,
};

use crate::broadcast::Topic;
use crate::error::SyncResult;
use crate::repository::{Committed, Repository};
use crate::watch::WorkflowWatch;

pub type WorkflowCommit<T = Outcome> = Committed<WorkflowDocument, T>;

#[derive(Clone)]
pub struct WorkflowService {
    repo: Repository<WorkflowDocument>,
}

impl WorkflowService {
    pub fn new(repo: Repository<WorkflowDocument>) -> Self {
        Self { repo }
    }

    /// Get-or-create. An existing workflow is left exactly as it is and its
    /// id returned.
    pub async fn initialize(
        &self,
        key: &WorkspaceKey,
        phases: Vec<Phase>,
        editor: Option<&EditorId>,
    ) -> SyncResult<DocumentId> {
        let created = self
            .repo
            .create_if_absent(key, |doc| {
                doc.replace_phases(phases);
                doc.record_editor(editor);
            })
            .await?;
        Ok(created.id)
    }

    pub async fn update_phases(
        &self,
        id: DocumentId,
        phases: Vec<Phase>,
        editor: Option<&EditorId>,
    ) -> SyncResult<WorkflowCommit> {
        self.repo
            .commit_by_id(id, |doc| {
                doc.record_editor(editor);
                doc.replace_phases(phases.clone())
            })
            .await
    }

    pub async fn update_phase_status(
        &self,
        id: DocumentId,
        phase_id: &str,
        status: PhaseStatus,
        editor: Option<&EditorId>,
    ) -> SyncResult<WorkflowCommit> {
        self.repo
            .commit_by_id(id, |doc| {
                doc.record_editor(editor);
                doc.set_phase_status(phase_id, status)
            })
            .await
    }

    pub async fn update_task_status(
        &self,
        id: DocumentId,
        phase_id: &str,
        task_id: &str,
        completed: bool,
        editor: Option<&EditorId>,
    ) -> SyncResult<WorkflowCommit> {
        self.update_task(id, phase_id, task_id, &TaskPatch::completed(completed), editor)
            .await
    }

    /// Apply the fields present in `patch` to the task in every phase
    /// matching `phase_id`.
    pub async fn update_task(
        &self,
        id: DocumentId,
        phase_id: &str,
        task_id: &str,
        patch: &TaskPatch,
        editor: Option<&EditorId>,
    ) -> SyncResult<WorkflowCommit> {
        self.repo
            .commit_by_id(id, |doc| {
                doc.record_editor(editor);
                doc.update_task(phase_id, task_id, patch)
            })
            .await
    }

    pub async fn delete_task(
        &self,
        id: DocumentId,
        phase_id: &str,
        task_id: &str,
        editor: Option<&EditorId>,
    ) -> SyncResult<WorkflowCommit> {
        self.repo
            .commit_by_id(id, |doc| {
                doc.record_editor(editor);
                doc.delete_task(phase_id, task_id)
            })
            .await
    }

    /// Append a new, incomplete task to every phase matching `phase_id`,
    /// all under one minted id. The value is that id when a phase matched.
    /// The version advances either way.
    pub async fn add_task(
        &self,
        id: DocumentId,
        phase_id: &str,
        task: NewTask,
        editor: Option<&EditorId>,
    ) -> SyncResult<WorkflowCommit<Option<String>>> {
        self.repo
            .commit_by_id(id, |doc| {
                doc.record_editor(editor);
                match doc.add_new_task(phase_id, task.clone()) {
                    (task_id, Outcome::Applied) => Some(task_id),
                    (_, Outcome::NoMatchFound) => None,
                }
            })
            .await
    }

    pub async fn get(&self, key: &WorkspaceKey) -> SyncResult<Option<WorkflowDocument>> {
        self.repo.get_by_key(key).await
    }

    pub async fn get_by_id(&self, id: DocumentId) -> SyncResult<Option<WorkflowDocument>> {
        self.repo.get_by_id(id).await
    }

    /// Live `get` for the workspace.
    pub async fn watch(&self, key: &WorkspaceKey) -> WorkflowWatch {
        let subscription = self
            .repo
            .broadcaster()
            .subscribe(Topic::Workflow(key.clone()))
            .await;
        WorkflowWatch::new(self.clone(), key.clone(), subscription)
    }
}
