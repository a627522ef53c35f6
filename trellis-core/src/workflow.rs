//! Workflow documents: the phase/task tree of a workspace.
//!
//! Phases and tasks are located by id. Task ids need only be unique within
//! their phase. Phase ids are not checked for uniqueness, so every
//! phase-addressed operation applies to each phase carrying the id. Every
//! lookup that misses is a no-op reported as [`Outcome::NoMatchFound`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::{new_task_id, DocumentId, EditorId, WorkspaceKey};
use crate::outcome::Outcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    InProgress,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub text: String,
    pub text_ar: String,
    pub owner: String,
    pub completed: bool,
}

impl Task {
    pub fn apply(&mut self, patch: &TaskPatch) {
        if let Some(text) = &patch.text {
            self.text = text.clone();
        }
        if let Some(text_ar) = &patch.text_ar {
            self.text_ar = text_ar.clone();
        }
        if let Some(owner) = &patch.owner {
            self.owner = owner.clone();
        }
        if let Some(completed) = patch.completed {
            self.completed = completed;
        }
    }
}

/// Task payload supplied by a caller; the id and completion flag are
/// assigned on insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub text: String,
    pub text_ar: String,
    pub owner: String,
}

impl NewTask {
    pub fn new(
        text: impl Into<String>,
        text_ar: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            text_ar: text_ar.into(),
            owner: owner.into(),
        }
    }

    pub fn into_task(self, id: String) -> Task {
        Task {
            id,
            text: self.text,
            text_ar: self.text_ar,
            owner: self.owner,
            completed: false,
        }
    }
}

/// Partial task update. Presence decides, so `completed: Some(false)` does
/// reopen a task.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    pub text: Option<String>,
    pub text_ar: Option<String>,
    pub owner: Option<String>,
    pub completed: Option<bool>,
}

impl TaskPatch {
    pub fn completed(completed: bool) -> Self {
        Self {
            completed: Some(completed),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Phase {
    pub id: String,
    pub number: u32,
    pub title: String,
    pub title_ar: String,
    pub status: PhaseStatus,
    pub tasks: Vec<Task>,
}

impl Phase {
    pub fn new(id: impl Into<String>, number: u32, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            number,
            title: title.into(),
            title_ar: String::new(),
            status: PhaseStatus::Pending,
            tasks: Vec::new(),
        }
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }
}

/// The workflow of one workspace (or the global workflow).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDocument {
    pub id: DocumentId,
    pub workspace_key: WorkspaceKey,
    pub phases: Vec<Phase>,
    pub version: u64,
    pub last_edited_by: Option<EditorId>,
}

impl WorkflowDocument {
    pub fn empty(workspace_key: WorkspaceKey) -> Self {
        Self {
            id: Uuid::nil(),
            workspace_key,
            phases: Vec::new(),
            version: 0,
            last_edited_by: None,
        }
    }

    pub fn phase(&self, id: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.id == id)
    }

    /// Total number of tasks across all phases.
    pub fn task_count(&self) -> usize {
        self.phases.iter().map(|p| p.tasks.len()).sum()
    }

    pub fn replace_phases(&mut self, phases: Vec<Phase>) -> Outcome {
        self.phases = phases;
        Outcome::Applied
    }

    pub fn set_phase_status(&mut self, phase_id: &str, status: PhaseStatus) -> Outcome {
        let mut matched = 0;
        for phase in self.phases_mut(phase_id) {
            phase.status = status;
            matched += 1;
        }
        Outcome::from_matches(matched)
    }

    pub fn update_task(&mut self, phase_id: &str, task_id: &str, patch: &TaskPatch) -> Outcome {
        let mut matched = 0;
        for phase in self.phases_mut(phase_id) {
            for task in phase.tasks.iter_mut().filter(|t| t.id == task_id) {
                task.apply(patch);
                matched += 1;
            }
        }
        Outcome::from_matches(matched)
    }

    pub fn delete_task(&mut self, phase_id: &str, task_id: &str) -> Outcome {
        let mut removed = 0;
        for phase in self.phases_mut(phase_id) {
            let before = phase.tasks.len();
            phase.tasks.retain(|t| t.id != task_id);
            removed += before - phase.tasks.len();
        }
        Outcome::from_matches(removed)
    }

    /// Append a copy of `task` to every matching phase. Without a match the
    /// task is dropped and nothing else changes.
    pub fn add_task(&mut self, phase_id: &str, task: Task) -> Outcome {
        let mut added = 0;
        for phase in self.phases_mut(phase_id) {
            phase.tasks.push(task.clone());
            added += 1;
        }
        Outcome::from_matches(added)
    }

    /// Convenience over [`add_task`](Self::add_task) that mints the id.
    pub fn add_new_task(&mut self, phase_id: &str, task: NewTask) -> (String, Outcome) {
        let id = new_task_id();
        let outcome = self.add_task(phase_id, task.into_task(id.clone()));
        (id, outcome)
    }

    pub fn record_editor(&mut self, editor: Option<&EditorId>) {
        if let Some(editor) = editor {
            self.last_edited_by = Some(editor.clone());
        }
    }

    fn phases_mut<'a>(&'a mut self, phase_id: &'a str) -> impl Iterator<Item = &'a mut Phase> + 'a {
        self.phases.iter_mut().filter(move |p| p.id == phase_id)
    }
}
