//! Wires the services over one store and one broadcaster, and routes
//! protocol requests to them.

use std::sync::Arc;
use trellis_core::EditorId;

use crate::broadcast::{ChangeBroadcaster, Subscription, Topic};
use crate::canvas::CanvasService;
use crate::projects::ProjectService;
use crate::protocol::{RemoteError, Request, Response};
use crate::repository::{Repository, RepositoryConfig};
use crate::storage::{MemoryStore, RecordStore};
use crate::workflow::WorkflowService;

/// Default per-topic event buffer.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct SyncHub {
    broadcaster: Arc<ChangeBroadcaster>,
    canvas: CanvasService,
    workflow: WorkflowService,
    projects: ProjectService,
}

impl SyncHub {
    pub fn new(
        store: Arc<dyn RecordStore>,
        broadcast_capacity: usize,
        config: RepositoryConfig,
    ) -> Self {
        let broadcaster = Arc::new(ChangeBroadcaster::new(broadcast_capacity));
        let canvas = CanvasService::new(Repository::new(
            store.clone(),
            broadcaster.clone(),
            config.clone(),
        ));
        let workflow = WorkflowService::new(Repository::new(
            store.clone(),
            broadcaster.clone(),
            config.clone(),
        ));
        let projects = ProjectService::new(store, canvas.clone(), config);
        Self {
            broadcaster,
            canvas,
            workflow,
            projects,
        }
    }

    /// Hub over a fresh in-memory store with default settings.
    pub fn in_memory() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    pub fn with_store(store: Arc<dyn RecordStore>) -> Self {
        Self::new(store, DEFAULT_BROADCAST_CAPACITY, RepositoryConfig::default())
    }

    pub fn canvas(&self) -> &CanvasService {
        &self.canvas
    }

    pub fn workflow(&self) -> &WorkflowService {
        &self.workflow
    }

    pub fn projects(&self) -> &ProjectService {
        &self.projects
    }

    pub fn broadcaster(&self) -> &Arc<ChangeBroadcaster> {
        &self.broadcaster
    }

    pub async fn subscribe(&self, topic: Topic) -> Subscription {
        self.broadcaster.subscribe(topic).await
    }

    /// Run one request on behalf of `editor`.
    pub async fn dispatch(
        &self,
        editor: Option<&EditorId>,
        request: Request,
    ) -> Result<Response, RemoteError> {
        let op = request.name();
        let result = self.route(editor, request).await;
        match &result {
            Ok(_) => log::trace!("{op} ok"),
            Err(e) => log::debug!("{op} failed: {e}"),
        }
        result
    }

    async fn route(
        &self,
        editor: Option<&EditorId>,
        request: Request,
    ) -> Result<Response, RemoteError> {
        let canvas = &self.canvas;
        let workflow = &self.workflow;

        let response = match request {
            Request::InitCanvas { project } => {
                Response::DocumentId(canvas.init_canvas(&project).await?)
            }
            Request::AddNode { project, node } => {
                canvas.add_node(&project, node, editor).await?;
                Response::Done
            }
            Request::UpdateNode { project, node_id, patch } => {
                canvas.update_node(&project, &node_id, &patch, editor).await?;
                Response::Done
            }
            Request::DeleteNode { project, node_id } => {
                canvas.delete_node(&project, &node_id, editor).await?;
                Response::Done
            }
            Request::BatchUpdateNodes { project, nodes } => {
                canvas.batch_replace_nodes(&project, nodes, editor).await?;
                Response::Done
            }
            Request::AddContainer { project, container } => {
                canvas.add_container(&project, container, editor).await?;
                Response::Done
            }
            Request::UpdateContainer { project, container_id, patch } => {
                canvas.update_container(&project, &container_id, &patch, editor).await?;
                Response::Done
            }
            Request::DeleteContainer { project, container_id } => {
                canvas.delete_container(&project, &container_id, editor).await?;
                Response::Done
            }
            Request::UpdateViewport { project, viewport } => {
                canvas.update_viewport(&project, viewport).await?;
                Response::Done
            }
            Request::GetCanvas { project } => Response::Canvas(canvas.get_by_key(&project).await?),
            Request::CanvasExists { project } => Response::Exists(canvas.exists(&project).await?),

            Request::InitializeWorkflow { workspace, phases } => {
                Response::DocumentId(workflow.initialize(&workspace, phases, editor).await?)
            }
            Request::UpdatePhases { document_id, phases } => {
                let c = workflow.update_phases(document_id, phases, editor).await?;
                Response::DocumentId(c.document.id)
            }
            Request::UpdatePhaseStatus { document_id, phase_id, status } => {
                let c = workflow
                    .update_phase_status(document_id, &phase_id, status, editor)
                    .await?;
                Response::DocumentId(c.document.id)
            }
            Request::UpdateTaskStatus { document_id, phase_id, task_id, completed } => {
                let c = workflow
                    .update_task_status(document_id, &phase_id, &task_id, completed, editor)
                    .await?;
                Response::DocumentId(c.document.id)
            }
            Request::UpdateTask { document_id, phase_id, task_id, patch } => {
                let c = workflow
                    .update_task(document_id, &phase_id, &task_id, &patch, editor)
                    .await?;
                Response::DocumentId(c.document.id)
            }
            Request::DeleteTask { document_id, phase_id, task_id } => {
                let c = workflow
                    .delete_task(document_id, &phase_id, &task_id, editor)
                    .await?;
                Response::DocumentId(c.document.id)
            }
            Request::AddTask { document_id, phase_id, task } => {
                let c = workflow.add_task(document_id, &phase_id, task, editor).await?;
                Response::TaskAdded { task_id: c.value }
            }
            Request::GetWorkflow { workspace } => {
                Response::Workflow(workflow.get(&workspace).await?)
            }
            Request::GetWorkflowById { document_id } => {
                Response::Workflow(workflow.get_by_id(document_id).await?)
            }

            Request::CreateProject { project, name } => {
                Response::ProjectCreated(self.projects.create_project(&project, &name).await?)
            }
            Request::ArchiveProject { project } => {
                Response::Project(Some(self.projects.archive_project(&project).await?))
            }
            Request::GetProject { project } => {
                Response::Project(self.projects.get_project(&project).await?)
            }
        };
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ErrorCode;
    use trellis_core::{NewTask, Node, NodeKind, NodePatch, Phase, ProjectKey, WorkspaceKey};

    #[tokio::test]
    async fn test_canvas_requests() {
        let hub = SyncHub::in_memory();
        let project = ProjectKey::from("p1");
        let alice = EditorId::new("alice");

        let r = hub
            .dispatch(
                Some(&alice),
                Request::AddNode {
                    project: project.clone(),
                    node: Node::new("n1", NodeKind::Task, "a"),
                },
            )
            .await
            .unwrap();
        assert_eq!(r, Response::Done);

        match hub.dispatch(None, Request::GetCanvas { project }).await.unwrap() {
            Response::Canvas(snapshot) => {
                assert_eq!(snapshot.version(), 1);
                assert_eq!(snapshot.document().last_edited_by, Some(alice));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_not_found_maps_to_code() {
        let hub = SyncHub::in_memory();
        let err = hub
            .dispatch(
                None,
                Request::UpdateNode {
                    project: ProjectKey::from("nowhere"),
                    node_id: "n".into(),
                    patch: NodePatch::content("x"),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_add_task_reports_missing_phase() {
        let hub = SyncHub::in_memory();
        let id = match hub
            .dispatch(
                None,
                Request::InitializeWorkflow {
                    workspace: WorkspaceKey::global(),
                    phases: vec![Phase::new("p1", 1, "One")],
                },
            )
            .await
            .unwrap()
        {
            Response::DocumentId(id) => id,
            other => panic!("unexpected {other:?}"),
        };

        let landed = hub
            .dispatch(
                None,
                Request::AddTask {
                    document_id: id,
                    phase_id: "p1".into(),
                    task: NewTask::new("t", "", ""),
                },
            )
            .await
            .unwrap();
        assert!(matches!(
            landed,
            Response::TaskAdded { task_id: Some(ref t) } if t.starts_with("task-")
        ));

        let dropped = hub
            .dispatch(
                None,
                Request::AddTask {
                    document_id: id,
                    phase_id: "zz".into(),
                    task: NewTask::new("t", "", ""),
                },
            )
            .await
            .unwrap();
        assert_eq!(dropped, Response::TaskAdded { task_id: None });
    }

    #[tokio::test]
    async fn test_project_requests() {
        let hub = SyncHub::in_memory();
        let create = || Request::CreateProject {
            project: ProjectKey::from("acme"),
            name: "Acme".into(),
        };

        match hub.dispatch(None, create()).await.unwrap() {
            Response::ProjectCreated(created) => assert!(created.canvas_id.is_some()),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            hub.dispatch(None, create()).await.unwrap_err().code,
            ErrorCode::DuplicateKey
        );
        assert_eq!(
            hub.dispatch(
                None,
                Request::CanvasExists {
                    project: ProjectKey::from("acme")
                }
            )
            .await
            .unwrap(),
            Response::Exists(true)
        );
    }
}
