//! Persistence integration tests.
//!
//! Verifies:
//! - Canvas, workflow and project records survive a store reopen
//! - Versions and storage revisions continue where they left off
//! - The server opens its RocksDB store from `storage_path`

use std::sync::Arc;
use tempfile::tempdir;
use trellis_core::{NewTask, Node, NodeKind, Phase, ProjectKey, Viewport, WorkspaceKey};
use trellis_sync::{
    Keyspace, RecordStore, Request, Response, RocksStore, ServerConfig, StoreConfig, SyncHub,
    SyncServer,
};

fn open_hub(path: &std::path::Path) -> (SyncHub, Arc<RocksStore>) {
    let store = Arc::new(RocksStore::open(StoreConfig::for_testing(path)).unwrap());
    (SyncHub::with_store(store.clone()), store)
}

#[tokio::test]
async fn documents_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");
    let project = ProjectKey::from("acme");
    let workspace = WorkspaceKey::named("ws");

    let (workflow_id, task_id) = {
        let (hub, store) = open_hub(&path);
        hub.projects().create_project(&project, "Acme").await.unwrap();
        hub.canvas()
            .add_node(&project, Node::new("n1", NodeKind::Milestone, "Launch"), None)
            .await
            .unwrap();
        hub.canvas()
            .update_viewport(&project, Viewport { x: 1.0, y: 2.0, zoom: 0.75 })
            .await
            .unwrap();

        let id = hub
            .workflow()
            .initialize(&workspace, vec![Phase::new("p1", 1, "Plan")], None)
            .await
            .unwrap();
        let task_id = hub
            .workflow()
            .add_task(id, "p1", NewTask::new("Kickoff", "", "erin"), None)
            .await
            .unwrap()
            .value
            .unwrap();
        store.flush().unwrap();
        (id, task_id)
    };

    let (hub, store) = open_hub(&path);

    let canvas = hub.canvas().get_by_key(&project).await.unwrap();
    assert!(canvas.is_initialized());
    assert_eq!(canvas.version(), 2);
    assert_eq!(canvas.document().nodes[0].content, "Launch");
    assert_eq!(canvas.document().viewport.zoom, 0.75);

    let workflow = hub.workflow().get_by_id(workflow_id).await.unwrap().unwrap();
    assert_eq!(workflow.workspace_key, workspace);
    assert!(workflow.phase("p1").unwrap().task(&task_id).is_some());

    assert_eq!(hub.projects().get_project(&project).await.unwrap().unwrap().name, "Acme");
    assert_eq!(store.list_ids(Keyspace::Project).unwrap().len(), 1);

    // Commits keep counting from the persisted state.
    let c = hub
        .canvas()
        .add_node(&project, Node::new("n2", NodeKind::Note, ""), None)
        .await
        .unwrap();
    assert_eq!(c.document.version, 3);
    let record = store.get_by_key(Keyspace::Canvas, b"acme").unwrap().unwrap();
    assert_eq!(record.revision, 4);
}

#[tokio::test]
async fn duplicate_project_rejected_after_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");
    let project = ProjectKey::from("solo");

    {
        let (hub, _) = open_hub(&path);
        hub.projects().create_project(&project, "Solo").await.unwrap();
    }

    let (hub, _) = open_hub(&path);
    assert!(hub.projects().create_project(&project, "Again").await.is_err());
}

#[tokio::test]
async fn server_with_storage_path_persists() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("server-db");
    let config = ServerConfig {
        storage_path: Some(path.clone()),
        ..ServerConfig::default()
    };

    {
        let server = SyncServer::new(config.clone()).unwrap();
        let reply = server
            .hub()
            .dispatch(
                None,
                Request::InitCanvas {
                    project: ProjectKey::from("p"),
                },
            )
            .await
            .unwrap();
        assert!(matches!(reply, Response::DocumentId(_)));
    }

    let server = SyncServer::new(config).unwrap();
    assert!(server.hub().canvas().exists(&ProjectKey::from("p")).await.unwrap());
}
