//! Integration tests for end-to-end WebSocket sync.
//!
//! These tests start a real server and connect real clients,
//! verifying the full request and change-notification pipeline.

use futures_util::{SinkExt, StreamExt};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;
use trellis_core::{
    EditorId, NewTask, Node, NodeKind, NodePatch, Phase, ProjectKey, Viewport, WorkspaceKey,
};
use tokio::sync::mpsc;
use trellis_sync::{
    ChangeEvent, ChangeKind, ClientError, ConnectionState, ErrorCode, ProtocolError, RemoteEvent,
    Request, Response, ServerConfig, ServerMessage, SyncClient, SyncServer, Topic,
};

/// Start a server on a free port, return its URL.
async fn start_test_server() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = ServerConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        broadcast_capacity: 64,
        ..ServerConfig::default()
    };
    let server = SyncServer::new(config).unwrap();
    tokio::spawn(async move {
        server.serve(listener).await.unwrap();
    });
    format!("ws://127.0.0.1:{port}")
}

async fn connect(url: &str, editor: &str) -> SyncClient {
    SyncClient::connect(url, Some(EditorId::new(editor))).await.unwrap()
}

async fn next_change(events: &mut mpsc::Receiver<RemoteEvent>) -> ChangeEvent {
    match timeout(Duration::from_secs(2), events.recv()).await.unwrap() {
        Some(RemoteEvent::Changed(event)) => event,
        other => panic!("expected a change, got {other:?}"),
    }
}

/// Accept one WebSocket on a free port and hand it to `session`.
async fn start_scripted_server<F, Fut>(session: F) -> String
where
    F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        session(ws).await;
    });
    format!("ws://127.0.0.1:{port}")
}

#[tokio::test]
async fn test_client_connects_and_pings() {
    let url = start_test_server().await;
    let client = connect(&url, "alice").await;

    assert_eq!(client.state().await, ConnectionState::Connected);
    timeout(Duration::from_secs(2), client.ping()).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_canvas_calls_over_the_wire() {
    let url = start_test_server().await;
    let client = connect(&url, "alice").await;
    let project = ProjectKey::from("p1");

    client
        .call(Request::AddNode {
            project: project.clone(),
            node: Node::new("n1", NodeKind::Task, "draft"),
        })
        .await
        .unwrap();
    client
        .call(Request::UpdateNode {
            project: project.clone(),
            node_id: "n1".into(),
            patch: NodePatch::content("x"),
        })
        .await
        .unwrap();

    match client.call(Request::GetCanvas { project }).await.unwrap() {
        Response::Canvas(snapshot) => {
            let doc = snapshot.document();
            assert_eq!(doc.version, 2);
            assert_eq!(doc.nodes[0].content, "x");
            assert_eq!(doc.last_edited_by, Some(EditorId::new("alice")));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_remote_errors_carry_codes() {
    let url = start_test_server().await;
    let client = connect(&url, "alice").await;

    let err = client
        .call(Request::DeleteNode {
            project: ProjectKey::from("missing"),
            node_id: "n".into(),
        })
        .await
        .unwrap_err();
    match err {
        ClientError::Remote(e) => assert_eq!(e.code, ErrorCode::NotFound),
        other => panic!("unexpected {other:?}"),
    }

    let create = || Request::CreateProject {
        project: ProjectKey::from("acme"),
        name: "Acme".into(),
    };
    client.call(create()).await.unwrap();
    match client.call(create()).await.unwrap_err() {
        ClientError::Remote(e) => assert_eq!(e.code, ErrorCode::DuplicateKey),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_watcher_sees_other_clients_commits() {
    let url = start_test_server().await;
    let mut watcher = connect(&url, "bob").await;
    let mut events = watcher.take_event_rx().unwrap();
    let writer = connect(&url, "alice").await;
    let project = ProjectKey::from("shared");

    watcher.watch(Topic::Canvas(project.clone())).await.unwrap();
    watcher.ping().await.unwrap();

    writer
        .call(Request::AddNode {
            project: project.clone(),
            node: Node::new("n1", NodeKind::Note, ""),
        })
        .await
        .unwrap();
    writer
        .call(Request::UpdateViewport {
            project: project.clone(),
            viewport: Viewport { x: 3.0, y: 4.0, zoom: 1.5 },
        })
        .await
        .unwrap();

    let first = next_change(&mut events).await;
    assert_eq!(first.topic, Topic::Canvas(project.clone()));
    assert_eq!((first.version, first.kind), (1, ChangeKind::Content));

    let second = next_change(&mut events).await;
    assert_eq!((second.version, second.kind), (1, ChangeKind::View));

    // The event is a hint; the watcher re-reads.
    match watcher.call(Request::GetCanvas { project }).await.unwrap() {
        Response::Canvas(snapshot) => assert_eq!(snapshot.document().viewport.zoom, 1.5),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_unwatch_stops_events() {
    let url = start_test_server().await;
    let mut client = connect(&url, "carol").await;
    let mut events = client.take_event_rx().unwrap();
    let topic = Topic::Workflow(WorkspaceKey::global());

    client.watch(topic.clone()).await.unwrap();
    let id = match client
        .call(Request::InitializeWorkflow {
            workspace: WorkspaceKey::global(),
            phases: vec![Phase::new("p1", 1, "Plan")],
        })
        .await
        .unwrap()
    {
        Response::DocumentId(id) => id,
        other => panic!("unexpected {other:?}"),
    };
    let created = next_change(&mut events).await;
    assert_eq!(created.document_id, id);

    client.unwatch(topic).await.unwrap();
    let added = client
        .call(Request::AddTask {
            document_id: id,
            phase_id: "p1".into(),
            task: NewTask::new("Write brief", "", "carol"),
        })
        .await
        .unwrap();
    assert!(matches!(added, Response::TaskAdded { task_id: Some(_) }));

    assert!(timeout(Duration::from_millis(100), events.recv()).await.is_err());
}

#[tokio::test]
async fn test_json_text_frames() {
    let url = start_test_server().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    let call = concat!(
        r#"{"call":{"requestId":9,"editor":null,"#,
        r#""request":{"canvas_exists":{"project":"p1"}}}}"#
    );
    ws.send(Message::Text(call.into())).await.unwrap();

    let reply = timeout(Duration::from_secs(2), ws.next()).await.unwrap().unwrap().unwrap();
    match reply {
        Message::Text(text) => {
            let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
            assert_eq!(value["reply"]["requestId"], 9);
            assert_eq!(value["reply"]["result"]["Ok"]["exists"], false);
        }
        other => panic!("expected text frame, got {other:?}"),
    }

    ws.send(Message::Text("not json".into())).await.unwrap();
    let reply = timeout(Duration::from_secs(2), ws.next()).await.unwrap().unwrap().unwrap();
    let value: serde_json::Value = serde_json::from_str(reply.to_text().unwrap()).unwrap();
    assert_eq!(value["reply"]["result"]["Err"]["code"], "bad_request");
}

#[tokio::test]
async fn test_closed_peer_does_not_affect_others() {
    let url = start_test_server().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    ws.close(None).await.unwrap();

    // A fresh client on the same server is unaffected.
    let client = connect(&url, "dave").await;
    assert!(matches!(
        client.call(Request::CanvasExists { project: ProjectKey::from("p") }).await,
        Ok(Response::Exists(false))
    ));
}

#[tokio::test]
async fn test_unread_events_do_not_block_replies() {
    let url = start_test_server().await;
    // The event receiver is never taken.
    let watcher = connect(&url, "erin").await;
    let writer = connect(&url, "alice").await;
    let project = ProjectKey::from("busy");

    watcher.watch(Topic::Canvas(project.clone())).await.unwrap();
    watcher.ping().await.unwrap();

    for i in 0..300 {
        writer
            .call(Request::AddNode {
                project: project.clone(),
                node: Node::new(format!("n{i}"), NodeKind::Note, ""),
            })
            .await
            .unwrap();
    }

    let reply = timeout(
        Duration::from_secs(3),
        watcher.call(Request::CanvasExists { project }),
    )
    .await
    .expect("call stalled behind undelivered events");
    assert!(matches!(reply, Ok(Response::Exists(true))));
}

#[tokio::test]
async fn test_calls_fail_after_disconnect() {
    let url = start_scripted_server(|mut ws| async move {
        let _ = ws.close(None).await;
    })
    .await;
    let client = connect(&url, "frank").await;

    timeout(Duration::from_secs(2), async {
        while client.state().await != ConnectionState::Disconnected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let result = timeout(
        Duration::from_secs(2),
        client.call(Request::CanvasExists { project: ProjectKey::from("p") }),
    )
    .await
    .expect("call after disconnect hung");
    assert!(matches!(
        result,
        Err(ClientError::Protocol(ProtocolError::ConnectionClosed))
    ));

    let pong = timeout(Duration::from_secs(2), client.ping()).await.unwrap();
    assert!(pong.is_err());
}

#[tokio::test]
async fn test_lag_marker_reaches_watcher() {
    let topic = Topic::Canvas(ProjectKey::from("p1"));
    let marker = ServerMessage::Lagged {
        topic: topic.clone(),
        missed: 12,
    };
    let frame = marker.encode().unwrap();
    let url = start_scripted_server(|mut ws| async move {
        ws.send(Message::Binary(frame.into())).await.unwrap();
        // Hold the socket open until the client goes away.
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;

    let mut client = connect(&url, "grace").await;
    let mut events = client.take_event_rx().unwrap();
    let event = timeout(Duration::from_secs(2), events.recv()).await.unwrap();
    assert_eq!(event, Some(RemoteEvent::Lagged { topic, missed: 12 }));
}
