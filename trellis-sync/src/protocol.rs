//! Wire protocol for the sync transport.
//!
//! One WebSocket carries request/reply calls and change notifications:
//! ```text
//! client                                   server
//!   │── Call { request_id, editor, request } ──►│
//!   │◄──────── Reply { request_id, result } ────│
//!   │── Watch(topic) ──────────────────────────►│
//!   │◄──────────────────── Changed(event) ──────│  (per commit on topic)
//!   │◄──────────── Lagged { topic, missed } ────│  (events dropped for a slow watch)
//!   │── Ping ──────────────────────────────────►│
//!   │◄──────────────────────────────── Pong ────│
//! ```
//!
//! Binary frames are bincode (standard config). Text frames are JSON and
//! get JSON back. Enums stay externally tagged so both encodings accept the
//! same shapes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use trellis_core::{
    Container, ContainerPatch, DocumentId, EditorId, NewTask, Node, NodePatch, Phase, PhaseStatus,
    ProjectKey, ProjectRecord, TaskPatch, Viewport, WorkflowDocument, WorkspaceKey,
};

use crate::broadcast::{ChangeEvent, Topic};
use crate::canvas::CanvasSnapshot;
use crate::error::SyncError;
use crate::projects::ProjectCreated;

/// One operation of the public surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Request {
    InitCanvas { project: ProjectKey },
    AddNode { project: ProjectKey, node: Node },
    UpdateNode { project: ProjectKey, node_id: String, patch: NodePatch },
    DeleteNode { project: ProjectKey, node_id: String },
    BatchUpdateNodes { project: ProjectKey, nodes: Vec<Node> },
    AddContainer { project: ProjectKey, container: Container },
    UpdateContainer { project: ProjectKey, container_id: String, patch: ContainerPatch },
    DeleteContainer { project: ProjectKey, container_id: String },
    UpdateViewport { project: ProjectKey, viewport: Viewport },
    GetCanvas { project: ProjectKey },
    CanvasExists { project: ProjectKey },

    InitializeWorkflow { workspace: WorkspaceKey, phases: Vec<Phase> },
    UpdatePhases { document_id: DocumentId, phases: Vec<Phase> },
    UpdatePhaseStatus { document_id: DocumentId, phase_id: String, status: PhaseStatus },
    UpdateTaskStatus {
        document_id: DocumentId,
        phase_id: String,
        task_id: String,
        completed: bool,
    },
    UpdateTask { document_id: DocumentId, phase_id: String, task_id: String, patch: TaskPatch },
    DeleteTask { document_id: DocumentId, phase_id: String, task_id: String },
    AddTask { document_id: DocumentId, phase_id: String, task: NewTask },
    GetWorkflow { workspace: WorkspaceKey },
    GetWorkflowById { document_id: DocumentId },

    CreateProject { project: ProjectKey, name: String },
    ArchiveProject { project: ProjectKey },
    GetProject { project: ProjectKey },
}

impl Request {
    /// Short operation name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Request::InitCanvas { .. } => "canvas.initCanvas",
            Request::AddNode { .. } => "canvas.addNode",
            Request::UpdateNode { .. } => "canvas.updateNode",
            Request::DeleteNode { .. } => "canvas.deleteNode",
            Request::BatchUpdateNodes { .. } => "canvas.batchUpdateNodes",
            Request::AddContainer { .. } => "canvas.addContainer",
            Request::UpdateContainer { .. } => "canvas.updateContainer",
            Request::DeleteContainer { .. } => "canvas.deleteContainer",
            Request::UpdateViewport { .. } => "canvas.updateViewport",
            Request::GetCanvas { .. } => "canvas.getByKey",
            Request::CanvasExists { .. } => "canvas.exists",
            Request::InitializeWorkflow { .. } => "workflow.initialize",
            Request::UpdatePhases { .. } => "workflow.updatePhases",
            Request::UpdatePhaseStatus { .. } => "workflow.updatePhaseStatus",
            Request::UpdateTaskStatus { .. } => "workflow.updateTaskStatus",
            Request::UpdateTask { .. } => "workflow.updateTask",
            Request::DeleteTask { .. } => "workflow.deleteTask",
            Request::AddTask { .. } => "workflow.addTask",
            Request::GetWorkflow { .. } => "workflow.get",
            Request::GetWorkflowById { .. } => "workflow.getById",
            Request::CreateProject { .. } => "projects.create",
            Request::ArchiveProject { .. } => "projects.archive",
            Request::GetProject { .. } => "projects.get",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Response {
    Done,
    DocumentId(DocumentId),
    Canvas(CanvasSnapshot),
    Exists(bool),
    Workflow(Option<WorkflowDocument>),
    /// `task_id` is `None` when no phase matched
    TaskAdded { task_id: Option<String> },
    Project(Option<ProjectRecord>),
    ProjectCreated(ProjectCreated),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    DuplicateKey,
    Conflict,
    BadRequest,
    Internal,
}

/// An error as seen by a remote caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub code: ErrorCode,
    pub message: String,
}

impl RemoteError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for RemoteError {}

impl From<SyncError> for RemoteError {
    fn from(e: SyncError) -> Self {
        let code = match &e {
            SyncError::NotFound(_) => ErrorCode::NotFound,
            SyncError::DuplicateKey(_) => ErrorCode::DuplicateKey,
            SyncError::Conflict { .. } => ErrorCode::Conflict,
            SyncError::Store(_) | SyncError::Codec(_) => ErrorCode::Internal,
        };
        RemoteError::new(code, e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Call {
        request_id: u64,
        editor: Option<EditorId>,
        request: Request,
    },
    Watch(Topic),
    Unwatch(Topic),
    Ping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Reply {
        request_id: u64,
        result: Result<Response, RemoteError>,
    },
    Changed(ChangeEvent),
    /// `missed` events on `topic` were dropped; the next change still arrives
    Lagged {
        topic: Topic,
        missed: u64,
    },
    Pong,
}

fn encode_binary<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| ProtocolError::SerializationError(e.to_string()))
}

fn decode_binary<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
    Ok(value)
}

fn encode_json<T: Serialize>(value: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(value).map_err(|e| ProtocolError::SerializationError(e.to_string()))
}

fn decode_json<T: DeserializeOwned>(text: &str) -> Result<T, ProtocolError> {
    serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
}

impl ClientMessage {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode_binary(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode_binary(bytes)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        encode_json(self)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        decode_json(text)
    }
}

impl ServerMessage {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode_binary(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode_binary(bytes)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        encode_json(self)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        decode_json(text)
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    /// The socket could not be opened
    ConnectionFailed(String),
    ConnectionClosed,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::SerializationError(e) => write!(f, "Serialization error: {e}"),
            ProtocolError::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            ProtocolError::ConnectionFailed(e) => write!(f, "Connection failed: {e}"),
            ProtocolError::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for ProtocolError {}
