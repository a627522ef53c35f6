//! # trellis-core — Document records for Trellis
//!
//! Plain data shapes for the two kinds of collaborative document plus the
//! pure state transitions applied to them. Nothing here touches storage or
//! the network; `trellis-sync` wraps these transitions in versioned commits.
//!
//! ```text
//! ┌──────────────────┐      ┌───────────────────┐
//! │ CanvasDocument   │      │ WorkflowDocument  │
//! │  key: project    │      │  key: workspace?  │
//! │  nodes[]         │      │  phases[]         │
//! │  containers[]    │      │    └─ tasks[]     │
//! │  viewport        │      │                   │
//! └──────────────────┘      └───────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`canvas`] — nodes, containers and viewport of a project board
//! - [`workflow`] — phases and tasks of a workspace roadmap
//! - [`project`] — the project record a canvas is paired with
//! - [`ids`] — keys, editor identity and task id generation
//! - [`outcome`] — whether a nested mutation matched anything

pub mod canvas;
pub mod ids;
pub mod outcome;
pub mod project;
pub mod workflow;

pub use canvas::{
    CanvasDocument, Container, ContainerPatch, Node, NodeKind, NodePatch, Point, Size, Viewport,
};
pub use ids::{new_task_id, DocumentId, EditorId, ProjectKey, WorkspaceKey};
pub use outcome::Outcome;
pub use project::ProjectRecord;
pub use workflow::{NewTask, Phase, PhaseStatus, Task, TaskPatch, WorkflowDocument};
