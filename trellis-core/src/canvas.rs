//! Canvas documents: the visual board of a project.
//!
//! A canvas holds two ordered collections (nodes and containers) and a
//! viewport. Nodes and containers are addressed by caller-supplied string
//! ids; duplicates are accepted, and every update or delete applies to all
//! entries sharing the id.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::{DocumentId, EditorId, ProjectKey};
use crate::outcome::Outcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Task,
    Note,
    Milestone,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// A card on the board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    pub position: Point,
    pub size: Size,
    pub content: String,
    pub color: String,
    pub assignee: Option<String>,
}

impl Node {
    /// A node with default geometry, handy for tests and quick inserts.
    pub fn new(id: impl Into<String>, kind: NodeKind, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            position: Point::default(),
            size: Size::new(200.0, 120.0),
            content: content.into(),
            color: "#ffffff".to_string(),
            assignee: None,
        }
    }

    /// Shallow-merge the fields present in `patch`.
    pub fn apply(&mut self, patch: &NodePatch) {
        if let Some(kind) = patch.kind {
            self.kind = kind;
        }
        if let Some(position) = patch.position {
            self.position = position;
        }
        if let Some(size) = patch.size {
            self.size = size;
        }
        if let Some(content) = &patch.content {
            self.content = content.clone();
        }
        if let Some(color) = &patch.color {
            self.color = color.clone();
        }
        if let Some(assignee) = &patch.assignee {
            self.assignee = assignee.clone();
        }
    }
}

/// Partial node update. A field is overwritten iff it is `Some`.
///
/// `assignee` is doubly optional: `Some(None)` clears the assignee.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePatch {
    pub kind: Option<NodeKind>,
    pub position: Option<Point>,
    pub size: Option<Size>,
    pub content: Option<String>,
    pub color: Option<String>,
    pub assignee: Option<Option<String>>,
}

impl NodePatch {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn position(position: Point) -> Self {
        Self {
            position: Some(position),
            ..Self::default()
        }
    }
}

/// A labelled region grouping nodes visually.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub id: String,
    pub name: String,
    pub color: String,
    pub position: Point,
    pub size: Size,
}

impl Container {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            color: "#f1f5f9".to_string(),
            position: Point::default(),
            size: Size::new(480.0, 320.0),
        }
    }

    pub fn apply(&mut self, patch: &ContainerPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(color) = &patch.color {
            self.color = color.clone();
        }
        if let Some(position) = patch.position {
            self.position = position;
        }
        if let Some(size) = patch.size {
            self.size = size;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPatch {
    pub name: Option<String>,
    pub color: Option<String>,
    pub position: Option<Point>,
    pub size: Option<Size>,
}

/// Pan/zoom state. View-only: writing it never advances the version.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub zoom: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            zoom: 1.0,
        }
    }
}

/// The canvas of one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasDocument {
    pub id: DocumentId,
    pub project_key: ProjectKey,
    pub nodes: Vec<Node>,
    pub containers: Vec<Container>,
    pub viewport: Viewport,
    /// 0 only on the uninitialized placeholder; stored documents start at 1.
    pub version: u64,
    pub last_edited_by: Option<EditorId>,
}

impl CanvasDocument {
    /// Empty, zero-version document for a key with nothing stored yet.
    pub fn empty(project_key: ProjectKey) -> Self {
        Self {
            id: Uuid::nil(),
            project_key,
            nodes: Vec::new(),
            containers: Vec::new(),
            viewport: Viewport::default(),
            version: 0,
            last_edited_by: None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.version == 0
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn container(&self, id: &str) -> Option<&Container> {
        self.containers.iter().find(|c| c.id == id)
    }

    pub fn add_node(&mut self, node: Node) -> Outcome {
        self.nodes.push(node);
        Outcome::Applied
    }

    pub fn update_node(&mut self, id: &str, patch: &NodePatch) -> Outcome {
        let mut matched = 0;
        for node in self.nodes.iter_mut().filter(|n| n.id == id) {
            node.apply(patch);
            matched += 1;
        }
        Outcome::from_matches(matched)
    }

    pub fn delete_node(&mut self, id: &str) -> Outcome {
        let before = self.nodes.len();
        self.nodes.retain(|n| n.id != id);
        Outcome::from_matches(before - self.nodes.len())
    }

    pub fn replace_nodes(&mut self, nodes: Vec<Node>) -> Outcome {
        self.nodes = nodes;
        Outcome::Applied
    }

    pub fn add_container(&mut self, container: Container) -> Outcome {
        self.containers.push(container);
        Outcome::Applied
    }

    pub fn update_container(&mut self, id: &str, patch: &ContainerPatch) -> Outcome {
        let mut matched = 0;
        for container in self.containers.iter_mut().filter(|c| c.id == id) {
            container.apply(patch);
            matched += 1;
        }
        Outcome::from_matches(matched)
    }

    pub fn delete_container(&mut self, id: &str) -> Outcome {
        let before = self.containers.len();
        self.containers.retain(|c| c.id != id);
        Outcome::from_matches(before - self.containers.len())
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    /// Record the editor of a content mutation. `None` keeps the previous one.
    pub fn record_editor(&mut self, editor: Option<&EditorId>) {
        if let Some(editor) = editor {
            self.last_edited_by = Some(editor.clone());
        }
    }
}
