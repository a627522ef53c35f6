//! # trellis-sync — Versioned document sync for Trellis
//!
//! Keyed, versioned canvas and workflow documents that many clients mutate
//! concurrently and observe live.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌─────────────┐
//! │ SyncClient  │ ◄─────────────────► │ SyncServer  │
//! │ (per user)  │  bincode / JSON     │ (central)   │
//! └─────────────┘                     └──────┬──────┘
//!                                            │ dispatch
//!                                     ┌──────┴──────┐
//!                                     │  SyncHub    │  canvas / workflow / projects
//!                                     └──────┬──────┘
//!                                            │ commit (CAS on revision)
//!                    ┌───────────────────────┼──────────────────────┐
//!                    ▼                       ▼                      ▼
//!            ┌──────────────┐       ┌────────────────┐     ┌────────────────┐
//!            │ Repository<D>│──────►│ RecordStore    │     │ ChangeBroadcast│
//!            │              │       │ memory / Rocks │     │ per-key topics │
//!            └──────────────┘       └────────────────┘     └────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`storage`] — record store seam with in-memory and RocksDB backends
//! - [`repository`] — get-or-create and compare-and-swap commits per key
//! - [`canvas`], [`workflow`], [`projects`] — the operations on each document kind
//! - [`broadcast`] — per-key change fan-out
//! - [`watch`] — live queries re-run on every change
//! - [`protocol`] — wire messages (bincode or JSON)
//! - [`dispatch`] — request routing over one store
//! - [`server`] / [`client`] — WebSocket transport

pub mod broadcast;
pub mod canvas;
pub mod client;
pub mod codec;
pub mod dispatch;
pub mod error;
pub mod projects;
pub mod protocol;
pub mod repository;
pub mod server;
pub mod storage;
pub mod watch;
pub mod workflow;

// Re-exports for convenience
pub use broadcast::{
    BroadcastStats, ChangeBroadcaster, ChangeEvent, ChangeKind, Notification, Subscription, Topic,
};
pub use canvas::{CanvasCommit, CanvasService, CanvasSnapshot};
pub use client::{ClientError, ConnectionState, RemoteEvent, SyncClient};
pub use dispatch::{SyncHub, DEFAULT_BROADCAST_CAPACITY};
pub use error::{SyncError, SyncResult};
pub use projects::{ProjectCreated, ProjectService};
pub use protocol::{
    ClientMessage, ErrorCode, ProtocolError, RemoteError, Request, Response, ServerMessage,
};
pub use repository::{Absent, Committed, Created, Repository, RepositoryConfig, VersionedDocument};
pub use server::{ServerConfig, ServerStats, SyncServer};
pub use storage::{
    InsertOutcome, Keyspace, MemoryStore, Record, RecordStore, RocksStore, StoreConfig, StoreError,
    SwapOutcome,
};
pub use watch::{CanvasWatch, WorkflowWatch};
pub use workflow::{WorkflowCommit, WorkflowService};
