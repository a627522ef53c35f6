//! Record storage behind the repository.
//!
//! Architecture:
//! ```text
//! ┌─────────────┐   get / lookup    ┌──────────────────────────────┐
//! │ Repository  │ ────────────────► │ RecordStore (trait)          │
//! │ (per doc    │   insert_if_absent│                              │
//! │  type)      │   compare_and_swap│  MemoryStore  — tests, embed │
//! └─────────────┘                   │  RocksStore   — durable      │
//!                                   └──────────────────────────────┘
//! ```
//!
//! A store holds independent keyspaces. Within a keyspace a record is
//! addressed by id and indexed by the caller's key bytes; at most one record
//! exists per key. Every write advances the record's `revision`, which is
//! what `compare_and_swap` checks. Document versions live inside the body
//! and are not the store's concern.

pub mod memory;
pub mod rocks;

pub use memory::MemoryStore;
pub use rocks::{RocksStore, StoreConfig};

use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

/// Independent keyspaces. The tag is part of the on-disk key layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Keyspace {
    Canvas = 1,
    Workflow = 2,
    Project = 3,
}

impl Keyspace {
    pub const ALL: [Keyspace; 3] = [Keyspace::Canvas, Keyspace::Workflow, Keyspace::Project];

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Keyspace::Canvas => "canvas",
            Keyspace::Workflow => "workflow",
            Keyspace::Project => "projects",
        }
    }
}

/// A stored record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: Uuid,
    /// Key bytes the record is indexed under
    pub key: Vec<u8>,
    /// Storage write counter, starts at 1
    pub revision: u64,
    /// Encoded document
    pub body: Vec<u8>,
    /// Creation timestamp (seconds since epoch)
    pub created_at: u64,
    /// Last write timestamp (seconds since epoch)
    pub updated_at: u64,
}

impl Record {
    /// A fresh record at revision 1.
    pub fn new(id: Uuid, key: Vec<u8>, body: Vec<u8>) -> Self {
        let now = now_secs();
        Self {
            id,
            key,
            revision: 1,
            body,
            created_at: now,
            updated_at: now,
        }
    }

    /// The record that replaces this one after a successful swap.
    pub fn successor(&self, body: Vec<u8>) -> Self {
        Self {
            id: self.id,
            key: self.key.clone(),
            revision: self.revision + 1,
            body,
            created_at: self.created_at,
            updated_at: now_secs(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::SerializationError(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (record, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
        Ok(record)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(Record),
    /// A record already exists under the key; nothing was written.
    Existing(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapOutcome {
    Swapped(Record),
    /// The stored revision moved on since it was read.
    Stale { current_revision: u64 },
    Missing,
}

/// Storage errors.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// Backend internal error
    DatabaseError(String),
    /// Serialization failed
    SerializationError(String),
    /// Deserialization failed
    DeserializationError(String),
    /// Compression error
    CompressionError(String),
    /// A writer panicked while holding the store lock
    Poisoned,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DatabaseError(e) => write!(f, "Database error: {e}"),
            StoreError::SerializationError(e) => write!(f, "Serialization error: {e}"),
            StoreError::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            StoreError::CompressionError(e) => write!(f, "Compression error: {e}"),
            StoreError::Poisoned => write!(f, "Store lock poisoned"),
        }
    }
}

impl std::error::Error for StoreError {}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        StoreError::Poisoned
    }
}

/// Key-value seam for versioned records.
///
/// Implementations must make `insert_if_absent` and `compare_and_swap`
/// atomic with respect to each other for the same keyspace.
pub trait RecordStore: Send + Sync {
    fn get(&self, space: Keyspace, id: Uuid) -> Result<Option<Record>, StoreError>;

    /// Resolve key bytes to a record id.
    fn lookup(&self, space: Keyspace, key: &[u8]) -> Result<Option<Uuid>, StoreError>;

    fn get_by_key(&self, space: Keyspace, key: &[u8]) -> Result<Option<Record>, StoreError> {
        match self.lookup(space, key)? {
            Some(id) => self.get(space, id),
            None => Ok(None),
        }
    }

    /// Store `record` under `record.key` unless that key is taken.
    fn insert_if_absent(
        &self,
        space: Keyspace,
        record: Record,
    ) -> Result<InsertOutcome, StoreError>;

    /// Replace the body of record `id` if its revision is still
    /// `expected_revision`.
    fn compare_and_swap(
        &self,
        space: Keyspace,
        id: Uuid,
        expected_revision: u64,
        body: Vec<u8>,
    ) -> Result<SwapOutcome, StoreError>;

    fn list_ids(&self, space: Keyspace) -> Result<Vec<Uuid>, StoreError>;
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
