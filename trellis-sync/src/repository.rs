//! Keyed, versioned documents on top of a [`RecordStore`].
//!
//! ```text
//!  commit(key, mutate)
//!     │
//!     ├─► read record (id, revision, body)     ── absent? create / fail / skip
//!     ├─► decode, mutate a copy, bump version  ── view writes keep the version
//!     ├─► enter the key's commit gate
//!     ├─► compare_and_swap(revision)           ── stale? leave the gate, start over
//!     └─► publish ChangeEvent on the key's topic, leave the gate
//! ```
//!
//! The swap is checked against the storage revision, not the document
//! version: view-only writes leave the version alone but still advance the
//! revision, so a content commit racing a viewport write cannot silently
//! undo it.
//!
//! Swap and publish happen inside one per-key gate, so observers receive
//! a key's events in the order its writes landed.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Display;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use trellis_core::{CanvasDocument, DocumentId, ProjectKey, WorkflowDocument, WorkspaceKey};
use uuid::Uuid;

use crate::broadcast::{ChangeBroadcaster, ChangeEvent, ChangeKind, Topic};
use crate::codec;
use crate::error::{SyncError, SyncResult};
use crate::storage::{InsertOutcome, Keyspace, Record, RecordStore, StoreError, SwapOutcome};

/// A document type the repository can store.
pub trait VersionedDocument: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    type Key: Clone + Display + Send + Sync;

    const KEYSPACE: Keyspace;

    /// Zero-version document for a key with nothing stored.
    fn empty(key: &Self::Key) -> Self;
    fn key_bytes(key: &Self::Key) -> Vec<u8>;
    fn topic(key: &Self::Key) -> Topic;

    fn key(&self) -> &Self::Key;
    fn id(&self) -> DocumentId;
    fn set_id(&mut self, id: DocumentId);
    fn version(&self) -> u64;
    fn set_version(&mut self, version: u64);
}

impl VersionedDocument for CanvasDocument {
    type Key = ProjectKey;

    const KEYSPACE: Keyspace = Keyspace::Canvas;

    fn empty(key: &ProjectKey) -> Self {
        CanvasDocument::empty(key.clone())
    }

    fn key_bytes(key: &ProjectKey) -> Vec<u8> {
        key.to_bytes()
    }

    fn topic(key: &ProjectKey) -> Topic {
        Topic::Canvas(key.clone())
    }

    fn key(&self) -> &ProjectKey {
        &self.project_key
    }

    fn id(&self) -> DocumentId {
        self.id
    }

    fn set_id(&mut self, id: DocumentId) {
        self.id = id;
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

impl VersionedDocument for WorkflowDocument {
    type Key = WorkspaceKey;

    const KEYSPACE: Keyspace = Keyspace::Workflow;

    fn empty(key: &WorkspaceKey) -> Self {
        WorkflowDocument::empty(key.clone())
    }

    fn key_bytes(key: &WorkspaceKey) -> Vec<u8> {
        key.to_bytes()
    }

    fn topic(key: &WorkspaceKey) -> Topic {
        Topic::Workflow(key.clone())
    }

    fn key(&self) -> &WorkspaceKey {
        &self.workspace_key
    }

    fn id(&self) -> DocumentId {
        self.id
    }

    fn set_id(&mut self, id: DocumentId) {
        self.id = id;
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

/// Repository configuration.
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Read-modify-write attempts before a commit gives up with `Conflict`
    pub max_commit_attempts: u32,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            max_commit_attempts: 16,
        }
    }
}

/// What to do when the target document does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Absent {
    /// Start from the empty document and create it
    Create,
    /// Fail with `NotFound`
    Fail,
}

/// A successful commit.
#[derive(Debug, Clone)]
pub struct Committed<D, T> {
    /// The document as written
    pub document: D,
    /// Whatever the mutator returned
    pub value: T,
    /// Whether this commit created the document
    pub created: bool,
}

/// Result of [`Repository::create_if_absent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Created {
    pub id: DocumentId,
    /// False when a document already existed under the key
    pub created: bool,
}

enum Target<'a, K> {
    Key(&'a K),
    Id(DocumentId),
}

impl<K: Display> Target<'_, K> {
    fn describe(&self, space: Keyspace) -> String {
        match self {
            Target::Key(key) => format!("{} document for key {key}", space.name()),
            Target::Id(id) => format!("{} document {id}", space.name()),
        }
    }
}

enum OnAbsent {
    Create,
    Fail,
    Skip,
}

/// Per-key locks held from a write until its event is published.
///
/// Entries exist only while some commit holds or waits on them.
#[derive(Default)]
struct CommitGates {
    gates: Mutex<HashMap<Vec<u8>, Arc<AsyncMutex<()>>>>,
}

impl CommitGates {
    async fn enter(&self, key: &[u8]) -> SyncResult<GatePass<'_>> {
        let gate = {
            let mut gates = self.gates.lock().map_err(StoreError::from)?;
            gates.entry(key.to_vec()).or_default().clone()
        };
        let guard = gate.lock_owned().await;
        Ok(GatePass {
            gates: self,
            key: key.to_vec(),
            guard: Some(guard),
        })
    }
}

struct GatePass<'a> {
    gates: &'a CommitGates,
    key: Vec<u8>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for GatePass<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        if let Ok(mut gates) = self.gates.gates.lock() {
            // Only the map's own handle left: nobody holds or waits on it.
            if gates.get(&self.key).is_some_and(|g| Arc::strong_count(g) == 1) {
                gates.remove(&self.key);
            }
        }
    }
}

/// Keyed document access for one document type. Cloning shares the store
/// and broadcaster.
#[derive(Clone)]
pub struct Repository<D: VersionedDocument> {
    store: Arc<dyn RecordStore>,
    broadcaster: Arc<ChangeBroadcaster>,
    config: RepositoryConfig,
    gates: Arc<CommitGates>,
    _doc: PhantomData<fn() -> D>,
}

impl<D: VersionedDocument> Repository<D> {
    pub fn new(
        store: Arc<dyn RecordStore>,
        broadcaster: Arc<ChangeBroadcaster>,
        config: RepositoryConfig,
    ) -> Self {
        Self {
            store,
            broadcaster,
            config,
            gates: Arc::new(CommitGates::default()),
            _doc: PhantomData,
        }
    }

    pub fn broadcaster(&self) -> &Arc<ChangeBroadcaster> {
        &self.broadcaster
    }

    pub async fn get_by_key(&self, key: &D::Key) -> SyncResult<Option<D>> {
        match self.store.get_by_key(D::KEYSPACE, &D::key_bytes(key))? {
            Some(record) => Ok(Some(codec::decode(&record.body)?)),
            None => Ok(None),
        }
    }

    pub async fn get_by_id(&self, id: DocumentId) -> SyncResult<Option<D>> {
        match self.store.get(D::KEYSPACE, id)? {
            Some(record) => Ok(Some(codec::decode(&record.body)?)),
            None => Ok(None),
        }
    }

    pub async fn exists(&self, key: &D::Key) -> SyncResult<bool> {
        Ok(self.store.lookup(D::KEYSPACE, &D::key_bytes(key))?.is_some())
    }

    /// Get-or-create. An existing document is returned untouched and `init`
    /// does not run against it.
    pub async fn create_if_absent<F>(&self, key: &D::Key, init: F) -> SyncResult<Created>
    where
        F: FnOnce(&mut D),
    {
        let key_bytes = D::key_bytes(key);
        if let Some(id) = self.store.lookup(D::KEYSPACE, &key_bytes)? {
            return Ok(Created { id, created: false });
        }

        let mut doc = D::empty(key);
        init(&mut doc);
        let id = Uuid::new_v4();
        doc.set_id(id);
        doc.set_version(1);

        let body = codec::encode(&doc)?;
        let _pass = self.gates.enter(&key_bytes).await?;
        let record = Record::new(id, key_bytes, body);
        match self.store.insert_if_absent(D::KEYSPACE, record)? {
            InsertOutcome::Inserted(_) => {
                log::info!("Created {} document {id} for key {key}", D::KEYSPACE.name());
                self.announce(&doc, ChangeKind::Content).await;
                Ok(Created { id, created: true })
            }
            InsertOutcome::Existing(existing) => Ok(Created {
                id: existing,
                created: false,
            }),
        }
    }

    /// Content commit by key: version advances by one.
    pub async fn commit<T, F>(
        &self,
        key: &D::Key,
        absent: Absent,
        mutate: F,
    ) -> SyncResult<Committed<D, T>>
    where
        F: FnMut(&mut D) -> T,
    {
        let on_absent = match absent {
            Absent::Create => OnAbsent::Create,
            Absent::Fail => OnAbsent::Fail,
        };
        let committed = self
            .run(Target::Key(key), on_absent, ChangeKind::Content, mutate)
            .await?;
        committed.ok_or_else(|| SyncError::NotFound(Target::Key(key).describe(D::KEYSPACE)))
    }

    /// Content commit by document id; a missing id fails with `NotFound`.
    pub async fn commit_by_id<T, F>(&self, id: DocumentId, mutate: F) -> SyncResult<Committed<D, T>>
    where
        F: FnMut(&mut D) -> T,
    {
        let committed = self
            .run(Target::<D::Key>::Id(id), OnAbsent::Fail, ChangeKind::Content, mutate)
            .await?;
        committed.ok_or_else(|| SyncError::NotFound(Target::<D::Key>::Id(id).describe(D::KEYSPACE)))
    }

    /// View-only commit: the version is left alone and a missing document
    /// is skipped (`Ok(None)`), never created.
    pub async fn commit_view<F>(&self, key: &D::Key, mutate: F) -> SyncResult<Option<D>>
    where
        F: FnMut(&mut D),
    {
        let committed = self
            .run(Target::Key(key), OnAbsent::Skip, ChangeKind::View, mutate)
            .await?;
        Ok(committed.map(|c| c.document))
    }

    async fn run<T, F>(
        &self,
        target: Target<'_, D::Key>,
        on_absent: OnAbsent,
        kind: ChangeKind,
        mut mutate: F,
    ) -> SyncResult<Option<Committed<D, T>>>
    where
        F: FnMut(&mut D) -> T,
    {
        let attempts = self.config.max_commit_attempts.max(1);

        for attempt in 1..=attempts {
            let record = match &target {
                Target::Key(key) => self.store.get_by_key(D::KEYSPACE, &D::key_bytes(key))?,
                Target::Id(id) => self.store.get(D::KEYSPACE, *id)?,
            };

            let Some(record) = record else {
                let key = match (&on_absent, &target) {
                    (OnAbsent::Skip, _) => return Ok(None),
                    (OnAbsent::Create, Target::Key(key)) => *key,
                    _ => return Err(SyncError::NotFound(target.describe(D::KEYSPACE))),
                };

                let mut doc = D::empty(key);
                let value = mutate(&mut doc);
                let id = Uuid::new_v4();
                doc.set_id(id);
                doc.set_version(1);

                let key_bytes = D::key_bytes(key);
                let body = codec::encode(&doc)?;
                let _pass = self.gates.enter(&key_bytes).await?;
                let record = Record::new(id, key_bytes, body);
                match self.store.insert_if_absent(D::KEYSPACE, record)? {
                    InsertOutcome::Inserted(_) => {
                        log::info!("Created {} document {id} for key {key}", D::KEYSPACE.name());
                        self.announce(&doc, kind).await;
                        return Ok(Some(Committed {
                            document: doc,
                            value,
                            created: true,
                        }));
                    }
                    InsertOutcome::Existing(winner) => {
                        log::debug!(
                            "Lost creation race for key {key} to {winner}, retrying as update"
                        );
                        continue;
                    }
                }
            };

            let mut doc: D = codec::decode(&record.body)?;
            let value = mutate(&mut doc);
            if kind == ChangeKind::Content {
                doc.set_version(doc.version() + 1);
            }

            let body = codec::encode(&doc)?;
            let _pass = self.gates.enter(&record.key).await?;
            match self
                .store
                .compare_and_swap(D::KEYSPACE, record.id, record.revision, body)?
            {
                SwapOutcome::Swapped(_) => {
                    log::trace!(
                        "Committed {} document {} at version {} ({kind:?})",
                        D::KEYSPACE.name(),
                        record.id,
                        doc.version()
                    );
                    self.announce(&doc, kind).await;
                    return Ok(Some(Committed {
                        document: doc,
                        value,
                        created: false,
                    }));
                }
                SwapOutcome::Stale { current_revision } => {
                    log::debug!(
                        "Stale write on {} document {} (read rev {}, now {current_revision}), \
                         attempt {attempt}/{attempts}",
                        D::KEYSPACE.name(),
                        record.id,
                        record.revision
                    );
                }
                SwapOutcome::Missing => {
                    return Err(SyncError::NotFound(target.describe(D::KEYSPACE)));
                }
            }
        }

        log::warn!(
            "Giving up on {} after {attempts} conflicting attempts",
            target.describe(D::KEYSPACE)
        );
        Err(SyncError::Conflict { attempts })
    }

    async fn announce(&self, doc: &D, kind: ChangeKind) {
        let event = ChangeEvent {
            topic: D::topic(doc.key()),
            document_id: doc.id(),
            version: doc.version(),
            kind,
        };
        self.broadcaster.publish(event).await;
    }
}
