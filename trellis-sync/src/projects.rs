//! Project records and their paired canvas.
//!
//! Creating a project touches two documents with no transaction between
//! them: the project record is inserted first (first writer wins, a second
//! create is `DuplicateKey`), then the canvas is get-or-created. If the
//! canvas step fails the record stays and the canvas is created lazily by
//! the first canvas write.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use trellis_core::{DocumentId, ProjectKey, ProjectRecord};
use uuid::Uuid;

use crate::canvas::CanvasService;
use crate::codec;
use crate::error::{SyncError, SyncResult};
use crate::repository::RepositoryConfig;
use crate::storage::{now_secs, InsertOutcome, Keyspace, Record, RecordStore, SwapOutcome};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectCreated {
    pub project: ProjectRecord,
    /// `None` when the canvas could not be created
    pub canvas_id: Option<DocumentId>,
}

#[derive(Clone)]
pub struct ProjectService {
    store: Arc<dyn RecordStore>,
    canvases: CanvasService,
    config: RepositoryConfig,
}

impl ProjectService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        canvases: CanvasService,
        config: RepositoryConfig,
    ) -> Self {
        Self {
            store,
            canvases,
            config,
        }
    }

    pub async fn create_project(&self, key: &ProjectKey, name: &str) -> SyncResult<ProjectCreated> {
        let project = ProjectRecord::new(key.clone(), name, now_secs());
        let record = Record::new(Uuid::new_v4(), key.to_bytes(), codec::encode(&project)?);

        let outcome = self.store.insert_if_absent(Keyspace::Project, record)?;
        if let InsertOutcome::Existing(_) = outcome {
            return Err(SyncError::DuplicateKey(key.to_string()));
        }
        log::info!("Created project {key}");

        let canvas_id = match self.canvases.init_canvas(key).await {
            Ok(id) => Some(id),
            Err(e) => {
                log::error!("Project {key} created without canvas: {e}");
                None
            }
        };

        Ok(ProjectCreated { project, canvas_id })
    }

    /// Mark the project archived. Archiving twice is harmless.
    pub async fn archive_project(&self, key: &ProjectKey) -> SyncResult<ProjectRecord> {
        let attempts = self.config.max_commit_attempts.max(1);
        for _ in 0..attempts {
            let Some(record) = self.store.get_by_key(Keyspace::Project, &key.to_bytes())? else {
                return Err(SyncError::NotFound(format!("project {key}")));
            };
            let mut project: ProjectRecord = codec::decode(&record.body)?;
            project.archived = true;

            match self.store.compare_and_swap(
                Keyspace::Project,
                record.id,
                record.revision,
                codec::encode(&project)?,
            )? {
                SwapOutcome::Swapped(_) => {
                    log::info!("Archived project {key}");
                    return Ok(project);
                }
                SwapOutcome::Stale { .. } => continue,
                SwapOutcome::Missing => return Err(SyncError::NotFound(format!("project {key}"))),
            }
        }
        Err(SyncError::Conflict { attempts })
    }

    pub async fn get_project(&self, key: &ProjectKey) -> SyncResult<Option<ProjectRecord>> {
        match self.store.get_by_key(Keyspace::Project, &key.to_bytes())? {
            Some(record) => Ok(Some(codec::decode(&record.body)?)),
            None => Ok(None),
        }
    }
}
