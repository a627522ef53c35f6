//! Live queries: a subscription plus the query it re-runs.
//!
//! Each `next()` waits for the key's next change and returns the freshly
//! read result. Events are hints only; the read is always authoritative, so
//! a lagging watcher skips the dropped events and re-reads once.

use trellis_core::{ProjectKey, WorkflowDocument, WorkspaceKey};

use crate::broadcast::{Notification, Subscription};
use crate::canvas::{CanvasService, CanvasSnapshot};
use crate::error::SyncResult;
use crate::workflow::WorkflowService;

/// Wait for the next change. `false` once the broadcaster is gone.
async fn changed(subscription: &mut Subscription) -> bool {
    match subscription.recv().await {
        Some(Notification::Changed(_)) => true,
        Some(Notification::Lagged(_)) => {
            // Anything still buffered is older than the read we are about to do.
            while subscription.try_recv().is_some() {}
            true
        }
        None => false,
    }
}

pub struct CanvasWatch {
    service: CanvasService,
    key: ProjectKey,
    subscription: Subscription,
}

impl CanvasWatch {
    pub(crate) fn new(service: CanvasService, key: ProjectKey, subscription: Subscription) -> Self {
        Self {
            service,
            key,
            subscription,
        }
    }

    pub fn key(&self) -> &ProjectKey {
        &self.key
    }

    pub async fn current(&self) -> SyncResult<CanvasSnapshot> {
        self.service.get_by_key(&self.key).await
    }

    pub async fn next(&mut self) -> Option<SyncResult<CanvasSnapshot>> {
        if !changed(&mut self.subscription).await {
            return None;
        }
        Some(self.current().await)
    }
}

pub struct WorkflowWatch {
    service: WorkflowService,
    key: WorkspaceKey,
    subscription: Subscription,
}

impl WorkflowWatch {
    pub(crate) fn new(
        service: WorkflowService,
        key: WorkspaceKey,
        subscription: Subscription,
    ) -> Self {
        Self {
            service,
            key,
            subscription,
        }
    }

    pub fn key(&self) -> &WorkspaceKey {
        &self.key
    }

    pub async fn current(&self) -> SyncResult<Option<WorkflowDocument>> {
        self.service.get(&self.key).await
    }

    pub async fn next(&mut self) -> Option<SyncResult<Option<WorkflowDocument>>> {
        if !changed(&mut self.subscription).await {
            return None;
        }
        Some(self.current().await)
    }
}
