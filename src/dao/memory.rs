use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::RwLock;

use crate::dao::{SnapshotStore, models::PersistedRecord, storage::PersistResult};

/// In-process store, used when nothing should survive a restart.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshotStore {
    record: Arc<RwLock<Option<PersistedRecord>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a record.
    pub fn with_record(record: PersistedRecord) -> Self {
        Self {
            record: Arc::new(RwLock::new(Some(record))),
        }
    }

    /// Copy of the stored record.
    pub async fn snapshot(&self) -> Option<PersistedRecord> {
        self.record.read().await.clone()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self) -> BoxFuture<'static, PersistResult<Option<PersistedRecord>>> {
        let record = self.record.clone();
        Box::pin(async move { Ok(record.read().await.clone()) })
    }

    fn save(&self, next: PersistedRecord) -> BoxFuture<'static, PersistResult<()>> {
        let record = self.record.clone();
        Box::pin(async move {
            *record.write().await = Some(next);
            Ok(())
        })
    }

    fn clear(&self) -> BoxFuture<'static, PersistResult<()>> {
        let record = self.record.clone();
        Box::pin(async move {
            record.write().await.take();
            Ok(())
        })
    }
}
