//! Persistence of the last reconciled snapshot across restarts.

pub mod file_store;
pub mod memory;
pub mod models;
pub mod storage;

use futures::future::BoxFuture;

use crate::dao::{models::PersistedRecord, storage::PersistResult};

/// Backend holding at most one [`PersistedRecord`].
pub trait SnapshotStore: Send + Sync {
    /// Read the stored record, `None` when nothing was written yet.
    fn load(&self) -> BoxFuture<'static, PersistResult<Option<PersistedRecord>>>;
    /// Replace the stored record.
    fn save(&self, record: PersistedRecord) -> BoxFuture<'static, PersistResult<()>>;
    /// Remove the stored record, succeeding when there was none.
    fn clear(&self) -> BoxFuture<'static, PersistResult<()>>;
}
