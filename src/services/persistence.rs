//! Restore on start and write-behind saves of the reconciled snapshot.

use std::{sync::Arc, time::Duration};

use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    dao::{SnapshotStore, models::PersistedRecord, storage::PersistError},
    state::{Snapshot, store::is_fresh},
};

/// Load the persisted snapshot if it is younger than `window` at `now_ms`.
///
/// Stale or unreadable records are cleared so they are not offered again.
pub async fn restore(store: &dyn SnapshotStore, now_ms: i64, window: Duration) -> Option<Snapshot> {
    let record = match store.load().await {
        Ok(Some(record)) => record,
        Ok(None) => {
            debug!("no persisted state");
            return None;
        }
        Err(err @ PersistError::Corrupt { .. }) => {
            warn!(error = %err, "discarding corrupt persisted state");
            clear(store).await;
            return None;
        }
        Err(err) => {
            warn!(error = %err, "persisted state unavailable; starting empty");
            return None;
        }
    };

    let age_ms = now_ms.saturating_sub(record.last_update_time_ms);
    if !is_fresh(record.last_update_time_ms, now_ms, window) {
        info!(age_ms, question = record.question_number, "persisted state too old; discarding");
        clear(store).await;
        return None;
    }
    info!(age_ms, question = record.question_number, "restoring persisted state");
    Some(record.into_snapshot())
}

async fn clear(store: &dyn SnapshotStore) {
    if let Err(err) = store.clear().await {
        warn!(error = %err, "failed to clear persisted state");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PersistJob {
    Idle,
    Save(PersistedRecord),
    Clear,
}

/// Background writer that only ever persists the latest requested state.
///
/// Requests made while a write is in flight are coalesced.
#[derive(Debug)]
pub struct PersistWriter {
    jobs: watch::Sender<PersistJob>,
    task: JoinHandle<()>,
}

impl PersistWriter {
    pub fn spawn(store: Arc<dyn SnapshotStore>) -> Self {
        let (jobs, mut pending) = watch::channel(PersistJob::Idle);
        let task = tokio::spawn(async move {
            while pending.changed().await.is_ok() {
                let job = pending.borrow_and_update().clone();
                let result = match job {
                    PersistJob::Idle => continue,
                    PersistJob::Save(record) => store.save(record).await,
                    PersistJob::Clear => store.clear().await,
                };
                if let Err(err) = result {
                    warn!(error = %err, "failed to persist state");
                }
            }
        });
        Self { jobs, task }
    }

    pub fn save(&self, snapshot: &Snapshot) {
        self.jobs
            .send_replace(PersistJob::Save(PersistedRecord::from_snapshot(snapshot)));
    }

    pub fn clear(&self) {
        self.jobs.send_replace(PersistJob::Clear);
    }

    /// Flush the last request and stop the writer.
    pub async fn finish(self) {
        let Self { jobs, task } = self;
        drop(jobs);
        if let Err(err) = task.await {
            warn!(error = %err, "persist writer stopped abnormally");
        }
    }
}
