use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use futures::future::BoxFuture;
use tokio::fs;

use crate::dao::{
    SnapshotStore,
    models::PersistedRecord,
    storage::{PersistError, PersistResult},
};

/// JSON file holding the persisted record.
///
/// Writes go to a sibling temporary file first and are renamed into place, so
/// a crash mid-write leaves the previous record intact.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: Arc<Path>,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path: PathBuf = path.into();
        Self {
            path: Arc::from(path),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(&self) -> PathBuf {
        let mut staging = self.path.as_os_str().to_owned();
        staging.push(".tmp");
        PathBuf::from(staging)
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self) -> BoxFuture<'static, PersistResult<Option<PersistedRecord>>> {
        let path = self.path.clone();
        Box::pin(async move {
            let bytes = match fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
                Err(err) => {
                    return Err(PersistError::unavailable(
                        format!("reading {}", path.display()),
                        err,
                    ));
                }
            };
            serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|source| PersistError::Corrupt {
                    message: path.display().to_string(),
                    source,
                })
        })
    }

    fn save(&self, record: PersistedRecord) -> BoxFuture<'static, PersistResult<()>> {
        let path = self.path.clone();
        let staging = self.staging_path();
        Box::pin(async move {
            let bytes = serde_json::to_vec(&record).map_err(|source| PersistError::Corrupt {
                message: "encoding record".into(),
                source,
            })?;
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).await.map_err(|err| {
                    PersistError::unavailable(format!("creating {}", parent.display()), err)
                })?;
            }
            fs::write(&staging, &bytes).await.map_err(|err| {
                PersistError::unavailable(format!("writing {}", staging.display()), err)
            })?;
            fs::rename(&staging, &path).await.map_err(|err| {
                PersistError::unavailable(format!("replacing {}", path.display()), err)
            })
        })
    }

    fn clear(&self) -> BoxFuture<'static, PersistResult<()>> {
        let path = self.path.clone();
        Box::pin(async move {
            match fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(PersistError::unavailable(
                    format!("removing {}", path.display()),
                    err,
                )),
            }
        })
    }
}
