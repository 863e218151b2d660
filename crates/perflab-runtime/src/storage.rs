use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use perflab_core::{CoreError, CoreResult};

/// Directory listing entry for a persisted experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredExperiment {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "sizeKB")]
    pub size_kb: u64,
}

/// One-file-per-experiment JSON store under a base directory.
///
/// Files are written create-truncate with mode 0644 (directories 0755)
/// as pretty-printed JSON at `{base}/{id}.json`. The store itself is a
/// dumb put/get; the manager is responsible for rejecting ID reuse.
#[derive(Debug)]
pub struct FileStorage<T> {
    base: PathBuf,
    _payload: PhantomData<fn() -> T>,
}

impl<T> Clone for FileStorage<T> {
    fn clone(&self) -> Self {
        Self {
            base: self.base.clone(),
            _payload: PhantomData,
        }
    }
}

impl<T> FileStorage<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Opens the store, creating the base directory when absent.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Io` when the directory cannot be created.
    pub async fn init(base: impl AsRef<Path>) -> CoreResult<Self> {
        let base = base.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&base).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&base, std::fs::Permissions::from_mode(0o755)).await?;
        }
        Ok(Self {
            base,
            _payload: PhantomData,
        })
    }

    /// Base directory of the store.
    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.base
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.base.join(format!("{id}.json"))
    }

    /// Persists a record under `id`, replacing any existing file.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Serialization` or `CoreError::Io`.
    pub async fn save(&self, id: &str, value: &T) -> CoreResult<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        let path = self.path_for(id);
        tokio::fs::write(&path, bytes).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).await?;
        }
        Ok(())
    }

    /// Loads the record stored under `id`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` when no file exists for `id`,
    /// `CoreError::Deserialization` when the file is unreadable as `T`.
    pub async fn load(&self, id: &str) -> CoreResult<T> {
        let path = self.path_for(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(CoreError::not_found("experiment", id));
            }
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Whether a file exists for `id`.
    pub async fn exists(&self, id: &str) -> bool {
        tokio::fs::try_exists(self.path_for(id))
            .await
            .unwrap_or(false)
    }

    /// Lists stored experiments, newest first.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Io` when the directory cannot be read.
    pub async fn list(&self) -> CoreResult<Vec<StoredExperiment>> {
        let mut entries = tokio::fs::read_dir(&self.base).await?;
        let mut stored = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let created_at = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            stored.push(StoredExperiment {
                id: id.to_string(),
                created_at,
                size_kb: meta.len().div_ceil(1024),
            });
        }
        stored.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Record {
        value: u64,
        label: String,
    }

    async fn store() -> (tempfile::TempDir, FileStorage<Record>) {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::init(dir.path().join("experiments"))
            .await
            .unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn save_load_round_trip() {
        let (_dir, storage) = store().await;
        let record = Record {
            value: 42,
            label: "steady".to_string(),
        };

        storage.save("exp-1", &record).await.unwrap();
        let loaded = storage.load("exp-1").await.unwrap();
        assert_eq!(loaded, record);
    }

    #[tokio::test]
    async fn load_missing_is_not_found() {
        let (_dir, storage) = store().await;
        let err = storage.load("absent").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn exists_reflects_saved_files() {
        let (_dir, storage) = store().await;
        assert!(!storage.exists("exp-1").await);
        storage
            .save(
                "exp-1",
                &Record {
                    value: 1,
                    label: String::new(),
                },
            )
            .await
            .unwrap();
        assert!(storage.exists("exp-1").await);
    }

    #[tokio::test]
    async fn list_reports_ids_and_sizes() {
        let (_dir, storage) = store().await;
        for id in ["exp-a", "exp-b"] {
            storage
                .save(
                    id,
                    &Record {
                        value: 9,
                        label: "x".repeat(100),
                    },
                )
                .await
                .unwrap();
        }

        let listed = storage.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        let mut ids: Vec<_> = listed.iter().map(|e| e.id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["exp-a", "exp-b"]);
        assert!(listed.iter().all(|e| e.size_kb >= 1));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn files_are_world_readable() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, storage) = store().await;
        storage
            .save(
                "exp-1",
                &Record {
                    value: 1,
                    label: String::new(),
                },
            )
            .await
            .unwrap();

        let mode = std::fs::metadata(storage.base_path().join("exp-1.json"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o644);
    }
}
