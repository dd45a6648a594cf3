//! Stage-output cache: record stage outputs and replay them instead of
//! re-invoking the stage.
//!
//! The cache is a port: the executor only sees [`StageCache`]. Whether it is
//! consulted at all is decided per stage by [`CacheMode`], so a run can, for
//! example, replay the expensive `summarize` output while re-running the
//! cheap export.

use crate::error::CacheError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// How the executor uses the cache for a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Never read or write. (default)
    #[default]
    Disabled,
    /// Always run the stage, then store its output.
    Record,
    /// Substitute the stored output when present; otherwise run and store.
    Replay,
}

/// Storage for stage outputs, keyed by stage name.
#[async_trait]
pub trait StageCache<U>: Send + Sync {
    /// Stored output for `stage`, or `None` if nothing was recorded.
    async fn load(&self, stage: &str) -> Result<Option<U>, CacheError>;

    /// Store `output` as the latest output of `stage`.
    async fn store(&self, stage: &str, output: &U) -> Result<(), CacheError>;
}

/// One pretty-printed JSON file per stage: `<dir>/<stage>.json`.
#[derive(Debug, Clone)]
pub struct JsonFileCache {
    dir: PathBuf,
}

impl JsonFileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, stage: &str) -> PathBuf {
        self.dir.join(format!("{stage}.json"))
    }
}

#[async_trait]
impl<U> StageCache<U> for JsonFileCache
where
    U: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn load(&self, stage: &str) -> Result<Option<U>, CacheError> {
        let path = self.path_for(stage);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CacheError::Io { path, source }),
        };
        let value = serde_json::from_slice(&bytes).map_err(|source| CacheError::Serde {
            path: path.clone(),
            source,
        })?;
        debug!("Loaded cached output for '{}' from {}", stage, path.display());
        Ok(Some(value))
    }

    async fn store(&self, stage: &str, output: &U) -> Result<(), CacheError> {
        let path = self.path_for(stage);
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| CacheError::Io {
                path: self.dir.clone(),
                source,
            })?;

        let json = serde_json::to_vec_pretty(output).map_err(|source| CacheError::Serde {
            path: path.clone(),
            source,
        })?;

        // Atomic write: temp file, then rename
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &json)
            .await
            .map_err(|source| CacheError::Io {
                path: tmp_path.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|source| CacheError::Io {
                path: path.clone(),
                source,
            })?;

        debug!("Stored output of '{}' at {}", stage, path.display());
        Ok(())
    }
}
