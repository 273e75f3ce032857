use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::fs;
use tracing::{debug, warn};

use crate::gaps::gap_list::GapList;

/// Durable storage for a station's gap list. All operations are idempotent, callers retry them
///  freely.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait GapPersistence: Send + Sync + 'static {
    async fn persist(&self, station_name: &str, gap_list: &GapList) -> anyhow::Result<()>;

    async fn clear(&self, station_name: &str) -> anyhow::Result<()>;

    async fn load(&self, station_name: &str) -> anyhow::Result<Option<GapList>>;
}

/// Stores one JSON file per station in a directory
pub struct FileGapPersistence {
    directory: PathBuf,
}

impl FileGapPersistence {
    pub fn new(directory: impl Into<PathBuf>) -> FileGapPersistence {
        FileGapPersistence {
            directory: directory.into(),
        }
    }

    fn file_for(&self, station_name: &str) -> PathBuf {
        self.directory.join(format!("{}.json", station_name))
    }

    async fn write_atomically(&self, path: &Path, content: &[u8]) -> anyhow::Result<()> {
        fs::create_dir_all(&self.directory).await
            .with_context(|| format!("creating gap storage directory {:?}", self.directory))?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content).await
            .with_context(|| format!("writing {:?}", tmp))?;
        fs::rename(&tmp, path).await
            .with_context(|| format!("renaming {:?} to {:?}", tmp, path))?;
        Ok(())
    }
}

#[async_trait]
impl GapPersistence for FileGapPersistence {
    async fn persist(&self, station_name: &str, gap_list: &GapList) -> anyhow::Result<()> {
        let content = serde_json::to_vec_pretty(gap_list)?;
        let path = self.file_for(station_name);
        self.write_atomically(&path, &content).await?;
        debug!("persisted {} gaps for station {} to {:?}", gap_list.num_gaps(), station_name, path);
        Ok(())
    }

    async fn clear(&self, station_name: &str) -> anyhow::Result<()> {
        let path = self.file_for(station_name);
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("cleared gap state for station {}", station_name);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {:?}", path)),
        }
    }

    async fn load(&self, station_name: &str) -> anyhow::Result<Option<GapList>> {
        let path = self.file_for(station_name);
        let content = match fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("reading {:?}", path)),
        };

        let gap_list: GapList = serde_json::from_slice(&content)
            .with_context(|| format!("parsing {:?}", path))?;
        if let Err(e) = gap_list.validate() {
            warn!("discarding inconsistent gap state for station {}: {}", station_name, e);
            return Ok(None);
        }
        Ok(Some(gap_list))
    }
}
