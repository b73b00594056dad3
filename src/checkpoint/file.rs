use crate::checkpoint::{CheckpointBackend, CheckpointError};
use crate::state::ScrapeState;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Stores one JSON checkpoint file per source
///
/// Files are named `scraping_state_<source>.json`. Writes go to a sibling
/// temp file that is synced and then renamed over the target, so a crash
/// leaves either the old or the new checkpoint, never a torn one.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    dir: PathBuf,
}

impl JsonFileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Location of the checkpoint file for a source
    pub fn path_for(&self, source_id: &str) -> PathBuf {
        self.dir.join(format!("scraping_state_{}.json", source_id))
    }

    fn temp_path(path: &Path) -> PathBuf {
        let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        path.with_file_name(name)
    }
}

impl CheckpointBackend for JsonFileBackend {
    fn load(&self, source_id: &str) -> Result<Option<ScrapeState>, CheckpointError> {
        let path = self.path_for(source_id);
        if !path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&path)?;
        let state = serde_json::from_str(&contents).map_err(|e| CheckpointError::Corrupt {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(Some(state))
    }

    fn save(&self, source_id: &str, state: &ScrapeState) -> Result<(), CheckpointError> {
        fs::create_dir_all(&self.dir)?;

        let path = self.path_for(source_id);
        let temp = Self::temp_path(&path);
        let json = serde_json::to_vec_pretty(state)?;

        {
            let mut file = File::create(&temp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &path)?;

        Ok(())
    }

    fn clear(&self, source_id: &str) -> Result<(), CheckpointError> {
        let path = self.path_for(source_id);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}
