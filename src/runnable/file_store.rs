// src/runnable/file_store.rs

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::errors::Result;
use crate::runnable::{Runnable, RunnableStore};

/// Default directory (relative to the working directory) for file mode.
pub const DEFAULT_STORE_DIR: &str = ".runplane/runnables";

/// Stores each runnable as `<dir>/<blake3(id)>.json`.
///
/// Hashing the id keeps arbitrary ids filesystem-safe. Writes go to a
/// temporary file and are renamed into place, so concurrent readers see
/// either the old or the new document.
#[derive(Debug)]
pub struct FileRunnableStore {
    dir: PathBuf,
    write_guard: Mutex<()>,
}

impl FileRunnableStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_guard: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        let digest = blake3::hash(id.as_bytes()).to_hex();
        self.dir.join(format!("{digest}.json"))
    }

    fn read(path: &Path) -> Result<Option<Runnable>> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl RunnableStore for FileRunnableStore {
    fn store(&self, id: &str, runnable: &Runnable) -> Result<()> {
        let path = self.path_for(id);
        let tmp = path.with_extension("json.tmp");
        let contents = serde_json::to_vec_pretty(runnable)?;

        let _guard = self
            .write_guard
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &path)?;

        debug!(runnable_id = %id, state = %runnable.state, path = ?path, "stored runnable (file)");
        Ok(())
    }

    fn find(&self, id: &str) -> Result<Option<Runnable>> {
        Self::read(&self.path_for(id))
    }

    fn find_all(&self) -> Result<Vec<Runnable>> {
        let mut all = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read(&path) {
                Ok(Some(runnable)) => all.push(runnable),
                Ok(None) => {}
                Err(e) => {
                    warn!(path = ?path, error = %e, "skipping unreadable runnable document");
                }
            }
        }
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    fn remove(&self, id: &str) -> Result<Option<Runnable>> {
        let path = self.path_for(id);
        let _guard = self
            .write_guard
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let existing = Self::read(&path)?;
        if existing.is_some() {
            fs::remove_file(&path)?;
        }
        Ok(existing)
    }
}
