//! Artifact storage for a single run.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Directory of artifacts produced by one scenario run.
///
/// Guarded by its own lock, never the execution handle: saves and download
/// bookkeeping happen from driver threads and background tasks.
pub struct Storage {
    dir: PathBuf,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    artifacts: Vec<PathBuf>,
    /// In-flight downloads, guid to target filename.
    downloads: HashMap<String, String>,
}

impl Storage {
    /// Create `<base>/<script-stem>/<YYYYMMDDTHHMMSS>/`. `base` defaults to
    /// the script's own directory.
    pub fn new(
        base: Option<&Path>,
        script: &Path,
        timestamp: DateTime<Utc>,
    ) -> io::Result<Storage> {
        let base = match base {
            Some(base) => base.to_path_buf(),
            None => script.parent().unwrap_or(Path::new(".")).to_path_buf(),
        };
        let stem = script
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "scenario".to_string());
        let dir = base
            .join(stem)
            .join(timestamp.format("%Y%m%dT%H%M%S").to_string());
        fs::create_dir_all(&dir)?;
        Ok(Storage {
            dir,
            state: Mutex::new(State::default()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `data` and record the artifact.
    pub fn save(&self, name: &str, ext: &str, data: &[u8]) -> io::Result<PathBuf> {
        let path = self.reserve(name, ext);
        fs::write(&path, data)?;
        Ok(path)
    }

    /// Record an artifact path without writing yet; the caller (a scheduled
    /// background write) fills it in later.
    pub fn reserve(&self, name: &str, ext: &str) -> PathBuf {
        let mut name = name.to_string();
        if !name.ends_with(ext) {
            name.push_str(ext);
        }
        let path = self.dir.join(name);
        self.state.lock().unwrap().artifacts.push(path.clone());
        path
    }

    pub fn start_download(&self, guid: &str, filename: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .downloads
            .insert(guid.to_string(), filename.to_string());
    }

    pub fn cancel_download(&self, guid: &str) {
        self.state.lock().unwrap().downloads.remove(guid);
    }

    /// Promote a finished download to a recorded artifact.
    pub fn complete_download(&self, guid: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(filename) = state.downloads.remove(guid) {
            let path = self.dir.join(filename);
            state.artifacts.push(path);
        }
    }

    /// Snapshot of every recorded artifact path, in recording order.
    pub fn artifacts(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().artifacts.clone()
    }
}
