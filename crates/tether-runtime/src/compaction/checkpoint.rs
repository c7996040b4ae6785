//! Session checkpoint persistence.
//!
//! The upstream session writes a free-text summary and a few highlights
//! before its context is cleared; both are replayed in the recovery prompt.
//! Writes go through a temp file in the same directory followed by a rename,
//! so a crash never leaves a half-written checkpoint behind.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::CheckpointError;

/// Persisted session checkpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionCheckpoint {
    /// Free-text summary of the session so far.
    pub summary: String,
    /// Short bullet points worth keeping across a reset.
    pub highlights: Vec<String>,
    /// Epoch ms of the last update (0 when never written).
    pub updated_at: i64,
}

impl SessionCheckpoint {
    /// Whether nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.summary.is_empty() && self.highlights.is_empty()
    }
}

/// JSON file store for [`SessionCheckpoint`].
#[derive(Clone, Debug)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    /// Store backed by `path`. Nothing is read until [`load`](Self::load).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the checkpoint. A missing file yields an empty checkpoint; an
    /// unreadable or corrupt file is logged and also yields an empty one.
    pub fn load(&self) -> SessionCheckpoint {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(cp) => cp,
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "corrupt checkpoint, starting empty");
                    SessionCheckpoint::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SessionCheckpoint::default(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "unreadable checkpoint, starting empty");
                SessionCheckpoint::default()
            }
        }
    }

    /// Atomically write the checkpoint as pretty JSON.
    pub fn save(&self, checkpoint: &SessionCheckpoint) -> Result<(), CheckpointError> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)?;

        let data = serde_json::to_vec_pretty(checkpoint)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(&data)?;
        tmp.as_file().sync_all()?;
        let _ = tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}
