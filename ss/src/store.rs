//! StatusStore - read and write the status file
//!
//! Writes go to a sibling temp file that is renamed over the target while an
//! exclusive advisory lock is held on a sidecar lock file. Readers take the
//! shared lock, so a read never observes a half-written record.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local, Utc};
use fs2::FileExt;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::StoreError;
use crate::header;
use crate::legacy;
use crate::model::ProjectState;
use crate::render::{self, DEFAULT_TITLE};

/// Where the fields of a [`StatusRecord`] came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordSource {
    /// No status file; defaults
    Missing,
    /// Parsed from the structured header
    Structured,
    /// Recovered from the free-text body
    Legacy,
}

/// A record as read from disk, with parse annotations
#[derive(Debug, Clone, Serialize)]
pub struct StatusRecord {
    #[serde(flatten)]
    pub state: ProjectState,
    pub source: RecordSource,
    /// Modification time of the status file
    pub file_modified: Option<DateTime<Utc>>,
    /// Diagnostics joined into one message; None when the parse was clean
    pub parse_error: Option<String>,
    /// Raw `state` value that is not a valid state
    pub unrecognized_state: Option<String>,
}

impl StatusRecord {
    fn missing() -> Self {
        Self {
            state: ProjectState::default(),
            source: RecordSource::Missing,
            file_modified: None,
            parse_error: None,
            unrecognized_state: None,
        }
    }
}

/// Parse status file content without touching the filesystem
pub fn parse(content: &str) -> StatusRecord {
    let (state, source, diagnostics, unrecognized_state) = match header::parse(content) {
        Some(parsed) => (
            parsed.state,
            RecordSource::Structured,
            parsed.diagnostics,
            parsed.unrecognized_state,
        ),
        None => {
            let parsed = legacy::parse(content);
            (parsed.state, RecordSource::Legacy, parsed.diagnostics, None)
        }
    };

    StatusRecord {
        state,
        source,
        file_modified: None,
        parse_error: (!diagnostics.is_empty()).then(|| diagnostics.join("; ")),
        unrecognized_state,
    }
}

/// File-backed store for the project status record
#[derive(Debug, Clone)]
pub struct StatusStore {
    path: PathBuf,
    title: String,
}

impl StatusStore {
    /// Create a store for the status file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        debug!(?path, "StatusStore::new: called");
        Self {
            path,
            title: DEFAULT_TITLE.to_string(),
        }
    }

    /// Set the project title shown in the readable body
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Path of the status file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "status".to_string());
        self.path.with_file_name(format!(".{}.lock", name))
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "status".to_string());
        self.path.with_file_name(format!(".{}.tmp", name))
    }

    fn open_lock(&self) -> std::io::Result<File> {
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path())
    }

    /// Modification time of the status file, if it exists
    pub fn modified(&self) -> Option<SystemTime> {
        fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }

    /// Read the current record
    ///
    /// Never fails: a missing file yields defaults, unreadable or unparsable
    /// content yields defaults merged with whatever could be recovered, plus
    /// a `parse_error` annotation.
    pub fn read(&self) -> StatusRecord {
        debug!(path = ?self.path, "StatusStore::read: called");
        if !self.path.exists() {
            debug!("StatusStore::read: no status file, returning defaults");
            return StatusRecord::missing();
        }

        // Lock file may be uncreatable in a read-only directory; read unlocked then
        let lock = self.open_lock().ok();
        if let Some(lock) = &lock
            && let Err(e) = FileExt::lock_shared(lock)
        {
            debug!(error = %e, "StatusStore::read: shared lock unavailable");
        }

        let content = fs::read_to_string(&self.path);
        let file_modified = self.modified().map(DateTime::<Utc>::from);

        if let Some(lock) = &lock {
            let _ = FileExt::unlock(lock);
        }

        let mut record = match content {
            Ok(content) => parse(&content),
            Err(e) => {
                warn!(error = %e, path = ?self.path, "Failed to read status file");
                let mut record = StatusRecord::missing();
                record.parse_error = Some(format!("failed to read {}: {}", self.path.display(), e));
                record
            }
        };
        record.file_modified = file_modified;

        if let Some(err) = &record.parse_error {
            warn!(path = ?self.path, error = %err, "Status file parsed with diagnostics");
        }
        debug!(state = %record.state.state, source = ?record.source, "StatusStore::read: returning");
        record
    }

    /// Persist `state`, replacing the whole file
    pub fn write(&self, state: &ProjectState) -> Result<(), StoreError> {
        debug!(path = ?self.path, state = %state.state, "StatusStore::write: called");
        state.validate()?;
        let content = render::render(state, &self.title, Local::now())?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| StoreError::io("create directory", parent, e))?;
        }

        let lock = self
            .open_lock()
            .map_err(|e| StoreError::io("open lock file", &self.lock_path(), e))?;
        FileExt::lock_exclusive(&lock).map_err(|e| StoreError::io("lock", &self.lock_path(), e))?;

        let result = self.replace(&content);
        let _ = FileExt::unlock(&lock);
        result?;

        info!(path = ?self.path, state = %state.state, phase = state.phase, "Status written");
        Ok(())
    }

    fn replace(&self, content: &str) -> Result<(), StoreError> {
        let temp = self.temp_path();
        let mut file = File::create(&temp).map_err(|e| StoreError::io("create", &temp, e))?;
        file.write_all(content.as_bytes())
            .map_err(|e| StoreError::io("write", &temp, e))?;
        file.sync_all().map_err(|e| StoreError::io("sync", &temp, e))?;
        drop(file);
        fs::rename(&temp, &self.path).map_err(|e| StoreError::io("replace", &self.path, e))
    }
}
