use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::config::NotesOptions;
use crate::host::dialogs::{ConfirmPrompt, HostDialogs, MessageBox, MessageLevel, SavePrompt};

const NOTE_EXTENSION: &str = "md";
const WELCOME_NOTE: &str = include_str!("welcome.md");
const UNTITLED: &str = "Untitled";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteInfo {
    pub title: String,
    /// Epoch milliseconds.
    pub last_edit_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    #[serde(flatten)]
    pub info: NoteInfo,
    pub content: String,
}

impl Note {
    pub fn title(&self) -> &str {
        &self.info.title
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub platform: String,
}

impl DeviceInfo {
    pub fn current() -> Self {
        Self {
            platform: std::env::consts::OS.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreErrorKind {
    NotFound,
    InvalidTitle,
    #[serde(with = "io_kind")]
    Io(io::ErrorKind),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("note '{title}' does not exist")]
    NotFound { title: String },
    #[error("invalid note title '{title}': {reason}")]
    InvalidTitle { title: String, reason: &'static str },
    #[error("{op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    pub fn kind(&self) -> StoreErrorKind {
        match self {
            StoreError::NotFound { .. } => StoreErrorKind::NotFound,
            StoreError::InvalidTitle { .. } => StoreErrorKind::InvalidTitle,
            StoreError::Io { source, .. } => StoreErrorKind::Io(source.kind()),
        }
    }

    fn io(op: &'static str, path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Markdown notes kept as `<root>/<title>.md`.
#[derive(Clone)]
pub struct NoteStore {
    root: Arc<PathBuf>,
    welcome_title: Arc<str>,
    seeded: Arc<AtomicBool>,
}

impl NoteStore {
    pub fn open(options: &NotesOptions) -> StoreResult<Self> {
        let store = Self {
            root: Arc::new(options.root_dir.clone()),
            welcome_title: Arc::from(options.welcome_title.as_str()),
            seeded: Arc::new(AtomicBool::new(false)),
        };
        validate_title(&store.welcome_title)?;
        store.ensure_root()?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn list_notes(&self) -> StoreResult<Vec<NoteInfo>> {
        self.ensure_root()?;
        let mut notes = self.scan()?;

        if notes.is_empty() && !self.seeded.swap(true, Ordering::SeqCst) {
            tracing::info!(title = %self.welcome_title, "no notes found, creating a welcome note");
            match self.write_note(&self.welcome_title, WELCOME_NOTE) {
                Ok(()) => notes = self.scan()?,
                Err(err) => {
                    tracing::warn!(?err, "failed to seed welcome note, returning empty list");
                }
            }
        } else {
            self.seeded.store(true, Ordering::SeqCst);
        }

        notes.sort_by(|a, b| b.last_edit_time.cmp(&a.last_edit_time));
        Ok(notes)
    }

    pub fn read_note(&self, title: &str) -> StoreResult<String> {
        let path = self.note_path(title)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(content),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound {
                title: title.to_string(),
            }),
            Err(err) => Err(StoreError::io("reading note", &path, err)),
        }
    }

    pub fn write_note(&self, title: &str, content: &str) -> StoreResult<()> {
        let path = self.note_path(title)?;
        tracing::info!(%title, bytes = content.len(), "writing note");
        fs::write(&path, content).map_err(|err| StoreError::io("writing note", &path, err))
    }

    /// Asks the host for a target path. `None` covers both a cancelled dialog and a
    /// rejected target; only the latter shows an error to the user.
    pub fn create_note(&self, dialogs: &mut dyn HostDialogs) -> StoreResult<Option<String>> {
        self.ensure_root()?;
        let prompt = SavePrompt {
            title: "New note".to_string(),
            default_path: self.root.join(format!("{UNTITLED}.{NOTE_EXTENSION}")),
            button_label: "Create".to_string(),
            extension: NOTE_EXTENSION.to_string(),
        };
        let Some(chosen) = dialogs.save_path(&prompt) else {
            tracing::info!("note creation canceled");
            return Ok(None);
        };

        let title = match self.title_for_path(&chosen) {
            Ok(title) => title,
            Err(reason) => {
                tracing::warn!(path = %chosen.display(), reason, "rejected note location");
                dialogs.message(&MessageBox {
                    level: MessageLevel::Error,
                    title: "Creating files".to_string(),
                    message: format!(
                        "All notes must be saved under {}. Avoid using other directories!",
                        self.root.display()
                    ),
                });
                return Ok(None);
            }
        };

        let path = self.note_path(&title)?;
        tracing::info!(path = %path.display(), "creating note");
        fs::write(&path, "").map_err(|err| StoreError::io("creating note", &path, err))?;
        Ok(Some(title))
    }

    pub fn delete_note(&self, title: &str, dialogs: &mut dyn HostDialogs) -> StoreResult<bool> {
        let path = self.note_path(title)?;
        let prompt = ConfirmPrompt {
            title: "Delete note".to_string(),
            message: format!("Are you sure you want to delete {title}?"),
            confirm_label: "Delete".to_string(),
            cancel_label: "Cancel".to_string(),
        };
        if !dialogs.confirm(&prompt) {
            tracing::info!(%title, "note deletion canceled");
            return Ok(false);
        }

        tracing::info!(%title, "deleting note");
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(true),
            Err(err) => Err(StoreError::io("deleting note", &path, err)),
        }
    }

    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo::current()
    }

    fn ensure_root(&self) -> StoreResult<()> {
        fs::create_dir_all(&*self.root)
            .map_err(|err| StoreError::io("creating notes directory", &self.root, err))
    }

    fn scan(&self) -> StoreResult<Vec<NoteInfo>> {
        let dir = fs::read_dir(&*self.root)
            .map_err(|err| StoreError::io("listing notes", &self.root, err))?;

        let mut notes = Vec::new();
        for entry in dir {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!(?err, "skipping unreadable directory entry");
                    continue;
                }
            };
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(NOTE_EXTENSION) {
                continue;
            }
            let Some(title) = path.file_stem().and_then(|stem| stem.to_str()) else {
                tracing::warn!(path = %path.display(), "skipping note with non UTF-8 name");
                continue;
            };
            if let Err(err) = validate_title(title) {
                tracing::debug!(path = %path.display(), %err, "skipping file the store cannot serve");
                continue;
            }
            let metadata = entry
                .metadata()
                .map_err(|err| StoreError::io("reading note metadata", &path, err))?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata
                .modified()
                .map_err(|err| StoreError::io("reading modification time", &path, err))?;
            notes.push(NoteInfo {
                title: title.to_string(),
                last_edit_time: epoch_millis(modified),
            });
        }
        Ok(notes)
    }

    fn note_path(&self, title: &str) -> StoreResult<PathBuf> {
        validate_title(title)?;
        Ok(self.root.join(format!("{title}.{NOTE_EXTENSION}")))
    }

    fn title_for_path(&self, chosen: &Path) -> std::result::Result<String, &'static str> {
        let parent = chosen.parent().ok_or("path has no parent directory")?;
        if parent != self.root.as_path() {
            return Err("parent directory is not the notes root");
        }
        let stem = chosen
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or("file name is not valid UTF-8")?;
        match validate_title(stem) {
            Ok(()) => Ok(stem.to_string()),
            Err(StoreError::InvalidTitle { reason, .. }) => Err(reason),
            Err(_) => Err("invalid file name"),
        }
    }
}

/// A title is a bare file stem: it must stay inside the root directory once `.md` is appended.
pub fn validate_title(title: &str) -> StoreResult<()> {
    let invalid = |reason| StoreError::InvalidTitle {
        title: title.to_string(),
        reason,
    };
    if title.trim().is_empty() {
        return Err(invalid("title is empty"));
    }
    if title.contains(['/', '\\', '\0']) {
        return Err(invalid("title contains a path separator"));
    }
    if title.starts_with('.') {
        return Err(invalid("title starts with a dot"));
    }
    let mut components = Path::new(title).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(invalid("title does not resolve to a single file name")),
    }
}

pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

fn epoch_millis(time: SystemTime) -> i64 {
    (OffsetDateTime::from(time).unix_timestamp_nanos() / 1_000_000) as i64
}

mod io_kind {
    use std::io;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(kind: &io::ErrorKind, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{kind:?}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<io::ErrorKind, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "NotFound" => io::ErrorKind::NotFound,
            "PermissionDenied" => io::ErrorKind::PermissionDenied,
            "AlreadyExists" => io::ErrorKind::AlreadyExists,
            "InvalidInput" => io::ErrorKind::InvalidInput,
            "InvalidData" => io::ErrorKind::InvalidData,
            "Interrupted" => io::ErrorKind::Interrupted,
            "UnexpectedEof" => io::ErrorKind::UnexpectedEof,
            "OutOfMemory" => io::ErrorKind::OutOfMemory,
            _ => io::ErrorKind::Other,
        })
    }
}
