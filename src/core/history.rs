//! Named conversation snapshots stored as JSON files in one directory.

use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::core::config::data::path_display;
use crate::core::message::Message;
use crate::utils::random::random_suffix;

/// Prefix used when the caller supplies a blank one.
pub const DEFAULT_PREFIX: &str = "History";
pub const SNAPSHOT_EXTENSION: &str = "json";
const SUFFIX_LEN: usize = 6;

#[derive(Debug)]
pub enum ArchiveError {
    /// Reading or writing the archive directory failed.
    Io { path: PathBuf, source: io::Error },
    /// The snapshot exists but is not a valid conversation.
    Parse {
        name: String,
        source: serde_json::Error,
    },
    NotFound { name: String },
    /// The name would resolve outside the archive directory.
    InvalidName { name: String },
}

impl fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveError::Io { path, source } => {
                write!(f, "History I/O error at {}: {}", path_display(path), source)
            }
            ArchiveError::Parse { name, source } => {
                write!(f, "History '{name}' is not a valid conversation: {source}")
            }
            ArchiveError::NotFound { name } => write!(f, "History '{name}' not found"),
            ArchiveError::InvalidName { name } => write!(f, "Invalid history name '{name}'"),
        }
    }
}

impl StdError for ArchiveError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ArchiveError::Io { source, .. } => Some(source),
            ArchiveError::Parse { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistoryArchive {
    dir: PathBuf,
}

impl HistoryArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `messages` to a fresh `<prefix>_<timestamp>_<random>.json` file
    /// and returns its path. Existing snapshots are never overwritten.
    pub fn save(&self, messages: &[Message], prefix: &str) -> Result<PathBuf, ArchiveError> {
        self.ensure_dir()?;

        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let file_name = format!(
            "{}_{}_{}.{}",
            sanitize_prefix(prefix),
            timestamp,
            random_suffix(SUFFIX_LEN),
            SNAPSHOT_EXTENSION
        );
        let path = self.dir.join(file_name);
        let io_err = |source: io::Error| ArchiveError::Io {
            path: path.clone(),
            source,
        };

        let mut temp_file = NamedTempFile::new_in(&self.dir).map_err(io_err)?;
        temp_file
            .write_all(&encode_snapshot(messages).map_err(|err| io_err(io::Error::other(err)))?)
            .map_err(io_err)?;
        temp_file.as_file_mut().sync_all().map_err(io_err)?;
        temp_file
            .persist_noclobber(&path)
            .map_err(|err| io_err(err.error))?;

        debug!(path = %path.display(), messages = messages.len(), "saved history snapshot");
        Ok(path)
    }

    /// Snapshot names, most recently modified first.
    pub fn list(&self) -> Result<Vec<String>, ArchiveError> {
        self.ensure_dir()?;

        let io_err = |source: io::Error| ArchiveError::Io {
            path: self.dir.clone(),
            source,
        };
        let mut entries: Vec<(SystemTime, String)> = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(SNAPSHOT_EXTENSION) {
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            entries.push((modified, name.to_string()));
        }

        entries.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
        Ok(entries.into_iter().map(|(_, name)| name).collect())
    }

    /// Reads a snapshot without touching the live conversation. The `.json`
    /// extension may be omitted.
    pub fn load(&self, name: &str) -> Result<Vec<Message>, ArchiveError> {
        let path = self.resolve(name)?;
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(ArchiveError::NotFound {
                    name: name.to_string(),
                })
            }
            Err(source) => return Err(ArchiveError::Io { path, source }),
        };

        serde_json::from_str(&contents).map_err(|source| ArchiveError::Parse {
            name: name.to_string(),
            source,
        })
    }

    fn resolve(&self, name: &str) -> Result<PathBuf, ArchiveError> {
        let trimmed = name.trim();
        let mut components = Path::new(trimmed).components();
        let single_plain_component = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if trimmed.is_empty() || !single_plain_component || trimmed.contains(['/', '\\']) {
            return Err(ArchiveError::InvalidName {
                name: name.to_string(),
            });
        }

        let suffix = format!(".{SNAPSHOT_EXTENSION}");
        let file_name = if trimmed.ends_with(&suffix) {
            trimmed.to_string()
        } else {
            format!("{trimmed}{suffix}")
        };
        Ok(self.dir.join(file_name))
    }

    fn ensure_dir(&self) -> Result<(), ArchiveError> {
        fs::create_dir_all(&self.dir).map_err(|source| ArchiveError::Io {
            path: self.dir.clone(),
            source,
        })
    }
}

/// Four-space indented JSON; non-ASCII text is kept as-is.
fn encode_snapshot(messages: &[Message]) -> Result<Vec<u8>, serde_json::Error> {
    let mut buf = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
    messages.serialize(&mut serializer)?;
    Ok(buf)
}

fn sanitize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim();
    if trimmed.is_empty() {
        return DEFAULT_PREFIX.to_string();
    }
    trimmed
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
