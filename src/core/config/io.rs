use crate::core::config::data::{
    path_display, ConfigPaths, LoadedConfig, Prompts, SamplingError, Settings,
};
use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{info, warn};

/// Errors that can occur while reading or writing configuration files.
///
/// The loader recovers from all of them by falling back to defaults; they are
/// only surfaced through logs and the lower-level helpers.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read a configuration file from disk.
    Read {
        /// Path to the file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },

    /// The settings file is not valid JSON for [`Settings`].
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// The settings file parsed but carries out-of-range sampling values.
    Invalid {
        path: PathBuf,
        source: SamplingError,
    },

    /// Failed to write a configuration file.
    Write { path: PathBuf, source: io::Error },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "Failed to read {}: {}", path_display(path), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "Failed to parse {}: {}", path_display(path), source)
            }
            ConfigError::Invalid { path, source } => {
                write!(f, "Invalid settings in {}: {}", path_display(path), source)
            }
            ConfigError::Write { path, source } => {
                write!(f, "Failed to write {}: {}", path_display(path), source)
            }
        }
    }
}

impl StdError for ConfigError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid { source, .. } => Some(source),
            ConfigError::Write { source, .. } => Some(source),
        }
    }
}

impl Settings {
    /// Returns `Ok(None)` when the file does not exist.
    pub fn load_from_path(path: &Path) -> Result<Option<Settings>, ConfigError> {
        let Some(contents) = read_optional(path)? else {
            return Ok(None);
        };
        let settings: Settings =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        settings
            .options
            .validate()
            .map_err(|source| ConfigError::Invalid {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Some(settings))
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self).map_err(|err| ConfigError::Write {
            path: path.to_path_buf(),
            source: io::Error::other(err),
        })?;
        write_atomically(path, contents.as_bytes())
    }
}

impl LoadedConfig {
    /// Loads settings and both prompt files from `paths`. Missing or broken
    /// files are replaced with defaults, so this never fails.
    pub fn load(paths: ConfigPaths) -> LoadedConfig {
        let settings = load_settings(&paths.settings_path());
        let defaults = Prompts::default();
        let prompts = Prompts {
            system_prompt: load_prompt(&paths.system_prompt_path(), &defaults.system_prompt),
            greeting: load_prompt(&paths.greeting_path(), &defaults.greeting),
        };

        LoadedConfig {
            paths,
            settings,
            prompts,
        }
    }
}

fn load_settings(path: &Path) -> Settings {
    match Settings::load_from_path(path) {
        Ok(Some(settings)) => settings,
        Ok(None) => {
            info!(path = %path_display(path), "creating default settings");
            restore_default_settings(path)
        }
        Err(err) => {
            warn!(error = %err, "restoring default settings");
            restore_default_settings(path)
        }
    }
}

fn restore_default_settings(path: &Path) -> Settings {
    let settings = Settings::default();
    if let Err(err) = settings.save_to_path(path) {
        warn!(error = %err, "could not persist default settings");
    }
    settings
}

fn load_prompt(path: &Path, default: &str) -> String {
    let failure = match read_optional(path) {
        Ok(Some(text)) => return text,
        Ok(None) => {
            info!(path = %path_display(path), "creating default prompt file");
            None
        }
        Err(err) => Some(err),
    };

    if let Some(err) = failure {
        warn!(error = %err, "restoring default prompt");
    }
    if let Err(err) = write_atomically(path, default.as_bytes()) {
        warn!(error = %err, "could not persist default prompt");
    }
    default.to_string()
}

fn read_optional(path: &Path) -> Result<Option<String>, ConfigError> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ConfigError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes through a temp file in the same directory and renames it over
/// `path`.
pub(crate) fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), ConfigError> {
    let write_err = |source: io::Error| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };

    let parent = path.parent().filter(|dir| !dir.as_os_str().is_empty());
    if let Some(dir) = parent {
        fs::create_dir_all(dir).map_err(write_err)?;
    }

    let mut temp_file = match parent {
        Some(dir) => NamedTempFile::new_in(dir),
        None => NamedTempFile::new_in("."),
    }
    .map_err(write_err)?;

    temp_file.write_all(contents).map_err(write_err)?;
    temp_file.as_file_mut().sync_all().map_err(write_err)?;
    temp_file
        .persist(path)
        .map_err(|err| write_err(err.error))?;
    Ok(())
}
