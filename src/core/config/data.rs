use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Generation parameters sent with every chat request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplingConfig {
    /// Higher values make replies more creative, lower values more focused.
    pub temperature: f64,
    /// Maximum number of context tokens.
    pub context_size: u32,
    pub top_k: u32,
    pub top_p: f64,
    pub repeat_penalty: f64,
    /// A negative seed asks for a fresh random seed on every request.
    pub seed: i64,
}

/// Partial update coming from the UI controls; absent fields are left alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SamplingUpdate {
    pub temperature: Option<f64>,
    pub context_size: Option<u32>,
    pub top_k: Option<u32>,
    pub top_p: Option<f64>,
    pub repeat_penalty: Option<f64>,
    pub seed: Option<i64>,
}

/// A sampling value outside its allowed range.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingError {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for SamplingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {}", self.field, self.message)
    }
}

impl std::error::Error for SamplingError {}

impl SamplingConfig {
    pub fn validate(&self) -> Result<(), SamplingError> {
        fn reject(field: &'static str, message: String) -> Result<(), SamplingError> {
            Err(SamplingError { field, message })
        }

        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return reject(
                "temperature",
                format!("{} is not a non-negative number", self.temperature),
            );
        }
        if self.context_size == 0 {
            return reject("contextSize", "must be greater than zero".to_string());
        }
        if self.top_k == 0 {
            return reject("topK", "must be greater than zero".to_string());
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return reject("topP", format!("{} is outside (0, 1]", self.top_p));
        }
        if !self.repeat_penalty.is_finite() || self.repeat_penalty <= 0.0 {
            return reject(
                "repeatPenalty",
                format!("{} is not a positive number", self.repeat_penalty),
            );
        }
        Ok(())
    }

    /// Applies `update` only if the resulting configuration is valid.
    pub fn apply(&mut self, update: SamplingUpdate) -> Result<(), SamplingError> {
        let mut next = *self;
        if let Some(temperature) = update.temperature {
            next.temperature = temperature;
        }
        if let Some(context_size) = update.context_size {
            next.context_size = context_size;
        }
        if let Some(top_k) = update.top_k {
            next.top_k = top_k;
        }
        if let Some(top_p) = update.top_p {
            next.top_p = top_p;
        }
        if let Some(repeat_penalty) = update.repeat_penalty {
            next.repeat_penalty = repeat_penalty;
        }
        if let Some(seed) = update.seed {
            next.seed = seed;
        }
        next.validate()?;
        *self = next;
        Ok(())
    }

    pub fn uses_random_seed(&self) -> bool {
        self.seed < 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Address of the model server.
    pub host: String,
    pub port: u16,
    /// Port the browser UI is served on.
    pub ui_port: u16,
    pub model_name: String,
    pub options: SamplingConfig,
}

impl Settings {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompts {
    pub system_prompt: String,
    pub greeting: String,
}

/// Locations of every file the loader reads or creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPaths {
    root: PathBuf,
}

impl ConfigPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings_path(&self) -> PathBuf {
        self.root.join("settings.json")
    }

    pub fn system_prompt_path(&self) -> PathBuf {
        self.root.join("system_prompt.txt")
    }

    pub fn greeting_path(&self) -> PathBuf {
        self.root.join("greeting.txt")
    }

    pub fn history_dir(&self) -> PathBuf {
        self.root.join("history")
    }
}

/// Everything the application needs at startup.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub paths: ConfigPaths,
    pub settings: Settings,
    pub prompts: Prompts,
}

pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
