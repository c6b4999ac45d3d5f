pub mod data;
pub mod defaults;
pub mod io;
pub mod printing;

pub use data::{
    ConfigPaths, LoadedConfig, Prompts, SamplingConfig, SamplingError, SamplingUpdate, Settings,
};
