//! ollama-chat is a browser front-end for chatting with a model served by a
//! local Ollama instance.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the conversation store, sampling settings, the streaming
//!   session state machine, and saved-history snapshots.
//! - [`api`] defines the Ollama request/response payloads.
//! - [`ui`] serves the embedded page and its JSON/SSE endpoints.
//! - [`cli`] parses arguments and wires everything together.
//!
//! The binary (`src/main.rs`) routes through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod ui;
pub mod utils;
