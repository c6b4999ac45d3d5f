pub mod app;
pub mod chat_stream;
pub mod config;
pub mod conversation;
pub mod history;
pub mod message;
pub mod session;
