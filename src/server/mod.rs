//! HTTP output side
//!
//! The `AcceptWorker` accepts clients on the output address and starts a
//! `ConnectionWorker` for each. `Streamer` ties this to the registry and
//! the scheduler.

pub mod config;
pub mod connection;
pub mod listener;
pub mod request;
pub mod streamer;

pub use config::StreamerConfig;
pub use connection::ConnectionWorker;
pub use listener::AcceptWorker;
pub use request::{Method, Request, Version};
pub use streamer::Streamer;
