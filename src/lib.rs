//! HTTP fan-out relay for live media inputs
//!
//! Inputs arrive over TCP or UDP as FLV, MPEG-TS or Ogg byte streams. Each
//! is framed into self-contained units and copied to every HTTP client that
//! requested its path. A client joining late first receives the stream's
//! header so the copy it gets is decodable on its own.
//!
//! # Example
//!
//! ```no_run
//! use http_streamer::{InputDescriptor, MediaType, Route, Streamer, StreamerConfig};
//!
//! #[tokio::main]
//! async fn main() -> http_streamer::Result<()> {
//!     let streamer = Streamer::start(StreamerConfig::default()).await?;
//!
//!     let input = InputDescriptor::new("/live", Route::tcp("0.0.0.0", 9000), MediaType::Mpegts);
//!     streamer.register_input(input).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     streamer.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! # Structure
//!
//! - [`media`]: framing readers per container format
//! - [`input`]: workers receiving inputs
//! - [`registry`]: path to connections fan-out
//! - [`server`]: HTTP accept loop, client connections and the [`Streamer`] facade
//! - [`scheduler`]: worker lifecycle and deferred stops
//! - [`route`]: network endpoints and their bindings
//! - [`stats`]: rate samples and statistics snapshots

pub mod error;
pub mod input;
pub mod media;
pub mod registry;
pub mod route;
pub mod scheduler;
pub mod server;
pub mod stats;

mod sync;

pub use error::{Error, Result};
pub use input::{InputPhase, InputWorker};
pub use media::{FramingReader, MediaType};
pub use registry::{ConnectionRegistry, PathKey, RegistryError};
pub use route::{CastType, InputDescriptor, Protocol, Route, RouteBinding};
pub use scheduler::{Scheduler, StopQueue, Worker, WorkerId};
pub use server::{Streamer, StreamerConfig};
pub use stats::{ConnectionStats, InputStats};
