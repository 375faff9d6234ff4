//! Connection registry for input fan-out
//!
//! The registry owns every registered input and routes the framing units it
//! produces to the connections attached to its path. Every connection has a
//! private unbounded queue; the registry bounds it by refusing units once
//! the connection has more than `max_buffer_size` bytes waiting.
//!
//! # Architecture
//!
//! ```text
//!                        Arc<ConnectionRegistry>
//!                   ┌──────────────────────────────┐
//!                   │ inputs: HashMap<PathKey,     │
//!                   │   InputSlot {                │
//!                   │     worker: InputWorker,     │
//!                   │     connections: {id→Outlet} │
//!                   │   }                          │
//!                   │ >                            │
//!                   └──────────────┬───────────────┘
//!                                  │
//!        ┌─────────────────────────┼─────────────────────────┐
//!        │                         │                         │
//!        ▼                         ▼                         ▼
//!   [InputWorker]          [ConnectionWorker]        [ConnectionWorker]
//!   next_unit()            rx.recv()                 rx.recv()
//!        │                         │                         │
//!        └──► registry.dispatch() ─┴──► write_all() ──► TCP ─┘
//! ```
//!
//! `bytes::Bytes` is reference counted, so every connection shares the
//! unit's allocation.

pub mod entry;
pub mod error;
pub mod key;
pub mod store;

pub use entry::OutletState;
pub use error::RegistryError;
pub use key::PathKey;
pub use store::{Attachment, ConnectionRegistry};
