//! # ringecho-server — the echo protocol engine
//!
//! Single-threaded accept → receive(+timeout) → send → receive loop over
//! any [`ringecho_core::substrate::Substrate`]. The engine never touches
//! the ring directly: intents go through the [`gateway::Gateway`] work
//! queue, completions come back through the dispatcher in
//! [`server::Server`], and per-connection state lives in the
//! generation-checked slab in [`conn`].

pub mod config;
pub mod conn;
pub mod gateway;
pub mod server;

pub use config::ServerConfig;
pub use server::{Server, Stats};
