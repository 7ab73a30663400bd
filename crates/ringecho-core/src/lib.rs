//! # ringecho-core — types and traits for the ringecho event loop
//!
//! This crate defines the seam between the echo engine and the async I/O
//! facility underneath it. The engine in `ringecho-server` is written
//! against the [`substrate::Substrate`] trait, never against a concrete
//! ring, so the production io_uring backend and the scripted test
//! substrate are interchangeable.
//!
//! Contents:
//!
//! - [`token`] — the 64-bit user-data codec correlating completions back
//!   to per-connection state.
//! - [`substrate`] — submission/completion types and the substrate trait.
//! - [`error`] — fatal substrate error type shared by all crates.

pub mod error;
pub mod substrate;
pub mod token;
