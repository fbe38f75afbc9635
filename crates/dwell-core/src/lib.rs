//! Core types, engine components and port definitions for dwell detection.
//!
//! This crate is deliberately free of HTTP and database dependencies. It
//! turns noisy, irregularly sampled GPS reports into dwell episodes (batch)
//! and debounced visit confirmations (live). Storage backends implement
//! [`store::VisitStore`]; telemetry, location lookup and the calendar sink
//! are reached only through the traits in [`ports`].

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod blind_spot;
pub mod decision;
pub mod directory;
pub mod episode;
pub mod error;
pub mod gate;
pub mod geo;
pub mod live;
pub mod monitor;
pub mod motion;
pub mod ports;
pub mod replay;
pub mod sample;
pub mod segment;
pub mod store;
pub mod visit;
pub mod window;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
