//! Library target for the `hlsmux` package.
//!
//! The primary deliverable is the `hlsmux` binary (`src/main.rs`); the
//! modules live here so integration tests can drive the API router and the
//! argument parser directly.

pub mod api;
pub mod cli;
pub mod commands;
pub mod error;
pub mod input;
pub mod logging;

#[doc(hidden)]
pub use hlsmux_engine;
