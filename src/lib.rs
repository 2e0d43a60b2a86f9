//! hlsduo - twin LL-HLS streams from one source video
//!
//! This library crate exposes the server pieces for integration testing.

pub mod config;
pub mod library;
pub mod server;
