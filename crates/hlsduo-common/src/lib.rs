//! hlsduo-common: shared types and utilities.
//!
//! This crate provides the pieces every other hlsduo crate agrees on:
//!
//! - **Error handling**: the [`Error`] taxonomy and [`Result`] alias
//! - **Stream names**: the two fixed pipeline identifiers ([`StreamName`])
//! - **Path utilities**: video extension checks and upload name sanitising
//!
//! # Examples
//!
//! ```
//! use hlsduo_common::{Error, StreamName};
//! use hlsduo_common::paths::is_video_file;
//! use std::path::Path;
//!
//! let name: StreamName = "play".parse().unwrap();
//! assert_eq!(name, StreamName::Play);
//!
//! assert!(matches!("live".parse::<StreamName>(), Err(Error::UnknownStream(_))));
//! assert!(is_video_file(Path::new("clip.mp4")));
//! ```

pub mod error;
pub mod paths;
pub mod stream;

pub use error::{Error, Result};
pub use stream::StreamName;
