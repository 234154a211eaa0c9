//! # Core Runtime Module
//!
//! Runtime infrastructure shared by the smart playlist sync crates:
//! - Logging and tracing setup
//! - Configuration (`CoreConfig`)
//! - Event bus
//!
//! ## Overview
//!
//! Nothing in here knows about playlists or tracks. The sync engine and the
//! service facade build on these pieces to report what they are doing and to
//! receive their injected host bridges.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
