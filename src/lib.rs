//! Workspace placeholder crate.
//!
//! This crate exists so host applications can depend on a single package and
//! reach the smart playlist sync facade (`core-service`) without wiring each
//! workspace crate individually.

pub use core_service::*;
