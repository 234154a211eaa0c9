//! # Smart Playlist Library
//!
//! Data model and local storage for rule-based playlists.
//!
//! ## Overview
//!
//! This crate manages:
//! - The track, rule and playlist models
//! - Rule evaluation and the track query engine (filter, sort, limit)
//! - The per-user track cache (`TrackStore`)
//! - Persistent playlist storage with change notifications (`PlaylistStore`)
//!
//! It knows nothing about the remote playlist service; `core-sync` drives
//! these pieces to keep remote copies up to date.

pub mod db;
pub mod error;
pub mod models;
pub mod query;
pub mod repositories;
pub mod rules;

pub use error::{LibraryError, Result};
pub use models::{
    FieldKind, Operator, Playlist, PlaylistRef, Rule, RuleValue, SortOrder, SortSpec, Track,
    TrackField,
};
pub use query::{order_tracks, query, MAX_PLAYLIST_SIZE};
pub use rules::{EvalContext, MembershipLookup, NoMemberships};
