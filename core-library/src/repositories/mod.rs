//! # Repository Pattern Implementation
//!
//! Storage traits and their implementations.
//!
//! - `TrackStore` - per-user track cache fed by the remote delta feed
//! - `PlaylistStore` - user playlists, persisted in SQLite, with a change stream

pub mod playlist;
pub mod track;

pub use playlist::{PlaylistChange, PlaylistStore, SqlitePlaylistStore};
pub use track::{MemoryTrackStore, TrackStore};
