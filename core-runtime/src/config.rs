//! # Core Configuration Module
//!
//! Builder-based configuration for the smart playlist sync engine.
//!
//! ## Overview
//!
//! [`CoreConfigBuilder`] collects the engine's tunables and the host
//! bridges it needs, then validates everything in [`CoreConfigBuilder::build`]
//! so a misconfigured host fails at startup instead of on the first sync.
//!
//! ## Required Dependencies
//!
//! - `AuthProvider` - access tokens for the remote playlist service
//!
//! ## Optional Dependencies (with defaults)
//!
//! - `ErrorReporter` - defaults to [`NoopErrorReporter`]
//! - `Clock` - defaults to [`SystemClock`]
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/path/to/playlists.db")
//!     .auth_provider(Arc::new(MyAuthProvider))
//!     .backoff_window(std::time::Duration::from_secs(15 * 60))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{AuthProvider, Clock, ErrorReporter, NoopErrorReporter, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Largest playlist the remote service accepts.
pub const MAX_PLAYLIST_ENTRIES: usize = 1000;

/// Cool-down after a server-side failure.
pub const DEFAULT_BACKOFF_WINDOW: Duration = Duration::from_secs(15 * 60);

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5 * 60);

pub const DEFAULT_EVENT_BUFFER_SIZE: usize = crate::events::DEFAULT_EVENT_BUFFER_SIZE;

/// Configuration for the smart playlist sync engine.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// SQLite file holding user playlists, or `:memory:`
    pub database_path: PathBuf,

    /// How long `update-all` intents are refused after a server failure
    pub backoff_window: Duration,

    /// Upper bound on entries written to one remote playlist
    pub max_playlist_entries: usize,

    /// Period of the automatic `update-all`; `None` disables the timer
    pub poll_interval: Option<Duration>,

    /// Capacity of the event bus channel
    pub event_buffer_size: usize,

    pub auth_provider: Arc<dyn AuthProvider>,

    pub error_reporter: Arc<dyn ErrorReporter>,

    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("backoff_window", &self.backoff_window)
            .field("max_playlist_entries", &self.max_playlist_entries)
            .field("poll_interval", &self.poll_interval)
            .field("event_buffer_size", &self.event_buffer_size)
            .field("auth_provider", &"AuthProvider { ... }")
            .field("error_reporter", &"ErrorReporter { ... }")
            .field("clock", &"Clock { ... }")
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Database path is not empty
    /// - Backoff window and poll interval are non-zero
    /// - Playlist size lies within `1..=MAX_PLAYLIST_ENTRIES`
    /// - Event buffer can hold at least one event
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if self.backoff_window.is_zero() {
            return Err(Error::Config(
                "Backoff window must be greater than zero".to_string(),
            ));
        }

        if self.max_playlist_entries == 0 || self.max_playlist_entries > MAX_PLAYLIST_ENTRIES {
            return Err(Error::Config(format!(
                "max_playlist_entries must be between 1 and {} (the remote service limit), got {}",
                MAX_PLAYLIST_ENTRIES, self.max_playlist_entries
            )));
        }

        if matches!(self.poll_interval, Some(interval) if interval.is_zero()) {
            return Err(Error::Config(
                "Poll interval must be greater than zero. Use .disable_polling() to turn the timer off."
                    .to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

fn auth_provider_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "AuthProvider".to_string(),
        message: "AuthProvider implementation is required to talk to the remote playlist service. \
                  Inject the host's OAuth token source, or StaticTokenProvider in tests."
            .to_string(),
    }
}

/// Builder for [`CoreConfig`].
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    backoff_window: Option<Duration>,
    max_playlist_entries: Option<usize>,
    poll_interval: Option<Option<Duration>>,
    event_buffer_size: Option<usize>,
    auth_provider: Option<Arc<dyn AuthProvider>>,
    error_reporter: Option<Arc<dyn ErrorReporter>>,
    clock: Option<Arc<dyn Clock>>,
}

impl CoreConfigBuilder {
    /// Sets the SQLite database path (required).
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn backoff_window(mut self, window: Duration) -> Self {
        self.backoff_window = Some(window);
        self
    }

    pub fn max_playlist_entries(mut self, max: usize) -> Self {
        self.max_playlist_entries = Some(max);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(Some(interval));
        self
    }

    /// Turn off the periodic `update-all` timer.
    pub fn disable_polling(mut self) -> Self {
        self.poll_interval = Some(None);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Sets the token source (required).
    pub fn auth_provider(mut self, provider: Arc<dyn AuthProvider>) -> Self {
        self.auth_provider = Some(provider);
        self
    }

    pub fn error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.error_reporter = Some(reporter);
        self
    }

    /// Override the time source. Tests inject a `ManualClock` here.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] when the database path is missing or a value is out of range
    /// - [`Error::CapabilityMissing`] when no `AuthProvider` was injected
    pub fn build(self) -> Result<CoreConfig> {
        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let auth_provider = self.auth_provider.ok_or_else(auth_provider_missing_error)?;

        let config = CoreConfig {
            database_path,
            backoff_window: self.backoff_window.unwrap_or(DEFAULT_BACKOFF_WINDOW),
            max_playlist_entries: self.max_playlist_entries.unwrap_or(MAX_PLAYLIST_ENTRIES),
            poll_interval: self.poll_interval.unwrap_or(Some(DEFAULT_POLL_INTERVAL)),
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
            auth_provider,
            error_reporter: self
                .error_reporter
                .unwrap_or_else(|| Arc::new(NoopErrorReporter)),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        };

        config.validate()?;

        Ok(config)
    }
}
