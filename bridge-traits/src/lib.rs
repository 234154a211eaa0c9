//! # Host Bridge Traits
//!
//! Contracts between the smart playlist sync core and the host application.
//!
//! ## Overview
//!
//! The core only owns the synchronization logic. Everything that depends on
//! where it runs (token acquisition, error reporting, log shipping, the
//! notion of "now") is injected through the traits in this crate.
//!
//! ## Traits
//!
//! - [`AuthProvider`](auth::AuthProvider) - Access tokens and session refresh requests
//! - [`ErrorReporter`](telemetry::ErrorReporter) - Error and metric reporting
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! Remote playlist and track APIs take domain types and therefore live next
//! to those types in `core-sync`.
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! should map HTTP failures to [`BridgeError::Http`] so the engine can tell
//! server-side failures (5xx) apart from everything else, and map revoked
//! credentials to [`BridgeError::Unauthorized`].
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync`.

pub mod auth;
pub mod error;
pub mod telemetry;
pub mod time;

pub use error::BridgeError;

pub use auth::{AuthProvider, StaticTokenProvider};
pub use telemetry::{ErrorReport, ErrorReporter, NoopErrorReporter};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
