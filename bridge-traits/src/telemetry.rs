//! Error and metrics reporting
//!
//! The sync engine never presents UI. Every failure it handles is forwarded
//! to an [`ErrorReporter`] so the host can surface or aggregate it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single reported failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Component that observed the failure (e.g. `"sync.manager"`).
    pub context: String,
    /// Human-readable message.
    pub message: String,
    /// Affected user, if known.
    pub user_id: Option<String>,
    /// Extra structured details.
    pub fields: HashMap<String, String>,
}

impl ErrorReport {
    pub fn new(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            message: message.into(),
            user_id: None,
            fields: HashMap::new(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// Observability collaborator.
///
/// Implementations must return quickly; anything slow belongs on a host
/// background queue.
pub trait ErrorReporter: Send + Sync {
    /// Record a failure.
    fn report_error(&self, report: ErrorReport);

    /// Record a numeric metric sample.
    fn record_metric(&self, _name: &str, _value: f64) {}
}

/// Reporter that drops everything.
#[derive(Debug, Clone, Default)]
pub struct NoopErrorReporter;

impl ErrorReporter for NoopErrorReporter {
    fn report_error(&self, _report: ErrorReport) {}
}
