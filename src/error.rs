//! # Error Taxonomy
//!
//! Every component returns [`MonitorError`] from its fallible operations. The
//! poll driver catches all of them at the tick boundary, logs them and keeps
//! ticking, so none of these ever terminates monitoring.
//!
//! Application edges (CLI commands, config files, daemon management) use
//! `anyhow::Result` instead and wrap these with context where they surface.

use thiserror::Error;

/// Errors raised while observing audio state or controlling the player
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MonitorError {
    /// The OS audio subsystem could not be queried at all.
    ///
    /// Fatal to the current tick only; the next tick tries again.
    #[error("audio subsystem unavailable: {0}")]
    SamplerUnavailable(String),

    /// A single audio session could not be read and was skipped
    #[error("audio session #{index} skipped: {reason}")]
    SessionQueryFailed { index: usize, reason: String },

    /// The process table could not be read; treated as "target not running"
    #[error("process lookup failed: {0}")]
    ProcessLookupFailed(String),

    /// The synthetic key press could not be handed to the OS input layer
    #[error("key dispatch failed: {0}")]
    InputDispatchFailed(String),

    /// Rejected configuration; the previous configuration stays in effect
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl MonitorError {
    /// Whether this error aborts the tick it happened in.
    ///
    /// Only a sampler outage does; everything else degrades to a partial
    /// observation.
    pub fn is_tick_fatal(&self) -> bool {
        matches!(self, MonitorError::SamplerUnavailable(_))
    }
}
