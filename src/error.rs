//! Error types for the traceroute mapper

use thiserror::Error;

/// Crate-wide error type.
///
/// Most faults the mapper encounters are recovered locally (see `spec.md`
/// §7): this type only carries the faults an external caller needs to see
/// -- configuration validation at startup, and I/O faults from the
/// persistence layer. Timeouts, unknown correlations, and send failures
/// are not represented here; they are folded into counters and health
/// reports instead.
#[derive(Error, Debug)]
pub enum MapperError {
    /// A configuration field failed validation during initialization.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// An I/O error occurred while saving or loading persisted state.
    #[error("persistence I/O error: {0}")]
    Persist(#[from] std::io::Error),

    /// The persisted state file could not be parsed as JSON.
    #[error("persisted state file is corrupt: {0}")]
    PersistCorrupt(String),

    /// The external message router rejected or failed to send a probe.
    #[error("send failure: {0}")]
    Send(String),
}

/// Convenience alias used throughout the crate.
pub type MapperResult<T> = Result<T, MapperError>;
