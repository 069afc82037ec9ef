//! Error types for the device gate.
//!
//! `DriverError` is the single error type returned by every entry point of the
//! driver. It is built with `thiserror` and groups failures by where in the
//! command pipeline they happen:
//!
//! - **`AdmissionRejected`**: too many callers are already pending on the same
//!   address. Transient; the caller should back off and retry.
//! - **`AttributeValidation`**: the request batch is malformed. No device
//!   interaction was attempted.
//! - **`Resolution`** / **`Connection`**: no session could be established. The
//!   address gate has already been released when these are returned.
//! - **`SubCommand`**: a `get`/`set` or value transform failed part way through
//!   a batch. The remaining sub-commands were not issued. The failing step's
//!   own error is kept as the `source()`.
//!
//! Read batches fail with [`ReadFailure`], which wraps a `DriverError` together
//! with the partially filled result buffer.

use crate::models::CommandValue;
use thiserror::Error;

/// Convenience alias for results using the driver error type.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Errors surfaced by the driver to its immediate caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    /// The address already has `limit` callers pending or holding it.
    #[error("High-frequency command execution: {limit} commands already queued for address '{address}'")]
    AdmissionRejected {
        /// Address that was at capacity
        address: String,
        /// Configured per-address limit
        limit: usize,
    },

    /// Request batch attributes are invalid.
    #[error("Invalid command attributes: {0}")]
    AttributeValidation(String),

    /// Connection parameters could not be derived from the address.
    #[error("Cannot resolve connection info: {0}")]
    Resolution(String),

    /// The transport session could not be opened.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A device read or write failed on an open session.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Raw bytes could not be turned into a value or back.
    #[error("Value transform failed: {0}")]
    Codec(String),

    /// A sub-command of a batch failed.
    #[error("Command {index} ('{resource}') failed: {source}")]
    SubCommand {
        /// Position of the failing request in the batch
        index: usize,
        /// Resource name of the failing request
        resource: String,
        /// Underlying transport or transform failure
        #[source]
        source: Box<DriverError>,
    },

    /// Entry point used before `initialize`.
    #[error("Driver has not been initialized")]
    NotInitialized,

    /// `initialize` called on an already initialized driver.
    #[error("Driver is already initialized")]
    AlreadyInitialized,

    /// Operation is not supported by this driver.
    #[error("Operation '{0}' is not supported")]
    Unsupported(&'static str),

    /// The async value receiver has been dropped.
    #[error("Async value sink is closed")]
    AsyncSinkClosed,
}

impl DriverError {
    /// Whether retrying the same call later may succeed without any change.
    pub fn is_transient(&self) -> bool {
        matches!(self, DriverError::AdmissionRejected { .. })
    }

    /// Wrap the failure of the sub-command at `index`.
    pub(crate) fn sub_command(index: usize, resource: &str, source: DriverError) -> Self {
        DriverError::SubCommand {
            index,
            resource: resource.to_string(),
            source: Box::new(source),
        }
    }
}

/// Failure of a read batch.
///
/// `results` always has one slot per request. Slots before the failing
/// request hold their values; the failing slot and everything after it are
/// `None`.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{error}")]
pub struct ReadFailure {
    /// The error that stopped the batch
    #[source]
    pub error: DriverError,
    /// Partially populated result buffer
    pub results: Vec<Option<CommandValue>>,
}

impl ReadFailure {
    /// Failure that happened before any sub-command ran.
    pub(crate) fn before_execution(error: DriverError, requested: usize) -> Self {
        Self {
            error,
            results: vec![None; requested],
        }
    }

    /// Number of sub-commands that completed before the failure.
    pub fn completed(&self) -> usize {
        self.results.iter().take_while(|slot| slot.is_some()).count()
    }
}

impl From<ReadFailure> for DriverError {
    fn from(failure: ReadFailure) -> Self {
        failure.error
    }
}
