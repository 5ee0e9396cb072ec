// Definition of modules --------------------------------------------------------------------------

pub mod driver;
pub mod fingerprint;
pub mod firmware;
pub mod info;
pub mod progress;
pub mod sequences;
pub mod staging;
pub mod sysdef;

#[cfg(test)]
mod tests;

use crate::opensyde::sysup::driver::DriverError;

use std::fmt;

// Error ------------------------------------------------------------------------------------------

///
/// Sequence error enumeration.
///
/// Every public sequence and the file staging helper report their outcome with one of these
/// kinds. The kinds are part of the API contract: callers dispatch on them, and the internal
/// reachability latch compares them (a `Timeout` stays a `Timeout` all the way up).
///
#[derive(Debug, PartialEq, Clone)]
pub enum Error {
    /// Partial success: at least one node failed while `fail_on_first_error` was false
    Warn,

    /// Configuration is internally inconsistent or a parsed artifact lacks required content
    Config(String),

    /// Size mismatch between caller vectors, or device name mismatch between image and target
    Overflow(String),

    /// Invalid caller request (file for inactive node, broken update order, ...)
    NoAct(String),

    /// File I/O failure or invalid image format
    RdWr(String),

    /// Communication driver reported an error; carries the driver error including a negative
    /// response code where the server sent one
    Com(DriverError),

    /// Aborted by the progress sink's vote, or a pre-existing temp directory could not be erased
    Busy,

    /// Parameter out of range (missing file, path without trailing separator, ...)
    Range(String),

    /// A targeted service exceeded its polling timeout
    Timeout,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Warn => write!(f, "Warn: at least one node failed"),
            Error::Config(text) => write!(f, "Config: {}", text),
            Error::Overflow(text) => write!(f, "Overflow: {}", text),
            Error::NoAct(text) => write!(f, "NoAct: {}", text),
            Error::RdWr(text) => write!(f, "RdWr: {}", text),
            Error::Com(error) => write!(f, "Com: {}", error),
            Error::Busy => write!(f, "Busy: aborted or resource not releasable"),
            Error::Range(text) => write!(f, "Range: {}", text),
            Error::Timeout => write!(f, "Timeout: service exceeded its polling timeout"),
        }
    }
}

impl Error {
    /// Map a driver error to the matching sequence error.
    ///
    /// Polling timeouts keep their own kind so that the reachability latch can identify them;
    /// everything else is a communication error.
    pub fn from_driver(error: DriverError) -> Error {
        match error {
            DriverError::Timeout => Error::Timeout,
            other => Error::Com(other),
        }
    }
}

