//! Error type shared by every layer of the crate.

use std::error;
use std::fmt;

/// The result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by the datagram core.
///
/// Parse errors and policy drops are final for the datagram that caused
/// them. `NoBufs` is transient: the caller may retry once buffers are freed.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Error {
    /// Malformed wire data.
    Parse,
    /// The buffer pool is exhausted or a reserved header region is too small.
    NoBufs,
    /// The datagram was discarded by policy (hop limit, duplicate, filter).
    Drop,
    /// No suitable source address could be selected.
    InvalidSourceAddress,
    /// The requested entry does not exist.
    NotFound,
    /// No route towards the destination.
    NoRoute,
    /// The requested state is already in place.
    Already,
    /// An argument is out of range.
    InvalidArgs,
    /// The operation is not allowed in the current device role.
    InvalidState,
}

impl Error {
    pub(crate) fn to_err<T>(self) -> Result<T> {
        Err(self)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::Parse => "malformed packet",
            Error::NoBufs => "insufficient buffers",
            Error::Drop => "packet dropped",
            Error::InvalidSourceAddress => "no valid source address",
            Error::NotFound => "not found",
            Error::NoRoute => "no route",
            Error::Already => "already done",
            Error::InvalidArgs => "invalid arguments",
            Error::InvalidState => "invalid state",
        };
        write!(f, "{}", msg)
    }
}

impl error::Error for Error {}
