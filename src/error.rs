//! Thread-local, errno-style error discipline.
//!
//! Operations in this crate return `Result<T, Error>` where `Error` wraps a
//! platform errno code, mirroring the return/error discipline of the library
//! this reactor is modeled on: a nonnegative value (or `Ok`) on success, and
//! on failure a specific [`nix::errno::Errno`] describing what went wrong.

use nix::errno::Errno;
use std::fmt;

/// An operation failed with the given platform error code.
///
/// This is deliberately a thin wrapper around `Errno` rather than a richer
/// enum: callers match on the handful of codes this crate actually produces
/// (see the distinguished codes below) the same way the reactor's C ancestor
/// expected callers to inspect `errno`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error(pub Errno);

impl Error {
    pub fn errno(&self) -> Errno {
        self.0
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for Error {}

impl From<Errno> for Error {
    fn from(e: Errno) -> Self {
        Error(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.raw_os_error() {
            Some(code) => Error(Errno::from_i32(code)),
            None => Error(Errno::EIO),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// An event kind is not accepted by this reactor, or a parameter tag is unknown.
pub fn not_supported() -> Error {
    Error(Errno::ENOTSUP)
}

/// Already attached, or a duplicate fd attachment.
pub fn busy() -> Error {
    Error(Errno::EBUSY)
}

/// Not attached, an endpoint/queue variant mismatch, or any other malformed argument.
pub fn invalid_argument() -> Error {
    Error(Errno::EINVAL)
}

/// The concrete queue does not implement the requested operation.
pub fn not_implemented() -> Error {
    Error(Errno::EBADF)
}

/// Attempt to set a read-only parameter.
pub fn not_permitted() -> Error {
    Error(Errno::EPERM)
}

/// An endpoint cannot be converted to the requested address family.
pub fn address_family_not_supported() -> Error {
    Error(Errno::EAFNOSUPPORT)
}
