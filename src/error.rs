use std::fmt;
use std::io;

/// A specialized `Result` type used throughout the crate.
pub type Result<T> = ::std::result::Result<T, Error>;

/// Everything that can go wrong while parsing, verifying or writing a
/// Password Safe database.
#[derive(Debug)]
pub enum Error {
    /// HPM did not match the recomputed hash for the attempted version.
    InvalidPassphrase,
    /// A version-restricted open found a file that parses as a different,
    /// still-known dialect (e.g. a V1 file opened as V2 or vice versa).
    WrongVersion(u8),
    /// The file is not a recognized dialect, or a strict open of one
    /// dialect was attempted against data that isn't it.
    UnsupportedVersion(u8),
    /// Framing, length, or block-alignment failure while reading.
    CorruptStream(&'static str),
    /// The stream ended in the middle of a field or block.
    UnexpectedEof,
    /// Attempted to add a record whose id already exists.
    Duplicate,
    /// Attempted to update or remove a record id that isn't present.
    NoSuchRecord,
    /// The socket or stream was used in a way its state machine forbids
    /// (e.g. two readers acquired, or re-opening an already-open socket).
    IllegalState(&'static str),
    /// A required text encoding (UTF-8) was unavailable.
    UnsupportedEncoding,
    /// Underlying resource adapter (filesystem, network, ...) failure.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidPassphrase => write!(f, "invalid passphrase"),
            Error::WrongVersion(v) => write!(f, "file is not version {v:#x} as requested, but is a different known dialect"),
            Error::UnsupportedVersion(v) => write!(f, "unsupported or unrecognized format version {v:#x}"),
            Error::CorruptStream(why) => write!(f, "corrupt stream: {why}"),
            Error::UnexpectedEof => write!(f, "unexpected end of stream"),
            Error::Duplicate => write!(f, "duplicate record id"),
            Error::NoSuchRecord => write!(f, "no such record"),
            Error::IllegalState(why) => write!(f, "illegal state: {why}"),
            Error::UnsupportedEncoding => write!(f, "unsupported text encoding"),
            Error::Io(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<hmac::digest::MacError> for Error {
    fn from(_err: hmac::digest::MacError) -> Error {
        Error::CorruptStream("checksum mismatch")
    }
}
