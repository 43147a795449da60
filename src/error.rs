//! Error types shared by every component of the crate.
//!
//! Modeled the way the `csv` crate by BurntSushi models its errors: a single
//! opaque `Error` wrapping a boxed, non-exhaustive `ErrorKind` enum, so the
//! public surface can grow new error variants without a breaking change.

use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::result;
use std::str::Utf8Error;

use protobuf::Error as ProtobufError;

pub(crate) fn new_error(kind: ErrorKind) -> Error {
    Error(Box::new(kind))
}

pub(crate) fn new_blob_error(kind: BlobError) -> Error {
    Error(Box::new(ErrorKind::Blob(kind)))
}

pub(crate) fn new_protobuf_error(err: ProtobufError, location: &'static str) -> Error {
    Error(Box::new(ErrorKind::Protobuf { err, location }))
}

pub(crate) fn malformed(detail: impl Into<String>) -> Error {
    Error(Box::new(ErrorKind::MalformedPbf {
        detail: detail.into(),
        offset: None,
    }))
}

pub(crate) fn malformed_at(detail: impl Into<String>, offset: u64) -> Error {
    Error(Box::new(ErrorKind::MalformedPbf {
        detail: detail.into(),
        offset: Some(offset),
    }))
}

/// A type alias for `Result<T, vexdb::Error>`.
pub type Result<T> = result::Result<T, Error>;

/// An error produced by any part of the store, codec, or grid.
#[derive(Debug)]
pub struct Error(Box<ErrorKind>);

impl Error {
    /// Return the specific type of this error.
    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }

    /// Unwrap this error into its underlying type.
    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }
}

/// The specific type of an error.
#[non_exhaustive]
#[derive(Debug)]
pub enum ErrorKind {
    /// Filesystem or mmap failure.
    Io(io::Error),
    /// An error that occurs when decoding a protobuf message.
    Protobuf {
        err: ProtobufError,
        location: &'static str,
    },
    /// The stringtable contains an entry that could not be decoded to valid UTF-8.
    StringtableUtf8 { err: Utf8Error, index: usize },
    /// An element contains an out-of-bounds index into the stringtable.
    StringtableIndexOutOfBounds { index: usize },
    /// A blob-framing-level decode failure.
    Blob(BlobError),
    /// Protobuf decoded fine but violates a PBF-level structural rule: bad
    /// magic, missing required fields, a phase-ordering violation, or an
    /// unexpected blob type where the first blob isn't `OSMHeader`.
    MalformedPbf {
        detail: String,
        offset: Option<u64>,
    },
    /// The loader observed a non-ascending ID within one entity type.
    OutOfOrderKey {
        entity: &'static str,
        id: i64,
        last: i64,
    },
    /// A configured structural maximum was exceeded: too many distinct IDs,
    /// too many way-blocks, a tag subfile overflowing its 32-bit offset
    /// space, a single entity's tag payload exceeding the 1 MiB staging
    /// buffer, or too many relation members.
    CapacityExceeded { what: &'static str },
    /// Latitude/longitude outside the valid range, or an inverted bounding box.
    RangeError { detail: String },
    /// An advisory file lock could not be acquired.
    LockFailure { path: std::path::PathBuf },
}

/// An error that occurs when decoding a blob.
#[non_exhaustive]
#[derive(Debug)]
pub enum BlobError {
    /// Header size could not be decoded to a u32.
    InvalidHeaderSize,
    /// Blob header is bigger than [`crate::blob::MAX_BLOB_HEADER_SIZE`].
    HeaderTooBig { size: u64 },
    /// Blob content is bigger than [`crate::blob::MAX_BLOB_MESSAGE_SIZE`].
    MessageTooBig { size: u64 },
    /// The blob is empty because the `raw` and `zlib_data` fields are missing.
    Empty,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        new_error(ErrorKind::Io(err))
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        io::Error::other(err)
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match &*self.0 {
            ErrorKind::Io(err) => Some(err),
            ErrorKind::Protobuf { err, .. } => Some(err),
            ErrorKind::StringtableUtf8 { err, .. } => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &*self.0 {
            ErrorKind::Io(err) => err.fmt(f),
            ErrorKind::Protobuf { err, location } => {
                write!(f, "protobuf error at '{location}': {err}")
            }
            ErrorKind::StringtableUtf8 { err, index } => {
                write!(f, "invalid UTF-8 at string table index {index}: {err}")
            }
            ErrorKind::StringtableIndexOutOfBounds { index } => {
                write!(f, "stringtable index out of bounds: {index}")
            }
            ErrorKind::Blob(BlobError::InvalidHeaderSize) => {
                write!(f, "blob header size could not be decoded")
            }
            ErrorKind::Blob(BlobError::HeaderTooBig { size }) => {
                write!(f, "blob header is too big: {size} bytes")
            }
            ErrorKind::Blob(BlobError::MessageTooBig { size }) => {
                write!(f, "blob message is too big: {size} bytes")
            }
            ErrorKind::Blob(BlobError::Empty) => {
                write!(f, "blob is missing fields 'raw' and 'zlib_data'")
            }
            ErrorKind::MalformedPbf { detail, offset: Some(o) } => {
                write!(f, "malformed PBF at offset {o}: {detail}")
            }
            ErrorKind::MalformedPbf { detail, offset: None } => {
                write!(f, "malformed PBF: {detail}")
            }
            ErrorKind::OutOfOrderKey { entity, id, last } => {
                write!(f, "{entity} id {id} arrived out of order (last was {last})")
            }
            ErrorKind::CapacityExceeded { what } => {
                write!(f, "capacity exceeded: {what}")
            }
            ErrorKind::RangeError { detail } => write!(f, "range error: {detail}"),
            ErrorKind::LockFailure { path } => {
                write!(f, "could not acquire lock file at {}", path.display())
            }
        }
    }
}
