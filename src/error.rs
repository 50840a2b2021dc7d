//! Error types for the tiered vertex buffer cache.
//!
//! Following the rest of the engine's driver layer, each concern gets its own hand-written `enum`
//! implementing [`std::error::Error`] directly rather than via a derive macro, and a crate-wide
//! [`Error`] wraps them for callers that cross concern boundaries (e.g. [`crate::registry`]).

use std::fmt::{self, Display, Formatter};

/// Failures from the byte-budgeted LRU tiers.
#[derive(Debug)]
pub enum LruError {
    /// The page was not enrolled in this tier.
    NotEnrolled,
}

impl Display for LruError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotEnrolled => write!(f, "page is not enrolled in this tier"),
        }
    }
}

impl std::error::Error for LruError {}

/// Failures from the on-disk scratch arena.
#[derive(Debug)]
pub enum SaveFileError {
    /// The write would grow the file past its configured maximum size.
    Full,

    /// The scratch file could not be read back; its contents no longer match what was written.
    ReadCorrupt,

    /// An underlying I/O operation failed.
    Io(std::io::Error),
}

impl Display for SaveFileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "save file is full"),
            Self::ReadCorrupt => write!(f, "save file block failed to read back intact"),
            Self::Io(err) => write!(f, "save file i/o error: {err}"),
        }
    }
}

impl std::error::Error for SaveFileError {}

impl From<std::io::Error> for SaveFileError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

/// Failures from the residency state machine and its collaborators.
#[derive(Debug)]
pub enum BufferError {
    /// A mutation was attempted while the buffer was not `Resident`.
    NotResident,

    /// `restore_from_disk` was called on a buffer with no `SaveBlock`.
    NoSaveBlock,

    /// The disk tier refused the write; see [`SaveFileError::Full`].
    SaveFileFull,

    /// The disk tier could not be read back; the buffer's bytes are lost.
    SaveFileReadError,

    /// Decompression of previously-compressed bytes failed. The buffer's bytes are lost.
    CorruptCompressedData,

    /// `clear_prepared` named a device that has no registration on this buffer.
    UnknownDeviceContext,

    /// The buffer was constructed with an array format that has not been interned via
    /// [`crate::format::FormatTable::intern`].
    FormatUnregistered,
}

impl Display for BufferError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotResident => write!(f, "operation requires the buffer to be resident"),
            Self::NoSaveBlock => write!(f, "buffer has no save block to restore from"),
            Self::SaveFileFull => write!(f, "save file is full, buffer was not demoted"),
            Self::SaveFileReadError => write!(f, "save file block failed to read back intact"),
            Self::CorruptCompressedData => {
                write!(f, "compressed buffer bytes failed to decompress")
            }
            Self::UnknownDeviceContext => {
                write!(f, "no device context registered for that device")
            }
            Self::FormatUnregistered => write!(f, "array format has not been interned"),
        }
    }
}

impl std::error::Error for BufferError {}

impl From<SaveFileError> for BufferError {
    fn from(err: SaveFileError) -> Self {
        match err {
            SaveFileError::Full => Self::SaveFileFull,
            SaveFileError::ReadCorrupt | SaveFileError::Io(_) => Self::SaveFileReadError,
        }
    }
}

/// Failures from the durable serialization format.
#[derive(Debug)]
pub enum SerializeError {
    /// The stream declared a format version older than this crate supports.
    StaleVersion {
        /// The version found in the stream.
        found: u16,
        /// The oldest version this crate can still read.
        minimum: u16,
    },

    /// The buffer's resident byte length does not fit in the format's 32-bit length field.
    TooLarge,

    /// The array format referenced by the stream was never resolved by the caller.
    FormatUnresolved,

    /// An underlying I/O failure.
    Io(std::io::Error),
}

impl Display for SerializeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::StaleVersion { found, minimum } => write!(
                f,
                "stream format version {found} is older than the minimum supported {minimum}"
            ),
            Self::TooLarge => write!(f, "buffer is too large to serialize (max 4 GiB)"),
            Self::FormatUnresolved => write!(f, "array format pointer was never resolved"),
            Self::Io(err) => write!(f, "serialization i/o error: {err}"),
        }
    }
}

impl std::error::Error for SerializeError {}

impl From<std::io::Error> for SerializeError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

/// Failures from reading or writing the TOML configuration record.
#[derive(Debug)]
pub enum ConfigError {
    /// The configuration directory could not be located or created.
    Io(std::io::Error),

    /// The TOML file on disk did not parse.
    Parse(toml::de::Error),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "config i/o error: {err}"),
            Self::Parse(err) => write!(f, "config file did not parse: {err}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        Self::Parse(err)
    }
}

/// Crate-wide error, used at API boundaries that may surface failures from more than one concern.
#[derive(Debug)]
pub enum Error {
    /// See [`BufferError`].
    Buffer(BufferError),

    /// See [`SaveFileError`].
    SaveFile(SaveFileError),

    /// See [`SerializeError`].
    Serialize(SerializeError),

    /// See [`ConfigError`].
    Config(ConfigError),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffer(err) => Display::fmt(err, f),
            Self::SaveFile(err) => Display::fmt(err, f),
            Self::Serialize(err) => Display::fmt(err, f),
            Self::Config(err) => Display::fmt(err, f),
        }
    }
}

impl std::error::Error for Error {}

impl From<BufferError> for Error {
    fn from(err: BufferError) -> Self {
        Self::Buffer(err)
    }
}

impl From<SaveFileError> for Error {
    fn from(err: SaveFileError) -> Self {
        Self::SaveFile(err)
    }
}

impl From<SerializeError> for Error {
    fn from(err: SerializeError) -> Self {
        Self::Serialize(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}
