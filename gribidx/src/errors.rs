use std::fmt;
use std::io;
use std::path::PathBuf;
use std::result;

#[derive(Debug)]
pub enum Error {
    /// Underlying i/o failure.
    IO(io::Error),

    /// The file does not start with any known index magic string.
    BadMagic(Vec<u8>),

    /// The index was written by a version below the supported floor. Callers
    /// should treat the index as absent and rebuild, not fail.
    UnsupportedVersion { found: u32, minimum: u32 },

    /// The metadata section is truncated or structurally invalid. Fatal for
    /// this one index file; delete and rebuild.
    Corrupt(String),

    /// A lazily loaded record block does not belong to the variable that
    /// claims it.
    CorruptRecordBlock { expected: u64, found: u64 },

    /// A time distance is not an integral number of the declared period.
    FractionalOffset {
        start: i64,
        end: i64,
        period: String,
    },

    /// Calendar arithmetic left the representable range.
    TimeRange(String),

    /// A record locator points at a source file that is not on disk.
    DataFileNotFound(PathBuf),

    /// A record locator points outside the collection's file table.
    BadFileIndex(u32),

    /// A partition merge where no child index could be opened.
    NoUsablePartitions,

    /// A structural inconsistency discovered while merging partitions.
    Merge(String),

    /// Lookup of a named thing that does not exist.
    BadName(String),
}

impl Error {
    /// True for the version-skew case that callers map to "index absent".
    pub fn is_version_skew(&self) -> bool {
        matches!(self, Error::UnsupportedVersion { .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::IO(err) => write!(f, "i/o error: {err}"),
            Error::BadMagic(found) => {
                write!(f, "not an index file (magic {:?})", String::from_utf8_lossy(found))
            }
            Error::UnsupportedVersion { found, minimum } => {
                write!(f, "index version {found} below supported minimum {minimum}")
            }
            Error::Corrupt(what) => write!(f, "corrupt index: {what}"),
            Error::CorruptRecordBlock { expected, found } => write!(
                f,
                "corrupt record block: variable hash {expected:#x}, block claims {found:#x}"
            ),
            Error::FractionalOffset { start, end, period } => write!(
                f,
                "time distance from {start}ms to {end}ms is not a whole number of {period}"
            ),
            Error::TimeRange(what) => write!(f, "calendar arithmetic out of range: {what}"),
            Error::DataFileNotFound(path) => {
                write!(f, "data file not found: {}", path.display())
            }
            Error::BadFileIndex(idx) => write!(f, "file index {idx} outside the file table"),
            Error::NoUsablePartitions => write!(f, "no usable partitions"),
            Error::Merge(what) => write!(f, "partition merge: {what}"),
            Error::BadName(name) => write!(f, "no such name: {name}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IO(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::IO(err)
    }
}

pub type Result<T> = result::Result<T, Error>;
