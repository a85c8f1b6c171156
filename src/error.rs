//! The error taxonomy shared by the FAT12 engine and the file facade.

use core::fmt;

/// Everything that can go wrong between the medium and a file handle.
///
/// The engine and the facade use the same set; success is `Ok(())`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Error {
    /// The lower layer reported a hard failure.
    Io,
    /// Name absent from the root directory (or a non-root `opendir` path).
    NotFound,
    Exists,
    /// No free cluster or no free directory slot.
    Full,
    /// Open-file table exhausted.
    TooMany,
    /// Arguments, BPB, or on-disk structure failed validation.
    Invalid,
    IsDir,
    NotMounted,
    Eof,
    /// Media-change latch observed; the filesystem is implicitly unmounted.
    DiskChanged,
    WriteProtected,
    /// Handle refers to a torn-down filesystem session.
    BadHandle,
}

impl Error {
    /// Stable human-readable description.
    pub fn as_str(&self) -> &'static str {
        match self {
            Error::Io => "I/O error",
            Error::NotFound => "not found",
            Error::Exists => "already exists",
            Error::Full => "no space left",
            Error::TooMany => "too many open files",
            Error::Invalid => "invalid argument or structure",
            Error::IsDir => "is a directory",
            Error::NotMounted => "not mounted",
            Error::Eof => "end of file",
            Error::DiskChanged => "disk changed",
            Error::WriteProtected => "write protected",
            Error::BadHandle => "bad handle",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(self.as_str())
    }
}

using_std! {
    impl std::error::Error for Error { }
}
