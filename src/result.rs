//! Error types and the related `Result<T>`

use camino::Utf8PathBuf;
use thiserror::Error;

pub type SfxResult<T> = Result<T, SfxError>;

#[derive(Debug, Error)]
pub enum SfxError {
    /// An error from underlying I/O
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    /// The file isn't a container, or its sections don't add up.
    ///
    /// Every format problem lands here, so callers can treat the file
    /// as "not one of ours" and fall back to something else.
    #[error("Invalid container: {0}")]
    InvalidContainer(&'static str),

    /// The metadata section couldn't be encoded or decoded
    #[error("Bad metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    /// Decoding a UTF-8 entry path failed
    #[error("Invalid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),

    /// A file's size changed between being stat'ed and being read
    #[error("{0} changed while it was being packed")]
    FileChanged(Utf8PathBuf),

    /// An entry (or the entry point) would land outside the extraction
    /// directory, or isn't something we know how to extract.
    #[error("Container contained a strange file hierarchy: {0}")]
    Hierarchy(String),

    /// A user-provided path (not one from a container) was invalid.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// An earlier write failed partway through,
    /// so anything written after it would be corrupt.
    #[error("An earlier write failed; the container can't be finished")]
    WriteFailed,

    /// The file tree is one compressed stream, and it was already walked.
    #[error("The file tree can only be walked once")]
    TreeAlreadyWalked,
}
