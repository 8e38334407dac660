//! Tools for reading a container.
//!
//! To start reading, create an [`Archive`] from anything seekable.
//! It checks the footer up front, then lets you
//!
//! - read the decoder back out with [`Archive::decoder()`],
//! - decode the metadata (as many times as you like) with [`Archive::read_metadata()`],
//! - walk the bundled files once, front to back, with [`Archive::files()`].
//!
//! All three read through one shared file handle,
//! so they can be interleaved, even from different threads.
//! Mid-walk, the metadata is also available from [`Files::read_metadata()`].
//!
//! [`Archive`]: struct.Archive.html

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use camino::Utf8PathBuf;
use chrono::{DateTime, NaiveDateTime};
use flate2::read::DeflateDecoder;
use log::*;
use serde::de::DeserializeOwned;

use crate::positioned::{PositionedReader, Section};
use crate::result::*;
use crate::spec::{Footer, FOOTER_SIZE};

type TreeReader<R> = DeflateDecoder<Section<R>>;

/// What sort of thing an entry in the file tree is
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    /// Links, devices, and so on, which we don't extract.
    /// (The u8 is the tar type flag.)
    Unsupported(u8),
}

/// Metadata for a file in the container, from its tar header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// Path relative to the directory the container unpacks into
    pub path: Utf8PathBuf,

    /// Size of the file in bytes
    pub size: u64,

    /// Unix permission bits
    pub mode: u32,

    /// When the file was last modified before it was packed
    pub last_modified: NaiveDateTime,

    pub kind: EntryKind,
}

impl FileMetadata {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    fn from_header<R: Read>(entry: &tar::Entry<R>) -> SfxResult<Self> {
        let path_bytes = entry.path_bytes();
        let path = Utf8PathBuf::from(std::str::from_utf8(&path_bytes)?);

        let header = entry.header();
        let kind = match header.entry_type() {
            tar::EntryType::Regular | tar::EntryType::Continuous => EntryKind::File,
            tar::EntryType::Directory => EntryKind::Directory,
            other => EntryKind::Unsupported(other.as_byte()),
        };
        let mode = header.mode().map_err(bad_header)?;
        let mtime = header.mtime().map_err(bad_header)?;
        let last_modified = i64::try_from(mtime)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(|t| t.naive_utc())
            .unwrap_or_default();

        Ok(Self {
            path,
            size: entry.size(),
            mode,
            last_modified,
            kind,
        })
    }
}

/// A container opened for reading
pub struct Archive<R: Read + Seek> {
    source: Arc<PositionedReader<R>>,
    footer: Footer,
    len: u64,
    tree: tar::Archive<TreeReader<R>>,
    walked: bool,
}

impl Archive<File> {
    /// Opens the container at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> SfxResult<Self> {
        Self::new(File::open(path)?)
    }
}

impl<R: Read + Seek> Archive<R> {
    /// Reads a container's footer and checks that the rest of it adds up.
    ///
    /// Any problem with the format is reported as [`SfxError::InvalidContainer`],
    /// so callers can treat it as "not a container" and move on.
    /// Nobody else should seek or read `reader` while the archive owns it.
    pub fn new(mut reader: R) -> SfxResult<Self> {
        let len = reader.seek(SeekFrom::End(0))?;
        if len < FOOTER_SIZE as u64 {
            return Err(SfxError::InvalidContainer("Too small to have a footer"));
        }
        reader.seek(SeekFrom::Start(len - FOOTER_SIZE as u64))?;

        let mut footer = [0u8; FOOTER_SIZE];
        reader.read_exact(&mut footer).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => SfxError::InvalidContainer("Couldn't read the footer"),
            _ => SfxError::Io(e),
        })?;
        let footer = Footer::parse(&footer)?;
        trace!("{:?}", footer);
        footer.check_layout(len)?;

        let source = Arc::new(PositionedReader::new(reader));
        let tree_section = Section::new(Arc::clone(&source), footer.tree_range());
        let tree = tar::Archive::new(DeflateDecoder::new(tree_section));

        Ok(Self {
            source,
            footer,
            len,
            tree,
            walked: false,
        })
    }

    pub fn footer(&self) -> &Footer {
        &self.footer
    }

    /// Total size of the container in bytes
    pub fn container_len(&self) -> u64 {
        self.len
    }

    /// Returns a reader over the decoder executable at the front of the container.
    pub fn decoder(&self) -> Section<R> {
        Section::new(Arc::clone(&self.source), self.footer.decoder_range())
    }

    /// Returns a reader over the raw JSON metadata.
    ///
    /// It doesn't borrow the archive, so it can be handed to another thread
    /// while this one walks the files.
    pub fn metadata_section(&self) -> Section<R> {
        Section::new(Arc::clone(&self.source), self.footer.metadata_range())
    }

    /// Decodes the metadata stored in the container.
    /// Can be called any number of times, before, during, or after walking the files.
    pub fn read_metadata<T: DeserializeOwned>(&self) -> SfxResult<T> {
        decode_metadata(&self.source, self.footer.metadata_range())
    }

    /// Returns an iterator over the files in the container, in the order they were written.
    ///
    /// The file tree is one compressed stream, so it can only be walked once;
    /// asking again returns [`SfxError::TreeAlreadyWalked`].
    /// Contents an entry's reader didn't get to are skipped when the iterator advances.
    pub fn files(&mut self) -> SfxResult<Files<'_, R>> {
        if self.walked {
            return Err(SfxError::TreeAlreadyWalked);
        }
        self.walked = true;
        Ok(Files {
            entries: self.tree.entries().map_err(tree_error)?,
            source: Arc::clone(&self.source),
            metadata: self.footer.metadata_range(),
        })
    }
}

fn decode_metadata<R: Read + Seek, T: DeserializeOwned>(
    source: &Arc<PositionedReader<R>>,
    range: Range<u64>,
) -> SfxResult<T> {
    let reader = BufReader::new(Section::new(Arc::clone(source), range));
    Ok(serde_json::from_reader(reader)?)
}

/// Iterates over the files in a container. See [`Archive::files()`].
pub struct Files<'a, R: Read + Seek> {
    entries: tar::Entries<'a, TreeReader<R>>,
    source: Arc<PositionedReader<R>>,
    metadata: Range<u64>,
}

impl<R: Read + Seek> Files<'_, R> {
    /// Decodes the container's metadata without disturbing the walk,
    /// same as [`Archive::read_metadata()`].
    pub fn read_metadata<T: DeserializeOwned>(&self) -> SfxResult<T> {
        decode_metadata(&self.source, self.metadata.clone())
    }
}

impl<'a, R: Read + Seek> Iterator for Files<'a, R> {
    type Item = SfxResult<FileEntry<'a, R>>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = match self.entries.next()? {
            Ok(entry) => entry,
            Err(e) => return Some(Err(tree_error(e))),
        };
        Some(FileMetadata::from_header(&entry).map(|metadata| {
            debug!("{:?}", metadata);
            FileEntry {
                metadata,
                contents: entry,
            }
        }))
    }
}

/// A file in the container: its metadata, and a reader bounded to its contents
pub struct FileEntry<'a, R: Read + Seek> {
    pub metadata: FileMetadata,
    contents: tar::Entry<'a, TreeReader<R>>,
}

impl<R: Read + Seek> Read for FileEntry<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.contents.read(buf)
    }
}

/// Sorts errors from walking the file tree into format errors and plain I/O.
///
/// The footer already told us exactly how long the tree is,
/// so running out of it partway through an entry means the data is bad,
/// not that we reached the end.
/// tar reports bad headers (checksum mismatches and such) as `Other`.
fn tree_error(e: io::Error) -> SfxError {
    match e.kind() {
        io::ErrorKind::UnexpectedEof => SfxError::InvalidContainer("File tree ended early"),
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput | io::ErrorKind::Other => {
            SfxError::InvalidContainer("File tree is corrupt")
        }
        _ => SfxError::Io(e),
    }
}

fn bad_header(_: io::Error) -> SfxError {
    SfxError::InvalidContainer("Unparseable entry header")
}
