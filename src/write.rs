//! Tools for writing a container.
//!
//! A [`Writer`] must be driven in order:
//! [`write_decoder()`](Writer::write_decoder) once,
//! then [`write_file()`](Writer::write_file) for each bundled file,
//! and finally [`finish()`](Writer::finish).
//! [`write_metadata()`](Writer::write_metadata) can be called any time before `finish()`.
//!
//! Calling these out of order is a bug in the caller, not something
//! that can go wrong at runtime, so it panics instead of returning an error.
//! Once a write fails partway through, though, the output is garbage:
//! every later call returns [`SfxError::WriteFailed`](crate::SfxError::WriteFailed).
//!
//! ```no_run
//! # use std::fs::File;
//! # use selfpack::write::Writer;
//! let mut writer = Writer::new(File::create("app.bin")?);
//! writer.write_decoder(File::open("decoder")?)?;
//! writer.write_file(File::open("site/index.html")?, "site/index.html", "site")?;
//! writer.write_metadata(&serde_json::json!({ "Name": "app" }))?;
//! writer.finish()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::mem;
use std::path::Path;
use std::time::UNIX_EPOCH;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use flate2::write::DeflateEncoder;
use flate2::Compression;
use log::*;
use serde::Serialize;

use crate::counter::Counter;
use crate::result::*;
use crate::spec::Footer;

type TreeBuilder<W> = tar::Builder<DeflateEncoder<Counter<W>>>;

enum State<W: Write> {
    /// Nothing written yet
    Empty(W),
    /// The decoder is down and files go into the deflated tar stream.
    Tree(TreeBuilder<W>),
    /// A write failed partway through. Nothing more goes out.
    Failed,
    /// Only seen mid-swap.
    Swapping,
}

/// Writes a container to any [`Write`]r, front to back, in one pass.
pub struct Writer<W: Write> {
    state: State<W>,
    decoder_len: u64,
    files: usize,
    metadata: serde_json::Value,
}

impl<W: Write> Writer<W> {
    pub fn new(out: W) -> Self {
        Self {
            state: State::Empty(out),
            decoder_len: 0,
            files: 0,
            metadata: serde_json::Value::Null,
        }
    }

    /// Copies the decoder executable verbatim to the front of the container.
    /// It should be a binary that runs on the target system.
    ///
    /// Returns the number of bytes copied.
    pub fn write_decoder<D: Read>(&mut self, mut decoder: D) -> SfxResult<u64> {
        let out = match &mut self.state {
            State::Empty(out) => out,
            State::Failed => return Err(SfxError::WriteFailed),
            _ => panic!("Writer::write_decoder: tried to write two decoders"),
        };
        let len = match io::copy(&mut decoder, out) {
            Ok(len) => len,
            Err(e) => {
                self.state = State::Failed;
                return Err(e.into());
            }
        };
        debug!("Wrote a {} byte decoder", len);
        self.decoder_len = len;

        let out = match mem::replace(&mut self.state, State::Swapping) {
            State::Empty(out) => out,
            _ => unreachable!(),
        };
        let encoder = DeflateEncoder::new(Counter::new(out), Compression::default());
        self.state = State::Tree(tar::Builder::new(encoder));
        Ok(len)
    }

    /// Adds `file` to the container, named by its `path` relative to `base_dir`.
    ///
    /// The file's size, permissions, and modification time are taken from
    /// the open handle. If the file grows or shrinks while we're copying it,
    /// this returns [`SfxError::FileChanged`], and the writer refuses to
    /// write anything else (including the footer).
    pub fn write_file<P: AsRef<Path>, B: AsRef<Path>>(
        &mut self,
        mut file: File,
        path: P,
        base_dir: B,
    ) -> SfxResult<()> {
        let path = utf8(path.as_ref())?;
        let base_dir = utf8(base_dir.as_ref())?;
        let name = entry_name(path, base_dir)?;

        let metadata = file.metadata()?;
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(metadata.len());
        header.set_mode(mode_of(&metadata));
        header.set_mtime(mtime_of(&metadata));

        self.append_entry(path, &name, header, &mut file)
    }

    /// Stores metadata to be written when the container is finished.
    /// Any type that serializes to JSON will do; the last call wins.
    pub fn write_metadata<T: Serialize + ?Sized>(&mut self, metadata: &T) -> SfxResult<()> {
        self.metadata = serde_json::to_value(metadata)?;
        Ok(())
    }

    /// Finishes the file tree, writes the metadata and the footer,
    /// and hands back the underlying writer (without closing it).
    pub fn finish(self) -> SfxResult<W> {
        let tree = match self.state {
            State::Tree(tree) => tree,
            State::Failed => return Err(SfxError::WriteFailed),
            _ => panic!("Writer::finish: closed an incomplete container"),
        };
        assert!(
            self.decoder_len > 0,
            "Writer::finish: closed a container with an empty decoder"
        );

        let counted = tree.into_inner()?.finish()?;
        let tree_len = counted.count();
        // Even an empty tar stream has its end-of-archive blocks.
        assert!(tree_len > 0, "Writer::finish: file tree is empty");
        let mut out = counted.into_inner();

        let mut metadata = Counter::new(&mut out);
        serde_json::to_writer(&mut metadata, &self.metadata)?;
        let metadata_len = metadata.count();

        let footer = Footer::new(
            section_len(self.decoder_len)?,
            section_len(tree_len)?,
            section_len(metadata_len)?,
        );
        trace!("{:?}", footer);
        info!(
            "Finished container with {} files ({} compressed bytes)",
            self.files, tree_len
        );
        out.write_all(&footer.to_bytes())?;
        out.flush()?;
        Ok(out)
    }

    fn append_entry<R: Read>(
        &mut self,
        source: &Utf8Path,
        name: &Utf8Path,
        header: tar::Header,
        contents: &mut R,
    ) -> SfxResult<()> {
        let tree = match &mut self.state {
            State::Tree(tree) => tree,
            State::Failed => return Err(SfxError::WriteFailed),
            _ => panic!("Writer::write_file: must write the decoder first"),
        };

        match append_to_tree(tree, source, name, header, contents) {
            Ok(size) => {
                debug!("Added {} ({} bytes) as {}", source, size, name);
                self.files += 1;
                Ok(())
            }
            Err(e) => {
                // Part of the entry may already be in the stream.
                warn!("Couldn't add {}; abandoning the container", source);
                self.state = State::Failed;
                Err(e)
            }
        }
    }
}

/// Appends one entry, returning its size.
fn append_to_tree<W: Write, R: Read>(
    tree: &mut TreeBuilder<W>,
    source: &Utf8Path,
    name: &Utf8Path,
    mut header: tar::Header,
    contents: &mut R,
) -> SfxResult<u64> {
    let size = header.size()?;
    let mut limited = Counter::new(contents.by_ref().take(size));
    tree.append_data(&mut header, name, &mut limited)?;
    let copied = limited.count();

    // Shrinking shows up as a short copy; growing as leftovers.
    if copied != size || contents.read(&mut [0u8; 1])? != 0 {
        return Err(SfxError::FileChanged(source.to_owned()));
    }
    Ok(size)
}

fn utf8(path: &Path) -> SfxResult<&Utf8Path> {
    Utf8Path::from_path(path)
        .ok_or_else(|| SfxError::InvalidPath(format!("{} isn't UTF-8", path.display())))
}

/// Strips `base_dir` and any leading separators from `path`.
fn entry_name(path: &Utf8Path, base_dir: &Utf8Path) -> SfxResult<Utf8PathBuf> {
    let relative = path.strip_prefix(base_dir).unwrap_or(path);

    let mut name = Utf8PathBuf::new();
    for component in relative.components() {
        match component {
            Utf8Component::Normal(c) => name.push(c),
            Utf8Component::CurDir | Utf8Component::RootDir | Utf8Component::Prefix(_) => {}
            Utf8Component::ParentDir => {
                return Err(SfxError::InvalidPath(format!(
                    "Parent dir (..) found in {path} relative to {base_dir}"
                )));
            }
        }
    }
    if name.as_str().is_empty() {
        return Err(SfxError::InvalidPath(format!(
            "{path} has no name relative to {base_dir}"
        )));
    }
    Ok(name)
}

#[cfg(unix)]
fn mode_of(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(metadata: &fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

fn mtime_of(metadata: &fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs())
}

fn section_len(len: u64) -> SfxResult<i64> {
    i64::try_from(len).map_err(|_| SfxError::InvalidContainer("Section too large for the footer"))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::spec::FOOTER_SIZE;

    fn header(size: u64) -> tar::Header {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(size);
        header.set_mode(0o644);
        header
    }

    #[test]
    fn entry_names() {
        let name = |p: &str, b: &str| entry_name(Utf8Path::new(p), Utf8Path::new(b));

        assert_eq!(
            name("/tmp/app/templates/index.html", "/tmp/app").unwrap(),
            "templates/index.html"
        );
        assert_eq!(name("/tmp/app/main", "/tmp/app/").unwrap(), "main");
        assert_eq!(name("./static/app.css", ".").unwrap(), "static/app.css");
        // Not under the base directory: just lose the leading separator.
        assert_eq!(name("/etc/motd", "/tmp/app").unwrap(), "etc/motd");

        assert!(matches!(
            name("/tmp/app", "/tmp/app"),
            Err(SfxError::InvalidPath(_))
        ));
        assert!(matches!(
            name("/tmp/app/../secret", "/tmp/app"),
            Err(SfxError::InvalidPath(_))
        ));
    }

    #[test]
    fn shrinking_file() {
        let mut writer = Writer::new(Vec::new());
        writer.write_decoder(&b"\x42"[..]).unwrap();
        let mut short: &[u8] = b"only nine";
        match writer.append_entry(
            Utf8Path::new("/src/f"),
            Utf8Path::new("f"),
            header(20),
            &mut short,
        ) {
            Err(SfxError::FileChanged(p)) => assert_eq!(p, "/src/f"),
            other => panic!("Expected FileChanged, got {:?}", other),
        }
    }

    #[test]
    fn no_footer_after_a_failed_entry() {
        let mut writer = Writer::new(Vec::new());
        writer.write_decoder(&b"\x42"[..]).unwrap();
        // Claims 600 bytes, delivers nine. The tar stream now has a short entry.
        let mut short: &[u8] = b"only nine";
        assert!(matches!(
            writer.append_entry(
                Utf8Path::new("/src/f"),
                Utf8Path::new("f"),
                header(600),
                &mut short
            ),
            Err(SfxError::FileChanged(_))
        ));

        // Later files are refused...
        let mut fine: &[u8] = b"fine";
        assert!(matches!(
            writer.append_entry(
                Utf8Path::new("/src/g"),
                Utf8Path::new("g"),
                header(4),
                &mut fine
            ),
            Err(SfxError::WriteFailed)
        ));
        // ...and so is the footer that would make it look like a valid container.
        assert!(matches!(writer.finish(), Err(SfxError::WriteFailed)));
    }

    #[test]
    fn failed_decoder_copy() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "decoder went away"))
            }
        }

        let mut writer = Writer::new(Vec::new());
        assert!(matches!(writer.write_decoder(Broken), Err(SfxError::Io(_))));
        assert!(matches!(
            writer.write_decoder(&b"\x42"[..]),
            Err(SfxError::WriteFailed)
        ));
        assert!(matches!(writer.finish(), Err(SfxError::WriteFailed)));
    }

    #[test]
    fn growing_file() {
        let mut writer = Writer::new(Vec::new());
        writer.write_decoder(&b"\x42"[..]).unwrap();
        let mut long: &[u8] = b"more than four";
        assert!(matches!(
            writer.append_entry(
                Utf8Path::new("/src/f"),
                Utf8Path::new("f"),
                header(4),
                &mut long
            ),
            Err(SfxError::FileChanged(_))
        ));
    }

    #[test]
    fn null_metadata_by_default() {
        let mut writer = Writer::new(Vec::new());
        writer.write_decoder(&b"\x42"[..]).unwrap();
        let container = writer.finish().unwrap();

        let footer = Footer::parse(&container[container.len() - FOOTER_SIZE..]).unwrap();
        assert_eq!(footer.decoder_len, 1);
        assert_eq!(footer.metadata_len, 4);
        footer.check_layout(container.len() as u64).unwrap();
        let json = &container[container.len() - FOOTER_SIZE - 4..container.len() - FOOTER_SIZE];
        assert_eq!(json, b"null");
    }

    #[test]
    fn last_metadata_wins() {
        let mut writer = Writer::new(Vec::new());
        writer.write_decoder(&b"\x42"[..]).unwrap();
        writer.write_metadata(&serde_json::json!({ "Name": "first" })).unwrap();
        writer.write_metadata(&serde_json::json!({ "Name": "app" })).unwrap();
        let container = writer.finish().unwrap();

        let expected = br#"{"Name":"app"}"#;
        let end = container.len() - FOOTER_SIZE;
        assert_eq!(&container[end - expected.len()..end], expected);
    }

    #[test]
    #[should_panic(expected = "two decoders")]
    fn two_decoders() {
        let mut writer = Writer::new(Vec::new());
        writer.write_decoder(&b"\x42"[..]).unwrap();
        writer.write_decoder(&b"\x42"[..]).unwrap();
    }

    #[test]
    #[should_panic(expected = "decoder first")]
    fn file_before_decoder() {
        let mut writer = Writer::new(Vec::new());
        let mut contents: &[u8] = b"hi";
        let _ = writer.append_entry(
            Utf8Path::new("f"),
            Utf8Path::new("f"),
            header(2),
            &mut contents,
        );
    }

    #[test]
    #[should_panic(expected = "incomplete container")]
    fn finish_without_decoder() {
        let _ = Writer::new(Vec::new()).finish();
    }

    #[test]
    #[should_panic(expected = "empty decoder")]
    fn finish_with_empty_decoder() {
        let mut writer = Writer::new(Vec::new());
        writer.write_decoder(io::empty()).unwrap();
        let _ = writer.finish();
    }
}
