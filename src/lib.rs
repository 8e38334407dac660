//! selfpack builds and reads self-extracting containers:
//! a single executable that carries a whole file tree and a program to run from it.
//!
//! A container is a small _decoder_ executable with everything else
//! appended to it:
//!
//! ```no_run
//! # use std::fs::File;
//! # use selfpack::*;
//! let mut writer = Writer::new(File::create("app.bin")?);
//! writer.write_decoder(File::open("selfpack_decoder")?)?;
//! writer.write_file(File::open("build/app")?, "build/app", "build")?;
//! writer.write_file(
//!     File::open("build/templates/index.html")?,
//!     "build/templates/index.html",
//!     "build",
//! )?;
//! writer.write_metadata(&EntryPoint { name: "app".into() })?;
//! writer.finish()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Running `app.bin` runs the decoder, which finds its own file, reads the footer
//! at the end of it, unpacks the tree into a scratch directory,
//! and replaces itself with `app`. (See [`extract`] for the details.)
//!
//! The same container can be inspected from the outside:
//!
//! ```no_run
//! # use std::io;
//! # use selfpack::*;
//! let mut archive = Archive::open("app.bin")?;
//! let entry_point: EntryPoint = archive.read_metadata()?;
//! println!("Runs {}", entry_point.name);
//!
//! for file in archive.files()? {
//!     let mut file = file?;
//!     println!("{} ({} bytes)", file.metadata.path, file.metadata.size);
//!     io::copy(&mut file, &mut io::sink())?;
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Unlike Zip, the file tree is a single compressed stream
//! (a deflated tarball), so files come out in the order they went in,
//! one at a time. The decoder and metadata sections, on the other hand,
//! can be read at any point, from any thread, while the tree is being walked.

pub mod extract;
pub mod positioned;
pub mod read;
pub mod result;
pub mod write;

pub use extract::EntryPoint;
pub use read::Archive;
pub use result::{SfxError, SfxResult};
pub use spec::{Footer, FOOTER_SIZE, SIGNATURE};
pub use write::Writer;

mod counter;
mod spec;
