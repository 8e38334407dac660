//! Self-extraction: unpacking a container and handing control to the program inside.
//!
//! This is what the decoder at the front of every container runs.
//! [`self_extract()`] does the whole dance:
//!
//! 1. Find the file this process was started from (not `argv[0]`).
//! 2. Open it as an [`Archive`] and decode its [`EntryPoint`].
//! 3. Make a fresh scratch directory and move into it.
//! 4. [`unpack()`] every file there.
//! 5. Replace this process with the entry point, passing along our arguments,
//!    our environment, and two more variables:
//!    [`ORIGINAL_DIR_VAR`] and [`SCRATCH_DIR_VAR`].
//!
//! There's no partial success: if any step fails, the decoder has nothing
//! useful left to do but report it and exit.
//! The scratch directory is left behind either way.

use std::env;
use std::ffi::{OsStr, OsString};
use std::fs::{self, File};
use std::io::{self, Read, Seek};
use std::path::{Path, PathBuf};
use std::process::Command;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use log::*;
use serde::{Deserialize, Serialize};

use crate::read::{Archive, EntryKind};
use crate::result::*;

/// Holds the directory the user ran the container from
pub const ORIGINAL_DIR_VAR: &str = "SELFPACK_PWD";

/// Holds the scratch directory the container unpacked into,
/// which is also the program's working directory.
pub const SCRATCH_DIR_VAR: &str = "SELFPACK_DIR";

/// The part of a container's metadata the decoder cares about.
/// Other fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoint {
    /// Path of the program to run, relative to the unpacked tree
    #[serde(rename = "Name")]
    pub name: Utf8PathBuf,
}

/// Writes every file in the archive under `dest`,
/// creating parent directories as needed and applying each file's mode.
///
/// Returns the number of entries unpacked.
pub fn unpack<R: Read + Seek>(archive: &mut Archive<R>, dest: &Path) -> SfxResult<usize> {
    let mut unpacked = 0;
    for entry in archive.files()? {
        let mut entry = entry?;
        let relative = checked_relative(&entry.metadata.path)?;
        let target = dest.join(relative.as_std_path());

        match entry.metadata.kind {
            EntryKind::Directory => {
                create_dirs(&target)?;
            }
            EntryKind::File => {
                if let Some(parent) = target.parent() {
                    create_dirs(parent)?;
                }
                let mut file = File::create(&target)?;
                if entry.metadata.size > 0 {
                    io::copy(&mut entry, &mut file)?;
                }
                // Close before chmod; the mode might not let us write.
                drop(file);
            }
            EntryKind::Unsupported(flag) => {
                return Err(SfxError::Hierarchy(format!(
                    "{} has unsupported tar type {:?}",
                    entry.metadata.path, flag as char
                )));
            }
        }
        set_mode(&target, entry.metadata.mode)?;
        unpacked += 1;
    }
    Ok(unpacked)
}

/// Makes sure a path from a container stays inside the directory we unpack to.
fn checked_relative(path: &Utf8Path) -> SfxResult<Utf8PathBuf> {
    let mut relative = Utf8PathBuf::new();

    for component in path.components() {
        match component {
            Utf8Component::Prefix(prefix) => {
                return Err(SfxError::Hierarchy(format!(
                    "Prefix {prefix} found in path {path}"
                )));
            }
            Utf8Component::RootDir => {
                return Err(SfxError::Hierarchy(format!(
                    "Root directory found in path {path}"
                )));
            }
            Utf8Component::CurDir => {
                warn!("Current dir (.) found in path {path}");
                // Huh. Keep going.
            }
            Utf8Component::ParentDir => {
                return Err(SfxError::Hierarchy(format!(
                    "Parent dir (..) found in path {path}"
                )));
            }
            Utf8Component::Normal(component) => relative.push(component),
        }
    }
    if relative.as_str().is_empty() {
        return Err(SfxError::Hierarchy(format!("Empty path {path:?}")));
    }
    Ok(relative)
}

#[cfg(unix)]
fn create_dirs(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o755).create(dir)
}

#[cfg(not(unix))]
fn create_dirs(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_readonly(mode & 0o222 == 0);
    fs::set_permissions(path, permissions)
}

/// Everything needed to hand control to an unpacked program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handoff {
    /// Absolute path of the program to run
    pub program: PathBuf,
    /// Where the user ran the container from
    pub original_dir: PathBuf,
    /// Where the container was unpacked
    pub scratch_dir: PathBuf,
}

impl Handoff {
    /// Builds the command for the unpacked program.
    ///
    /// `args` is a full argument vector, `argv[0]` included.
    /// The command inherits our environment and file descriptors,
    /// plus [`ORIGINAL_DIR_VAR`] and [`SCRATCH_DIR_VAR`],
    /// and runs in the scratch directory.
    pub fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut args = args.into_iter();
        let mut command = Command::new(&self.program);
        if let Some(arg0) = args.next() {
            set_arg0(&mut command, arg0.as_ref());
        }
        command
            .args(args)
            .env(ORIGINAL_DIR_VAR, &self.original_dir)
            .env(SCRATCH_DIR_VAR, &self.scratch_dir)
            .current_dir(&self.scratch_dir);
        command
    }

    /// Replaces this process with the unpacked program, passing along our arguments.
    ///
    /// There's no success value: if this returns, the handoff failed.
    pub fn exec(self) -> SfxError {
        let mut command = self.command(env::args_os());
        info!("Handing off to {}", self.program.display());
        replace_process(&mut command)
    }
}

#[cfg(unix)]
fn set_arg0(command: &mut Command, arg0: &OsStr) {
    use std::os::unix::process::CommandExt;
    command.arg0(arg0);
}

#[cfg(not(unix))]
fn set_arg0(_command: &mut Command, _arg0: &OsStr) {}

#[cfg(unix)]
fn replace_process(command: &mut Command) -> SfxError {
    use std::os::unix::process::CommandExt;
    SfxError::Io(command.exec())
}

/// Without `exec()`, the best we can do is run the program and exit with its status.
#[cfg(not(unix))]
fn replace_process(command: &mut Command) -> SfxError {
    match command.status() {
        Ok(status) => std::process::exit(status.code().unwrap_or(1)),
        Err(e) => SfxError::Io(e),
    }
}

/// Returns the absolute, symlink-free path of the running executable.
pub fn current_image() -> SfxResult<PathBuf> {
    Ok(env::current_exe()?.canonicalize()?)
}

/// Picks the directory the user thinks they're in.
///
/// `current_dir()` resolves symlinks, but the shell's `$PWD` doesn't,
/// so prefer the latter as long as it's absolute and points at the same place.
fn logical_dir(pwd: Option<OsString>, physical: PathBuf) -> PathBuf {
    let pwd = match pwd.map(PathBuf::from) {
        Some(pwd) if pwd.is_absolute() => pwd,
        _ => return physical,
    };
    match (pwd.canonicalize(), physical.canonicalize()) {
        (Ok(a), Ok(b)) if a == b => pwd,
        _ => physical,
    }
}

/// Unpacks the container at `image` into a fresh scratch directory,
/// moves this process into it, and returns how to launch the entry point.
pub fn extract(image: &Path) -> SfxResult<Handoff> {
    info!("Reading {}", image.display());
    let mut archive = Archive::open(image)?;
    let entry_point: EntryPoint = archive.read_metadata()?;
    let program = checked_relative(&entry_point.name)?;

    let scratch_dir = tempfile::Builder::new()
        .prefix("selfpack-")
        .tempdir()?
        .keep()
        .canonicalize()?;
    let original_dir = logical_dir(env::var_os("PWD"), env::current_dir()?);
    debug!(
        "Moving from {} to {}",
        original_dir.display(),
        scratch_dir.display()
    );
    env::set_current_dir(&scratch_dir)?;

    let unpacked = unpack(&mut archive, &scratch_dir)?;
    info!("Unpacked {} files into {}", unpacked, scratch_dir.display());

    Ok(Handoff {
        program: scratch_dir.join(program.as_std_path()),
        original_dir,
        scratch_dir,
    })
}

/// Finds our own image, unpacks it, and hands off to the program inside.
///
/// Only returns if something went wrong, and there's no recovering from that.
pub fn self_extract() -> SfxError {
    match current_image().and_then(|image| extract(&image)) {
        Ok(handoff) => handoff.exec(),
        Err(e) => e,
    }
}
