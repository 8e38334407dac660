use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::*;
use log::*;
use structopt::*;

use selfpack::{EntryPoint, Writer};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "selfpack_pack",
    about = "Bundles a directory into a self-extracting executable"
)]
struct Opt {
    /// Pass multiple times for additional verbosity (info, debug, trace)
    #[structopt(short, long, parse(from_occurrences))]
    verbosity: usize,

    /// The decoder to put at the front of the container.
    /// It must run on whatever machine runs the container.
    #[structopt(short, long)]
    decoder: PathBuf,

    /// The program to run once unpacked, relative to DIR
    #[structopt(short, long)]
    entry: String,

    /// Where to write the container
    #[structopt(short, long)]
    output: PathBuf,

    /// Everything in here gets packed, and unpacked relative to it.
    #[structopt(name("DIR"))]
    dir: PathBuf,
}

fn main() -> Result<()> {
    let args = Opt::from_args();

    let mut errlog = stderrlog::new();
    errlog.verbosity(args.verbosity + 1);
    errlog.init()?;

    let mut files = Vec::new();
    walk(&args.dir, &mut files)?;
    info!("Found {} files in {}", files.len(), args.dir.display());

    let entry = args.dir.join(&args.entry);
    ensure!(
        files.contains(&entry),
        "{} isn't a file in {}",
        args.entry,
        args.dir.display()
    );

    pack(&args, &files)?;
    make_executable(&args.output)
        .with_context(|| format!("Couldn't make {} executable", args.output.display()))
}

/// Collects every regular file under `dir`, in sorted order,
/// so the same tree always packs the same way.
fn walk(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("Couldn't read directory {}", dir.display()))?
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk(&path, files)?;
        } else if file_type.is_file() {
            files.push(path);
        } else {
            warn!("Skipping {}, which isn't a regular file", path.display());
        }
    }
    Ok(())
}

fn pack(args: &Opt, files: &[PathBuf]) -> Result<()> {
    let out = File::create(&args.output)
        .with_context(|| format!("Couldn't create {}", args.output.display()))?;
    let mut writer = Writer::new(BufWriter::new(out));

    let decoder = File::open(&args.decoder)
        .with_context(|| format!("Couldn't open decoder {}", args.decoder.display()))?;
    writer.write_decoder(decoder)?;

    for path in files {
        let file =
            File::open(path).with_context(|| format!("Couldn't open {}", path.display()))?;
        writer
            .write_file(file, path, &args.dir)
            .with_context(|| format!("Couldn't pack {}", path.display()))?;
    }
    writer.write_metadata(&EntryPoint {
        name: args.entry.as_str().into(),
    })?;

    writer
        .finish()?
        .into_inner()
        .map_err(|e| e.into_error())
        .context("Couldn't flush the container")?;
    info!("Wrote {}", args.output.display());
    Ok(())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}
