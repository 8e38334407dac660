use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::*;
use log::*;
use structopt::*;

use selfpack::extract::unpack;
use selfpack::Archive;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "selfpack_probe",
    about = "Examines a self-extracting container without running it"
)]
struct Opt {
    /// Pass multiple times for additional verbosity (info, debug, trace)
    #[structopt(short, long, parse(from_occurrences))]
    verbosity: usize,

    /// Unpack the container into the given directory instead of listing it.
    #[structopt(short = "x", long)]
    extract: Option<PathBuf>,

    #[structopt(name("container"))]
    path: PathBuf,
}

fn main() -> Result<()> {
    let args = Opt::from_args();

    let mut errlog = stderrlog::new();
    errlog.verbosity(args.verbosity + 1);
    errlog.init()?;

    let mut archive = Archive::open(&args.path)
        .with_context(|| format!("Couldn't load {}", args.path.display()))?;

    match &args.extract {
        Some(dest) => extract_to(&mut archive, dest),
        None => list(&mut archive),
    }
}

fn list(archive: &mut Archive<fs::File>) -> Result<()> {
    let footer = archive.footer();
    println!(
        "decoder: {} bytes, tree: {} bytes, metadata: {} bytes ({} total)",
        footer.decoder_len,
        footer.tree_len,
        footer.metadata_len,
        archive.container_len()
    );

    let metadata: serde_json::Value = archive
        .read_metadata()
        .context("Couldn't decode metadata")?;
    println!("{}", serde_json::to_string_pretty(&metadata)?);

    for file in archive.files()? {
        let mut file = file?;
        let m = &file.metadata;
        println!(
            "{:04o} {:>10} {} {}{}",
            m.mode,
            m.size,
            m.last_modified.format("%Y-%m-%d %H:%M:%S"),
            m.path,
            if m.is_dir() { "/" } else { "" }
        );
        // Read (and discard) the contents so a corrupt tree shows up here.
        io::copy(&mut file, &mut io::sink())?;
    }
    Ok(())
}

fn extract_to(archive: &mut Archive<fs::File>, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)
        .with_context(|| format!("Couldn't create directory {}", dest.display()))?;
    let unpacked = unpack(archive, dest)
        .with_context(|| format!("Couldn't unpack into {}", dest.display()))?;
    info!("Unpacked {} files into {}", unpacked, dest.display());
    Ok(())
}
