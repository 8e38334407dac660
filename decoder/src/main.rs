//! The front of every container.
//!
//! Run on its own, it's useless. Appended to by `selfpack_pack`,
//! it unpacks what follows it and runs the packed program in its place.
//! It takes no arguments of its own; all of them go to that program.

use std::env;

use anyhow::*;

use selfpack::extract::self_extract;

/// Set to 1, 2, or 3 for additional verbosity (info, debug, trace)
const VERBOSITY_VAR: &str = "SELFPACK_VERBOSITY";

fn main() -> Result<()> {
    let verbosity = env::var(VERBOSITY_VAR)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let mut errlog = stderrlog::new();
    errlog.verbosity(verbosity + 1);
    errlog.init()?;

    // Only comes back if something went wrong.
    let failure = self_extract();
    Err::<(), _>(failure).context("Couldn't run the packed program")
}
