use std::{fs, path::PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use tracing::info;

use sprocket::{config::load_or_default, session};

#[derive(Args)]
pub struct AddArgs {
    /// Torrent files to hand to the daemon
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

pub fn execute(config_path: Option<PathBuf>, dry_run: bool, args: AddArgs) -> Result<()> {
    // validate every path before touching the daemon
    for path in &args.paths {
        if !path.exists() {
            bail!("torrent '{}' does not exist", path.display());
        }
    }

    let (config, _) = load_or_default(config_path)?;
    let mut session = session::connect(&config)?;

    for path in &args.paths {
        let path = fs::canonicalize(path)
            .with_context(|| format!("could not resolve '{}'", path.display()))?;
        info!("adding: {}", path.display());
        if !dry_run {
            session
                .add(&path)
                .with_context(|| format!("could not add torrent '{}'", path.display()))?;
        }
    }
    Ok(())
}
