use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use sprocket::{
    config::load_or_default,
    filter,
    record::TorrentStore,
    session::{self, Action},
    SprocketError,
};

#[derive(Args)]
pub struct ControlArgs {
    /// Filter expressions selecting the torrents to act on
    #[arg(required = true)]
    pub filters: Vec<String>,
}

pub fn execute(
    config_path: Option<PathBuf>,
    dry_run: bool,
    action: Action,
    args: ControlArgs,
) -> Result<()> {
    let filters = filter::compile(&args.filters)?;

    let (config, _) = load_or_default(config_path)?;
    let mut session = session::connect(&config)?;
    let mut store = TorrentStore::new();
    store.populate(session.as_mut())?;

    let matches = filters.apply(store.all())?;
    if matches.is_empty() {
        return Err(SprocketError::Command {
            command: action.name().to_string(),
            message: "no matching torrents".to_string(),
        }
        .into());
    }

    let names: Vec<&str> = matches.iter().filter_map(|record| record.name()).collect();
    info!("{}: {}", action.name(), names.join("; "));

    if dry_run {
        return Ok(());
    }

    let ids: Vec<i64> = matches.iter().filter_map(|record| record.id()).collect();
    session
        .mutate(action, &ids)
        .with_context(|| format!("could not {} {} torrents", action.name(), ids.len()))?;
    Ok(())
}
