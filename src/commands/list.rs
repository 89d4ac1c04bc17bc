use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use sprocket::{config::load_or_default, filter, record::TorrentStore, render, session};

#[derive(Args)]
pub struct ListArgs {
    /// Filter expressions (`key[!]op value`); a bare word filters on name
    pub filters: Vec<String>,

    /// Output template expanded per torrent
    #[arg(
        short = 'o',
        long = "output-format",
        default_value = render::DEFAULT_TEMPLATE
    )]
    pub output_format: String,

    /// Shortcut for --output-format %hash
    #[arg(short = 'H', long = "hashes", conflicts_with = "output_format")]
    pub hashes: bool,

    /// Record separator between rendered torrents
    #[arg(long = "rs", default_value = "\n", conflicts_with = "nul")]
    pub record_separator: String,

    /// Use a NUL byte as the record separator
    #[arg(short = '0')]
    pub nul: bool,
}

pub fn execute(config_path: Option<PathBuf>, args: ListArgs) -> Result<()> {
    let filters = filter::compile(&args.filters)?;

    let (config, _) = load_or_default(config_path)?;
    let mut session = session::connect(&config)?;
    let mut store = TorrentStore::new();
    store.populate(session.as_mut())?;

    let matches = filters.apply(store.all())?;

    let template = if args.hashes {
        render::HASH_TEMPLATE
    } else {
        args.output_format.as_str()
    };
    let separator = if args.nul {
        "\0"
    } else {
        args.record_separator.as_str()
    };

    let output = render::render_all(template, &matches, separator)?;
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}
