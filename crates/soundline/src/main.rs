//! soundline: play audio from HTTP URLs while they download.
//!
//! Each track is fetched through a prefetching in-memory stream that the decoder can seek
//! freely; the fetched bytes are teed into a cache directory so later plays come from disk.
//!
//! ## Modes
//! - `play`: play one or more URLs, controlled by single-letter commands on stdin.
//! - `cache`: download a URL into the cache without playing it.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use soundline::cli::{Args, Command};
use soundline::config::AppConfig;
use soundline::runtime;

fn main() -> Result<()> {
    let args = Args::parse();
    let settings = AppConfig::load_optional(args.config.as_deref())?.resolve(&args);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter)),
        )
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    match args.cmd {
        Some(Command::Play { urls, start, json }) => runtime::run_play(settings, urls, start, json),
        Some(Command::Cache { url, out }) => {
            let path = runtime::run_cache(settings, url, out)?;
            println!("{}", path.display());
            Ok(())
        }
        None => {
            eprintln!("nothing to do; see --help");
            Ok(())
        }
    }
}
