use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "soundline", version = VERSION, about = "Stream and play audio over HTTP")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// TOML config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long, global = true)]
    pub device: Option<String>,

    /// Directory for cached tracks
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Do not write tracks to the cache directory
    #[arg(long, global = true)]
    pub no_cache: bool,

    /// Abort a network read that stalls longer than this (0 disables)
    #[arg(long, global = true)]
    pub read_timeout_ms: Option<u64>,

    /// Output queue target in seconds
    #[arg(long, global = true)]
    pub buffer_seconds: Option<f32>,

    /// Initial volume, 0.0 to 1.0
    #[arg(long, global = true)]
    pub volume: Option<f32>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play one or more URLs in order
    Play {
        #[arg(required = true)]
        urls: Vec<String>,

        /// Index of the first track to play
        #[arg(long, default_value_t = 0)]
        start: usize,

        /// Print player events as JSON lines on stdout
        #[arg(long)]
        json: bool,
    },

    /// Download a URL into the cache without playing it
    Cache {
        url: String,

        /// Write to this path instead of the cache directory
        #[arg(long)]
        out: Option<PathBuf>,
    },
}
