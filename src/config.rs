//! `clap` derive for the CLI surface plus an optional TOML config file
//! (`serde` + `toml`), merged CLI-wins-over-file into the runtime
//! [`Config`] used to build the [`crate::engine::Engine`].

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

use crate::codec::CodecId;
use crate::policy::Policy;

/// `compressfs [OPTIONS] <BACKING_DIR> [MOUNTPOINT]`.
///
/// The legacy single-positional-argument form (`compressfs <mountpoint>`,
/// mounting a directory over itself) is preserved: when `mountpoint` is
/// omitted, `backing_dir` doubles as both.
#[derive(Parser, Debug)]
#[command(name = "compressfs", version, about = "A compressing passthrough FUSE filesystem")]
pub struct Cli {
    /// Backing storage directory (old syntax: also the mountpoint).
    pub backing_dir: PathBuf,

    /// Mountpoint, if different from the backing directory.
    pub mountpoint: Option<PathBuf>,

    /// Default codec for newly compressed files.
    #[arg(short, long, value_name = "lzo|bz2|gz|lzma|null")]
    pub codec: Option<String>,

    /// Compression level, 1-9 (ignored by null/lzo).
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..=9))]
    pub level: Option<u32>,

    /// Run in the foreground instead of daemonizing.
    #[arg(short, long)]
    pub foreground: bool,

    /// Daemonize (the default; explicit flag kept for symmetry with `-f`).
    #[arg(short, long)]
    pub detach: bool,

    /// Passthrough FUSE mount options, comma-separated or repeated.
    #[arg(short = 'o', long, value_delimiter = ',')]
    pub options: Vec<String>,

    /// Optional TOML config file.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

/// The on-disk config file shape. Every field is optional so
/// a config file can set only what it needs to override.
#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub codec: Option<String>,
    pub level: Option<u32>,
    pub min_filesize_background: Option<u64>,
    pub mmap_protection: Option<bool>,
    pub incompressible_suffixes: Option<Vec<String>>,
}

impl FileConfig {
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let text = fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
    }
}

/// Merged runtime configuration: every field resolved, CLI values
/// overriding the config file, the config file overriding built-in
/// defaults.
pub struct Config {
    pub backing_dir: PathBuf,
    pub mountpoint: PathBuf,
    pub default_codec: CodecId,
    pub level: u32,
    pub foreground: bool,
    pub mount_options: Vec<String>,
    pub policy: Policy,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Self, String> {
        let file_config = match &cli.config {
            Some(path) => FileConfig::load(path).map_err(|err| format!("failed to read {}: {err}", path.display()))?,
            None => FileConfig::default(),
        };

        let codec_name = cli.codec.or(file_config.codec).unwrap_or_else(|| "lzo".to_string());
        let default_codec = CodecId::from_name(&codec_name).ok_or_else(|| format!("unknown codec {codec_name:?}"))?;

        let level = cli.level.or(file_config.level).unwrap_or_else(|| default_level(default_codec));

        let mountpoint = cli.mountpoint.clone().unwrap_or_else(|| cli.backing_dir.clone());

        let policy = Policy::new(
            file_config.mmap_protection.unwrap_or(true),
            file_config.incompressible_suffixes.unwrap_or_else(Policy::default_suffixes),
            file_config.min_filesize_background,
        );

        Ok(Self {
            backing_dir: cli.backing_dir,
            mountpoint,
            default_codec,
            level,
            foreground: cli.foreground,
            mount_options: cli.options,
            policy,
        })
    }
}

/// Mirrors the original's `compresslevel[2] == 'x'` per-codec default
/// (bz2/gzip default to 6, LZMA to 4, LZO/null ignore the level entirely).
fn default_level(codec: CodecId) -> u32 {
    match codec {
        CodecId::Bz2 | CodecId::Gzip => 6,
        CodecId::Lzma => 4,
        CodecId::Lzo | CodecId::Null => 1,
    }
}
