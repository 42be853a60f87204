//! `compressfs-offline`: batch (de)compress a tree of backing files without
//! a live mount. Uses the same [`compressfs::header`] format and
//! [`compressfs::codec::CodecRegistry`] as the live filesystem so files it
//! touches remain readable by the mounted one and vice versa.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek};
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use clap::Parser;
use compressfs::codec::{CancelCookie, CodecId, CodecRegistry};
use compressfs::header::{Header, HEADER_LEN};
use tracing::{error, info};
use walkdir::WalkDir;

/// `compressfs-offline [OPTIONS] <path...>`.
#[derive(Parser, Debug)]
#[command(name = "compressfs-offline", version, about = "Offline batch (de)compressor for compressfs backing trees")]
struct Cli {
    /// Compress using the given method; omit to decompress instead.
    #[arg(short, long, value_name = "lzo|bz2|gz|lzma|null")]
    codec: Option<String>,

    /// Compression level, 1-9 (ignored by null/lzo).
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..=9))]
    level: Option<u32>,

    /// Print what each file did.
    #[arg(short, long)]
    verbose: bool,

    paths: Vec<std::path::PathBuf>,
}

fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    if cli.paths.is_empty() {
        eprintln!("usage: compressfs-offline [OPTIONS] <path...>");
        std::process::exit(1);
    }

    let target_codec = match &cli.codec {
        Some(name) => match CodecId::from_name(name) {
            Some(id) => Some(id),
            None => {
                eprintln!("unknown codec {name:?}");
                std::process::exit(1);
            }
        },
        None => None,
    };
    let level = cli.level.unwrap_or_else(|| default_level(target_codec));
    let codecs = CodecRegistry::new(level);

    let mut errors = 0u32;
    for root in &cli.paths {
        for entry in WalkDir::new(root).into_iter() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    error!(?err, "walk failed");
                    errors += 1;
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if let Err(err) = transform(entry.path(), target_codec, &codecs, cli.verbose) {
                error!(path = %entry.path().display(), ?err, "failed to transform");
                errors += 1;
            }
        }
    }

    if errors > 0 {
        std::process::exit(1);
    }
}

fn default_level(codec: Option<CodecId>) -> u32 {
    match codec {
        Some(CodecId::Lzma) => 4,
        Some(CodecId::Bz2) | Some(CodecId::Gzip) => 6,
        _ => 1,
    }
}

/// One file's worth of `transform()` from the original: skip files already
/// in the target state, otherwise compress or decompress into a sibling
/// temp file and rename over the original, preserving owner, group, mode,
/// and timestamps exactly as `offline.c` does.
fn transform(path: &Path, target_codec: Option<CodecId>, codecs: &CodecRegistry, verbose: bool) -> io::Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    // A file shorter than the header is never mistaken for one: `existing`
    // comes back `None` the same way it would for any other raw file, so a
    // short file is still compressed when `-c` is given.
    let existing = Header::read_from_path(path)?;
    match (target_codec, existing) {
        (Some(_), Some(_)) => {
            if verbose {
                info!(path = %path.display(), "compressed already");
            }
            return Ok(());
        }
        (None, None) => {
            if verbose {
                info!(path = %path.display(), "uncompressed already");
            }
            return Ok(());
        }
        _ => {}
    }

    let src = File::open(path)?;
    let tmp_path = temp_sibling(path);
    let tmp_file = OpenOptions::new().read(true).write(true).create(true).truncate(true).open(&tmp_path)?;

    let result = match target_codec {
        Some(codec_id) => {
            let codec = codecs.get(codec_id);
            let mut tmp_ref = &tmp_file;
            tmp_ref.seek(io::SeekFrom::Start(HEADER_LEN))?;
            let cancel = CancelCookie::new();
            let size = codec.compress(&cancel, &src, &tmp_file)?;
            Header::write(&tmp_file, Header { codec: codec_id, size }).map(|_| ())
        }
        None => {
            let header = existing.expect("checked above");
            let codec = codecs.get(header.codec);
            let mut src_ref = &src;
            src_ref.seek(io::SeekFrom::Start(HEADER_LEN))?;
            codec.decompress(&src, &tmp_file).map(|_| ())
        }
    };

    if let Err(err) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    drop(src);
    drop(tmp_file);

    fs::rename(&tmp_path, path)?;

    if let Err(err) = std::os::unix::fs::lchown(path, Some(metadata.uid()), Some(metadata.gid())) {
        error!(path = %path.display(), ?err, "unable to set owner/group");
    }
    if let Err(err) = fs::set_permissions(path, metadata.permissions()) {
        error!(path = %path.display(), ?err, "unable to set permissions");
    }
    let atime = filetime::FileTime::from_last_access_time(&metadata);
    let mtime = filetime::FileTime::from_last_modification_time(&metadata);
    filetime::set_file_times(path, atime, mtime)?;

    if verbose {
        info!(path = %path.display(), "ok");
    }
    Ok(())
}

/// Sibling temp-file path using the filesystem's own hidden-name prefix,
/// matching `engine::Engine::temp_path_for`.
fn temp_sibling(path: &Path) -> std::path::PathBuf {
    let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let mut tmp = path.to_path_buf();
    tmp.set_file_name(format!("._.tmp.{file_name}"));
    tmp
}
