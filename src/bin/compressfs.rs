//! `compressfs` binary: wires [`compressfs::config::Config`] into an
//! [`compressfs::engine::Engine`], spawns the background compressor, mounts
//! through `fuser`, and drains via the shutdown coordinator once the kernel
//! unmounts it.

use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::sync::Arc;

use clap::Parser;
use compressfs::background::BackgroundCompressor;
use compressfs::config::{Cli, Config};
use compressfs::engine::Engine;
use compressfs::fs::CompressFs;
use compressfs::shutdown::ShutdownCoordinator;
use fuser::MountOption;
use tracing::{error, info, warn};

fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = match Config::from_cli(cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("compressfs: {err}");
            std::process::exit(1);
        }
    };

    // Keep the backing directory's fd open across the coming `fchdir`, the
    // same way the original retains `cmpdirFd` for the life of the process.
    let backing_fd = match File::open(&config.backing_dir) {
        Ok(file) => file,
        Err(err) => {
            error!(error = %err, dir = %config.backing_dir.display(), "failed to open backing directory");
            std::process::exit(1);
        }
    };

    // Canonicalize before the `fchdir` below: the engine joins every
    // relative path it's given onto this directory, so a relative
    // `backing_dir` would otherwise get rejoined against a cwd that is
    // already that directory, resolving one level too deep. `mountpoint`
    // is resolved the same way since `mount2` below also runs after the
    // `fchdir`.
    config.backing_dir = match std::fs::canonicalize(&config.backing_dir) {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, dir = %config.backing_dir.display(), "failed to resolve backing directory");
            std::process::exit(1);
        }
    };
    config.mountpoint = match std::fs::canonicalize(&config.mountpoint) {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, dir = %config.mountpoint.display(), "failed to resolve mountpoint");
            std::process::exit(1);
        }
    };

    if !config.foreground {
        if let Err(err) = daemonize::Daemonize::new().start() {
            error!(?err, "failed to daemonize");
            std::process::exit(1);
        }
    }

    raise_file_limit();
    lower_priority();
    chdir_into_backing(&backing_fd);

    let runtime = tokio::runtime::Runtime::new().expect("failed to start tokio runtime");
    let _guard = runtime.enter();

    let engine = Engine::new(config.backing_dir.clone(), config.default_codec, config.level, config.policy);
    let worker = Arc::new(BackgroundCompressor::new());
    let worker_handle = worker.clone().spawn(engine.clone());
    let coordinator = ShutdownCoordinator::new(worker.clone());

    let fs = CompressFs::new(engine.clone());

    let mut mount_options = vec![MountOption::RW, MountOption::FSName("compressfs".to_string())];
    for opt in &config.mount_options {
        mount_options.push(MountOption::CUSTOM(opt.clone()));
    }

    info!(mountpoint = %config.mountpoint.display(), codec = config.default_codec.name(), "mounting");
    if let Err(err) = fuser::mount2(fs, &config.mountpoint, &mount_options) {
        error!(?err, "mount exited with an error");
    }

    // `mount2` blocks until the kernel unmounts us; drain the background
    // compressor before the process actually exits.
    runtime.block_on(coordinator.shutdown(&engine, worker_handle));
}

/// Best-effort `RLIMIT_NOFILE` raise to `/proc/sys/fs/file-max`, falling
/// back to the hard limit if that fails.
fn raise_file_limit() {
    let max = match std::fs::read_to_string("/proc/sys/fs/file-max") {
        Ok(text) => text.trim().parse::<u64>().ok(),
        Err(_) => None,
    };

    let mut limit = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
    unsafe {
        if libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) != 0 {
            warn!("failed to read file descriptor limit");
            return;
        }
    }

    if let Some(max) = max {
        limit.rlim_cur = max;
        limit.rlim_max = max;
        if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &limit) } == 0 {
            return;
        }
    }

    limit.rlim_cur = limit.rlim_max;
    if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &limit) } != 0 {
        warn!("failed to raise file descriptor limit");
    }
}

/// Lower scheduling priority for the whole process group so compression
/// does not starve interactive work sharing the backing disk.
fn lower_priority() {
    unsafe {
        if libc::setpriority(libc::PRIO_PGRP, 0, 10) == -1 {
            warn!("setpriority failed");
        }
    }
}

/// `fchdir` into the retained backing-directory descriptor, so every
/// relative path the engine builds resolves against it even if the process
/// working directory changes later.
fn chdir_into_backing(backing_fd: &File) {
    if unsafe { libc::fchdir(backing_fd.as_raw_fd()) } != 0 {
        error!("fchdir into backing directory failed");
        std::process::exit(1);
    }
}
