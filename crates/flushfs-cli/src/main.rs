//! CLI for flushfs — a FUSE filesystem that logs flush and fsync payloads.
//!
//! ```bash
//! flushfs mount /mnt/flushfs
//! flushfs mount /mnt/flushfs --file-name bar --fail-flush-on 2
//! flushfs check
//! flushfs gen-config > flushfs.toml
//! ```

use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use flushfs_core::{EventKind, FaultInjector, FlushFsConfig, ReportError, Reporter, Trigger};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// flushfs — test filesystem reporting every flush and fsync.
///
/// Mounts a directory with a single file; each `open` of it gets its own
/// buffer, and every `close`/`fsync` logs that buffer.
#[derive(Parser)]
#[command(name = "flushfs", version, about)]
struct Cli {
  /// Verbose output (repeatable: -v, -vv).
  #[arg(short, long, action = clap::ArgAction::Count, global = true)]
  verbose: u8,

  /// Command.
  #[command(subcommand)]
  command: Commands
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
  /// Mount flushfs and block until unmounted.
  Mount(MountArgs),

  /// Check FUSE availability.
  Check,

  /// Print an example configuration.
  GenConfig
}

#[derive(Args)]
struct MountArgs {
  /// Mount point.
  mountpoint: PathBuf,
  /// TOML configuration file.
  #[arg(short, long, env = "FLUSHFS_CONFIG")]
  config: Option<PathBuf>,
  /// Name of the file inside the mount (overrides the config).
  #[arg(long)]
  file_name: Option<String>,
  /// Fail the N-th flush (1-based).
  #[arg(long, value_name = "N")]
  fail_flush_on: Option<u64>,
  /// Fail the N-th fsync (1-based).
  #[arg(long, value_name = "N")]
  fail_fsync_on: Option<u64>,
  /// Errno returned by injected failures.
  #[arg(long, default_value_t = 5)]
  fail_errno: i32,
  /// Allow access by other users.
  #[arg(long)]
  allow_other: bool
}

fn init_tracing(verbose: u8, default_level: &str) {
  let filter = match verbose {
    0 => default_level,
    1 => "debug",
    _ => "trace"
  };

  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter))
    )
    .compact()
    .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let cli = Cli::parse();

  match cli.command {
    Commands::Mount(args) => {
      let config = load_config(&args)?;
      init_tracing(cli.verbose, &config.logging.level);
      cmd_mount(args, config).await
    }
    Commands::Check => {
      init_tracing(cli.verbose, "info");
      cmd_check()
    }
    Commands::GenConfig => cmd_gen_config()
  }
}

/// Config file (or defaults) with command-line overrides applied.
fn load_config(args: &MountArgs) -> anyhow::Result<FlushFsConfig> {
  let mut config = match &args.config {
    Some(path) => FlushFsConfig::from_file(path)?,
    None => FlushFsConfig::default()
  };

  if let Some(name) = &args.file_name {
    config.file_name.clone_from(name);
  }
  if args.allow_other {
    config.mount_options.allow_other = true;
  }

  config.validate()?;
  Ok(config)
}

/// Reporter that logs each payload and fails the `fail_on`-th one.
fn logging_reporter(kind: EventKind, fail_on: Option<u64>, errno: i32) -> Arc<dyn Reporter> {
  let trigger = match fail_on {
    Some(call) => Trigger::OnCall {
      call,
      error: ReportError::new(errno, format!("injected {kind} failure"))
    },
    None => Trigger::Never
  };
  let injector = FaultInjector::new(trigger);

  Arc::new(move |payload: &[u8]| {
    let result = injector.report(payload);
    match &result {
      Ok(()) => info!(
        %kind,
        len = payload.len(),
        content = %String::from_utf8_lossy(payload),
        "reported"
      ),
      Err(e) => warn!(%kind, len = payload.len(), error = %e, "failing report")
    }
    result
  })
}

/// The mount command.
async fn cmd_mount(args: MountArgs, config: FlushFsConfig) -> anyhow::Result<()> {
  if !flushfs_core::is_fuse_available() {
    anyhow::bail!(
      "FUSE not found. Install macFUSE (macOS) or libfuse3 (Linux).\n\
       Check: flushfs check"
    );
  }

  info!(
    mountpoint = %args.mountpoint.display(),
    file = %config.file_name,
    fail_flush_on = ?args.fail_flush_on,
    fail_fsync_on = ?args.fail_fsync_on,
    "mounting flushfs"
  );

  let flush = logging_reporter(EventKind::Flush, args.fail_flush_on, args.fail_errno);
  let fsync = logging_reporter(EventKind::Fsync, args.fail_fsync_on, args.fail_errno);

  let recorder = flushfs_core::run_mount(config, &args.mountpoint, flush, fsync)
    .await
    .context("mount failed")?;

  info!(events = recorder.len(), "unmounted");
  Ok(())
}

/// The check command.
fn cmd_check() -> anyhow::Result<()> {
  if flushfs_core::is_fuse_available() {
    println!("FUSE is available");
    Ok(())
  } else {
    println!("FUSE not found.");
    println!();

    #[cfg(target_os = "macos")]
    {
      println!("macOS: install macFUSE");
      println!("  brew install --cask macfuse");
      println!("  or: https://osxfuse.github.io/");
    }

    #[cfg(target_os = "linux")]
    {
      println!("Linux: install libfuse3");
      println!("  sudo apt install libfuse3-dev fuse3    # Debian/Ubuntu");
      println!("  sudo dnf install fuse3-devel fuse3     # Fedora");
      println!("  sudo pacman -S fuse3                   # Arch");
    }

    anyhow::bail!("FUSE is not installed")
  }
}

/// The gen-config command.
fn cmd_gen_config() -> anyhow::Result<()> {
  let body = toml::to_string_pretty(&FlushFsConfig::default())
    .context("serializing default config")?;

  println!("# flushfs example configuration");
  println!("# Usage: flushfs mount /mnt/flushfs --config flushfs.toml");
  println!();
  println!("{body}");
  Ok(())
}
