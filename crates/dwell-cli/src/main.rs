//! `dwell` command-line binary.
//!
//! Reads `dwell.toml` (or the path given with `--config`) plus `DWELL__*`
//! environment overrides, then runs one of:
//!
//! - `check`: poll every vehicle once and record visits that are due
//! - `watch`: poll on an interval until interrupted
//! - `history`: replay past telemetry and record the visits found
//! - `visits`: list vehicles currently near known locations
//! - `cleanup`: prune old observations

mod adapters;
mod commands;
mod settings;

use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use dwell_core::segment::StrategyKind;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::{commands::HistoryArgs, settings::Settings};

#[derive(Parser)]
#[command(author, version, about = "Detect vehicle visits at known locations")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "dwell.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Poll every vehicle once.
  Check {
    /// Decide but do not write to the journal.
    #[arg(long)]
    dry_run: bool,
    /// Evaluate as of this RFC 3339 instant instead of now.
    #[arg(long)]
    at:      Option<DateTime<Utc>>,
  },
  /// Poll every vehicle on the configured interval until Ctrl-C.
  Watch {
    #[arg(long)]
    dry_run: bool,
  },
  /// Replay past telemetry and record the visits found in it.
  History {
    /// First day, `YYYY-MM-DD` or `DD.MM.YYYY`.
    #[arg(long, value_parser = parse_date)]
    from:         Option<NaiveDate>,
    /// Last day (inclusive); defaults to today.
    #[arg(long, value_parser = parse_date, requires = "from")]
    to:           Option<NaiveDate>,
    /// Days to look back when `--from` is not given.
    #[arg(long, default_value_t = 7)]
    days:         i64,
    /// Only replay this vehicle id.
    #[arg(long)]
    vehicle:      Option<String>,
    #[arg(long)]
    dry_run:      bool,
    /// Rewrite visits that are already in the journal.
    #[arg(long)]
    force_update: bool,
    /// Segmentation strategy; defaults to the configured one.
    #[arg(long, value_enum)]
    strategy:     Option<StrategyArg>,
  },
  /// List vehicles currently near known locations.
  Visits,
  /// Remove observations past retention.
  Cleanup,
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
  Linear,
  ClusterMerge,
}

impl From<StrategyArg> for StrategyKind {
  fn from(arg: StrategyArg) -> Self {
    match arg {
      StrategyArg::Linear => Self::Linear,
      StrategyArg::ClusterMerge => Self::ClusterMerge,
    }
  }
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d")
    .or_else(|_| NaiveDate::parse_from_str(s, "%d.%m.%Y"))
    .map_err(|_| format!("invalid date {s:?}, expected YYYY-MM-DD or DD.MM.YYYY"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let settings = Settings::load(&cli.config)?;

  match cli.command {
    Command::Check { dry_run, at } => commands::check(&settings, dry_run, at).await,
    Command::Watch { dry_run } => commands::watch(&settings, dry_run).await,
    Command::History { from, to, days, vehicle, dry_run, force_update, strategy } => {
      let args = HistoryArgs {
        from,
        to,
        days,
        vehicle,
        dry_run,
        force_update,
        strategy: strategy.map(Into::into),
      };
      commands::history(&settings, args).await
    }
    Command::Visits => commands::visits(&settings).await,
    Command::Cleanup => commands::cleanup(&settings).await,
  }
}
