use chrono::Utc;
use clap::{Parser, Subcommand};
use maint_core::ingest::{self, RawActivity, RecordSource};
use maint_core::sink::{ALERTS_CSV_FILE, ALERTS_JSONL_FILE};
use maint_core::store::{self, ACTIVITIES_FILE, MAINTENANCE_FILE};
use maint_core::*;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "bikemaint")]
#[command(about = "Bike maintenance threshold tracker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Use this config file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate maintenance thresholds and record alerts (default)
    Check {
        /// Gear id of the bike to evaluate (overrides config)
        #[arg(long)]
        bike: Option<String>,

        /// Evaluate as of this timestamp instead of the current time
        #[arg(long)]
        now: Option<String>,

        /// Dry run - show alerts without recording them
        #[arg(long)]
        dry_run: bool,
    },

    /// Import an activity export into the local store
    Import {
        /// CSV export with upload_id, type, gear_id, start_date or start_date_local, and distance columns
        file: PathBuf,
    },

    /// Record a maintenance action
    Log {
        /// Action label, e.g. "Wax chain"
        action: String,

        /// When the action was performed (defaults to now)
        #[arg(long)]
        at: Option<String>,
    },

    /// List configured maintenance thresholds
    Thresholds,
}

fn main() -> Result<()> {
    // Initialize logging
    maint_core::logging::init();

    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let data_dir = cli.data_dir.unwrap_or_else(|| config.data.data_dir.clone());

    match cli.command {
        Some(Commands::Check { bike, now, dry_run }) => {
            cmd_check(&data_dir, bike, now, dry_run, &config)
        }
        Some(Commands::Import { file }) => cmd_import(&data_dir, &file, &config),
        Some(Commands::Log { action, at }) => cmd_log(&data_dir, &action, at, &config),
        Some(Commands::Thresholds) => cmd_thresholds(&config),
        None => {
            // Default to "check" command
            cmd_check(&data_dir, None, None, false, &config)
        }
    }
}

fn cmd_check(
    data_dir: &Path,
    bike: Option<String>,
    now: Option<String>,
    dry_run: bool,
    config: &Config,
) -> Result<()> {
    // Configuration problems are fatal before anything is read or written
    let registry = config.registry()?;
    let offset = config.utc_offset()?;
    let bike = bike
        .or_else(|| config.bike.equipment_id.clone())
        .ok_or_else(|| {
            Error::Config("no bike configured; set [bike] equipment_id or pass --bike".into())
        })?;

    let now = match now {
        Some(ref raw) => ingest::parse_timestamp(raw, &offset)
            .map_err(|e| Error::Other(format!("invalid --now: {}", e)))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    let activities = store::load_activities(&data_dir.join(ACTIVITIES_FILE), &offset)?;
    let events = store::load_maintenance_log(&data_dir.join(MAINTENANCE_FILE), &offset)?;
    report_rejections(&[&activities.rejected, &events.rejected]);

    let ctx = EvaluationContext::new(now, &bike, &activities.records, &events.records);
    let alerts = evaluate(&registry, &ctx);

    println!("\nMaintenance status for {} as of {}", bike, now.format("%Y-%m-%d %H:%M"));
    println!("─────────────────────────────────────────");
    for alert in &alerts {
        println!("{}", alert);
    }

    let due: Vec<_> = alerts.iter().filter(|a| a.triggered).collect();
    if due.is_empty() {
        println!("\n✓ Nothing due");
    } else {
        println!();
        for alert in &due {
            println!("⚠ {}: {}", alert.notification_title(), alert.notification_message());
        }
    }

    if dry_run {
        println!("\n[Dry run - alerts not recorded]");
        return Ok(());
    }

    let to_record: Vec<AlertRecord> = if config.notify.only_triggered {
        due.into_iter().cloned().collect()
    } else {
        alerts.clone()
    };

    JsonlAlertSink::new(data_dir.join(ALERTS_JSONL_FILE)).append_all(&to_record)?;
    CsvAlertSink::new(data_dir.join(ALERTS_CSV_FILE)).append_all(&to_record)?;
    tracing::info!("Recorded {} alert records (run {})", to_record.len(), ctx.run_id);

    if let Some(digest) = format_digest(&alerts) {
        println!("\n{}", digest);
    }

    Ok(())
}

fn cmd_import(data_dir: &Path, file: &Path, config: &Config) -> Result<()> {
    let offset = config.utc_offset()?;

    let rows: Vec<RawActivity> = store::read_rows(file)?;
    let incoming = ingest::ingest_activities(rows, &offset);
    report_rejections(&[&incoming.rejected]);

    let store_path = data_dir.join(ACTIVITIES_FILE);
    let summary = store::import_activities(&store_path, &offset, incoming.records)?;

    println!(
        "✓ Imported {} activities ({} new)",
        summary.imported, summary.added
    );
    println!("  Store: {} ({} activities)", store_path.display(), summary.total);
    if summary.kept_malformed > 0 {
        println!(
            "  Kept {} malformed store rows unchanged; fix them by hand",
            summary.kept_malformed
        );
    }

    Ok(())
}

fn cmd_log(data_dir: &Path, action: &str, at: Option<String>, config: &Config) -> Result<()> {
    let registry = config.registry()?;
    let offset = config.utc_offset()?;

    let action = action.trim();
    if action.is_empty() {
        return Err(Error::Other("action label must not be empty".into()));
    }

    let performed_at = match at {
        Some(ref raw) => ingest::parse_timestamp(raw, &offset)
            .map_err(|e| Error::Other(format!("invalid --at: {}", e)))?,
        None => Utc::now().with_timezone(&offset),
    };

    let event = MaintenanceEvent {
        action_label: action.to_string(),
        performed_at,
    };
    let log_path = data_dir.join(MAINTENANCE_FILE);
    store::append_maintenance_event(&log_path, &event, &offset)?;

    println!("✓ Logged '{}' at {}", action, performed_at.format("%Y-%m-%d %H:%M:%S %:z"));
    if !registry.iter().any(|(_, cfg)| cfg.action_label == action) {
        println!("  Note: no configured threshold uses the label '{}'", action);
    }

    Ok(())
}

fn cmd_thresholds(config: &Config) -> Result<()> {
    let registry = config.registry()?;

    println!("{:<20} {:<22} {:>10} {:>8}", "TYPE", "ACTION", "MILES", "DAYS");
    for (id, cfg) in registry.iter() {
        let miles = cfg
            .distance_limit
            .map(|m| format!("{:.1}", m))
            .unwrap_or_else(|| "-".into());
        let days = cfg
            .time_limit
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".into());
        println!("{:<20} {:<22} {:>10} {:>8}", id, cfg.action_label, miles, days);
    }

    Ok(())
}

fn report_rejections(groups: &[&Vec<Rejection>]) {
    let total: usize = groups.iter().map(|g| g.len()).sum();
    if total == 0 {
        return;
    }

    println!("⚠ Skipped {} malformed rows:", total);
    for rejection in groups.iter().flat_map(|g| g.iter()) {
        let source = match rejection.source {
            RecordSource::Activity => "activities",
            RecordSource::MaintenanceEvent => "maintenance",
        };
        println!("  - {} row {}: {}", source, rejection.row, rejection.reason);
    }
}
