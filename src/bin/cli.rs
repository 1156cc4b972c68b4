//! Sensorlog CLI
//!
//! Command-line interface for Sensorlog operations:
//! - Query readings from live files and archives
//! - Inspect and prune the archive store
//! - Archive leftover live files
//! - Send a reading to a running daemon

use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use sensorlog::config::{generate_default_config, Config};
use sensorlog::ingest::IngestClient;
use sensorlog::storage::query::{live_files, newest_live_file};
use sensorlog::storage::types::{format_timestamp, parse_timestamp};
use sensorlog::storage::{ArchiveInfo, Archiver, LogQuery, LogReader, Reading, RetentionReaper};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sensorlog-cli")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Query and maintain a sensorlog store")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search the standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the live log directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Output format (table, json, csv)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Query readings in a time range
    Query {
        /// Only this sensor
        #[arg(short, long)]
        sensor: Option<String>,
        /// Range start (ISO 8601, Unix seconds, "now", "yesterday")
        #[arg(long)]
        start: Option<String>,
        /// Range end (default: now)
        #[arg(long)]
        end: Option<String>,
        /// Range length when --start is omitted (e.g. 30m, 24h, 7d, 2w)
        #[arg(short, long, default_value = "24h")]
        last: String,
    },

    /// List archives with their metadata
    Archives,

    /// Delete archives older than the retention window
    Prune {
        /// Only list what would be deleted
        #[arg(long)]
        dry_run: bool,
    },

    /// Archive live files left behind by a stopped daemon
    Rotate {
        /// Archive every live file instead of only the newest
        #[arg(long)]
        all: bool,
    },

    /// Send one reading to a running daemon
    Send {
        /// Sensor id
        sensor: String,
        /// Value
        value: f64,
        /// Unit
        unit: String,
        /// Timestamp (default: now)
        #[arg(short, long)]
        time: Option<String>,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sensorlog=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Config { output } = &cli.command {
        let config = generate_default_config();
        match output {
            Some(path) => {
                // Create parent directory if needed
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, &config)?;
                println!("Config written to {:?}", path);
            }
            None => print!("{}", config),
        }
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default()?,
    };
    if let Some(log_dir) = &cli.log_dir {
        config.storage.log_dir = log_dir.to_string_lossy().into_owned();
    }
    let log_config = config.to_log_config();
    let archiver = Archiver::new(&log_config.archive_dir);

    match cli.command {
        Commands::Query {
            sensor,
            start,
            end,
            last,
        } => {
            let end = match end.as_deref() {
                Some(s) => parse_time(s)?,
                None => Utc::now(),
            };
            let start = match start.as_deref() {
                Some(s) => parse_time(s)?,
                None => end - parse_duration(&last)?,
            };

            let mut query = LogQuery::new(start, end);
            if let Some(sensor) = sensor {
                query = query.sensor(sensor);
            }

            let reader = LogReader::scan(&log_config.log_dir, &archiver, None, query)?;
            let mut readings = Vec::new();
            let mut bad_rows = 0usize;
            for item in reader {
                match item {
                    Ok(reading) => readings.push(reading),
                    Err(e) => {
                        tracing::warn!("Skipping row: {}", e);
                        bad_rows += 1;
                    }
                }
            }
            // Files are scanned one after another; present in time order
            readings.sort_by_key(|r| r.timestamp);

            match cli.format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&readings)?),
                "csv" => print_csv(&readings)?,
                _ => print_table(&readings),
            }
            if bad_rows > 0 {
                eprintln!("{} malformed row(s) skipped", bad_rows);
            }
        }

        Commands::Archives => {
            let archives = archiver.list()?;
            match cli.format.as_str() {
                "json" => {
                    let data: Vec<serde_json::Value> = archives.iter().map(archive_json).collect();
                    println!("{}", serde_json::to_string_pretty(&data)?);
                }
                _ => print_archives(&archives),
            }
        }

        Commands::Prune { dry_run } => {
            let reaper = RetentionReaper::new(archiver.clone(), log_config.retention_days);
            let now = Utc::now();

            if dry_run {
                let expired = reaper.expired(now)?;
                if expired.is_empty() {
                    println!("Nothing to prune");
                }
                for archive in &expired {
                    println!(
                        "Would remove {} (created {})",
                        archive.path.display(),
                        format_timestamp(&archive.created_time)
                    );
                }
            } else {
                let report = reaper.prune(now)?;
                println!("Archives scanned: {}", report.scanned);
                println!("  Removed: {}", report.removed.len());
                println!("  Retained: {}", report.retained());
                if !report.failed.is_empty() {
                    println!("  Failed: {}", report.failed.len());
                    for path in &report.failed {
                        println!("    {}", path.display());
                    }
                    std::process::exit(1);
                }
            }
        }

        Commands::Rotate { all } => {
            let files = if all {
                live_files(&log_config.log_dir)?
            } else {
                newest_live_file(&log_config.log_dir)?.into_iter().collect()
            };

            if files.is_empty() {
                println!("No live files in {:?}", log_config.log_dir);
            }
            for path in files {
                let info = archiver.archive_path(&path, Utc::now())?;
                println!(
                    "Archived {} -> {} ({} rows)",
                    path.display(),
                    info.path.display(),
                    info.source_row_count().unwrap_or(0)
                );
            }
        }

        Commands::Send {
            sensor,
            value,
            unit,
            time,
        } => {
            let timestamp = match time.as_deref() {
                Some(s) => parse_time(s)?,
                None => Utc::now(),
            };
            let reading = Reading::new(sensor, timestamp, value, unit);
            let client = IngestClient::new(config.client.clone());

            match client.send(&reading).await {
                Ok(()) => println!(
                    "Sent {}: {} {} at {}",
                    reading.sensor_id,
                    reading.value,
                    reading.unit,
                    format_timestamp(&reading.timestamp)
                ),
                Err(e) => {
                    eprintln!("Failed to send to {}: {}", client.config().addr(), e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Config { .. } => {}
    }

    Ok(())
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, Box<dyn std::error::Error>> {
    match s {
        "now" => Ok(Utc::now()),
        "yesterday" => Ok(Utc::now() - Duration::days(1)),
        _ => {
            if let Ok(secs) = s.parse::<i64>() {
                return DateTime::from_timestamp(secs, 0)
                    .ok_or_else(|| format!("Timestamp out of range: {}", s).into());
            }
            Ok(parse_timestamp(s)?)
        }
    }
}

fn parse_duration(s: &str) -> Result<Duration, Box<dyn std::error::Error>> {
    let s = s.trim().to_lowercase();

    if let Some(minutes) = s.strip_suffix('m') {
        Ok(Duration::minutes(minutes.parse()?))
    } else if let Some(hours) = s.strip_suffix('h') {
        Ok(Duration::hours(hours.parse()?))
    } else if let Some(days) = s.strip_suffix('d') {
        Ok(Duration::days(days.parse()?))
    } else if let Some(weeks) = s.strip_suffix('w') {
        Ok(Duration::weeks(weeks.parse()?))
    } else {
        Err(format!("Invalid duration format: {}. Use: 30m, 24h, 7d, 2w", s).into())
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

fn print_table(readings: &[Reading]) {
    if readings.is_empty() {
        println!("No data for the selected time range");
        return;
    }

    println!("{:<26} {:<12} {:>12} {}", "Timestamp", "Sensor", "Value", "Unit");
    println!("{}", "-".repeat(60));

    for r in readings {
        println!(
            "{:<26} {:<12} {:>12.2} {}",
            format_timestamp(&r.timestamp),
            r.sensor_id,
            r.value,
            r.unit
        );
    }
    println!();
    println!("{} reading(s)", readings.len());
}

fn print_csv(readings: &[Reading]) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer = csv::Writer::from_writer(std::io::stdout());
    writer.write_record(["timestamp", "sensor_id", "value", "unit"])?;
    for r in readings {
        writer.write_record([
            format_timestamp(&r.timestamp),
            r.sensor_id.clone(),
            r.value.to_string(),
            r.unit.clone(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn print_archives(archives: &[ArchiveInfo]) {
    if archives.is_empty() {
        println!("No archives yet.");
        return;
    }

    println!("{:<44} {:<22} {:>8} {:>10}", "Archive", "Created", "Rows", "Size");
    println!("{}", "-".repeat(88));

    for a in archives {
        let name = a
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let rows = a
            .source_row_count()
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<44} {:<22} {:>8} {:>10}",
            name,
            a.created_time.format("%Y-%m-%d %H:%M:%S"),
            rows,
            format_bytes(a.size_bytes)
        );
    }

    let total: u64 = archives.iter().map(|a| a.size_bytes).sum();
    println!();
    println!("{} archive(s), {}", archives.len(), format_bytes(total));
}

fn archive_json(a: &ArchiveInfo) -> serde_json::Value {
    serde_json::json!({
        "path": a.path.display().to_string(),
        "created_time": format_timestamp(&a.created_time),
        "source_row_count": a.source_row_count(),
        "size_bytes": a.size_bytes,
        "has_metadata": a.meta.is_some(),
    })
}
