use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::LevelFilter;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use viddup::config::{default_cache_dir, default_worker_count, parse_threshold, DetectorConfig};
use viddup::core::duplicate::{report_rows, ReportRow};
use viddup::services::{DetectionReport, Detector, DirStore, MemoryStore, SignatureStore, VideoScanner};
use viddup::{FfmpegSource, HashStrategy};

#[derive(Parser, Debug)]
#[command(name = "viddup", version, about = "Find near-duplicate videos")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Find and list duplicate groups
    Scan {
        /// Directory to scan (repeatable)
        #[arg(short, long, value_name = "DIR", required = true)]
        path: Vec<PathBuf>,
        /// Similarity threshold as a ratio (0.9) or percentage (90)
        #[arg(short, long, default_value_t = 0.9)]
        threshold: f64,
        /// Frames sampled per video
        #[arg(short, long, default_value_t = 10)]
        samples: usize,
        /// Worker threads (default: min(cores, 16))
        #[arg(short, long)]
        workers: Option<usize>,
        /// Fingerprint strategy
        #[arg(long, value_enum, default_value_t = HashStrategy::Combined)]
        strategy: HashStrategy,
        /// Signature cache directory
        #[arg(long, value_name = "DIR")]
        cache_dir: Option<PathBuf>,
        /// Do not read or write the signature cache
        #[arg(long, conflicts_with = "cache_dir")]
        no_cache: bool,
        /// Write report rows as JSON
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Maintain the signature cache
    Cache {
        #[command(subcommand)]
        command: CacheCmd,
    },
}

#[derive(Subcommand, Debug)]
enum CacheCmd {
    /// Remove entries older than the retention window
    Prune {
        #[arg(long, value_name = "DIR")]
        cache_dir: Option<PathBuf>,
        /// Retention window in days (default: 7)
        #[arg(long)]
        days: Option<u64>,
    },

    /// Remove every entry
    Clear {
        #[arg(long, value_name = "DIR")]
        cache_dir: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct JsonReport<'a> {
    generated_at: String,
    threshold: f64,
    strategy: HashStrategy,
    rows: &'a [ReportRow],
    skipped: &'a [viddup::services::SkippedVideo],
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    match cli.command {
        Commands::Scan {
            path,
            threshold,
            samples,
            workers,
            strategy,
            cache_dir,
            no_cache,
            output,
        } => {
            let config = DetectorConfig {
                threshold: parse_threshold(threshold),
                sample_count: samples,
                worker_count: workers.unwrap_or_else(default_worker_count),
                strategy,
                ..Default::default()
            };

            let store: Arc<dyn SignatureStore> = if no_cache {
                Arc::new(MemoryStore::new())
            } else {
                let dir = cache_dir.unwrap_or_else(default_cache_dir);
                Arc::new(
                    DirStore::open(&dir)
                        .with_context(|| format!("Failed to open cache {:?}", dir))?,
                )
            };

            let videos = {
                let spinner = spinner("Scanning for videos…")?;
                let found = VideoScanner::new().discover(&path, &AtomicBool::new(false))?;
                spinner.finish_with_message(format!("Found {} videos", found.len()));
                found
            };
            if videos.is_empty() {
                println!("No videos found.");
                return Ok(());
            }

            let progress = ProgressBar::new(videos.len() as u64);
            progress.set_style(ProgressStyle::with_template(
                "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}",
            )?);
            progress.set_message("fingerprinting");

            let detector = Detector::new(config, Arc::new(FfmpegSource::new()), store)?
                .with_progress(progress);

            println!("▶ Comparing {} videos…", videos.len());
            let report = benchmark("duplicate detection", || detector.detect(videos))?;
            print_report(&report);

            if let Some(out) = output {
                let rows = report_rows(&report.groups);
                let json = JsonReport {
                    generated_at: Utc::now().to_rfc3339(),
                    threshold: detector.config().threshold,
                    strategy: detector.config().strategy,
                    rows: &rows,
                    skipped: &report.skipped,
                };
                fs::write(&out, serde_json::to_string_pretty(&json)?)
                    .with_context(|| format!("Failed to write report {:?}", out))?;
                println!("\n✅ Wrote {} rows to {}", rows.len(), out.display());
            }
        }

        Commands::Cache { command } => match command {
            CacheCmd::Prune { cache_dir, days } => {
                let config = DetectorConfig::default().with_retention_days(days);
                let retention_days = config.cache_retention.as_secs() / (24 * 3600);
                let dir = cache_dir.unwrap_or_else(default_cache_dir);
                let removed = cache_detector(&dir, config)?.prune_cache()?;
                println!(
                    "🧹 Removed {} entries older than {} days",
                    removed, retention_days
                );
            }

            CacheCmd::Clear { cache_dir } => {
                let dir = cache_dir.unwrap_or_else(default_cache_dir);
                let removed = cache_detector(&dir, DetectorConfig::default())?.clear_cache()?;
                println!("🧹 Removed {} entries from {}", removed, dir.display());
            }
        },
    }

    Ok(())
}

/// Detector over an on-disk cache, used only for its cache maintenance.
fn cache_detector(dir: &Path, config: DetectorConfig) -> Result<Detector> {
    let store = DirStore::open(dir).with_context(|| format!("Failed to open cache {:?}", dir))?;
    Ok(Detector::new(config, Arc::new(FfmpegSource::new()), Arc::new(store))?)
}

fn print_report(report: &DetectionReport) {
    if !report.skipped.is_empty() {
        println!("\n⚠️  Skipped {} video(s):", report.skipped.len());
        for skip in &report.skipped {
            println!("   {} ({})", skip.path.display(), skip.reason);
        }
    }

    if report.groups.is_empty() {
        println!("\nNo duplicates found.");
    } else {
        println!(
            "\nFound {} duplicate group(s), {} duplicate(s):",
            report.groups.len(),
            report.duplicate_count()
        );
        for group in &report.groups {
            println!("\n✨ Group {}:", group.id);
            let rep = group.representative();
            println!("   🏆 {} ({})", rep.path.display(), rep.created.format("%Y-%m-%d %H:%M:%S"));
            for dup in group.duplicates() {
                println!("   ▶ {} ({:.1}%)", dup.path.display(), dup.similarity * 100.0);
            }
        }
    }

    let stats = report.cache;
    println!(
        "\n📦 Cache: {} hit(s), {} miss(es)",
        stats.hits, stats.misses
    );
    if report.cancelled {
        println!("⚠️  Run was cancelled; results are partial.");
    }
}

fn spinner(message: &'static str) -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    Ok(spinner)
}

/// Run `f()`, print how long it took (with `label`), and return its result.
fn benchmark<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let start = Instant::now();
    let result = f();
    println!("⏱ {} took {:.2?}", label, start.elapsed());
    result
}
