use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::{self, File};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use site_normalizer::{spa, NormalizeCommand, NormalizerConfig, Report, StructureNormalizer};

fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_layer = match log_file {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("Failed to create log file {:?}", path))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .context("Failed to install log subscriber")?;
    Ok(())
}

fn load_config(args: &NormalizeCommand) -> Result<NormalizerConfig> {
    let base = match &args.config {
        Some(path) => NormalizerConfig::from_file(path)?,
        None => NormalizerConfig::default(),
    };
    let config = args.apply_to(base);
    config.validate()?;
    Ok(config)
}

fn print_statistics(report: &Report) {
    println!("{}", "=".repeat(60));
    println!("📊 {}", "Statistics".bold());
    println!("📥 Downloaded files: {}", report.downloaded_count.to_string().green());

    if !report.failed_urls.is_empty() {
        println!("⚠️  Failed downloads: {}", report.failed_count().to_string().yellow());
        for failed in report.failed_urls.iter().take(5) {
            println!("    - {}: {}", failed.url, failed.reason.red());
        }
        if report.failed_count() > 5 {
            println!("    ... and {} more", report.failed_count() - 5);
        }
    }

    for (dir, count) in &report.files_by_dir {
        println!("📁 {:<7} {}", format!("{}/", dir), count);
    }
    println!("{}", "=".repeat(60));
}

fn warn_if_spa(report: &Report) {
    let index = report.project_dir.join("index.html");
    let Ok(html) = fs::read_to_string(&index) else {
        return;
    };

    let verdict = spa::inspect(&html);
    if verdict.looks_like_spa() {
        println!("⚠️  {}", "This page looks like a single-page application".yellow());
        println!("    Content rendered by scripts is not part of the local copy.");
        if !verdict.markers.is_empty() {
            println!("    Markers: {}", verdict.markers.join(", "));
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = NormalizeCommand::parse();
    init_logging(args.verbose, args.log_file.as_deref())?;
    let config = load_config(&args)?;

    println!("🚀 Normalizing: {}", args.url.blue());
    println!("📁 Output directory: {:?}", args.output_dir);
    println!("⚡ Max concurrent downloads: {}", config.concurrency);

    let normalizer = StructureNormalizer::with_reqwest(config)?;

    let cancel = normalizer.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("🛑 Interrupted, finishing downloads already in flight");
            cancel.cancel();
        }
    });

    let progress_bar = ProgressBar::new_spinner();
    progress_bar.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    progress_bar.set_message("Downloading page and resources...");
    progress_bar.enable_steady_tick(Duration::from_millis(120));

    let result = normalizer.run(&args.url, &args.output_dir).await;
    progress_bar.finish_and_clear();
    let report = result.with_context(|| format!("Failed to normalize {}", args.url))?;

    print_statistics(&report);
    warn_if_spa(&report);

    if let Some(path) = &args.report_json {
        let json = report.to_json().context("Failed to serialize report")?;
        fs::write(path, json).with_context(|| format!("Failed to write report to {:?}", path))?;
        println!("📝 Report written to: {:?}", path);
    }

    println!("✅ Project saved to: {:?}", report.project_dir);
    Ok(())
}
