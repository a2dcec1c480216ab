use std::io::{self, Write};

use anyhow::{ensure, Context, Result};
use clap::Parser;
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use rayon::{prelude::*, ThreadPoolBuilder};
use serde::Serialize;
use tracing::{info, Level};

use rash_scan_rs::{collect_images, Config, ModelInfo, ScanReport, Scanner};

#[derive(Serialize)]
struct Output {
    models: Vec<ModelInfo>,
    results: Vec<ScanReport>,
}

fn main() -> Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_max_level(if config.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .init();

    ensure!(config.top_k > 0, "--top-k must be at least 1");

    if let Some(num_threads) = config.num_threads {
        ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build_global()?;
    }

    let image_paths = collect_images(&config.inputs).context("Failed to collect input images")?;
    ensure!(!image_paths.is_empty(), "No images found in the given inputs");

    let scanner = Scanner::from_config(&config);
    info!("Scanning {} image(s) in {:?} mode", image_paths.len(), config.mode);

    let progress_bar = ProgressBar::new(image_paths.len() as u64);
    progress_bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
        )?
        .progress_chars("#>-"),
    );

    let results: Vec<ScanReport> = image_paths
        .par_iter()
        .progress_with(progress_bar.clone())
        .map(|path| scanner.scan(path))
        .collect();
    progress_bar.finish_and_clear();

    let output = Output {
        models: scanner.model_info(),
        results,
    };
    let mut stdout = io::stdout().lock();
    if config.pretty {
        serde_json::to_writer_pretty(&mut stdout, &output)?;
    } else {
        serde_json::to_writer(&mut stdout, &output)?;
    }
    writeln!(stdout).context("Failed to write results")?;

    Ok(())
}
