use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use prettytable::{cell, row, Table};
use seat_occupancy::{
    batch::{list_images, run_evaluation_batch, run_occupancy_batch},
    config::Config,
    detection::{Detector, ReplayDetector},
    evaluation::{EvaluationResult, Evaluator},
    occupancy::{OccupancyAnalyzer, OccupancyResult},
    report::{DatasetReport, SkippedImage, Summarize},
};
use serde::Serialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
};

#[derive(Debug, Clone, Parser)]
/// Seat occupancy inference and evaluation over an image directory
enum Opts {
    /// Infer the occupancy of every image
    Analyze {
        #[clap(flatten)]
        input: Input,
    },
    /// Score predicted occupied seats against label files
    Evaluate {
        #[clap(flatten)]
        input: Input,
        /// directory of label files, one `<image stem>.txt` per image
        #[clap(long)]
        labels: PathBuf,
    },
}

#[derive(Debug, Clone, clap::Args)]
struct Input {
    /// configuration file
    #[clap(long, default_value = "occupancy.json5")]
    config: PathBuf,
    /// image directory
    #[clap(long)]
    images: PathBuf,
    /// directory of pre-computed detections, one `<image stem>.json` per image
    #[clap(long)]
    detections: PathBuf,
    /// write the full report as JSON to this file
    #[clap(long)]
    output: Option<PathBuf>,
}

struct Loaded {
    config: Config,
    detector: Arc<dyn Detector>,
    images: Vec<PathBuf>,
}

impl Input {
    fn load(&self) -> Result<Loaded> {
        let config = Config::open(&self.config).with_context(|| {
            format!("failed to load config file '{}'", self.config.display())
        })?;
        let detector: Arc<dyn Detector> = Arc::new(ReplayDetector::new(&self.detections)?);
        let images = list_images(&self.images, &config.batch.image_extensions)?;

        Ok(Loaded {
            config,
            detector,
            images,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    if env::var_os("RUST_LOG").is_none() {
        env::set_var("RUST_LOG", "info");
    }
    pretty_env_logger::init();

    match Opts::parse() {
        Opts::Analyze { input } => analyze(input).await?,
        Opts::Evaluate { input, labels } => evaluate(input, labels).await?,
    }

    Ok(())
}

async fn analyze(input: Input) -> Result<()> {
    let Loaded {
        config,
        detector,
        images,
    } = input.load()?;
    let analyzer = Arc::new(OccupancyAnalyzer::new(&config, config.class_roles()?)?);
    info!("occupancy policy {:?}", analyzer.policy());

    let report = run_occupancy_batch(detector, analyzer, images, &config.batch).await;

    {
        let mut table = Table::new();
        table.add_row(row!["image", "seats", "occupied", "free", "rate", "people", "sitting"]);
        report.entries.iter().for_each(|entry| {
            let OccupancyResult {
                total_seats,
                occupied_seats,
                free_seats,
                occupancy_rate,
                people,
            } = entry.result;
            table.add_row(row![
                entry.image.display(),
                total_seats,
                occupied_seats,
                free_seats,
                format!("{:.3}", occupancy_rate),
                people.total,
                people.sitting,
            ]);
        });
        let summary = &report.summary;
        table.add_row(row![
            format!("total ({} images)", summary.images),
            summary.total_seats,
            summary.occupied_seats,
            summary.free_seats,
            format!("{:.3}", summary.mean_occupancy_rate),
            summary.total_people,
            "",
        ]);
        table.printstd();
    }

    print_skipped(&report.skipped);
    save_report(&report, input.output.as_deref())?;
    Ok(())
}

async fn evaluate(input: Input, labels: PathBuf) -> Result<()> {
    let Loaded {
        config,
        detector,
        images,
    } = input.load()?;
    let evaluator = Arc::new(Evaluator::new(&config, config.class_roles()?)?);

    let report = run_evaluation_batch(detector, evaluator, images, labels, &config.batch).await;

    {
        let mut table = Table::new();
        table.add_row(row!["image", "TP", "FP", "FN", "precision", "recall", "f1"]);
        report.entries.iter().for_each(|entry| {
            let EvaluationResult {
                true_positives,
                false_positives,
                false_negatives,
                precision,
                recall,
                f1,
                ..
            } = entry.result;
            table.add_row(row![
                entry.image.display(),
                true_positives,
                false_positives,
                false_negatives,
                format!("{:.3}", precision),
                format!("{:.3}", recall),
                format!("{:.3}", f1),
            ]);
        });
        let summary = &report.summary;
        table.add_row(row![
            format!("mean ({} images)", summary.images),
            summary.true_positives,
            summary.false_positives,
            summary.false_negatives,
            format!("{:.3}", summary.mean_precision),
            format!("{:.3}", summary.mean_recall),
            format!("{:.3}", summary.mean_f1),
        ]);
        table.printstd();
    }

    print_skipped(&report.skipped);
    save_report(&report, input.output.as_deref())?;
    Ok(())
}

fn print_skipped(skipped: &[SkippedImage]) {
    if skipped.is_empty() {
        return;
    }

    println!("skipped {} images", skipped.len());
    let mut table = Table::new();
    table.add_row(row!["image", "reason"]);
    skipped.iter().for_each(|skipped| {
        table.add_row(row![skipped.image.display(), format!("{:?}", skipped.reason)]);
    });
    table.printstd();
}

fn save_report<T>(report: &DatasetReport<T>, output: Option<&Path>) -> Result<()>
where
    T: Summarize + Serialize,
{
    let output = match output {
        Some(output) => output,
        None => return Ok(()),
    };
    let text = serde_json::to_string_pretty(report)?;
    fs::write(output, text)
        .with_context(|| format!("failed to write report '{}'", output.display()))?;
    info!("report saved to '{}'", output.display());
    Ok(())
}
