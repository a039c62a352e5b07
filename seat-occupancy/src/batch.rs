//! Concurrent processing of an image directory.

use crate::{
    common::*,
    config::BatchConfig,
    detection::Detector,
    evaluation::{EvaluationResult, Evaluator},
    occupancy::{OccupancyAnalyzer, OccupancyResult},
    report::{DatasetReport, ImageOutcome, SkipReason, Summarize},
};

/// List image files in `dir` whose extension is one of `extensions`, sorted by path.
pub fn list_images(dir: impl AsRef<Path>, extensions: &[String]) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let entries = fs::read_dir(dir)
        .with_context(|| format!("failed to list image directory '{}'", dir.display()))?;

    let mut images: Vec<_> = entries
        .map(|entry| -> Result<_> {
            let path = entry?.path();
            let accepted = path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| {
                        extensions
                            .iter()
                            .any(|allowed| allowed.eq_ignore_ascii_case(ext))
                    })
                    .unwrap_or(false);
            Ok(accepted.then(|| path))
        })
        .filter_map(Result::transpose)
        .try_collect()?;
    images.sort();

    debug!("found {} images in '{}'", images.len(), dir.display());
    Ok(images)
}

/// The label file of an image: same base name with a `.txt` extension.
pub fn label_path_for(image: &Path, labels_dir: &Path) -> Result<PathBuf> {
    let stem = image
        .file_stem()
        .ok_or_else(|| format_err!("'{}' has no file name", image.display()))?;
    let mut file_name = stem.to_os_string();
    file_name.push(".txt");
    Ok(labels_dir.join(file_name))
}

/// Read the image dimensions from the file header.
pub fn image_size(image: &Path) -> Result<Size<R64>> {
    let imagesize::ImageSize { width, height } = imagesize::size(image)
        .with_context(|| format!("failed to read image header of '{}'", image.display()))?;
    ensure!(
        width > 0 && height > 0,
        "'{}' has zero size",
        image.display()
    );
    Size::try_from_wh([r64(width as f64), r64(height as f64)])
}

/// Infer the occupancy of every image.
pub async fn run_occupancy_batch(
    detector: Arc<dyn Detector>,
    analyzer: Arc<OccupancyAnalyzer>,
    images: Vec<PathBuf>,
    config: &BatchConfig,
) -> DatasetReport<OccupancyResult> {
    run_batch(images, config, move |image| {
        if let Err(err) = image_size(image) {
            return ImageOutcome::Skipped(SkipReason::UnreadableImage(format!("{:#}", err)));
        }
        let detections = match detector.detect(image) {
            Ok(detections) => detections,
            Err(err) => {
                return ImageOutcome::Skipped(SkipReason::DetectorFailed(format!("{:#}", err)))
            }
        };
        ImageOutcome::Processed(analyzer.analyze(detections))
    })
    .await
}

/// Score the detections of every image against its label file in `labels_dir`.
pub async fn run_evaluation_batch(
    detector: Arc<dyn Detector>,
    evaluator: Arc<Evaluator>,
    images: Vec<PathBuf>,
    labels_dir: PathBuf,
    config: &BatchConfig,
) -> DatasetReport<EvaluationResult> {
    run_batch(images, config, move |image| {
        let size = match image_size(image) {
            Ok(size) => size,
            Err(err) => {
                return ImageOutcome::Skipped(SkipReason::UnreadableImage(format!("{:#}", err)))
            }
        };

        let label_path = match label_path_for(image, &labels_dir) {
            Ok(path) if path.is_file() => path,
            _ => return ImageOutcome::Skipped(SkipReason::MissingAnnotation),
        };
        let annotations = match load_label_file(&label_path) {
            Ok(annotations) => annotations,
            Err(err) => {
                return ImageOutcome::Skipped(SkipReason::BadAnnotation(format!("{:#}", err)))
            }
        };

        let detections = match detector.detect(image) {
            Ok(detections) => detections,
            Err(err) => {
                return ImageOutcome::Skipped(SkipReason::DetectorFailed(format!("{:#}", err)))
            }
        };
        ImageOutcome::Processed(evaluator.evaluate(detections, &annotations, &size))
    })
    .await
}

/// Run `process` on every image on the blocking pool, at most `num_workers` at once.
///
/// A timed out image is reported as skipped. Its blocking task is detached and runs to
/// completion in the background.
async fn run_batch<T, F>(
    images: Vec<PathBuf>,
    config: &BatchConfig,
    process: F,
) -> DatasetReport<T>
where
    T: Summarize + Send + 'static,
    F: Fn(&Path) -> ImageOutcome<T> + Send + Sync + 'static,
{
    let process = Arc::new(process);
    let timeout = config.image_timeout();
    let num_workers = config.num_workers();
    let num_images = images.len();

    info!("processing {} images with {} workers", num_images, num_workers);

    let outcomes: Vec<_> = stream::iter(images.into_iter().enumerate())
        .map(|(index, image)| {
            let process = process.clone();

            async move {
                let task = tokio::task::spawn_blocking({
                    let image = image.clone();
                    move || process(&image)
                });

                let outcome = match tokio::time::timeout(timeout, task).await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(err)) => {
                        ImageOutcome::Skipped(SkipReason::WorkerFailed(err.to_string()))
                    }
                    Err(_) => ImageOutcome::Skipped(SkipReason::Timeout),
                };

                if let ImageOutcome::Skipped(reason) = &outcome {
                    warn!("skip image '{}': {:?}", image.display(), reason);
                }
                (index, image, outcome)
            }
        })
        .buffer_unordered(num_workers)
        .collect()
        .await;

    let report = DatasetReport::build(outcomes);
    info!(
        "processed {} images, skipped {}",
        report.entries.len(),
        report.num_skipped()
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, detection::Detection};

    // a 10x10 grayscale PNG
    const PNG_10X10: &[u8] = &[
        0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44,
        0x52, 0x00, 0x00, 0x00, 0x0a, 0x00, 0x00, 0x00, 0x0a, 0x08, 0x00, 0x00, 0x00, 0x00, 0xa8,
        0x59, 0x90, 0x61, 0x00, 0x00, 0x00, 0x0c, 0x49, 0x44, 0x41, 0x54, 0x78, 0xda, 0x63, 0x60,
        0xa0, 0x27, 0x00, 0x00, 0x00, 0x6e, 0x00, 0x01, 0x76, 0xa0, 0xa9, 0xcf, 0x00, 0x00, 0x00,
        0x00, 0x49, 0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
    ];

    /// Detects one chair and one nearby person, fails on images named `broken*`
    /// and stalls on images named `slow*`.
    struct FakeDetector;

    impl Detector for FakeDetector {
        fn detect(&self, image: &Path) -> Result<Vec<Detection>> {
            let name = image.file_stem().unwrap().to_string_lossy();
            if name.starts_with("broken") {
                bail!("model crashed");
            }
            if name.starts_with("slow") {
                std::thread::sleep(Duration::from_millis(1500));
            }
            let detection = |class_id, x: f64| Detection {
                bbox: XYXY::from_xyxy([r64(x), r64(0.0), r64(x + 10.0), r64(10.0)]),
                class_id,
                confidence: r64(0.9),
                keypoints: None,
            };
            Ok(vec![detection(56, 0.0), detection(0, 5.0)])
        }
    }

    fn config() -> Config {
        Config::from_json5(
            r#"{
                version: "0.1.0",
                classes: { roles: { chair: 56, person: 0, occupied_seat: 1 } },
                occupancy: { type: "matched_proximity", require_sitting: false },
                evaluation: { predicted_role: "chair" },
                batch: { num_workers: 2, image_timeout_secs: 1 },
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn list_images_filters_and_sorts() -> Result<()> {
        let dir = tempfile::tempdir()?;
        for name in ["b.JPG", "a.png", "notes.txt", "c.jpeg.bak"] {
            fs::write(dir.path().join(name), b"")?;
        }
        fs::create_dir(dir.path().join("d.jpg"))?;

        let images = list_images(dir.path(), &config().batch.image_extensions)?;
        let names: Vec<_> = images
            .iter()
            .map(|path| path.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.png", "b.JPG"]);
        Ok(())
    }

    #[test]
    fn label_path() -> Result<()> {
        let path = label_path_for(Path::new("images/hall.v2.jpg"), Path::new("labels"))?;
        assert_eq!(path, Path::new("labels/hall.v2.txt"));
        Ok(())
    }

    #[test]
    fn read_image_size() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pixel.png");
        fs::write(&path, PNG_10X10)?;
        let size = image_size(&path)?;
        assert_eq!(size.w(), r64(10.0));
        assert_eq!(size.h(), r64(10.0));

        fs::write(&path, b"not an image")?;
        assert!(image_size(&path).is_err());
        Ok(())
    }

    #[tokio::test]
    async fn occupancy_batch_skips_failures() -> Result<()> {
        let dir = tempfile::tempdir()?;
        for name in ["a.png", "broken.png", "c.png", "slow.png"] {
            fs::write(dir.path().join(name), PNG_10X10)?;
        }
        fs::write(dir.path().join("b.png"), b"garbage")?;

        let config = config();
        let analyzer = OccupancyAnalyzer::new(&config, config.class_roles()?)?;
        let images = list_images(dir.path(), &config.batch.image_extensions)?;
        let report = run_occupancy_batch(
            Arc::new(FakeDetector),
            Arc::new(analyzer),
            images,
            &config.batch,
        )
        .await;

        let processed: Vec<_> = report.entries.iter().map(|entry| entry.index).collect();
        assert_eq!(processed, vec![0, 3]);
        assert_eq!(report.summary.images, 2);
        assert_eq!(report.summary.occupied_seats, 2);

        let reasons: Vec<_> = report.skipped.iter().map(|skip| &skip.reason).collect();
        assert!(matches!(reasons[0], SkipReason::UnreadableImage(_)));
        assert!(matches!(reasons[1], SkipReason::DetectorFailed(_)));
        assert_eq!(reasons[2], &SkipReason::Timeout);
        Ok(())
    }

    #[tokio::test]
    async fn evaluation_batch_reads_labels() -> Result<()> {
        let images_dir = tempfile::tempdir()?;
        let labels_dir = tempfile::tempdir()?;
        for name in ["a.png", "b.png", "c.png"] {
            fs::write(images_dir.path().join(name), PNG_10X10)?;
        }
        // the chair box (0, 0, 10, 10) covers the whole image
        fs::write(labels_dir.path().join("a.txt"), "0 0.5 0.5 1 1\n1 0.5 0.5 1 1\n")?;
        // pixel coordinates instead of normalized ones
        fs::write(labels_dir.path().join("b.txt"), "0 5 5 10 10\n")?;

        let config = config();
        let evaluator = Evaluator::new(&config, config.class_roles()?)?;
        let images = list_images(images_dir.path(), &config.batch.image_extensions)?;
        let report = run_evaluation_batch(
            Arc::new(FakeDetector),
            Arc::new(evaluator),
            images,
            labels_dir.path().to_owned(),
            &config.batch,
        )
        .await;

        assert_eq!(report.entries.len(), 1);
        let result = &report.entries[0].result;
        assert_eq!(result.true_positives, 1);
        assert_eq!(result.gt_empty, 1);
        assert_eq!(result.precision, 1.0);

        let reasons: Vec<_> = report.skipped.iter().map(|skip| &skip.reason).collect();
        assert!(matches!(reasons[0], SkipReason::BadAnnotation(_)));
        assert_eq!(reasons[1], &SkipReason::MissingAnnotation);
        Ok(())
    }
}
