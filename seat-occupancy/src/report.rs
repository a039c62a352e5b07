//! Dataset-level reports folded from per-image results.

use crate::{common::*, evaluation::EvaluationResult, occupancy::OccupancyResult};

/// Why an image was left out of a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum SkipReason {
    UnreadableImage(String),
    DetectorFailed(String),
    MissingAnnotation,
    BadAnnotation(String),
    Timeout,
    WorkerFailed(String),
}

/// The result of one processed image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageEntry<T> {
    /// Position of the image in the input list.
    pub index: usize,
    pub image: PathBuf,
    pub result: T,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedImage {
    pub index: usize,
    pub image: PathBuf,
    pub reason: SkipReason,
}

/// What happened to one image of a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageOutcome<T> {
    Processed(T),
    Skipped(SkipReason),
}

/// Per-image results that fold into a dataset summary.
pub trait Summarize: Sized {
    type Summary: Serialize;

    fn summarize(entries: &[ImageEntry<Self>]) -> Self::Summary;
}

/// A completed batch run.
#[derive(Debug, Clone, Serialize)]
#[serde(bound = "T: Serialize")]
pub struct DatasetReport<T>
where
    T: Summarize,
{
    pub entries: Vec<ImageEntry<T>>,
    pub skipped: Vec<SkippedImage>,
    pub summary: T::Summary,
}

impl<T> DatasetReport<T>
where
    T: Summarize,
{
    /// Fold `(index, image, outcome)` triples given in any order.
    pub fn build(outcomes: impl IntoIterator<Item = (usize, PathBuf, ImageOutcome<T>)>) -> Self {
        let mut entries = vec![];
        let mut skipped = vec![];

        for (index, image, outcome) in outcomes {
            match outcome {
                ImageOutcome::Processed(result) => entries.push(ImageEntry {
                    index,
                    image,
                    result,
                }),
                ImageOutcome::Skipped(reason) => skipped.push(SkippedImage {
                    index,
                    image,
                    reason,
                }),
            }
        }

        entries.sort_by_key(|entry| entry.index);
        skipped.sort_by_key(|skipped| skipped.index);
        let summary = T::summarize(&entries);

        Self {
            entries,
            skipped,
            summary,
        }
    }

    pub fn num_skipped(&self) -> usize {
        self.skipped.len()
    }
}

fn mean(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OccupancySummary {
    pub images: usize,
    pub total_seats: usize,
    pub occupied_seats: usize,
    pub free_seats: usize,
    pub total_people: usize,
    pub mean_occupancy_rate: f64,
}

impl Summarize for OccupancyResult {
    type Summary = OccupancySummary;

    fn summarize(entries: &[ImageEntry<Self>]) -> Self::Summary {
        let results = || entries.iter().map(|entry| &entry.result);

        OccupancySummary {
            images: entries.len(),
            total_seats: results().map(|result| result.total_seats).sum(),
            occupied_seats: results().map(|result| result.occupied_seats).sum(),
            free_seats: results().map(|result| result.free_seats).sum(),
            total_people: results().map(|result| result.people.total).sum(),
            mean_occupancy_rate: mean(results().map(|result| result.occupancy_rate)),
        }
    }
}

/// Dataset scores. The means are over per-image metrics, not a pooled confusion matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub images: usize,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub mean_precision: f64,
    pub mean_recall: f64,
    pub mean_f1: f64,
}

impl Summarize for EvaluationResult {
    type Summary = EvaluationSummary;

    fn summarize(entries: &[ImageEntry<Self>]) -> Self::Summary {
        let results = || entries.iter().map(|entry| &entry.result);

        EvaluationSummary {
            images: entries.len(),
            true_positives: results().map(|result| result.true_positives).sum(),
            false_positives: results().map(|result| result.false_positives).sum(),
            false_negatives: results().map(|result| result.false_negatives).sum(),
            mean_precision: mean(results().map(|result| result.precision)),
            mean_recall: mean(results().map(|result| result.recall)),
            mean_f1: mean(results().map(|result| result.f1)),
        }
    }
}
