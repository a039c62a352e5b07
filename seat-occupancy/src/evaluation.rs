//! Scoring of predicted seats against ground-truth annotations.

use crate::{
    common::*,
    config::{AnnotationClasses, Config},
    detection::{ClassRoles, Detection, DetectionRecords, Role},
    matching::MatchStrategy,
};

/// Precision, recall and F1 derived from match counts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl Metrics {
    /// Each metric is zero when its denominator is zero.
    pub fn from_counts(
        true_positives: usize,
        false_positives: usize,
        false_negatives: usize,
    ) -> Self {
        let ratio = |num: f64, denom: f64| if denom > 0.0 { num / denom } else { 0.0 };

        let tp = true_positives as f64;
        let precision = ratio(tp, tp + false_positives as f64);
        let recall = ratio(tp, tp + false_negatives as f64);
        let f1 = ratio(2.0 * precision * recall, precision + recall);

        Self {
            precision,
            recall,
            f1,
        }
    }
}

/// Match counts between predictions and ground truth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchCounts {
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
}

/// Count matches of predicted boxes against ground-truth boxes.
///
/// A prediction matches a ground-truth box when their IoU strictly exceeds
/// `iou_threshold`. Under greedy matching one ground-truth box can match several
/// predictions, in which case the false negative count saturates at zero.
pub fn match_boxes<P, G>(
    predicted: &[P],
    ground_truth: &[G],
    iou_threshold: R64,
    strategy: MatchStrategy,
) -> MatchCounts
where
    P: Rect<Type = R64>,
    G: Rect<Type = R64>,
{
    let true_positives = strategy
        .match_pairs(predicted.len(), ground_truth.len(), |pred, gt| {
            predicted[pred].iou_with(&ground_truth[gt]) > iou_threshold
        })
        .into_iter()
        .flatten()
        .count();

    MatchCounts {
        true_positives,
        false_positives: predicted.len() - true_positives,
        false_negatives: ground_truth.len().saturating_sub(true_positives),
    }
}

/// Evaluation of one image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Ground-truth occupied seats.
    pub gt_occupied: usize,
    /// Ground-truth empty seats.
    pub gt_empty: usize,
    /// Predicted occupied seats.
    pub predicted: usize,
}

impl EvaluationResult {
    pub fn new(counts: MatchCounts, gt_occupied: usize, gt_empty: usize, predicted: usize) -> Self {
        let MatchCounts {
            true_positives,
            false_positives,
            false_negatives,
        } = counts;
        let Metrics {
            precision,
            recall,
            f1,
        } = Metrics::from_counts(true_positives, false_positives, false_negatives);

        Self {
            true_positives,
            false_positives,
            false_negatives,
            precision,
            recall,
            f1,
            gt_occupied,
            gt_empty,
            predicted,
        }
    }
}

/// Scores the detections of one image against its label file.
#[derive(Debug, Clone)]
pub struct Evaluator {
    predicted_role: Role,
    annotation_classes: AnnotationClasses,
    iou_threshold: R64,
    strategy: MatchStrategy,
    roles: ClassRoles,
}

impl Evaluator {
    pub fn new(config: &Config, roles: ClassRoles) -> Result<Self> {
        let evaluation = &config.evaluation;
        roles.ensure_roles(&[evaluation.predicted_role])?;

        Ok(Self {
            predicted_role: evaluation.predicted_role,
            annotation_classes: evaluation.annotation_classes,
            iou_threshold: config.thresholds.iou_threshold,
            strategy: evaluation.matching,
            roles,
        })
    }

    pub fn evaluate(
        &self,
        detections: impl IntoIterator<Item = Detection>,
        annotations: &[Annotation],
        image_size: &Size<R64>,
    ) -> EvaluationResult {
        let records = DetectionRecords::from_detections(detections, &self.roles);
        let predicted: Vec<_> = records
            .with_role(self.predicted_role)
            .iter()
            .map(|detection| detection.bbox)
            .collect();

        let AnnotationClasses { occupied, empty } = self.annotation_classes;
        let gt_occupied: Vec<_> = annotations
            .iter()
            .filter(|annotation| annotation.class == occupied)
            .map(|annotation| annotation.to_pixel(image_size).rect)
            .collect();
        let gt_empty = annotations
            .iter()
            .filter(|annotation| annotation.class == empty)
            .count();

        let counts = match_boxes(&predicted, &gt_occupied, self.iou_threshold, self.strategy);
        EvaluationResult::new(counts, gt_occupied.len(), gt_empty, predicted.len())
    }
}
