//! Sitting/standing classification from pose keypoints.
//!
//! The rule is a single-frame heuristic: a person counts as sitting when a usable hip
//! keypoint lies below a usable nose keypoint. It is sensitive to camera angle and
//! produces false negatives on occluded poses.

use crate::{
    common::*,
    config::Config,
    detection::{Detection, Keypoint},
};

/// Keypoint sets shorter than this are never classified as sitting.
pub const MIN_KEYPOINTS: usize = 25;

/// Positions of the keypoints the classifier reads, in the pose model's layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeypointLayout {
    pub nose: usize,
    pub left_hip: usize,
    pub right_hip: usize,
}

impl KeypointLayout {
    /// Keypoint sets shorter than this are rejected as insufficient evidence.
    pub fn min_keypoints(&self) -> usize {
        let highest = self.nose.max(self.left_hip).max(self.right_hip);
        MIN_KEYPOINTS.max(highest + 1)
    }
}

impl Default for KeypointLayout {
    fn default() -> Self {
        Self {
            nose: 0,
            left_hip: 23,
            right_hip: 24,
        }
    }
}

/// Decide whether a person is sitting.
pub fn is_sitting(
    keypoints: Option<&[Keypoint]>,
    layout: &KeypointLayout,
    visibility_threshold: R64,
) -> bool {
    let keypoints = match keypoints {
        Some(keypoints) if keypoints.len() >= layout.min_keypoints() => keypoints,
        _ => return false,
    };
    let usable = |index: usize| {
        let keypoint = keypoints[index];
        (keypoint.visibility > visibility_threshold).then(|| keypoint)
    };

    let nose = usable(layout.nose);
    let hips = [usable(layout.left_hip), usable(layout.right_hip)];

    if hips.iter().all(Option::is_none) {
        return false;
    }

    // y grows downward
    match nose {
        Some(nose) => hips.iter().flatten().any(|hip| hip.y > nose.y),
        None => false,
    }
}

#[derive(Debug, Clone)]
pub struct PoseClassifier {
    layout: KeypointLayout,
    visibility_threshold: R64,
}

impl PoseClassifier {
    pub fn new(layout: KeypointLayout, visibility_threshold: R64) -> Self {
        Self {
            layout,
            visibility_threshold,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.keypoints,
            config.thresholds.keypoint_visibility_threshold,
        )
    }

    pub fn is_sitting(&self, person: &Detection) -> bool {
        is_sitting(
            person.keypoints.as_deref(),
            &self.layout,
            self.visibility_threshold,
        )
    }

    /// Split people into `(sitting, standing)`, each in input order.
    pub fn classify<'a>(
        &self,
        people: &'a [Detection],
    ) -> (Vec<&'a Detection>, Vec<&'a Detection>) {
        people.iter().partition(|person| self.is_sitting(person))
    }
}
