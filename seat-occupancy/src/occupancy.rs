//! Seat occupancy policies and per-image aggregation.

use crate::{
    common::*,
    config::Config,
    detection::{ClassRoles, Detection, DetectionRecords, Role},
    matching::{MatchStrategy, ProximityMatcher},
    pose::PoseClassifier,
};

/// How occupied seats are counted from the detections of one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OccupancyPolicy {
    /// A chair is occupied when a person is close enough to it.
    MatchedProximity {
        /// Only people classified as sitting can occupy a chair.
        #[serde(default = "default_require_sitting")]
        require_sitting: bool,
        #[serde(default)]
        matching: MatchStrategy,
    },
    /// Every detected person counts as an occupied seat.
    ///
    /// The occupied count may exceed the number of seats.
    NaiveCount,
    /// The detector reports occupied and empty seats directly.
    DirectLabel,
}

fn default_require_sitting() -> bool {
    true
}

impl Default for OccupancyPolicy {
    fn default() -> Self {
        Self::MatchedProximity {
            require_sitting: default_require_sitting(),
            matching: MatchStrategy::default(),
        }
    }
}

impl OccupancyPolicy {
    /// Roles that must be bound to a class for this policy.
    pub fn required_roles(&self) -> &'static [Role] {
        match self {
            Self::MatchedProximity { .. } | Self::NaiveCount => &[Role::Chair, Role::Person],
            Self::DirectLabel => &[Role::OccupiedSeat, Role::EmptySeat],
        }
    }
}

/// People found in an image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeopleCount {
    pub total: usize,
    pub sitting: usize,
    pub standing: usize,
}

/// Occupancy judgment of one image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OccupancyResult {
    pub total_seats: usize,
    pub occupied_seats: usize,
    pub free_seats: usize,
    pub occupancy_rate: f64,
    pub people: PeopleCount,
}

impl OccupancyResult {
    /// Build a result where `occupied_seats <= total_seats`.
    pub fn from_seat_counts(
        total_seats: usize,
        occupied_seats: usize,
        people: PeopleCount,
    ) -> Self {
        debug_assert!(occupied_seats <= total_seats);
        let occupied_seats = occupied_seats.min(total_seats);

        Self {
            total_seats,
            occupied_seats,
            free_seats: total_seats - occupied_seats,
            occupancy_rate: ratio(occupied_seats, total_seats),
            people,
        }
    }

    /// Count every person as an occupied seat, without clamping to the seat count.
    pub fn from_people_count(total_seats: usize, people: PeopleCount) -> Self {
        let occupied_seats = people.total;

        Self {
            total_seats,
            occupied_seats,
            free_seats: total_seats.saturating_sub(occupied_seats),
            occupancy_rate: ratio(occupied_seats, total_seats),
            people,
        }
    }
}

fn ratio(num: usize, denom: usize) -> f64 {
    if denom == 0 {
        0.0
    } else {
        num as f64 / denom as f64
    }
}

/// Per-image occupancy inference under a configured policy.
#[derive(Debug, Clone)]
pub struct OccupancyAnalyzer {
    policy: OccupancyPolicy,
    distance_threshold: R64,
    pose: PoseClassifier,
    roles: ClassRoles,
}

impl OccupancyAnalyzer {
    /// Fails when a role required by the configured policy has no class.
    pub fn new(config: &Config, roles: ClassRoles) -> Result<Self> {
        roles
            .ensure_roles(config.occupancy.required_roles())
            .with_context(|| format!("invalid class roles for {:?}", config.occupancy))?;

        Ok(Self {
            policy: config.occupancy.clone(),
            distance_threshold: config.thresholds.distance_threshold_px,
            pose: PoseClassifier::from_config(config),
            roles,
        })
    }

    pub fn policy(&self) -> &OccupancyPolicy {
        &self.policy
    }

    pub fn analyze(&self, detections: impl IntoIterator<Item = Detection>) -> OccupancyResult {
        let records = DetectionRecords::from_detections(detections, &self.roles);
        self.analyze_records(&records)
    }

    pub fn analyze_records(&self, records: &DetectionRecords) -> OccupancyResult {
        let (sitting, standing) = self.pose.classify(&records.people);
        let people = PeopleCount {
            total: records.people.len(),
            sitting: sitting.len(),
            standing: standing.len(),
        };

        match self.policy {
            OccupancyPolicy::MatchedProximity {
                require_sitting,
                matching,
            } => {
                let matcher = ProximityMatcher::new(self.distance_threshold, matching);
                let chairs: Vec<_> = records.chairs.iter().map(|chair| chair.bbox).collect();
                let candidates: Vec<_> = if require_sitting {
                    sitting.iter().map(|person| person.bbox).collect()
                } else {
                    records.people.iter().map(|person| person.bbox).collect()
                };
                let occupied = matcher.occupied_chairs(&chairs, &candidates);
                OccupancyResult::from_seat_counts(chairs.len(), occupied.len(), people)
            }
            OccupancyPolicy::NaiveCount => {
                OccupancyResult::from_people_count(records.chairs.len(), people)
            }
            OccupancyPolicy::DirectLabel => {
                let occupied = records.occupied_seats.len();
                let total = occupied + records.empty_seats.len();
                OccupancyResult::from_seat_counts(total, occupied, people)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Keypoint;
    use approx::assert_abs_diff_eq;

    const CHAIR: usize = 56;
    const PERSON: usize = 0;
    const OCCUPIED: usize = 1;
    const EMPTY: usize = 2;

    fn detection(
        class_id: usize,
        xyxy: [f64; 4],
        keypoints: Option<Vec<Keypoint>>,
    ) -> Detection {
        let [x1, y1, x2, y2] = xyxy;
        Detection {
            bbox: XYXY::from_xyxy([r64(x1), r64(y1), r64(x2), r64(y2)]),
            class_id,
            confidence: r64(0.9),
            keypoints,
        }
    }

    fn sitting_pose() -> Vec<Keypoint> {
        let mut keypoints = vec![
            Keypoint {
                x: r64(0.0),
                y: r64(0.0),
                visibility: r64(0.0),
            };
            25
        ];
        let visible = |y| Keypoint {
            x: r64(10.0),
            y: r64(y),
            visibility: r64(0.9),
        };
        keypoints[0] = visible(5.0);
        keypoints[23] = visible(12.0);
        keypoints[24] = visible(12.0);
        keypoints
    }

    fn analyzer(policy: &str) -> OccupancyAnalyzer {
        let text = format!(
            r#"{{
                version: "0.1.0",
                classes: {{ roles: {{ chair: {}, person: {}, occupied_seat: {}, empty_seat: {} }} }},
                occupancy: {},
            }}"#,
            CHAIR, PERSON, OCCUPIED, EMPTY, policy
        );
        let config = Config::from_json5(&text).unwrap();
        let roles = config.class_roles().unwrap();
        OccupancyAnalyzer::new(&config, roles).unwrap()
    }

    fn check_invariants(result: &OccupancyResult) {
        assert_eq!(result.occupied_seats + result.free_seats, result.total_seats);
        assert!((0.0..=1.0).contains(&result.occupancy_rate));
    }

    #[test]
    fn scenario_single_chair_nearby_person() {
        let analyzer = analyzer(r#"{ type: "matched_proximity", require_sitting: false }"#);
        let result = analyzer.analyze(vec![
            detection(CHAIR, [0.0, 0.0, 10.0, 10.0], None),
            detection(PERSON, [5.0, 5.0, 15.0, 15.0], None),
        ]);

        assert_eq!(result.total_seats, 1);
        assert_eq!(result.occupied_seats, 1);
        assert_eq!(result.free_seats, 0);
        assert_abs_diff_eq!(result.occupancy_rate, 1.0);
        check_invariants(&result);
    }

    #[test]
    fn scenario_far_chair_stays_free() {
        let analyzer = analyzer(r#"{ type: "matched_proximity", require_sitting: false }"#);
        let result = analyzer.analyze(vec![
            detection(CHAIR, [0.0, 0.0, 10.0, 10.0], None),
            detection(CHAIR, [1000.0, 1000.0, 1010.0, 1010.0], None),
            detection(PERSON, [5.0, 5.0, 15.0, 15.0], None),
        ]);

        assert_eq!(result.occupied_seats, 1);
        assert_eq!(result.free_seats, 1);
        assert_abs_diff_eq!(result.occupancy_rate, 0.5);
        check_invariants(&result);
    }

    #[test]
    fn standing_people_do_not_occupy_chairs() {
        let analyzer = analyzer(r#"{ type: "matched_proximity" }"#);
        let standing = analyzer.analyze(vec![
            detection(CHAIR, [0.0, 0.0, 10.0, 10.0], None),
            detection(PERSON, [5.0, 5.0, 15.0, 15.0], None),
        ]);
        assert_eq!(standing.occupied_seats, 0);
        assert_eq!(standing.people.standing, 1);

        let sitting = analyzer.analyze(vec![
            detection(CHAIR, [0.0, 0.0, 10.0, 10.0], None),
            detection(PERSON, [5.0, 5.0, 15.0, 15.0], Some(sitting_pose())),
        ]);
        assert_eq!(sitting.occupied_seats, 1);
        assert_eq!(
            sitting.people,
            PeopleCount {
                total: 1,
                sitting: 1,
                standing: 0
            }
        );
    }

    #[test]
    fn bipartite_policy_counts_one_chair_per_person() {
        let greedy = analyzer(r#"{ type: "matched_proximity", require_sitting: false }"#);
        let bipartite = analyzer(
            r#"{ type: "matched_proximity", require_sitting: false, matching: "maximum_bipartite" }"#,
        );
        let detections = vec![
            detection(CHAIR, [0.0, 0.0, 10.0, 10.0], None),
            detection(CHAIR, [20.0, 0.0, 30.0, 10.0], None),
            detection(PERSON, [10.0, 0.0, 20.0, 10.0], None),
        ];

        assert_eq!(greedy.analyze(detections.clone()).occupied_seats, 2);
        assert_eq!(bipartite.analyze(detections).occupied_seats, 1);
    }

    #[test]
    fn scenario_naive_count_exceeds_seats() {
        let analyzer = analyzer(r#"{ type: "naive_count" }"#);
        let row = |class_id: usize, count: usize, y: f64| {
            (0..count).map(move |i| {
                let x = i as f64 * 100.0;
                detection(class_id, [x, y, x + 10.0, y + 10.0], None)
            })
        };
        let result = analyzer.analyze(row(CHAIR, 3, 0.0).chain(row(PERSON, 5, 500.0)));

        assert_eq!(result.total_seats, 3);
        assert_eq!(result.occupied_seats, 5);
        assert_eq!(result.free_seats, 0);
        assert_abs_diff_eq!(result.occupancy_rate, 5.0 / 3.0);
    }

    #[test]
    fn direct_label_counts() {
        let analyzer = analyzer(r#"{ type: "direct_label" }"#);
        let result = analyzer.analyze(vec![
            detection(OCCUPIED, [0.0, 0.0, 10.0, 10.0], None),
            detection(EMPTY, [20.0, 0.0, 30.0, 10.0], None),
            detection(EMPTY, [40.0, 0.0, 50.0, 10.0], None),
            detection(CHAIR, [60.0, 0.0, 70.0, 10.0], None),
        ]);

        assert_eq!(result.total_seats, 3);
        assert_eq!(result.occupied_seats, 1);
        assert_eq!(result.free_seats, 2);
        check_invariants(&result);
    }

    #[test]
    fn no_seats_has_zero_rate() {
        for policy in [
            r#"{ type: "matched_proximity" }"#,
            r#"{ type: "naive_count" }"#,
            r#"{ type: "direct_label" }"#,
        ] {
            let result = analyzer(policy).analyze(vec![]);
            assert_eq!(result.total_seats, 0);
            assert_eq!(result.occupancy_rate, 0.0);
        }
    }

    #[test]
    fn missing_roles_are_rejected() {
        let config = Config::from_json5(
            r#"{ version: "0.1.0", classes: { roles: { chair: 56, person: 0 } },
                 occupancy: { type: "direct_label" } }"#,
        )
        .unwrap();
        let roles = config.class_roles().unwrap();
        assert!(OccupancyAnalyzer::new(&config, roles).is_err());
    }
}
