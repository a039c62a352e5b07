//! Detection records and the detector boundary.

use crate::common::*;

pub use class_roles::*;
pub use detector::*;
pub use record::*;

mod class_roles {
    use super::*;

    /// The semantic role a detector class plays in occupancy analysis.
    #[derive(
        Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
    )]
    #[serde(rename_all = "snake_case")]
    pub enum Role {
        Chair,
        Person,
        OccupiedSeat,
        EmptySeat,
    }

    /// Resolved class id to role table.
    #[derive(Debug, Clone, PartialEq, Eq, Default)]
    pub struct ClassRoles {
        roles: HashMap<usize, Role>,
    }

    impl ClassRoles {
        /// Build the table, rejecting a class id bound to more than one role.
        pub fn new(bindings: impl IntoIterator<Item = (usize, Role)>) -> Result<Self> {
            let mut roles = HashMap::new();

            for (class_id, role) in bindings {
                if let Some(prev) = roles.insert(class_id, role) {
                    ensure!(
                        prev == role,
                        "class {} is bound to both {:?} and {:?}",
                        class_id,
                        prev,
                        role
                    );
                }
            }

            Ok(Self { roles })
        }

        pub fn role_of(&self, class_id: usize) -> Option<Role> {
            self.roles.get(&class_id).copied()
        }

        pub fn contains_role(&self, role: Role) -> bool {
            self.roles.values().any(|&bound| bound == role)
        }

        pub fn ensure_roles(&self, required: &[Role]) -> Result<()> {
            let missing: Vec<_> = required
                .iter()
                .filter(|&&role| !self.contains_role(role))
                .collect();
            ensure!(
                missing.is_empty(),
                "no class is bound to the required roles {:?}",
                missing
            );
            Ok(())
        }
    }
}

mod record {
    use super::*;

    /// A pose keypoint in pixel units with its visibility score.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Keypoint {
        pub x: R64,
        pub y: R64,
        pub visibility: R64,
    }

    /// One detected object.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Detection {
        pub bbox: XYXY<R64>,
        pub class_id: usize,
        pub confidence: R64,
        pub keypoints: Option<Vec<Keypoint>>,
    }

    /// The serialized detector output for one object.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct RawDetection {
        /// Box corners `[x1, y1, x2, y2]` in pixels.
        pub bbox: [f64; 4],
        pub class_id: usize,
        pub confidence: f64,
        /// Keypoints as `[x, y, visibility]` triples.
        #[serde(default)]
        pub keypoints: Option<Vec<[f64; 3]>>,
    }

    impl TryFrom<RawDetection> for Detection {
        type Error = Error;

        fn try_from(from: RawDetection) -> Result<Self> {
            let RawDetection {
                bbox,
                class_id,
                confidence,
                keypoints,
            } = from;

            let finite = |value: f64| {
                R64::try_new(value).ok_or_else(|| format_err!("non-finite value {}", value))
            };

            let [x1, y1, x2, y2] = bbox;
            let bbox = XYXY::try_from_xyxy([finite(x1)?, finite(y1)?, finite(x2)?, finite(y2)?])?;
            let confidence = finite(confidence)?;
            ensure!(
                (0.0..=1.0).contains(&confidence.raw()),
                "confidence {} is out of [0, 1]",
                confidence
            );
            let keypoints = keypoints
                .map(|keypoints| {
                    keypoints
                        .into_iter()
                        .map(|[x, y, visibility]| -> Result<_> {
                            Ok(Keypoint {
                                x: finite(x)?,
                                y: finite(y)?,
                                visibility: finite(visibility)?,
                            })
                        })
                        .try_collect::<_, Vec<_>, _>()
                })
                .transpose()?;

            Ok(Self {
                bbox,
                class_id,
                confidence,
                keypoints,
            })
        }
    }

    /// Detections of one image grouped by role, each group in detector output order.
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct DetectionRecords {
        pub chairs: Vec<Detection>,
        pub people: Vec<Detection>,
        pub occupied_seats: Vec<Detection>,
        pub empty_seats: Vec<Detection>,
    }

    impl DetectionRecords {
        /// Keep detections whose class is bound to a role. Others are dropped.
        pub fn from_detections(
            detections: impl IntoIterator<Item = Detection>,
            roles: &ClassRoles,
        ) -> Self {
            let mut records = Self::default();

            for detection in detections {
                match roles.role_of(detection.class_id) {
                    Some(Role::Chair) => records.chairs.push(detection),
                    Some(Role::Person) => records.people.push(detection),
                    Some(Role::OccupiedSeat) => records.occupied_seats.push(detection),
                    Some(Role::EmptySeat) => records.empty_seats.push(detection),
                    None => {}
                }
            }

            records
        }

        pub fn with_role(&self, role: Role) -> &[Detection] {
            match role {
                Role::Chair => &self.chairs,
                Role::Person => &self.people,
                Role::OccupiedSeat => &self.occupied_seats,
                Role::EmptySeat => &self.empty_seats,
            }
        }
    }
}

mod detector {
    use super::*;

    /// An object detector run on one image file.
    ///
    /// Implementations own their model. A handle is constructed once by the caller
    /// and shared across images.
    pub trait Detector: Send + Sync {
        fn detect(&self, image: &Path) -> Result<Vec<Detection>>;
    }

    impl<D> Detector for Arc<D>
    where
        D: Detector + ?Sized,
    {
        fn detect(&self, image: &Path) -> Result<Vec<Detection>> {
            (**self).detect(image)
        }
    }

    /// Run the detector and treat any failure as an image without detections.
    pub fn detect_or_empty(detector: &dyn Detector, image: &Path) -> Vec<Detection> {
        detector.detect(image).unwrap_or_else(|err| {
            warn!("detection failed on '{}': {:#}", image.display(), err);
            vec![]
        })
    }

    /// Replays detections computed ahead of time.
    ///
    /// For `hall/img_01.jpg`, detections are read from `<detections_dir>/img_01.json`,
    /// a JSON array of [`RawDetection`].
    #[derive(Debug, Clone)]
    pub struct ReplayDetector {
        detections_dir: PathBuf,
    }

    impl ReplayDetector {
        pub fn new(detections_dir: impl AsRef<Path>) -> Result<Self> {
            let detections_dir = detections_dir.as_ref();
            ensure!(
                detections_dir.is_dir(),
                "'{}' is not a directory",
                detections_dir.display()
            );
            Ok(Self {
                detections_dir: detections_dir.to_owned(),
            })
        }

        pub fn detections_file(&self, image: &Path) -> Result<PathBuf> {
            let stem = image
                .file_stem()
                .ok_or_else(|| format_err!("'{}' has no file name", image.display()))?;
            let mut file_name = stem.to_os_string();
            file_name.push(".json");
            Ok(self.detections_dir.join(file_name))
        }
    }

    impl Detector for ReplayDetector {
        fn detect(&self, image: &Path) -> Result<Vec<Detection>> {
            let path = self.detections_file(image)?;
            let text = fs::read_to_string(&path)
                .with_context(|| format!("failed to read '{}'", path.display()))?;
            let raw: Vec<RawDetection> = serde_json::from_str(&text)
                .with_context(|| format!("failed to parse '{}'", path.display()))?;
            raw.into_iter().map(Detection::try_from).try_collect()
        }
    }
}
