use crate::{
    common::*,
    detection::{ClassRoles, Role},
    matching::MatchStrategy,
    occupancy::OccupancyPolicy,
    pose::KeypointLayout,
};

pub use batch::*;
pub use classes::*;
pub use evaluation::*;
pub use thresholds::*;

pub static CONFIG_VERSION: Lazy<VersionReq> = Lazy::new(|| VersionReq::parse("0.1.0").unwrap());

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(deserialize_with = "deserialize_version")]
    pub version: Version,
    pub classes: ClassRolesConfig,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub keypoints: KeypointLayout,
    #[serde(default)]
    pub occupancy: OccupancyPolicy,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

impl Config {
    /// Load and validate a JSON5 configuration file.
    ///
    /// A relative `classes_file` is resolved against the directory of the config file.
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let mut config = Self::from_json5(&text)?;

        if let (Some(classes_file), Some(config_dir)) =
            (&mut config.classes.classes_file, path.parent())
        {
            if classes_file.is_relative() {
                *classes_file = config_dir.join(&*classes_file);
            }
        }

        Ok(config)
    }

    pub fn from_json5(text: &str) -> Result<Self> {
        let config: Self = json5::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.thresholds.validate()?;
        self.batch.validate()?;
        Ok(())
    }

    /// Resolve the configured class references to a class id to role table.
    pub fn class_roles(&self) -> Result<ClassRoles> {
        self.classes.resolve()
    }
}

mod classes {
    use super::*;

    /// Class role bindings.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ClassRolesConfig {
        /// Optional file of class names, one per line. The line index is the class id.
        pub classes_file: Option<PathBuf>,
        pub roles: RoleBindings,
    }

    /// The detector class bound to each role. Unbound roles are left out.
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    #[serde(default, deny_unknown_fields)]
    pub struct RoleBindings {
        pub chair: Option<ClassRef>,
        pub person: Option<ClassRef>,
        pub occupied_seat: Option<ClassRef>,
        pub empty_seat: Option<ClassRef>,
    }

    impl RoleBindings {
        pub fn iter(&self) -> impl Iterator<Item = (Role, &ClassRef)> {
            [
                (Role::Chair, &self.chair),
                (Role::Person, &self.person),
                (Role::OccupiedSeat, &self.occupied_seat),
                (Role::EmptySeat, &self.empty_seat),
            ]
            .into_iter()
            .filter_map(|(role, class)| Some((role, class.as_ref()?)))
        }
    }

    /// A detector class given by id, or by name looked up in the classes file.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(untagged)]
    pub enum ClassRef {
        Id(usize),
        Name(String),
    }

    impl ClassRolesConfig {
        pub fn resolve(&self) -> Result<ClassRoles> {
            let needs_names = self
                .roles
                .iter()
                .any(|(_, class)| matches!(class, ClassRef::Name(_)));
            let class_names = match (&self.classes_file, needs_names) {
                (Some(path), true) => Some(load_classes_file(path)?),
                (None, true) => bail!("class names are used but 'classes_file' is not set"),
                (_, false) => None,
            };

            let bindings: Vec<_> = self
                .roles
                .iter()
                .map(|(role, class)| -> Result<_> {
                    let class_id = match class {
                        ClassRef::Id(id) => *id,
                        ClassRef::Name(name) => class_names
                            .as_ref()
                            .and_then(|names| names.get_index_of(name.as_str()))
                            .ok_or_else(|| format_err!("unknown class name '{}'", name))?,
                    };
                    Ok((class_id, role))
                })
                .try_collect()?;

            let roles = ClassRoles::new(bindings)?;
            debug!("resolved class roles {:?}", roles);
            Ok(roles)
        }
    }

    pub fn load_classes_file(path: impl AsRef<Path>) -> Result<IndexSet<String>> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read classes file '{}'", path.display()))?;
        let lines: Vec<_> = content.lines().map(str::trim).collect();
        let classes: IndexSet<_> = lines.iter().cloned().map(ToOwned::to_owned).collect();
        ensure!(
            lines.len() == classes.len(),
            "duplicated class names found in '{}'",
            path.display()
        );
        ensure!(
            !classes.is_empty(),
            "no classes found in '{}'",
            path.display()
        );
        Ok(classes)
    }
}

mod thresholds {
    use super::*;

    /// Numeric knobs of the engine.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(default)]
    pub struct Thresholds {
        /// A chair is occupied when a person center is strictly closer than this, in pixels.
        pub distance_threshold_px: R64,
        /// A prediction matches ground truth when their IoU strictly exceeds this.
        pub iou_threshold: R64,
        /// A keypoint is usable when its visibility strictly exceeds this.
        pub keypoint_visibility_threshold: R64,
    }

    impl Thresholds {
        pub fn validate(&self) -> Result<()> {
            let Self {
                distance_threshold_px,
                iou_threshold,
                keypoint_visibility_threshold,
            } = *self;
            ensure!(
                distance_threshold_px.raw() >= 0.0,
                "distance_threshold_px must be non-negative"
            );
            ensure!(
                (0.0..=1.0).contains(&iou_threshold.raw()),
                "iou_threshold must be in [0, 1]"
            );
            ensure!(
                (0.0..=1.0).contains(&keypoint_visibility_threshold.raw()),
                "keypoint_visibility_threshold must be in [0, 1]"
            );
            Ok(())
        }
    }

    impl Default for Thresholds {
        fn default() -> Self {
            Self {
                distance_threshold_px: r64(150.0),
                iou_threshold: r64(0.5),
                keypoint_visibility_threshold: r64(0.5),
            }
        }
    }
}

mod evaluation {
    use super::*;

    /// Ground-truth scoring options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(default)]
    pub struct EvaluationConfig {
        /// Detections with this role are the predicted occupied seats.
        pub predicted_role: Role,
        pub annotation_classes: AnnotationClasses,
        pub matching: MatchStrategy,
    }

    impl Default for EvaluationConfig {
        fn default() -> Self {
            Self {
                predicted_role: Role::OccupiedSeat,
                annotation_classes: AnnotationClasses::default(),
                matching: MatchStrategy::default(),
            }
        }
    }

    /// Class ids used in the label files, which need not agree with the detector's.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct AnnotationClasses {
        pub occupied: usize,
        pub empty: usize,
    }

    impl Default for AnnotationClasses {
        fn default() -> Self {
            Self {
                occupied: 0,
                empty: 1,
            }
        }
    }
}

mod batch {
    use super::*;

    /// Dataset run options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(default)]
    pub struct BatchConfig {
        /// Images processed concurrently. Defaults to the number of CPUs.
        pub num_workers: Option<NonZeroUsize>,
        /// Per-image time limit. An image that exceeds it is skipped.
        pub image_timeout_secs: u64,
        /// Accepted image file extensions, case-insensitive.
        pub image_extensions: Vec<String>,
    }

    impl BatchConfig {
        pub fn num_workers(&self) -> usize {
            self.num_workers
                .map(NonZeroUsize::get)
                .unwrap_or_else(num_cpus::get)
        }

        pub fn image_timeout(&self) -> Duration {
            Duration::from_secs(self.image_timeout_secs)
        }

        pub fn validate(&self) -> Result<()> {
            ensure!(
                self.image_timeout_secs > 0,
                "image_timeout_secs must be positive"
            );
            ensure!(
                !self.image_extensions.is_empty(),
                "image_extensions must not be empty"
            );
            Ok(())
        }
    }

    impl Default for BatchConfig {
        fn default() -> Self {
            Self {
                num_workers: None,
                image_timeout_secs: 30,
                image_extensions: ["jpg", "jpeg", "png"]
                    .iter()
                    .map(|ext| ext.to_string())
                    .collect(),
            }
        }
    }
}

pub fn deserialize_version<'de, D>(deserializer: D) -> Result<Version, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error as _;

    let text = String::deserialize(deserializer)?;
    let version = Version::parse(&text).map_err(|err| {
        D::Error::custom(format!(
            "failed to parse version number '{}': {:?}",
            text, err
        ))
    })?;

    if !CONFIG_VERSION.matches(&version) {
        return Err(D::Error::custom(format!(
            "incompatible version: get '{}', but it is incompatible with requirement '{}'",
            version, &*CONFIG_VERSION,
        )));
    }

    Ok(version)
}
