pub use anyhow::{bail, ensure, format_err, Context as _, Error, Result};
pub use bbox::{prelude::*, Size, XYXY};
pub use futures::stream::{self, StreamExt as _};
pub use indexmap::IndexSet;
pub use itertools::Itertools as _;
pub use label::{load_label_file, Annotation, Label};
pub use log::{debug, info, warn};
pub use noisy_float::prelude::*;
pub use once_cell::sync::Lazy;
pub use semver::{Version, VersionReq};
pub use serde::{Deserialize, Deserializer, Serialize};
pub use std::{
    collections::{BTreeMap, HashMap},
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
