//! Build artifacts and their fingerprints
//!
//! Artifacts are produced by an external [`ArtifactBuilder`] before any
//! resource that depends on them is applied. Builds are memoized for the
//! duration of a run so each distinct source is packaged once, even when
//! several workers ask for it at the same time.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

/// Value whose change forces dependents to re-run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum Fingerprint {
    /// Caller-supplied value (a content hash, a version string, ...)
    Value(String),
    /// Never matches; dependents re-run on every plan
    Always,
}

impl Fingerprint {
    /// Whether a recorded fingerprint matches this one
    pub fn matches(&self, recorded: Option<&str>) -> bool {
        match self {
            Self::Value(v) => recorded == Some(v.as_str()),
            Self::Always => false,
        }
    }

    /// Value persisted in state for later comparison
    pub fn recorded(&self) -> String {
        match self {
            Self::Value(v) => v.clone(),
            Self::Always => "always".to_string(),
        }
    }
}

/// A declared build output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    /// Artifact name used in `${artifact.<name>.*}` references
    pub name: String,
    /// Directory that is packaged
    pub source_dir: PathBuf,
    /// Directory the archive is written to
    pub output_dir: PathBuf,
    /// Archive file name
    pub filename: String,
    /// Re-run trigger
    pub fingerprint: Fingerprint,
}

impl ArtifactSpec {
    /// Full path of the produced archive
    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(&self.filename)
    }

    /// Value of an `${artifact.<name>.<attribute>}` reference
    pub fn attribute(&self, attribute: &str) -> Option<Value> {
        let value = match attribute {
            "path" => self.output_path().to_string_lossy().to_string(),
            "filename" => self.filename.clone(),
            "fingerprint" => self.fingerprint.recorded(),
            "source_dir" => self.source_dir.to_string_lossy().to_string(),
            "output_dir" => self.output_dir.to_string_lossy().to_string(),
            _ => return None,
        };
        Some(Value::String(value))
    }
}

/// Produces archives from source directories
pub trait ArtifactBuilder: Send + Sync {
    /// Build the artifact, returning the path of the produced archive
    fn build(&self, spec: &ArtifactSpec) -> anyhow::Result<PathBuf>;
}

type BuildSlot = Arc<OnceLock<std::result::Result<PathBuf, String>>>;

/// Per-run memo of artifact builds
#[derive(Default)]
pub struct ArtifactCache {
    builds: Mutex<HashMap<(PathBuf, PathBuf), BuildSlot>>,
}

impl ArtifactCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the artifact unless this run already built it.
    ///
    /// Concurrent callers for the same source block until the single build
    /// finishes and then share its result, including failures.
    pub fn get_or_build(&self, spec: &ArtifactSpec, builder: &dyn ArtifactBuilder) -> Result<PathBuf> {
        let slot = {
            let mut builds = match self.builds.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            Arc::clone(
                builds
                    .entry((spec.source_dir.clone(), spec.output_path()))
                    .or_default(),
            )
        };

        let outcome = slot.get_or_init(|| {
            log::info!(
                "Building artifact '{}' from {}",
                spec.name,
                spec.source_dir.display()
            );
            match builder.build(spec) {
                Ok(path) if path.exists() => Ok(path),
                Ok(path) => Err(format!(
                    "builder reported success but {} is missing",
                    path.display()
                )),
                Err(e) => Err(format!("{e:#}")),
            }
        });

        outcome.clone().map_err(|message| Error::ArtifactBuild {
            artifact: spec.name.clone(),
            source_dir: spec.source_dir.clone(),
            message,
        })
    }

    /// Number of distinct builds requested so far
    pub fn len(&self) -> usize {
        match self.builds.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Whether nothing was built yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
