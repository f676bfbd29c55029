//! Stack configuration file loading
//!
//! A stack file is TOML or JSON (chosen by extension) and carries the
//! provider settings, the artifact builder, artifact declarations and the
//! root module. Loading resolves paths against the configuration directory
//! and computes artifact fingerprints, producing the engine's
//! [`Configuration`].

use anyhow::{Context, Result};
use declarative::{ArtifactSpec, Configuration, Fingerprint, ModuleDefinition, ModuleSources};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

use crate::paths;

/// File names probed inside a module source directory
const MODULE_FILES: [&str; 2] = ["module.toml", "module.json"];

/// Typed failures of configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unsupported configuration format '{}' (expected .toml or .json)", path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("artifact '{artifact}': fingerprint mode 'value' requires a value")]
    MissingFingerprintValue { artifact: String },

    #[error("artifact '{artifact}': source directory {} does not exist", source_dir.display())]
    MissingSourceDir { artifact: String, source_dir: PathBuf },
}

// ============================================================================
// File Format
// ============================================================================

/// On-disk stack file
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StackFile {
    /// Sandbox provider settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// External packaging command; the native zip builder is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_builder: Option<BuilderConfig>,

    /// Build artifacts, keyed by name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub artifacts: BTreeMap<String, ArtifactConfig>,

    /// Root module: variables, resources, modules and outputs
    #[serde(flatten)]
    pub root: ModuleDefinition,

    /// Inline module sources
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub module_sources: BTreeMap<String, ModuleDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Directory the sandbox provider materializes resources under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            account_id: default_account_id(),
            root: None,
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_account_id() -> String {
    "000000000000".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderConfig {
    /// Program to run
    pub command: String,
    /// Leading arguments; source dir, output dir and file name are appended
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    pub source_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default)]
    pub fingerprint: FingerprintConfig,
}

/// How an artifact's re-run trigger is derived
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintMode {
    /// Hash of the source tree
    #[default]
    Content,
    /// Caller-supplied value
    Value,
    /// Rebuild on every run
    Always,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FingerprintConfig {
    #[serde(default)]
    pub mode: FingerprintMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

// ============================================================================
// Loading
// ============================================================================

/// A parsed stack file together with its location
#[derive(Debug)]
pub struct LoadedStack {
    /// Path of the configuration file
    pub path: PathBuf,
    /// Directory relative paths are resolved against
    pub dir: PathBuf,
    pub file: StackFile,
}

impl LoadedStack {
    /// Load and parse a stack file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read config file: {}", path.display()))?;
        let file: StackFile = parse(path, &content)?;
        let dir = paths::config_dir(path);
        log::debug!(
            "Loaded {} ({} resources, {} modules, {} artifacts)",
            path.display(),
            file.root.resources.len(),
            file.root.modules.len(),
            file.artifacts.len()
        );
        Ok(Self {
            path: path.to_path_buf(),
            dir,
            file,
        })
    }

    /// Engine configuration with resolved artifact paths and fingerprints
    pub fn configuration(&self) -> Result<Configuration> {
        let artifacts = self
            .file
            .artifacts
            .iter()
            .map(|(name, artifact)| Ok((name.clone(), self.artifact_spec(name, artifact)?)))
            .collect::<Result<_>>()?;

        Ok(Configuration {
            root: self.file.root.clone(),
            artifacts,
            module_sources: self.file.module_sources.clone(),
        })
    }

    fn artifact_spec(&self, name: &str, artifact: &ArtifactConfig) -> Result<ArtifactSpec> {
        let source_dir = paths::resolve(&self.dir, &artifact.source_dir);
        let output_dir = match &artifact.output_dir {
            Some(dir) => paths::resolve(&self.dir, dir),
            None => paths::build_dir(&self.dir),
        };
        let filename = artifact
            .filename
            .clone()
            .unwrap_or_else(|| format!("{name}.zip"));

        let fingerprint = match artifact.fingerprint.mode {
            FingerprintMode::Always => Fingerprint::Always,
            FingerprintMode::Value => match &artifact.fingerprint.value {
                Some(value) => Fingerprint::Value(value.clone()),
                None => {
                    return Err(ConfigError::MissingFingerprintValue {
                        artifact: name.to_string(),
                    }
                    .into());
                }
            },
            FingerprintMode::Content => {
                if !source_dir.is_dir() {
                    return Err(ConfigError::MissingSourceDir {
                        artifact: name.to_string(),
                        source_dir,
                    }
                    .into());
                }
                Fingerprint::Value(hash_tree(&source_dir)?)
            }
        };

        Ok(ArtifactSpec {
            name: name.to_string(),
            source_dir,
            output_dir,
            filename,
            fingerprint,
        })
    }

    /// Module sources found on disk next to the configuration
    pub fn module_sources(&self) -> DiskModuleSources {
        DiskModuleSources::new(&self.dir)
    }

    /// Sandbox provider root directory
    pub fn provider_root(&self) -> PathBuf {
        match &self.file.provider.root {
            Some(root) => paths::resolve(&self.dir, root),
            None => paths::provider_root(&self.dir),
        }
    }
}

/// Parse a document by file extension
fn parse<T: DeserializeOwned>(path: &Path, content: &str) -> Result<T> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(content)
            .with_context(|| format!("Invalid TOML format in {}", path.display())),
        Some("json") => serde_json::from_str(content)
            .with_context(|| format!("Invalid JSON format in {}", path.display())),
        _ => Err(ConfigError::UnsupportedFormat {
            path: path.to_path_buf(),
        }
        .into()),
    }
}

/// blake3 hash over the relative paths and contents of every file in a tree.
///
/// Entries are visited in file name order so the hash is stable across
/// platforms and runs.
pub fn hash_tree(root: &Path) -> Result<String> {
    let mut hasher = blake3::Hasher::new();
    let mut buf = Vec::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .with_context(|| format!("Failed to strip prefix from {}", entry.path().display()))?;

        buf.clear();
        fs::File::open(entry.path())
            .and_then(|mut f| f.read_to_end(&mut buf))
            .with_context(|| format!("Failed to read {}", entry.path().display()))?;

        hasher.update(relative.to_string_lossy().replace('\\', "/").as_bytes());
        hasher.update(&[0]);
        hasher.update(&(buf.len() as u64).to_le_bytes());
        hasher.update(&buf);
    }

    Ok(hasher.finalize().to_hex().to_string())
}

// ============================================================================
// Module Sources
// ============================================================================

/// Resolves `source = "./modules/x"` to `<config dir>/modules/x/module.toml`
pub struct DiskModuleSources {
    base: PathBuf,
}

impl DiskModuleSources {
    pub fn new(base: &Path) -> Self {
        Self {
            base: base.to_path_buf(),
        }
    }

    fn load(&self, source: &str) -> Result<Option<ModuleDefinition>> {
        let dir = paths::resolve(&self.base, source);
        for name in MODULE_FILES {
            let path = dir.join(name);
            if path.is_file() {
                let content = fs::read_to_string(&path)
                    .with_context(|| format!("Could not read module file: {}", path.display()))?;
                return parse(&path, &content).map(Some);
            }
        }
        Ok(None)
    }
}

impl ModuleSources for DiskModuleSources {
    fn resolve(&self, source: &str) -> Option<ModuleDefinition> {
        match self.load(source) {
            Ok(found) => found,
            Err(e) => {
                log::warn!("Module source '{source}' could not be loaded: {e:#}");
                None
            }
        }
    }
}
