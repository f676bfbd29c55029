//! Lambda functions and layer versions
//!
//! Both resource types deploy a code package, chosen by exactly one of:
//!
//! - `filename`: a local archive (usually `${artifact.<name>.path}`)
//! - `s3_bucket` + `s3_key`: an object previously uploaded to a bucket
//! - `source_path`: a directory packaged by the handler itself, the way
//!   module-based deployments hand over raw sources

use anyhow::{Context, Result, bail};
use declarative::{ApplyContext, Attributes, Handler, ResourceGraph};
use regex::Regex;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use super::{Sandbox, file_digest, merged, optional_str, required_str, timestamp};
use crate::builder;
use crate::config::hash_tree;

static FUNCTION_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("valid function name regex"));

static ROLE_ARN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^arn:aws:iam::\d{12}:role/(?:[\w+=,.@-]+/)*([\w+=,.@-]{1,64})$")
        .expect("valid role arn regex")
});

const PACKAGE_FILE: &str = "package.zip";

/// Where a code package comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentStrategy {
    /// Archive on the local filesystem
    LocalFile { filename: PathBuf },
    /// Object in a sandbox bucket
    ObjectStore { bucket: String, key: String },
    /// Source directory packaged at deploy time
    Module { source_path: PathBuf },
}

impl DeploymentStrategy {
    /// Pick the strategy declared by a resource's attributes
    pub fn from_attributes(attributes: &Attributes) -> Result<Self> {
        let filename = optional_str(attributes, "filename")?;
        let bucket = optional_str(attributes, "s3_bucket")?;
        let key = optional_str(attributes, "s3_key")?;
        let source_path = optional_str(attributes, "source_path")?;

        match (filename, bucket, key, source_path) {
            (Some(filename), None, None, None) => Ok(Self::LocalFile {
                filename: PathBuf::from(filename),
            }),
            (None, Some(bucket), Some(key), None) => Ok(Self::ObjectStore {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            (None, Some(_), None, None) | (None, None, Some(_), None) => {
                bail!("'s3_bucket' and 's3_key' must be set together")
            }
            (None, None, None, Some(source_path)) => Ok(Self::Module {
                source_path: PathBuf::from(source_path),
            }),
            (None, None, None, None) => {
                bail!("one of 'filename', 's3_bucket'/'s3_key' or 'source_path' is required")
            }
            _ => bail!("'filename', 's3_bucket'/'s3_key' and 'source_path' are mutually exclusive"),
        }
    }

    /// Short name recorded as the `deployment` attribute
    pub fn name(&self) -> &'static str {
        match self {
            Self::LocalFile { .. } => "local_file",
            Self::ObjectStore { .. } => "object_store",
            Self::Module { .. } => "module",
        }
    }

    /// Place the package at `dest`
    pub fn stage(&self, sandbox: &Sandbox, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        match self {
            Self::LocalFile { filename } => {
                if !filename.is_file() {
                    bail!("package {} does not exist", filename.display());
                }
                fs::copy(filename, dest)
                    .with_context(|| format!("Failed to copy {}", filename.display()))?;
            }
            Self::ObjectStore { bucket, key } => {
                let object = sandbox.bucket_dir(bucket).join(key);
                if !object.is_file() {
                    bail!("NoSuchKey: s3://{bucket}/{key}");
                }
                fs::copy(&object, dest)
                    .with_context(|| format!("Failed to copy s3://{bucket}/{key}"))?;
            }
            Self::Module { source_path } => {
                builder::zip_dir(source_path, dest)?;
            }
        }
        Ok(())
    }
}

fn check_name(name: &str) -> Result<()> {
    if !FUNCTION_NAME.is_match(name) {
        bail!("invalid name '{name}'");
    }
    Ok(())
}

/// Hash every literal `source_path` into `source_code_hash`.
///
/// Handler-packaged sources have no artifact, so this hash is what moves
/// the plan when they are edited. A declared `source_code_hash` is kept.
/// Returns the number of resources fingerprinted.
pub fn fingerprint_source_paths(graph: &mut ResourceGraph) -> Result<usize> {
    let pending: Vec<(String, PathBuf)> = graph
        .nodes()
        .iter()
        .filter(|n| [FUNCTION_KIND, LAYER_KIND].contains(&n.address.resource_type.as_str()))
        .filter(|n| !n.attributes.contains_key("source_code_hash"))
        .filter_map(|n| match n.attributes.get("source_path") {
            Some(Value::String(path)) if !path.contains("${") => {
                Some((n.address.to_string(), PathBuf::from(path)))
            }
            _ => None,
        })
        .collect();

    for (address, source) in &pending {
        if !source.is_dir() {
            bail!("{address}: source_path {} is not a directory", source.display());
        }
        let hash = hash_tree(source).with_context(|| format!("Failed to fingerprint {address}"))?;
        log::debug!("{address}: source_code_hash {hash}");
        graph.set_attribute(address, "source_code_hash", Value::from(hash));
    }
    Ok(pending.len())
}

// ============================================================================
// Function
// ============================================================================

const FUNCTION_KIND: &str = "aws_lambda_function";

pub struct LambdaFunction {
    sandbox: Arc<Sandbox>,
}

impl LambdaFunction {
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }

    /// The execution role must exist in the account
    fn check_role(&self, desired: &Attributes) -> Result<()> {
        let role = required_str(desired, "role")?;
        let Some(name) = ROLE_ARN.captures(role).and_then(|c| c.get(1)) else {
            bail!("InvalidParameterValue: '{role}' is not a role ARN");
        };
        if self.sandbox.read_record("aws_iam_role", name.as_str())?.is_none() {
            bail!("InvalidParameterValue: the role defined for the function cannot be assumed: {role}");
        }
        Ok(())
    }

    fn deploy(&self, desired: &Attributes, version: u64) -> Result<Attributes> {
        let name = required_str(desired, "function_name")?;
        check_name(name)?;
        required_str(desired, "runtime")?;
        required_str(desired, "handler")?;
        self.check_role(desired)?;

        let strategy = DeploymentStrategy::from_attributes(desired)?;
        let package = self.sandbox.function_dir(name).join(PACKAGE_FILE);
        strategy.stage(&self.sandbox, &package)?;
        let (sha, size) = file_digest(&package)?;

        let arn = self.sandbox.arn("lambda", &format!("function:{name}"));
        let computed = Attributes::from([
            ("id".to_string(), Value::from(name)),
            ("qualified_arn".to_string(), Value::from(format!("{arn}:{version}"))),
            (
                "invoke_arn".to_string(),
                Value::from(format!(
                    "arn:aws:apigateway:{}:lambda:path/2015-03-31/functions/{arn}/invocations",
                    self.sandbox.region()
                )),
            ),
            ("arn".to_string(), Value::from(arn)),
            ("version".to_string(), Value::from(version.to_string())),
            ("code_sha256".to_string(), Value::from(sha)),
            ("code_size".to_string(), Value::from(size)),
            ("deployment".to_string(), Value::from(strategy.name())),
            ("last_modified".to_string(), timestamp()),
        ]);
        self.sandbox
            .write_record(FUNCTION_KIND, name, &merged(desired, &computed))?;
        log::debug!("Deployed function {name} ({}, version {version})", strategy.name());
        Ok(computed)
    }
}

impl Handler for LambdaFunction {
    fn resource_type(&self) -> &'static str {
        FUNCTION_KIND
    }

    fn immutable_attributes(&self) -> &'static [&'static str] {
        &["function_name", "runtime", "source_code_hash", "package_type"]
    }

    fn create(&self, _ctx: &ApplyContext, desired: &Attributes) -> Result<Attributes> {
        let name = required_str(desired, "function_name")?;
        if self.sandbox.read_record(FUNCTION_KIND, name)?.is_some() {
            bail!("ResourceConflictException: function already exist: {name}");
        }
        self.deploy(desired, 1)
    }

    fn update(&self, _ctx: &ApplyContext, prior: &Attributes, desired: &Attributes) -> Result<Attributes> {
        let name = required_str(desired, "function_name")?;
        let Some(existing) = self.sandbox.read_record(FUNCTION_KIND, name)? else {
            bail!("ResourceNotFoundException: function not found: {name}");
        };
        let current = existing
            .get("version")
            .or_else(|| prior.get("version"))
            .and_then(Value::as_str)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(1);
        let publish = matches!(desired.get("publish"), Some(Value::Bool(true)));
        self.deploy(desired, if publish { current + 1 } else { current })
    }

    fn delete(&self, _ctx: &ApplyContext, prior: &Attributes) -> Result<()> {
        let name = required_str(prior, "function_name")?;
        let dir = self.sandbox.function_dir(name);
        if dir.exists() {
            fs::remove_dir_all(&dir).with_context(|| format!("Failed to remove {}", dir.display()))?;
        }
        if !self.sandbox.remove_record(FUNCTION_KIND, name)? {
            log::warn!("Function {name} was already gone");
        }
        Ok(())
    }
}

// ============================================================================
// Layer version
// ============================================================================

const LAYER_KIND: &str = "aws_lambda_layer_version";

/// Published layer versions never change; every difference is a new version
pub struct LambdaLayerVersion {
    sandbox: Arc<Sandbox>,
}

impl LambdaLayerVersion {
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }

    fn next_version(&self, name: &str) -> Result<u64> {
        let dir = self.sandbox.layer_dir(name);
        if !dir.is_dir() {
            return Ok(1);
        }
        let mut latest = 0;
        for entry in fs::read_dir(&dir).with_context(|| format!("Failed to list {}", dir.display()))? {
            if let Ok(version) = entry?.file_name().to_string_lossy().parse::<u64>() {
                latest = latest.max(version);
            }
        }
        Ok(latest + 1)
    }
}

impl Handler for LambdaLayerVersion {
    fn resource_type(&self) -> &'static str {
        LAYER_KIND
    }

    fn immutable_attributes(&self) -> &'static [&'static str] {
        &[
            "layer_name",
            "filename",
            "s3_bucket",
            "s3_key",
            "source_path",
            "source_code_hash",
            "compatible_runtimes",
            "description",
        ]
    }

    fn create(&self, _ctx: &ApplyContext, desired: &Attributes) -> Result<Attributes> {
        let name = required_str(desired, "layer_name")?;
        check_name(name)?;
        let strategy = DeploymentStrategy::from_attributes(desired)?;

        let version = self.next_version(name)?;
        let package = self
            .sandbox
            .layer_dir(name)
            .join(version.to_string())
            .join(PACKAGE_FILE);
        strategy.stage(&self.sandbox, &package)?;
        let (sha, size) = file_digest(&package)?;

        let layer_arn = self.sandbox.arn("lambda", &format!("layer:{name}"));
        let version_arn = format!("{layer_arn}:{version}");
        let computed = Attributes::from([
            ("id".to_string(), Value::from(version_arn.clone())),
            ("arn".to_string(), Value::from(version_arn)),
            ("layer_arn".to_string(), Value::from(layer_arn)),
            ("version".to_string(), Value::from(version.to_string())),
            ("code_sha256".to_string(), Value::from(sha)),
            ("code_size".to_string(), Value::from(size)),
            ("created_date".to_string(), timestamp()),
        ]);
        self.sandbox
            .write_record(LAYER_KIND, &format!("{name}.{version}"), &merged(desired, &computed))?;
        log::debug!("Published layer {name} version {version}");
        Ok(computed)
    }

    fn delete(&self, _ctx: &ApplyContext, prior: &Attributes) -> Result<()> {
        let name = required_str(prior, "layer_name")?;
        let version = required_str(prior, "version")?;
        let dir = self.sandbox.layer_dir(name).join(version);
        if dir.exists() {
            fs::remove_dir_all(&dir).with_context(|| format!("Failed to remove {}", dir.display()))?;
        }
        self.sandbox
            .remove_record(LAYER_KIND, &format!("{name}.{version}"))?;
        Ok(())
    }
}
