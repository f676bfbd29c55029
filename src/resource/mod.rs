//! Sandbox provider handlers
//!
//! Each handler implements create/update/delete for one resource type by
//! materializing the resource under a local provider root:
//!
//! ```text
//! <root>/records/<type>/<id>.json     recorded attributes of every resource
//! <root>/s3/<bucket>/<key>             bucket directories and object bodies
//! <root>/lambda/functions/<name>/      function packages
//! <root>/lambda/layers/<name>/<ver>/   layer version packages
//! ```
//!
//! Identifiers and ARNs follow the shapes of the real services so that
//! references between resources read the same way they would against a
//! cloud account.

pub mod generic;
pub mod iam_role;
pub mod lambda;
pub mod null_resource;
pub mod s3_bucket;
pub mod s3_object;

use anyhow::{Context, Result, bail};
use declarative::{Attributes, HandlerRegistry};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use generic::GenericResource;
pub use iam_role::IamRole;
pub use lambda::{DeploymentStrategy, LambdaFunction, LambdaLayerVersion};
pub use null_resource::NullResource;
pub use s3_bucket::S3Bucket;
pub use s3_object::S3Object;

/// Local stand-in for a cloud account
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
    region: String,
    account_id: String,
}

impl Sandbox {
    pub fn new(root: impl Into<PathBuf>, region: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            region: region.into(),
            account_id: account_id.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// `arn:aws:<service>:<region>:<account>:<resource>`
    pub fn arn(&self, service: &str, resource: &str) -> String {
        format!(
            "arn:aws:{}:{}:{}:{}",
            service, self.region, self.account_id, resource
        )
    }

    /// ARN of a global service (no region)
    pub fn global_arn(&self, service: &str, resource: &str) -> String {
        format!("arn:aws:{}::{}:{}", service, self.account_id, resource)
    }

    pub fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.root.join("s3").join(bucket)
    }

    pub fn function_dir(&self, name: &str) -> PathBuf {
        self.root.join("lambda").join("functions").join(name)
    }

    pub fn layer_dir(&self, name: &str) -> PathBuf {
        self.root.join("lambda").join("layers").join(name)
    }

    fn record_path(&self, kind: &str, id: &str) -> PathBuf {
        self.root.join("records").join(kind).join(format!("{id}.json"))
    }

    /// Read the record of a resource, if it exists
    pub fn read_record(&self, kind: &str, id: &str) -> Result<Option<Attributes>> {
        let path = self.record_path(kind, id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Could not read record: {}", path.display()))?;
        let record = serde_json::from_str(&content)
            .with_context(|| format!("Invalid record: {}", path.display()))?;
        Ok(Some(record))
    }

    /// Write (or overwrite) the record of a resource
    pub fn write_record(&self, kind: &str, id: &str, attributes: &Attributes) -> Result<()> {
        let path = self.record_path(kind, id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(attributes)?;
        fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Remove a record; returns whether it existed
    pub fn remove_record(&self, kind: &str, id: &str) -> Result<bool> {
        let path = self.record_path(kind, id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }
}

/// Registry with every sandbox handler
pub fn registry(sandbox: &Arc<Sandbox>) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(IamRole::new(Arc::clone(sandbox)));
    registry.register(S3Bucket::new(Arc::clone(sandbox)));
    registry.register(S3Object::new(Arc::clone(sandbox)));
    registry.register(LambdaFunction::new(Arc::clone(sandbox)));
    registry.register(LambdaLayerVersion::new(Arc::clone(sandbox)));
    registry.register(NullResource::new(Arc::clone(sandbox)));
    registry.register(GenericResource::new(Arc::clone(sandbox)));
    registry
}

// ============================================================================
// Attribute helpers
// ============================================================================

/// A required string attribute
pub fn required_str<'a>(attributes: &'a Attributes, key: &str) -> Result<&'a str> {
    match attributes.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        Some(Value::String(_)) | None => bail!("missing required attribute '{key}'"),
        Some(other) => bail!("attribute '{key}' must be a string, got {other}"),
    }
}

/// An optional string attribute
pub fn optional_str<'a>(attributes: &'a Attributes, key: &str) -> Result<Option<&'a str>> {
    match attributes.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => bail!("attribute '{key}' must be a string, got {other}"),
    }
}

/// An optional boolean attribute
pub fn optional_bool(attributes: &Attributes, key: &str) -> Result<bool> {
    match attributes.get(key) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => bail!("attribute '{key}' must be a boolean, got {other}"),
    }
}

/// Merge computed attributes over the desired ones for a record
pub fn merged(desired: &Attributes, computed: &Attributes) -> Attributes {
    let mut record = desired.clone();
    record.extend(computed.iter().map(|(k, v)| (k.clone(), v.clone())));
    record
}

/// Hex blake3 digest of a file
pub fn file_digest(path: &Path) -> Result<(String, u64)> {
    let content = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok((
        blake3::hash(&content).to_hex().to_string(),
        content.len() as u64,
    ))
}

/// Current time in the format the provider reports
pub fn timestamp() -> Value {
    Value::String(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
}
