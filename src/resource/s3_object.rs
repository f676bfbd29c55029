//! S3 object - a file inside a bucket directory

use anyhow::{Context, Result, bail};
use declarative::{ApplyContext, Attributes, Handler};
use serde_json::Value;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use super::{Sandbox, merged, optional_str, required_str};

const KIND: &str = "aws_s3_object";

pub struct S3Object {
    sandbox: Arc<Sandbox>,
}

impl S3Object {
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }

    /// Location of an object body; keys may not escape the bucket
    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        if key.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("invalid object key '{key}'");
        }
        let dir = self.sandbox.bucket_dir(bucket);
        if !dir.is_dir() {
            bail!("NoSuchBucket: {bucket}");
        }
        Ok(dir.join(relative))
    }

    fn put(&self, desired: &Attributes) -> Result<Attributes> {
        let bucket = required_str(desired, "bucket")?;
        let key = required_str(desired, "key")?;
        let path = self.object_path(bucket, key)?;

        let body = match (optional_str(desired, "source")?, optional_str(desired, "content")?) {
            (Some(source), None) => {
                fs::read(source).with_context(|| format!("Failed to read source {source}"))?
            }
            (None, Some(content)) => content.as_bytes().to_vec(),
            (Some(_), Some(_)) => bail!("'source' and 'content' are mutually exclusive"),
            (None, None) => bail!("one of 'source' or 'content' is required"),
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&path, &body).with_context(|| format!("Failed to write {}", path.display()))?;

        let computed = Attributes::from([
            ("id".to_string(), Value::from(key)),
            ("etag".to_string(), Value::from(blake3::hash(&body).to_hex().to_string())),
            ("size".to_string(), Value::from(body.len() as u64)),
        ]);
        let record_id = record_id(bucket, key);
        self.sandbox.write_record(KIND, &record_id, &merged(desired, &computed))?;
        log::debug!("Put s3://{bucket}/{key} ({} bytes)", body.len());
        Ok(computed)
    }
}

fn record_id(bucket: &str, key: &str) -> String {
    format!("{bucket}--{}", key.replace('/', "--"))
}

impl Handler for S3Object {
    fn resource_type(&self) -> &'static str {
        KIND
    }

    fn immutable_attributes(&self) -> &'static [&'static str] {
        &["bucket", "key"]
    }

    fn create(&self, _ctx: &ApplyContext, desired: &Attributes) -> Result<Attributes> {
        self.put(desired)
    }

    fn update(&self, _ctx: &ApplyContext, _prior: &Attributes, desired: &Attributes) -> Result<Attributes> {
        self.put(desired)
    }

    fn delete(&self, _ctx: &ApplyContext, prior: &Attributes) -> Result<()> {
        let bucket = required_str(prior, "bucket")?;
        let key = required_str(prior, "key")?;

        match self.object_path(bucket, key) {
            Ok(path) => match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    log::warn!("Object s3://{bucket}/{key} was already gone");
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to remove {}", path.display()));
                }
            },
            // Bucket already removed out of band; nothing left to delete
            Err(e) => log::warn!("{e}"),
        }

        self.sandbox.remove_record(KIND, &record_id(bucket, key))?;
        Ok(())
    }
}
