//! S3 bucket - a directory under `<root>/s3`

use anyhow::{Context, Result, bail};
use declarative::{ApplyContext, Attributes, Handler};
use regex::Regex;
use serde_json::Value;
use std::fs;
use std::sync::{Arc, LazyLock};

use super::{Sandbox, merged, optional_bool, required_str};

static BUCKET_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9.-]{1,61}[a-z0-9]$").expect("valid bucket name regex")
});

const KIND: &str = "aws_s3_bucket";

pub struct S3Bucket {
    sandbox: Arc<Sandbox>,
}

impl S3Bucket {
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }

    fn computed(&self, bucket: &str) -> Attributes {
        Attributes::from([
            ("id".to_string(), Value::from(bucket)),
            ("arn".to_string(), Value::from(format!("arn:aws:s3:::{bucket}"))),
            (
                "bucket_domain_name".to_string(),
                Value::from(format!("{bucket}.s3.amazonaws.com")),
            ),
            ("region".to_string(), Value::from(self.sandbox.region())),
        ])
    }
}

impl Handler for S3Bucket {
    fn resource_type(&self) -> &'static str {
        KIND
    }

    fn immutable_attributes(&self) -> &'static [&'static str] {
        &["bucket"]
    }

    fn create(&self, _ctx: &ApplyContext, desired: &Attributes) -> Result<Attributes> {
        let bucket = required_str(desired, "bucket")?;
        if !BUCKET_NAME.is_match(bucket) || bucket.contains("..") {
            bail!("InvalidBucketName: '{bucket}'");
        }

        let dir = self.sandbox.bucket_dir(bucket);
        if dir.exists() {
            bail!("BucketAlreadyOwnedByYou: bucket {bucket} already exists");
        }
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;

        let computed = self.computed(bucket);
        self.sandbox.write_record(KIND, bucket, &merged(desired, &computed))?;
        log::debug!("Created bucket {bucket}");
        Ok(computed)
    }

    fn update(&self, _ctx: &ApplyContext, _prior: &Attributes, desired: &Attributes) -> Result<Attributes> {
        let bucket = required_str(desired, "bucket")?;
        if !self.sandbox.bucket_dir(bucket).is_dir() {
            bail!("NoSuchBucket: {bucket}");
        }
        let computed = self.computed(bucket);
        self.sandbox.write_record(KIND, bucket, &merged(desired, &computed))?;
        Ok(computed)
    }

    fn delete(&self, _ctx: &ApplyContext, prior: &Attributes) -> Result<()> {
        let bucket = required_str(prior, "bucket")?;
        let dir = self.sandbox.bucket_dir(bucket);

        if dir.is_dir() {
            let non_empty = fs::read_dir(&dir)
                .with_context(|| format!("Failed to list {}", dir.display()))?
                .next()
                .is_some();
            if non_empty && !optional_bool(prior, "force_destroy")? {
                bail!("BucketNotEmpty: bucket {bucket} still contains objects");
            }
            fs::remove_dir_all(&dir)
                .with_context(|| format!("Failed to remove {}", dir.display()))?;
        } else {
            log::warn!("Bucket {bucket} was already gone");
        }

        self.sandbox.remove_record(KIND, bucket)?;
        Ok(())
    }
}
