//! Local side-effecting trigger
//!
//! Runs `command` through `sh -c` on create. Changing `triggers` replaces the
//! resource and so re-runs the command. An optional `destroy_command` runs
//! when the resource is deleted.

use anyhow::{Result, bail};
use declarative::{ApplyContext, Attributes, Handler};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use super::{Sandbox, merged, optional_str};
use crate::runner;

const KIND: &str = "null_resource";

pub struct NullResource {
    sandbox: Arc<Sandbox>,
}

impl NullResource {
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }

    fn run(&self, ctx: &ApplyContext, attributes: &Attributes, key: &str) -> Result<Option<String>> {
        let Some(command) = optional_str(attributes, key)? else {
            return Ok(None);
        };
        let cwd = optional_str(attributes, "working_dir")?.map(PathBuf::from);
        let env = environment(attributes)?;

        log::info!("{}: running {key}", ctx.address);
        let stdout = runner::run_shell(command, cwd.as_deref(), &env)?;
        if ctx.verbose && !stdout.is_empty() {
            for line in stdout.lines() {
                log::info!("{}: {line}", ctx.address);
            }
        }
        Ok(Some(stdout))
    }
}

/// `environment` as string pairs; scalars are stringified
fn environment(attributes: &Attributes) -> Result<BTreeMap<String, String>> {
    match attributes.get("environment") {
        None | Some(Value::Null) => Ok(BTreeMap::new()),
        Some(Value::Object(map)) => map
            .iter()
            .map(|(k, v)| match v {
                Value::String(s) => Ok((k.clone(), s.clone())),
                Value::Number(_) | Value::Bool(_) => Ok((k.clone(), v.to_string())),
                other => bail!("environment variable '{k}' must be a scalar, got {other}"),
            })
            .collect(),
        Some(other) => bail!("attribute 'environment' must be a table, got {other}"),
    }
}

/// Stable id derived from the address and triggers
fn resource_id(address: &str, attributes: &Attributes) -> String {
    let triggers = attributes
        .get("triggers")
        .map(Value::to_string)
        .unwrap_or_default();
    let hash = blake3::hash(format!("{address}\0{triggers}").as_bytes());
    hash.to_hex()[..16].to_string()
}

impl Handler for NullResource {
    fn resource_type(&self) -> &'static str {
        KIND
    }

    fn immutable_attributes(&self) -> &'static [&'static str] {
        &["triggers", "command"]
    }

    fn create(&self, ctx: &ApplyContext, desired: &Attributes) -> Result<Attributes> {
        let mut computed = Attributes::from([(
            "id".to_string(),
            Value::from(resource_id(&ctx.address, desired)),
        )]);
        if let Some(stdout) = self.run(ctx, desired, "command")? {
            computed.insert("stdout".to_string(), Value::from(stdout));
        }
        self.sandbox
            .write_record(KIND, &ctx.address, &merged(desired, &computed))?;
        Ok(computed)
    }

    fn update(&self, ctx: &ApplyContext, prior: &Attributes, desired: &Attributes) -> Result<Attributes> {
        // Only non-trigger attributes changed; keep the id and the last output
        let mut computed = Attributes::new();
        for key in ["id", "stdout"] {
            if let Some(value) = prior.get(key) {
                computed.insert(key.to_string(), value.clone());
            }
        }
        self.sandbox
            .write_record(KIND, &ctx.address, &merged(desired, &computed))?;
        Ok(computed)
    }

    fn delete(&self, ctx: &ApplyContext, prior: &Attributes) -> Result<()> {
        self.run(ctx, prior, "destroy_command")?;
        self.sandbox.remove_record(KIND, &ctx.address)?;
        Ok(())
    }
}
