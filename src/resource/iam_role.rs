//! IAM role

use anyhow::{Result, bail};
use declarative::{ApplyContext, Attributes, Handler};
use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, LazyLock};

use super::{Sandbox, merged, required_str, timestamp};

static ROLE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w+=,.@-]{1,64}$").expect("valid role name regex"));

const KIND: &str = "aws_iam_role";

pub struct IamRole {
    sandbox: Arc<Sandbox>,
}

impl IamRole {
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }

    fn computed(&self, name: &str) -> Attributes {
        let unique = blake3::hash(name.as_bytes()).to_hex().to_uppercase();
        Attributes::from([
            ("id".to_string(), Value::from(name)),
            (
                "arn".to_string(),
                Value::from(self.sandbox.global_arn("iam", &format!("role/{name}"))),
            ),
            ("unique_id".to_string(), Value::from(format!("AROA{}", &unique[..17]))),
        ])
    }
}

impl Handler for IamRole {
    fn resource_type(&self) -> &'static str {
        KIND
    }

    fn immutable_attributes(&self) -> &'static [&'static str] {
        &["name"]
    }

    fn create(&self, _ctx: &ApplyContext, desired: &Attributes) -> Result<Attributes> {
        let name = required_str(desired, "name")?;
        if !ROLE_NAME.is_match(name) {
            bail!("invalid role name '{name}'");
        }
        if desired.get("assume_role_policy").is_none() {
            bail!("missing required attribute 'assume_role_policy'");
        }
        if self.sandbox.read_record(KIND, name)?.is_some() {
            bail!("EntityAlreadyExists: role with name {name} already exists");
        }

        let mut computed = self.computed(name);
        computed.insert("create_date".to_string(), timestamp());
        self.sandbox.write_record(KIND, name, &merged(desired, &computed))?;
        log::debug!("Created role {name}");
        Ok(computed)
    }

    fn update(&self, _ctx: &ApplyContext, prior: &Attributes, desired: &Attributes) -> Result<Attributes> {
        let name = required_str(desired, "name")?;
        let Some(existing) = self.sandbox.read_record(KIND, name)? else {
            bail!("NoSuchEntity: role {name} cannot be found");
        };

        let mut computed = self.computed(name);
        if let Some(created) = existing.get("create_date").or_else(|| prior.get("create_date")) {
            computed.insert("create_date".to_string(), created.clone());
        }
        self.sandbox.write_record(KIND, name, &merged(desired, &computed))?;
        Ok(computed)
    }

    fn delete(&self, _ctx: &ApplyContext, prior: &Attributes) -> Result<()> {
        let name = required_str(prior, "name")?;
        if !self.sandbox.remove_record(KIND, name)? {
            log::warn!("Role {name} was already gone");
        }
        Ok(())
    }
}
