//! Generic resource: records arbitrary attributes
//!
//! Used for module-backed resources that have no provider-specific
//! behavior of their own; the sandbox keeps the record and hands back an id.

use anyhow::Result;
use declarative::{ApplyContext, Attributes, Handler};
use serde_json::Value;
use std::sync::Arc;

use super::{Sandbox, merged, optional_str};

const KIND: &str = "generic_resource";

pub struct GenericResource {
    sandbox: Arc<Sandbox>,
}

impl GenericResource {
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }

    fn put(&self, ctx: &ApplyContext, desired: &Attributes) -> Result<Attributes> {
        let id = optional_str(desired, "name")?.unwrap_or(ctx.address.as_str());
        let computed = Attributes::from([("id".to_string(), Value::from(id))]);
        self.sandbox
            .write_record(KIND, &ctx.address, &merged(desired, &computed))?;
        Ok(computed)
    }
}

impl Handler for GenericResource {
    fn resource_type(&self) -> &'static str {
        KIND
    }

    fn create(&self, ctx: &ApplyContext, desired: &Attributes) -> Result<Attributes> {
        self.put(ctx, desired)
    }

    fn update(&self, ctx: &ApplyContext, _prior: &Attributes, desired: &Attributes) -> Result<Attributes> {
        self.put(ctx, desired)
    }

    fn delete(&self, ctx: &ApplyContext, _prior: &Attributes) -> Result<()> {
        self.sandbox.remove_record(KIND, &ctx.address)?;
        Ok(())
    }
}
