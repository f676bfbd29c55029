//! Apply-time resolution of reference expressions against state

use crate::artifact::ArtifactSpec;
use crate::error::{Error, Result};
use crate::reference::{self, Reference};
use crate::state::StateSnapshot;
use crate::types::Attributes;
use serde_json::Value;
use std::collections::BTreeMap;

/// Outputs may reference outputs; this bounds the chain
const MAX_OUTPUT_DEPTH: usize = 32;

/// Resolves `${...}` expressions against recorded resource attributes
pub struct Interpolator<'a> {
    state: &'a StateSnapshot,
    outputs: &'a BTreeMap<String, Value>,
    artifacts: &'a BTreeMap<String, ArtifactSpec>,
}

impl<'a> Interpolator<'a> {
    /// Create an interpolator over a state snapshot
    pub fn new(
        state: &'a StateSnapshot,
        outputs: &'a BTreeMap<String, Value>,
        artifacts: &'a BTreeMap<String, ArtifactSpec>,
    ) -> Self {
        Self {
            state,
            outputs,
            artifacts,
        }
    }

    /// Resolve every attribute of a resource
    pub fn attributes(&self, holder: &str, attributes: &Attributes) -> Result<Attributes> {
        attributes
            .iter()
            .map(|(key, value)| Ok((key.clone(), self.value(holder, value)?)))
            .collect()
    }

    /// Resolve one value
    pub fn value(&self, holder: &str, value: &Value) -> Result<Value> {
        self.value_at_depth(holder, value, 0)
    }

    fn value_at_depth(&self, holder: &str, value: &Value, depth: usize) -> Result<Value> {
        reference::substitute(value, &mut |expression: &str| {
            self.expression(expression, depth)
                .ok_or_else(|| Error::UnresolvedReference {
                    resource: holder.to_string(),
                    reference: expression.to_string(),
                })
        })
    }

    fn expression(&self, expression: &str, depth: usize) -> Option<Value> {
        match Reference::parse(expression).ok()? {
            Reference::Resource { address, attribute } => {
                let snapshot = self.state.get(&address.to_string())?;
                let (first, rest) = match attribute.split_first() {
                    Some((first, rest)) => (first.as_str(), rest),
                    None => ("id", &[][..]),
                };
                reference::lookup_path(snapshot.attributes.get(first)?, rest).cloned()
            }
            Reference::ModuleOutput { module_path, name } => {
                if depth >= MAX_OUTPUT_DEPTH {
                    return None;
                }
                let key = crate::graph::output_key(&module_path, &name);
                let output = self.outputs.get(&key)?;
                self.value_at_depth(&key, output, depth + 1).ok()
            }
            Reference::Artifact { name, attribute } => {
                self.artifacts.get(&name)?.attribute(&attribute)
            }
            Reference::Variable { .. } => None,
        }
    }

    /// Evaluate root outputs; outputs that cannot be resolved yet are left out
    pub fn root_outputs(&self) -> BTreeMap<String, Value> {
        self.outputs
            .iter()
            .filter(|(key, _)| !key.starts_with("module."))
            .filter_map(|(key, value)| match self.value(&format!("output.{key}"), value) {
                Ok(resolved) => Some((key.clone(), resolved)),
                Err(e) => {
                    log::warn!("Output '{key}' is not available: {e}");
                    None
                }
            })
            .collect()
    }
}
