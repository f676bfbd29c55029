//! Module expansion - turns a [`Configuration`] into a [`ResourceGraph`]
//!
//! Every module instance is flattened into the graph. Inside a module,
//! `var.*` references are replaced with the bound argument (or the
//! variable's default) and scope-relative references are rewritten to
//! absolute addresses, so the graph only ever sees absolute references.

use crate::config::{Configuration, ModuleDefinition, ModuleSources};
use crate::error::{Error, Result};
use crate::graph::{ResourceGraph, module_address};
use crate::reference::{self, Reference};
use crate::types::{Attributes, ResourceAddress, module_prefix};
use serde_json::Value;
use std::collections::BTreeMap;

/// Expands configurations into resolved resource graphs
pub struct GraphBuilder<'a> {
    inline: &'a BTreeMap<String, ModuleDefinition>,
    sources: &'a dyn ModuleSources,
    graph: ResourceGraph,
    source_stack: Vec<String>,
}

impl<'a> GraphBuilder<'a> {
    /// Expand `config` and resolve its references.
    ///
    /// Module sources are looked up in the configuration's inline
    /// `module_sources` first, then in `sources`.
    pub fn build(config: &'a Configuration, sources: &'a dyn ModuleSources) -> Result<ResourceGraph> {
        let mut builder = GraphBuilder {
            inline: &config.module_sources,
            sources,
            graph: ResourceGraph::new(),
            source_stack: Vec::new(),
        };

        for spec in config.artifacts.values() {
            builder.graph.add_artifact(spec.clone());
        }
        builder.instantiate(&[], &config.root, &BTreeMap::new())?;

        let mut graph = builder.graph;
        graph.resolve_references()?;
        log::info!(
            "Loaded {} resources from {} module instances",
            graph.len(),
            graph.modules().len()
        );
        Ok(graph)
    }

    fn resolve_source(&self, source: &str) -> Option<ModuleDefinition> {
        self.inline
            .get(source)
            .cloned()
            .or_else(|| self.sources.resolve(source))
    }

    fn instantiate(
        &mut self,
        path: &[String],
        definition: &ModuleDefinition,
        args: &BTreeMap<String, Value>,
    ) -> Result<()> {
        let owner = if path.is_empty() {
            "root module".to_string()
        } else {
            module_address(path)
        };
        let vars = bind_variables(&owner, definition, args)?;

        for decl in &definition.resources {
            let address = ResourceAddress::in_module(path, &decl.resource_type, &decl.name);
            let holder = address.to_string();

            let mut attributes = Attributes::new();
            for (key, value) in &decl.attributes {
                attributes.insert(key.clone(), rewrite(value, path, &vars, &holder)?);
            }
            let prefix = module_prefix(path);
            let depends_on = decl
                .depends_on
                .iter()
                .map(|d| format!("{prefix}{d}"))
                .collect();

            self.graph.add_resource(address, attributes, depends_on)?;
        }

        for call in &definition.modules {
            let mut child_path = path.to_vec();
            child_path.push(call.name.clone());
            let child_owner = module_address(&child_path);

            if self.source_stack.contains(&call.source) {
                let mut cycle = self.source_stack.clone();
                cycle.push(call.source.clone());
                return Err(Error::CyclicDependency { cycle });
            }
            let child = self
                .resolve_source(&call.source)
                .ok_or_else(|| Error::UnknownModuleSource {
                    module: child_owner.clone(),
                    source_ref: call.source.clone(),
                })?;

            let mut child_args = BTreeMap::new();
            for (key, value) in &call.args {
                child_args.insert(key.clone(), rewrite(value, path, &vars, &child_owner)?);
            }

            log::debug!("Expanding {} from '{}'", child_owner, call.source);
            self.graph
                .add_module(child_path.clone(), call.source.clone(), child_args.clone());

            self.source_stack.push(call.source.clone());
            let result = self.instantiate(&child_path, &child, &child_args);
            self.source_stack.pop();
            result?;
        }

        for (name, value) in &definition.outputs {
            let holder = format!("{}output.{name}", module_prefix(path));
            let value = rewrite(value, path, &vars, &holder)?;
            self.graph.add_output(path, name, value);
        }

        Ok(())
    }
}

/// Bind declared variables to argument values or defaults
fn bind_variables(
    owner: &str,
    definition: &ModuleDefinition,
    args: &BTreeMap<String, Value>,
) -> Result<BTreeMap<String, Value>> {
    for name in args.keys() {
        if !definition.variables.contains_key(name) {
            log::warn!("{owner}: argument '{name}' is not a declared variable, ignoring");
        }
    }

    let mut vars = BTreeMap::new();
    for (name, decl) in &definition.variables {
        let value = args
            .get(name)
            .or(decl.default.as_ref())
            .cloned()
            .ok_or_else(|| Error::UnresolvedReference {
                resource: owner.to_string(),
                reference: format!("var.{name}"),
            })?;
        vars.insert(name.clone(), value);
    }
    Ok(vars)
}

/// Rewrite references in a value from module scope to absolute form
fn rewrite(
    value: &Value,
    path: &[String],
    vars: &BTreeMap<String, Value>,
    holder: &str,
) -> Result<Value> {
    reference::substitute(value, &mut |expression: &str| {
        let parsed = Reference::parse(expression).map_err(|message| Error::InvalidReference {
            resource: holder.to_string(),
            expression: expression.to_string(),
            message,
        })?;

        match parsed {
            Reference::Variable { name } => {
                vars.get(&name)
                    .cloned()
                    .ok_or_else(|| Error::UnresolvedReference {
                        resource: holder.to_string(),
                        reference: expression.to_string(),
                    })
            }
            artifact @ Reference::Artifact { .. } => Ok(artifact.to_value()),
            other => Ok(other.scoped(path).to_value()),
        }
    })
}
