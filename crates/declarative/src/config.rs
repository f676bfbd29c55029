//! Declarative configuration model
//!
//! These types are the deserialized form of a configuration document. The
//! engine never reads files itself; callers parse TOML or JSON into a
//! [`Configuration`] and hand it to [`crate::graph::GraphBuilder`].

use crate::artifact::ArtifactSpec;
use crate::types::Attributes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A complete configuration: the root module plus artifacts and sources
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Root module contents
    #[serde(flatten)]
    pub root: ModuleDefinition,
    /// Declared build artifacts
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub artifacts: BTreeMap<String, ArtifactSpec>,
    /// Inline module sources, keyed by source reference
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub module_sources: BTreeMap<String, ModuleDefinition>,
}

/// Body of a module (the root configuration is a module too)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleDefinition {
    /// Input variables
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, VariableDecl>,
    /// Resources declared in this module, in source order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceDecl>,
    /// Nested module instances
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modules: Vec<ModuleCall>,
    /// Named output values
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Value>,
}

/// A module input variable
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableDecl {
    /// Value used when the caller passes none; required if absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A declared resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDecl {
    /// Resource type
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Local name, unique per type within the module
    pub name: String,
    /// Desired attributes
    #[serde(default)]
    pub attributes: Attributes,
    /// Explicit dependencies: `type.name` or `module.<name>` relative to the module
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl ResourceDecl {
    /// Create a declaration with no attributes
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
            attributes: Attributes::new(),
            depends_on: Vec::new(),
        }
    }

    /// Set an attribute (builder style)
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Add an explicit dependency (builder style)
    #[must_use]
    pub fn depends_on(mut self, target: impl Into<String>) -> Self {
        self.depends_on.push(target.into());
        self
    }
}

/// Instantiation of a module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleCall {
    /// Instance name, used in addresses as `module.<name>`
    pub name: String,
    /// Source reference resolved through [`ModuleSources`]
    pub source: String,
    /// Argument bindings for the module's variables
    #[serde(default)]
    pub args: BTreeMap<String, Value>,
}

/// Lookup of module definitions by source reference
pub trait ModuleSources {
    /// Resolve a source reference, or `None` if unknown
    fn resolve(&self, source: &str) -> Option<ModuleDefinition>;
}

impl ModuleSources for BTreeMap<String, ModuleDefinition> {
    fn resolve(&self, source: &str) -> Option<ModuleDefinition> {
        self.get(source).cloned()
    }
}

/// Sources that never resolve
pub struct NoModuleSources;

impl ModuleSources for NoModuleSources {
    fn resolve(&self, _source: &str) -> Option<ModuleDefinition> {
        None
    }
}
