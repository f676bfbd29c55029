//! Reference expressions embedded in attribute values.
//!
//! Supported forms (inside `${...}`):
//! - `type.name` / `type.name.attr[.nested]` - a resource or one of its attributes
//! - `module.a.module.b.type.name.attr` - a resource inside nested modules
//! - `module.a.output` - a module output
//! - `var.name` - a module argument (only valid while expanding a module)
//! - `artifact.name.attr` - an artifact's `path`, `filename`, `fingerprint`,
//!   `source_dir` or `output_dir`

use crate::types::{ResourceAddress, module_prefix};
use regex::Regex;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::LazyLock;

static REFERENCE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]*)\}").expect("reference pattern is valid"));

static WHOLE_REFERENCE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$\{([^}]*)\}$").expect("reference pattern is valid"));

/// A parsed reference expression
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    /// A resource, optionally narrowed to an attribute path
    Resource {
        address: ResourceAddress,
        attribute: Vec<String>,
    },
    /// An output of a module instance
    ModuleOutput {
        module_path: Vec<String>,
        name: String,
    },
    /// A module variable
    Variable { name: String },
    /// An attribute of a build artifact
    Artifact { name: String, attribute: String },
}

impl Reference {
    /// Parse an expression (without the surrounding `${}`)
    pub fn parse(expression: &str) -> Result<Self, String> {
        let expression = expression.trim();
        if expression.is_empty() {
            return Err("empty reference".to_string());
        }

        let parts: Vec<&str> = expression.split('.').collect();
        if let Some(bad) = parts.iter().find(|p| !is_identifier(p)) {
            return Err(format!("invalid segment '{bad}'"));
        }

        match parts.as_slice() {
            ["var", name] => Ok(Self::Variable {
                name: (*name).to_string(),
            }),
            ["var", ..] => Err("expected var.<name>".to_string()),
            ["artifact", name, attribute] => Ok(Self::Artifact {
                name: (*name).to_string(),
                attribute: (*attribute).to_string(),
            }),
            ["artifact", ..] => Err("expected artifact.<name>.<attribute>".to_string()),
            _ => {
                let mut module_path = Vec::new();
                let mut i = 0;
                while i < parts.len() && parts[i] == "module" {
                    let Some(name) = parts.get(i + 1) else {
                        return Err("module reference is missing a module name".to_string());
                    };
                    module_path.push((*name).to_string());
                    i += 2;
                }

                match &parts[i..] {
                    [] => Err("module reference needs an output or a resource".to_string()),
                    [output] if !module_path.is_empty() => Ok(Self::ModuleOutput {
                        module_path,
                        name: (*output).to_string(),
                    }),
                    [_] => Err("expected <type>.<name>".to_string()),
                    [resource_type, name, attribute @ ..] => Ok(Self::Resource {
                        address: ResourceAddress::in_module(&module_path, *resource_type, *name),
                        attribute: attribute.iter().map(|s| (*s).to_string()).collect(),
                    }),
                }
            }
        }
    }

    /// Re-root a scope-relative reference under a module path.
    ///
    /// Variables and artifacts are not module-scoped and are returned as-is.
    pub fn scoped(self, module_path: &[String]) -> Self {
        match self {
            Self::Resource { address, attribute } => {
                let mut full = module_path.to_vec();
                full.extend(address.module_path);
                Self::Resource {
                    address: ResourceAddress {
                        module_path: full,
                        ..address
                    },
                    attribute,
                }
            }
            Self::ModuleOutput {
                module_path: inner,
                name,
            } => {
                let mut full = module_path.to_vec();
                full.extend(inner);
                Self::ModuleOutput {
                    module_path: full,
                    name,
                }
            }
            other => other,
        }
    }

    /// Render as a `${...}` string value
    pub fn to_value(&self) -> Value {
        Value::String(format!("${{{self}}}"))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource { address, attribute } => {
                write!(f, "{address}")?;
                for segment in attribute {
                    write!(f, ".{segment}")?;
                }
                Ok(())
            }
            Self::ModuleOutput { module_path, name } => {
                write!(f, "{}{name}", module_prefix(module_path))
            }
            Self::Variable { name } => write!(f, "var.{name}"),
            Self::Artifact { name, attribute } => write!(f, "artifact.{name}.{attribute}"),
        }
    }
}

fn is_identifier(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Collect every raw expression embedded in a value, in document order
pub fn expressions(value: &Value) -> Vec<String> {
    let mut found = Vec::new();
    collect_expressions(value, &mut found);
    found
}

fn collect_expressions(value: &Value, found: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            for caps in REFERENCE_REGEX.captures_iter(s) {
                found.push(caps[1].to_string());
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_expressions(v, found)),
        Value::Object(map) => map.values().for_each(|v| collect_expressions(v, found)),
        _ => {}
    }
}

/// Replace every embedded expression using `lookup`.
///
/// A string that consists of exactly one expression is replaced by the
/// looked-up value itself, keeping its JSON type. Expressions embedded in
/// longer strings are rendered as text.
pub fn substitute<E, F>(value: &Value, lookup: &mut F) -> Result<Value, E>
where
    F: FnMut(&str) -> Result<Value, E>,
{
    match value {
        Value::String(s) => substitute_str(s, lookup),
        Value::Array(items) => items
            .iter()
            .map(|v| substitute(v, lookup))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, v) in map {
                out.insert(key.clone(), substitute(v, lookup)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn substitute_str<E, F>(s: &str, lookup: &mut F) -> Result<Value, E>
where
    F: FnMut(&str) -> Result<Value, E>,
{
    if let Some(caps) = WHOLE_REFERENCE_REGEX.captures(s) {
        return lookup(&caps[1]);
    }

    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    for caps in REFERENCE_REGEX.captures_iter(s) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&s[last..whole.start()]);
        out.push_str(&render(&lookup(&caps[1])?));
        last = whole.end();
    }
    out.push_str(&s[last..]);
    Ok(Value::String(out))
}

/// Render a value for embedding in a string
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Follow an attribute path into a value (object keys or array indices)
pub fn lookup_path<'a>(value: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_resource() {
        let r = Reference::parse("aws_iam_role.lambda_exec.arn").unwrap();
        assert_eq!(
            r,
            Reference::Resource {
                address: ResourceAddress::new("aws_iam_role", "lambda_exec"),
                attribute: vec!["arn".to_string()],
            }
        );
        assert_eq!(r.to_string(), "aws_iam_role.lambda_exec.arn");
    }

    #[test]
    fn test_parse_nested_module_resource() {
        let r = Reference::parse("module.level1.module.level2.aws_lambda_function.this.arn")
            .unwrap();
        match r {
            Reference::Resource { address, attribute } => {
                assert_eq!(address.module_path, vec!["level1", "level2"]);
                assert_eq!(address.resource_type, "aws_lambda_function");
                assert_eq!(attribute, vec!["arn"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_output_variable_artifact() {
        assert_eq!(
            Reference::parse("module.lambda.function_arn").unwrap(),
            Reference::ModuleOutput {
                module_path: vec!["lambda".to_string()],
                name: "function_arn".to_string(),
            }
        );
        assert_eq!(
            Reference::parse("var.role_arn").unwrap(),
            Reference::Variable {
                name: "role_arn".to_string()
            }
        );
        assert_eq!(
            Reference::parse("artifact.lambda_zip.path").unwrap(),
            Reference::Artifact {
                name: "lambda_zip".to_string(),
                attribute: "path".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(Reference::parse("").is_err());
        assert!(Reference::parse("single").is_err());
        assert!(Reference::parse("module.only").is_err());
        assert!(Reference::parse("module").is_err());
        assert!(Reference::parse("module.a.module").is_err());
        assert!(Reference::parse("var.a.b").is_err());
        assert!(Reference::parse("artifact.zip").is_err());
        assert!(Reference::parse("a..b").is_err());
        assert!(Reference::parse("a.b c").is_err());
    }

    #[test]
    fn test_scoped() {
        let r = Reference::parse("aws_s3_bucket.code.id")
            .unwrap()
            .scoped(&["outer".to_string()]);
        assert_eq!(r.to_string(), "module.outer.aws_s3_bucket.code.id");

        let v = Reference::parse("var.x").unwrap().scoped(&["outer".to_string()]);
        assert_eq!(v.to_string(), "var.x");
    }

    #[test]
    fn test_expressions() {
        let value = json!({
            "role": "${aws_iam_role.exec.arn}",
            "env": { "BUCKET": "s3://${aws_s3_bucket.b.id}/${var.prefix}" },
            "layers": ["${aws_lambda_layer_version.deps.arn}"],
            "memory": 128
        });
        let found = expressions(&value);
        assert_eq!(found.len(), 4);
        assert!(found.contains(&"var.prefix".to_string()));
    }

    #[test]
    fn test_substitute_keeps_type_for_whole_reference() {
        let value = json!("${var.memory}");
        let out: Result<Value, ()> = substitute(&value, &mut |_| Ok(json!(256)));
        assert_eq!(out.unwrap(), json!(256));
    }

    #[test]
    fn test_substitute_embedded() {
        let value = json!({ "key": "code/${var.name}-${var.version}.zip" });
        let out: Result<Value, ()> = substitute(&value, &mut |expr| {
            Ok(match expr {
                "var.name" => json!("handler"),
                _ => json!(3),
            })
        });
        assert_eq!(out.unwrap(), json!({ "key": "code/handler-3.zip" }));
    }

    #[test]
    fn test_substitute_propagates_errors() {
        let value = json!(["ok", "${missing.thing}"]);
        let out: Result<Value, String> =
            substitute(&value, &mut |expr| Err(format!("no {expr}")));
        assert_eq!(out.unwrap_err(), "no missing.thing");
    }

    #[test]
    fn test_lookup_path() {
        let value = json!({ "tags": { "Name": "code" }, "layers": ["a", "b"] });
        assert_eq!(
            lookup_path(&value, &["tags".to_string(), "Name".to_string()]),
            Some(&json!("code"))
        );
        assert_eq!(
            lookup_path(&value, &["layers".to_string(), "1".to_string()]),
            Some(&json!("b"))
        );
        assert_eq!(lookup_path(&value, &["nope".to_string()]), None);
    }
}
