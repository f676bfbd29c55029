//! Attribute diffs between desired configuration and recorded state

use crate::types::{ActionKind, Attributes};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// One changed attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// Attribute name
    pub name: String,
    /// Recorded value (None if newly added)
    pub before: Option<Value>,
    /// Desired value (None if removed)
    pub after: Option<Value>,
    /// Whether the change cannot be applied in place
    pub forces_replacement: bool,
}

/// Compare recorded config against desired attributes.
///
/// Only keys whose values differ are returned, in key order.
pub fn diff_attributes(
    before: &Attributes,
    after: &Attributes,
    immutable: &[&str],
) -> Vec<AttributeChange> {
    let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
    keys.into_iter()
        .filter_map(|key| {
            let old = before.get(key);
            let new = after.get(key);
            (old != new).then(|| AttributeChange {
                name: key.clone(),
                before: old.cloned(),
                after: new.cloned(),
                forces_replacement: immutable.contains(&key.as_str()),
            })
        })
        .collect()
}

/// Whether any change forces replacement
pub fn requires_replacement(changes: &[AttributeChange]) -> bool {
    changes.iter().any(|c| c.forces_replacement)
}

/// Plan summary statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    /// Number of resources to create
    pub additions: usize,
    /// Number of resources to update in place
    pub modifications: usize,
    /// Number of resources to destroy and re-create
    pub replacements: usize,
    /// Number of resources to delete
    pub removals: usize,
    /// Number of unchanged resources
    pub unchanged: usize,
}

impl DiffSummary {
    /// Count planned action kinds
    pub fn from_actions<'a>(kinds: impl IntoIterator<Item = &'a ActionKind>) -> Self {
        let mut summary = Self::default();
        for kind in kinds {
            match kind {
                ActionKind::Create => summary.additions += 1,
                ActionKind::Update => summary.modifications += 1,
                ActionKind::Replace => summary.replacements += 1,
                ActionKind::Delete => summary.removals += 1,
                ActionKind::NoOp => summary.unchanged += 1,
            }
        }
        summary
    }

    /// Total number of changes
    pub fn total(&self) -> usize {
        self.additions + self.modifications + self.replacements + self.removals
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

/// Group items by a key (typically the resource type), keeping input order
/// within each group
pub fn group_by_type<'a, T, F>(items: &'a [T], key: F) -> BTreeMap<String, Vec<&'a T>>
where
    F: Fn(&T) -> &str,
{
    let mut groups: BTreeMap<String, Vec<&T>> = BTreeMap::new();
    for item in items {
        groups.entry(key(item).to_string()).or_default().push(item);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: Value) -> Attributes {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_no_changes() {
        let a = attrs(json!({ "runtime": "python3.12", "memory": 128 }));
        assert!(diff_attributes(&a, &a.clone(), &["runtime"]).is_empty());
    }

    #[test]
    fn test_changes_and_replacement() {
        let before = attrs(json!({ "runtime": "python3.11", "memory": 128, "old": true }));
        let after = attrs(json!({ "runtime": "python3.12", "memory": 256, "new": "x" }));
        let changes = diff_attributes(&before, &after, &["runtime"]);

        let names: Vec<&str> = changes.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["memory", "new", "old", "runtime"]);
        assert!(requires_replacement(&changes));

        let old = changes.iter().find(|c| c.name == "old").unwrap();
        assert_eq!(old.after, None);
        let new = changes.iter().find(|c| c.name == "new").unwrap();
        assert_eq!(new.before, None);
    }

    #[test]
    fn test_mutable_changes_do_not_replace() {
        let before = attrs(json!({ "memory": 128 }));
        let after = attrs(json!({ "memory": 256 }));
        assert!(!requires_replacement(&diff_attributes(&before, &after, &["runtime"])));
    }

    #[test]
    fn test_summary() {
        let kinds = [
            ActionKind::Create,
            ActionKind::Create,
            ActionKind::Replace,
            ActionKind::NoOp,
            ActionKind::Delete,
        ];
        let summary = DiffSummary::from_actions(&kinds);
        assert_eq!(summary.additions, 2);
        assert_eq!(summary.replacements, 1);
        assert_eq!(summary.total(), 4);
        assert!(summary.has_changes());
        assert!(!DiffSummary::from_actions(&[ActionKind::NoOp]).has_changes());
    }

    #[test]
    fn test_group_by_type() {
        let items = vec![("aws_s3_bucket", 1), ("aws_iam_role", 2), ("aws_s3_bucket", 3)];
        let groups = group_by_type(&items, |(t, _)| *t);
        assert_eq!(groups["aws_s3_bucket"].len(), 2);
        assert_eq!(groups["aws_s3_bucket"][1].1, 3);
        assert_eq!(groups.keys().next().map(String::as_str), Some("aws_iam_role"));
    }
}
