use colored::Colorize;
use serde_json::Value;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

// ============================================================================
// Value Formatting
// ============================================================================

/// Longest rendered attribute value before truncation
const MAX_VALUE_LEN: usize = 60;

/// Render an attribute value on one line
pub fn format_value(value: &Value) -> String {
    let rendered = match value {
        Value::String(s) => format!("{s:?}"),
        other => other.to_string(),
    };
    truncate(&rendered, MAX_VALUE_LEN)
}

/// Render an optional value, `(none)` when absent
pub fn format_optional(value: Option<&Value>) -> String {
    value.map_or_else(|| "(none)".to_string(), format_value)
}

/// Truncate a string for display, keeping the start
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{kept}...")
    }
}

/// `1 resource` / `3 resources`
pub fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{count} {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&json!("python3.12")), "\"python3.12\"");
        assert_eq!(format_value(&json!(256)), "256");
        assert_eq!(format_value(&json!(true)), "true");
        assert_eq!(format_value(&json!({ "a": 1 })), "{\"a\":1}");
    }

    #[test]
    fn test_format_value_truncates() {
        let long = "x".repeat(100);
        let rendered = format_value(&json!(long));
        assert_eq!(rendered.chars().count(), MAX_VALUE_LEN);
        assert!(rendered.ends_with("..."));
    }

    #[test]
    fn test_format_optional() {
        assert_eq!(format_optional(None), "(none)");
        assert_eq!(format_optional(Some(&json!(1))), "1");
    }

    #[test]
    fn test_truncate_edge_cases() {
        assert_eq!(truncate("short", 20), "short");
        assert_eq!(truncate("exact", 5), "exact");
        assert_eq!(truncate("test", 3), "...");
        assert_eq!(truncate("", 10), "");
        assert_eq!(truncate("ééééé", 4), "é...");
    }

    #[test]
    fn test_plural() {
        assert_eq!(plural(1, "resource"), "1 resource");
        assert_eq!(plural(0, "resource"), "0 resources");
        assert_eq!(plural(3, "change"), "3 changes");
    }
}
