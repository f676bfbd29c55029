//! Path resolution for stackform
//!
//! Relative paths in a stack configuration are resolved against the
//! directory holding the configuration file, so a stack can be applied
//! from any working directory.
//!
//! # Environment Variables
//!
//! - `STACKFORM_STATE_FILE` - Override the state file location
//!
//! # Defaults
//!
//! - state file: `<config dir>/stackform.state.json`
//! - provider root: `<config dir>/.stackform/provider`
//! - artifact output: `<config dir>/.stackform/build`

use std::path::{Path, PathBuf};

/// Environment variable for the state file override
pub const ENV_STATE_FILE: &str = "STACKFORM_STATE_FILE";

/// Configuration file used when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "stackform.toml";

/// State file name used when no override is given
pub const DEFAULT_STATE_FILE: &str = "stackform.state.json";

/// Working directory created next to the configuration
const WORK_DIR: &str = ".stackform";

/// Directory containing the configuration file
pub fn config_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Resolve the state file location
///
/// Priority:
/// 1. `--state-file` / `STACKFORM_STATE_FILE`
/// 2. `stackform.state.json` next to the configuration
pub fn state_file(override_path: Option<&Path>, config_path: &Path) -> PathBuf {
    if let Some(path) = override_path {
        let path = expand(&path.to_string_lossy());
        log::debug!("Using state file override: {}", path.display());
        return path;
    }
    config_dir(config_path).join(DEFAULT_STATE_FILE)
}

/// Default root directory of the sandbox provider
pub fn provider_root(config_dir: &Path) -> PathBuf {
    config_dir.join(WORK_DIR).join("provider")
}

/// Default output directory for artifacts
pub fn build_dir(config_dir: &Path) -> PathBuf {
    config_dir.join(WORK_DIR).join("build")
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

/// Expand a path and anchor it at `base` when it is relative
pub fn resolve(base: &Path, path: &str) -> PathBuf {
    let expanded = expand(path);
    if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    /// Helper to run a test with temporary env var
    ///
    /// # Safety
    /// This function uses unsafe env::set_var/remove_var which can cause issues
    /// if other threads read environment variables concurrently.
    /// Only use in single-threaded test contexts.
    fn with_env_var<F, R>(key: &str, value: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let original = env::var(key).ok();
        // SAFETY: Tests run in isolation and don't read env vars concurrently
        unsafe { env::set_var(key, value) };
        let result = f();
        match original {
            // SAFETY: Tests run in isolation
            Some(v) => unsafe { env::set_var(key, v) },
            None => unsafe { env::remove_var(key) },
        }
        result
    }

    #[test]
    fn test_config_dir() {
        assert_eq!(config_dir(Path::new("stackform.toml")), PathBuf::from("."));
        assert_eq!(
            config_dir(Path::new("infra/prod/stack.json")),
            PathBuf::from("infra/prod")
        );
    }

    #[test]
    fn test_state_file_default() {
        let path = state_file(None, Path::new("infra/stackform.toml"));
        assert_eq!(path, PathBuf::from("infra/stackform.state.json"));
    }

    #[test]
    fn test_state_file_override() {
        let path = state_file(
            Some(Path::new("/var/lib/stack/state.json")),
            Path::new("infra/stackform.toml"),
        );
        assert_eq!(path, PathBuf::from("/var/lib/stack/state.json"));
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let base = Path::new("/work/stack");
        assert_eq!(resolve(base, "src/lambda"), PathBuf::from("/work/stack/src/lambda"));
        assert_eq!(resolve(base, "/opt/code"), PathBuf::from("/opt/code"));
    }

    #[test]
    fn test_expand_with_env_var() {
        with_env_var("STACKFORM_TEST_VAR", "test_value", || {
            let result = expand("/path/$STACKFORM_TEST_VAR/file");
            assert_eq!(result, PathBuf::from("/path/test_value/file"));
        });
    }

    #[test]
    fn test_expand_unknown_env_var_unchanged() {
        let result = expand("/path/$NONEXISTENT_VAR_12345/file");
        assert_eq!(result, PathBuf::from("/path/$NONEXISTENT_VAR_12345/file"));
    }

    #[test]
    fn test_work_dirs() {
        let dir = Path::new("/work");
        assert_eq!(provider_root(dir), PathBuf::from("/work/.stackform/provider"));
        assert_eq!(build_dir(dir), PathBuf::from("/work/.stackform/build"));
    }
}
