use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::{Command, Output};

/// Run a command and capture its output, failing on a non-zero exit
pub fn run_capture(cmd: &str, args: &[&str], cwd: Option<&Path>) -> Result<String> {
    let mut command = Command::new(cmd);
    command.args(args);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let output = command
        .output()
        .with_context(|| format!("Failed to execute: {} {}", cmd, args.join(" ")))?;
    checked(&output, cmd)
}

/// Run a shell snippet with `sh -c`
pub fn run_shell(script: &str, cwd: Option<&Path>, env: &BTreeMap<String, String>) -> Result<String> {
    let mut command = Command::new("sh");
    command.arg("-c").arg(script).envs(env);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let output = command
        .output()
        .with_context(|| format!("Failed to execute: sh -c {script:?}"))?;
    checked(&output, "sh")
}

fn checked(output: &Output, cmd: &str) -> Result<String> {
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("{} failed ({}): {}", cmd, output.status, stderr.trim())
    }
}
