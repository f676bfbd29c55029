//! Artifact builders
//!
//! The native builder packages a source tree into a zip with stable entry
//! order and timestamps, so identical sources produce identical archives.
//! The command builder hands packaging to an external program.

use anyhow::{Context, Result};
use declarative::{ArtifactBuilder, ArtifactSpec};
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::config::BuilderConfig;
use crate::runner;

/// Packages `source_dir` into `output_dir/filename` as a zip
pub struct ZipArtifactBuilder;

impl ArtifactBuilder for ZipArtifactBuilder {
    fn build(&self, spec: &ArtifactSpec) -> Result<PathBuf> {
        let output = spec.output_path();
        let count = zip_dir(&spec.source_dir, &output)?;
        log::info!(
            "Packaged {} files from {} into {}",
            count,
            spec.source_dir.display(),
            output.display()
        );
        Ok(output)
    }
}

/// Zip every file under `source` into `output`; returns the number of entries
pub fn zip_dir(source: &Path, output: &Path) -> Result<usize> {
    if !source.is_dir() {
        anyhow::bail!("source directory {} does not exist", source.display());
    }
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let tmp = output.with_extension("zip.tmp");
    let file = File::create(&tmp).with_context(|| format!("Failed to create {}", tmp.display()))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644);

    let mut count = 0;
    for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", source.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry
            .path()
            .strip_prefix(source)
            .with_context(|| format!("Failed to strip prefix from {}", entry.path().display()))?
            .to_string_lossy()
            .replace('\\', "/");

        zip.start_file(name, options)?;
        let mut input = File::open(entry.path())
            .with_context(|| format!("Failed to read {}", entry.path().display()))?;
        io::copy(&mut input, &mut zip)?;
        count += 1;
    }

    zip.finish()?;
    fs::rename(&tmp, output)
        .with_context(|| format!("Failed to move archive into {}", output.display()))?;
    Ok(count)
}

/// Runs `<command> [args..] <source_dir> <output_dir> <filename>`
pub struct CommandArtifactBuilder {
    command: String,
    args: Vec<String>,
    cwd: PathBuf,
}

impl CommandArtifactBuilder {
    /// Create a builder; relative command paths are resolved against `cwd`
    pub fn new(config: &BuilderConfig, cwd: &Path) -> Self {
        let command = if config.command.contains('/') {
            crate::paths::resolve(cwd, &config.command)
                .to_string_lossy()
                .to_string()
        } else {
            config.command.clone()
        };
        Self {
            command,
            args: config.args.clone(),
            cwd: cwd.to_path_buf(),
        }
    }
}

impl ArtifactBuilder for CommandArtifactBuilder {
    fn build(&self, spec: &ArtifactSpec) -> Result<PathBuf> {
        fs::create_dir_all(&spec.output_dir)
            .with_context(|| format!("Failed to create {}", spec.output_dir.display()))?;

        let source = spec.source_dir.to_string_lossy();
        let output_dir = spec.output_dir.to_string_lossy();
        let mut args: Vec<&str> = self.args.iter().map(String::as_str).collect();
        args.extend([source.as_ref(), output_dir.as_ref(), spec.filename.as_str()]);

        let stdout = runner::run_capture(&self.command, &args, Some(&self.cwd))?;
        if !stdout.is_empty() {
            log::debug!("{}: {}", self.command, stdout);
        }
        Ok(spec.output_path())
    }
}
