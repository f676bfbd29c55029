mod builder;
mod cli;
mod commands;
mod config;
mod engine;
mod paths;
mod progress;
mod resource;
mod runner;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use colored::Colorize;
use cli::{Cli, Command};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    /// Stack file given with `--config`
    pub config: PathBuf,
    /// State file override from `--state-file` or the environment
    pub state_file: Option<PathBuf>,
}

impl Context {
    /// Load the stack and build its graph
    pub fn workspace(&self) -> Result<engine::Workspace> {
        engine::Workspace::open(&self.config, self.state_file.as_deref())
    }

    /// State file location, without loading the stack
    pub fn state_path(&self) -> PathBuf {
        paths::state_file(self.state_file.as_deref(), &self.config)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        config: cli.config,
        state_file: cli.state_file,
    };

    match dispatch(&ctx, cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report_error(&e);
            ExitCode::FAILURE
        }
    }
}

fn dispatch(ctx: &Context, command: Command) -> Result<()> {
    match command {
        Command::Validate => commands::validate::run(ctx),
        Command::Plan(args) => commands::plan::run(ctx, args),
        Command::Apply(args) => commands::apply::run(ctx, args),
        Command::Destroy(args) => commands::apply::destroy(ctx, args),
        Command::Output(args) => commands::output::run(ctx, args),
        Command::State(cmd) => commands::state::run(ctx, cmd),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "stackform", &mut io::stdout());
            Ok(())
        }
    }
}

fn report_error(err: &anyhow::Error) {
    ui::error(&err.to_string());
    for cause in err.chain().skip(1) {
        eprintln!("  {} {}", "caused by:".dimmed(), cause);
    }

    if let Some(category) = engine_error(err).map(declarative::Error::category) {
        eprintln!();
        eprintln!("{}", format!("{}. {}", category.description(), category.advice()).dimmed());
    }
}

/// The engine error behind `err`, if any
fn engine_error(err: &anyhow::Error) -> Option<&declarative::Error> {
    err.chain().find_map(|cause| {
        cause
            .downcast_ref::<declarative::Error>()
            .or_else(|| cause.downcast_ref::<declarative::PlanError>().map(|p| p.inner()))
    })
}
