//! `stackform apply` and `stackform destroy`

use anyhow::{Result, bail};
use declarative::{ExecutionReport, PlanOptions};

use crate::Context;
use crate::cli::{ApplyArgs, DestroyArgs};
use crate::engine::{self, ApplyOptions};
use crate::ui;

pub fn run(ctx: &Context, args: ApplyArgs) -> Result<()> {
    let ws = ctx.workspace()?;
    let plan = ws.plan(&PlanOptions {
        targets: args.targets,
        destroy: false,
    })?;

    let opts = ApplyOptions {
        dry_run: args.dry_run,
        jobs: args.jobs,
        yes: args.yes,
        verbose: ctx.verbose > 0,
        quiet: ctx.quiet,
    };
    let report = engine::run(&plan, &ws.env(engine::interrupt_token()), &opts)?;
    check(report.as_ref())
}

pub fn destroy(ctx: &Context, args: DestroyArgs) -> Result<()> {
    let ws = ctx.workspace()?;
    let plan = ws.plan(&PlanOptions {
        targets: args.targets,
        destroy: true,
    })?;

    if plan.is_empty() {
        ui::info("Nothing recorded in state; nothing to destroy");
        return Ok(());
    }

    let opts = ApplyOptions {
        dry_run: false,
        jobs: args.jobs,
        yes: args.yes,
        verbose: ctx.verbose > 0,
        quiet: ctx.quiet,
    };
    let report = engine::run(&plan, &ws.env(engine::interrupt_token()), &opts)?;
    check(report.as_ref())
}

/// Turn an unsuccessful run into a non-zero exit.
///
/// Declining the confirmation counts as unsuccessful: nothing was applied.
fn check(report: Option<&ExecutionReport>) -> Result<()> {
    let Some(report) = report else {
        return Ok(());
    };
    if report.declined {
        bail!("apply declined; no changes were made");
    }
    let failed = report.failures().count();
    if failed > 0 {
        bail!("{} failed", ui::plural(failed, "resource"));
    }
    if report.cancelled {
        bail!("run cancelled before every resource was applied");
    }
    Ok(())
}
