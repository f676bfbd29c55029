//! `stackform plan`

use anyhow::Result;
use declarative::PlanOptions;

use crate::Context;
use crate::cli::PlanArgs;
use crate::engine::differ;

pub fn run(ctx: &Context, args: PlanArgs) -> Result<()> {
    let ws = ctx.workspace()?;
    let plan = ws.plan(&PlanOptions {
        targets: args.targets,
        destroy: args.destroy,
    })?;

    differ::display_plan(&plan);
    log::debug!(
        "Planned {} actions against state serial {}",
        plan.len(),
        plan.state_serial
    );
    Ok(())
}
