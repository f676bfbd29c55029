//! `stackform output`

use anyhow::{Result, bail};
use declarative::{Interpolator, StateStore};

use crate::Context;
use crate::cli::OutputArgs;
use crate::engine::executor::{print_outputs, render_output};
use crate::ui;

pub fn run(ctx: &Context, args: OutputArgs) -> Result<()> {
    let ws = ctx.workspace()?;
    let state = ws.store.load()?;
    let outputs =
        Interpolator::new(&state, ws.graph.outputs(), ws.graph.artifacts()).root_outputs();

    if let Some(name) = &args.name {
        let Some(value) = outputs.get(name) else {
            bail!("output '{name}' is not defined or not yet available");
        };
        if args.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{}", render_output(value));
        }
        return Ok(());
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outputs)?);
    } else if outputs.is_empty() {
        ui::info("No outputs available; run apply first");
    } else {
        print_outputs(&outputs);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::{STACK, context};
    use declarative::{CancellationToken, ExecuteOptions, PlanOptions, execute_simple};

    fn args(name: Option<&str>, json: bool) -> OutputArgs {
        OutputArgs {
            name: name.map(String::from),
            json,
        }
    }

    #[test]
    fn test_outputs_before_and_after_apply() {
        let (_dir, ctx) = context(STACK);
        // Nothing applied yet: listing works, a named output does not
        run(&ctx, args(None, false)).unwrap();
        assert!(run(&ctx, args(Some("bucket_arn"), false)).is_err());

        let ws = ctx.workspace().unwrap();
        let plan = ws.plan(&PlanOptions::default()).unwrap();
        let report =
            execute_simple(&plan, &ws.env(CancellationToken::new()), &ExecuteOptions::default())
                .unwrap();
        assert!(report.is_success(), "{:?}", report.outcomes);

        run(&ctx, args(None, false)).unwrap();
        run(&ctx, args(None, true)).unwrap();
        run(&ctx, args(Some("bucket_arn"), true)).unwrap();
        run(&ctx, args(Some("readme_etag"), false)).unwrap();

        let err = run(&ctx, args(Some("missing"), false)).unwrap_err();
        assert!(err.to_string().contains("'missing'"));
    }
}
