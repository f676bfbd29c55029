//! `stackform validate`

use anyhow::Result;

use crate::Context;
use crate::ui;

pub fn run(ctx: &Context) -> Result<()> {
    let ws = ctx.workspace()?;
    let graph = &ws.graph;

    if ctx.quiet {
        return Ok(());
    }

    ui::success(&format!("{} is valid", ws.stack.path.display()));
    ui::kv("resources", &graph.len().to_string());
    ui::kv("modules", &graph.modules().len().to_string());
    ui::kv("artifacts", &graph.artifacts().len().to_string());
    let root_outputs = graph
        .outputs()
        .keys()
        .filter(|k| !k.starts_with("module."))
        .count();
    ui::kv("outputs", &root_outputs.to_string());

    if ctx.verbose > 0 {
        ui::header("Apply order");
        for idx in graph.topological_order() {
            let node = &graph.nodes()[idx];
            let deps: Vec<String> = graph
                .dependencies(idx)
                .iter()
                .map(|&d| graph.nodes()[d].address.to_string())
                .collect();
            if deps.is_empty() {
                println!("  {}", node.address);
            } else {
                println!("  {}", node.address);
                ui::dim(&format!("  after {}", deps.join(", ")));
            }
        }
    }

    Ok(())
}
