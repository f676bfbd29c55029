//! `stackform state` - inspect and edit recorded state
//!
//! These commands only need the state file, so they keep working when the
//! configuration itself is broken.

use anyhow::{Result, bail};
use colored::Colorize;
use declarative::{FileStateStore, StateSnapshot, StateStore};

use crate::Context;
use crate::cli::StateCommand;
use crate::ui;

pub fn run(ctx: &Context, cmd: StateCommand) -> Result<()> {
    let store = FileStateStore::new(ctx.state_path());
    match cmd {
        StateCommand::List { filter } => list(&store, filter.as_deref()),
        StateCommand::Show { address } => show(&store, &address),
        StateCommand::Rm { addresses } => rm(&store, &addresses),
        StateCommand::Taint { address } => taint(&store, &address),
        StateCommand::Unlock => unlock(&store),
    }
}

fn list(store: &FileStateStore, filter: Option<&str>) -> Result<()> {
    let state = store.load()?;
    for address in matching(&state, filter) {
        let tainted = state.get(address).is_some_and(|s| s.tainted);
        if tainted {
            println!("{} {}", address, "(tainted)".red());
        } else {
            println!("{address}");
        }
    }
    Ok(())
}

/// Recorded addresses containing `filter`, in address order
fn matching<'a>(state: &'a StateSnapshot, filter: Option<&str>) -> Vec<&'a str> {
    state
        .resources
        .keys()
        .filter(|a| filter.is_none_or(|f| a.contains(f)))
        .map(String::as_str)
        .collect()
}

fn show(store: &FileStateStore, address: &str) -> Result<()> {
    let state = store.load()?;
    let Some(snapshot) = state.get(address) else {
        bail!("no resource '{address}' in state");
    };

    ui::header(address);
    ui::kv("type", &snapshot.resource_type);
    if snapshot.tainted {
        ui::kv("status", &"tainted".red().to_string());
    }
    if !snapshot.dependencies.is_empty() {
        ui::kv("depends on", &snapshot.dependencies.join(", "));
    }
    for (artifact, fingerprint) in &snapshot.artifact_fingerprints {
        ui::kv(&format!("artifact {artifact}"), fingerprint);
    }

    println!();
    for (name, value) in &snapshot.attributes {
        let rendered = serde_json::to_string(value)?;
        println!("  {} = {}", name.cyan(), rendered);
    }
    Ok(())
}

fn rm(store: &FileStateStore, addresses: &[String]) -> Result<()> {
    let _lock = store.lock()?;
    let mut state = store.load()?;

    let missing: Vec<&String> = addresses.iter().filter(|a| state.get(a).is_none()).collect();
    if !missing.is_empty() {
        let names: Vec<&str> = missing.iter().map(|s| s.as_str()).collect();
        bail!("not in state: {}", names.join(", "));
    }

    for address in addresses {
        state.remove(address);
        ui::success(&format!("Removed {address} from state"));
    }
    commit(store, &mut state)?;
    ui::dim("The resources themselves were not deleted");
    Ok(())
}

fn taint(store: &FileStateStore, address: &str) -> Result<()> {
    let _lock = store.lock()?;
    let mut state = store.load()?;
    if state.get(address).is_none() {
        bail!("no resource '{address}' in state");
    }
    state.taint(address);
    commit(store, &mut state)?;
    ui::success(&format!("{address} will be replaced on the next apply"));
    Ok(())
}

fn unlock(store: &FileStateStore) -> Result<()> {
    if store.force_unlock()? {
        ui::success(&format!("Removed lock {}", store.lock_path().display()));
    } else {
        ui::info("State is not locked");
    }
    Ok(())
}

fn commit(store: &FileStateStore, state: &mut StateSnapshot) -> Result<()> {
    state.serial += 1;
    state.last_updated = Some(chrono::Utc::now());
    store.save(state)?;
    Ok(())
}
