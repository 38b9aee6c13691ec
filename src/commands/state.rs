//! `dockyard state` - inspect recorded stack state

use anyhow::Result;
use colored::Colorize;
use reconcile::StateStore;

use crate::Context;
use crate::cli::StateCommand;
use crate::ui;

pub fn run(ctx: &Context, cmd: StateCommand) -> Result<()> {
    match cmd {
        StateCommand::List => list(ctx),
        StateCommand::Show { json } => show(ctx, json),
    }
}

fn list(ctx: &Context) -> Result<()> {
    let store = super::open_store(ctx)?;
    let stacks = store.list()?;

    if stacks.is_empty() {
        ui::info(&format!("No stacks recorded in {}", store.dir().display()));
        return Ok(());
    }

    ui::header("Stacks");
    for stack in stacks {
        match store.load(&stack) {
            Ok(state) => {
                let updated = state
                    .updated_at
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "  {:<24} {} resources, serial {}, updated {}",
                    stack.bold(),
                    state.resources.len(),
                    state.serial,
                    updated.dimmed()
                );
            }
            Err(e) => println!("  {:<24} {}", stack.bold(), e.to_string().red()),
        }
    }
    Ok(())
}

fn show(ctx: &Context, json: bool) -> Result<()> {
    let (stack, _) = super::stack_and_manifest(ctx)?;
    let store = super::open_store(ctx)?;
    let state = super::load_state(&store, &stack)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    ui::header(&format!("Stack {stack}"));
    ui::kv("State file", &store.state_file(&stack).display().to_string());
    ui::kv("Serial", &state.serial.to_string());
    if let Some(updated) = state.updated_at {
        ui::kv("Updated", &updated.to_rfc3339());
    }

    if state.is_empty() {
        println!();
        ui::dim("No resources recorded");
        return Ok(());
    }

    println!();
    for (name, resource) in &state.resources {
        println!(
            "  {:<30} {:<10} {}",
            name.bold(),
            resource.resource.kind().to_string(),
            resource.id.dimmed()
        );
        for (key, value) in &resource.outputs {
            if key != "id" {
                ui::dim(&format!("    {key} = {}", ui::format_value(value)));
            }
        }
    }
    Ok(())
}
