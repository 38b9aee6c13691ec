//! `dockyard outputs` - print recorded stack outputs

use anyhow::Result;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::Context;
use crate::ui;

pub fn run(ctx: &Context, json: bool) -> Result<()> {
    let (stack, _) = super::stack_and_manifest(ctx)?;
    let store = super::open_store(ctx)?;
    let state = super::load_state(&store, &stack)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&state.outputs)?);
        return Ok(());
    }

    if state.outputs.is_empty() {
        ui::info(&format!("Stack {stack} has no outputs"));
        return Ok(());
    }

    print_table(&state.outputs);
    Ok(())
}

/// Print outputs as aligned key/value lines
pub fn print_table(outputs: &BTreeMap<String, Value>) {
    ui::header("Outputs");
    for (name, value) in outputs {
        ui::kv(name, &ui::format_value(value));
    }
}
