//! `dockyard validate` - check the manifest without touching state

use anyhow::{Context as AnyhowContext, Result};
use colored::Colorize;

use crate::Context;
use crate::ui;

pub fn run(ctx: &Context) -> Result<()> {
    let loaded = super::load(ctx)?;

    if !ctx.quiet {
        ui::header(&format!("Stack {}", loaded.stack));
        ui::kv("Manifest", &ctx.file.display().to_string());
        ui::kv("Resources", &loaded.graph.len().to_string());
        ui::kv("Outputs", &loaded.manifest.outputs.len().to_string());

        println!();
        println!("  {}", "Execution order".bold());
        for (i, name) in loaded.graph.topological_order().iter().enumerate() {
            let Some(resource) = loaded.graph.get(name) else {
                continue;
            };
            let deps = resource.dependencies();
            let after = if deps.is_empty() {
                String::new()
            } else {
                format!(
                    " (after {})",
                    deps.into_iter().collect::<Vec<_>>().join(", ")
                )
            };
            println!(
                "  {:>3}. {:<30} {}{}",
                i + 1,
                name,
                resource.kind().to_string().dimmed(),
                after.dimmed()
            );
        }
        println!();
    }

    for (name, declaration) in &loaded.manifest.outputs {
        declaration
            .check(|resource| loaded.graph.contains(resource))
            .with_context(|| format!("Output '{name}' is invalid"))?;
    }

    ui::success(&format!("{} is valid", ctx.file.display()));
    Ok(())
}
