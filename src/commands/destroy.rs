//! `dockyard destroy` - delete every resource recorded for the stack

use anyhow::{Context as AnyhowContext, Result, bail};
use colored::Colorize;
use reconcile::{ExecuteOptions, Graph, Reconciler};

use crate::Context;
use crate::cli::DestroyArgs;
use crate::engine::{self, BarProgress};
use crate::provider::DockerProvider;
use crate::ui;

pub fn run(ctx: &Context, args: DestroyArgs) -> Result<()> {
    let (stack, manifest) = super::stack_and_manifest(ctx)?;
    let options = match &manifest {
        Some(manifest) => manifest.execute_options(args.jobs, None)?,
        None => ExecuteOptions {
            jobs: args.jobs.unwrap_or(ExecuteOptions::default().jobs).max(1),
            ..ExecuteOptions::default()
        },
    };

    let store = super::open_store(ctx)?;
    // Without a manifest the declarations recorded by the last apply are used
    let outputs = manifest.map(|m| m.outputs).unwrap_or_default();
    let reconciler = Reconciler::new(store, DockerProvider::new())
        .with_options(options)
        .with_outputs(outputs);

    let plan = reconciler
        .plan(&stack, &Graph::empty())
        .with_context(|| format!("Failed to plan destroy of stack '{stack}'"))?;
    if !plan.has_changes() {
        ui::success(&format!("Stack {stack} has no recorded resources"));
        return Ok(());
    }
    engine::display_plan(&stack, &plan, false);

    if !args.yes && !engine::confirm_proceed(&format!("Destroy every resource of stack {stack}?"))? {
        println!();
        println!("  {} Aborted", "✗".red());
        return Ok(());
    }

    let cancel = super::cancel_on_interrupt()?;
    let mut progress = BarProgress::new(ctx.quiet, ctx.verbose > 0);
    let report = reconciler
        .destroy(&stack, &cancel, &mut progress)
        .with_context(|| format!("Failed to destroy stack '{stack}'"))?;

    engine::print_summary(&report.summary(), "Destroy");
    engine::print_failures(&report);

    if cancel.is_cancelled() {
        bail!("Destroy interrupted; remaining resources are still recorded");
    }
    if !report.is_success() {
        bail!(
            "{} resource(s) could not be deleted and remain in state",
            report.failures().count()
        );
    }
    Ok(())
}
