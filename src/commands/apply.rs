//! `dockyard apply` - converge the stack to the manifest

use anyhow::{Context as AnyhowContext, Result, bail};
use colored::Colorize;
use reconcile::Reconciler;

use crate::Context;
use crate::cli::ApplyArgs;
use crate::engine::{self, BarProgress};
use crate::provider::DockerProvider;
use crate::ui;

pub fn run(ctx: &Context, args: ApplyArgs) -> Result<()> {
    let loaded = super::load(ctx)?;
    let options = loaded.manifest.execute_options(args.jobs, args.retries)?;
    let store = super::open_store(ctx)?;

    log::info!(
        "Applying stack '{}' with {} job(s), {} attempt(s) per call",
        loaded.stack,
        options.jobs,
        options.retry.max_attempts
    );

    let reconciler = Reconciler::new(store, DockerProvider::new())
        .with_options(options)
        .with_outputs(loaded.manifest.outputs.clone());

    // 1. Show what will change
    let plan = reconciler
        .plan(&loaded.stack, &loaded.graph)
        .with_context(|| format!("Failed to plan stack '{}'", loaded.stack))?;
    engine::display_plan(&loaded.stack, &plan, ctx.verbose > 0);

    if args.dry_run {
        println!();
        ui::info("Dry run - no changes made");
        return Ok(());
    }

    // 2. Confirm (unless --yes)
    if plan.has_changes() && !args.yes && !engine::confirm_proceed("Apply these changes?")? {
        println!();
        println!("  {} Aborted", "✗".red());
        return Ok(());
    }

    // 3. Converge
    let cancel = super::cancel_on_interrupt()?;
    let mut progress = BarProgress::new(ctx.quiet, ctx.verbose > 0);
    let report = reconciler
        .apply_planned(&loaded.stack, &loaded.graph, &plan, &cancel, &mut progress)
        .with_context(|| format!("Failed to apply stack '{}'", loaded.stack))?;

    // 4. Summary
    if report.plan.has_changes() {
        engine::print_summary(&report.summary(), "Apply");
        engine::print_failures(&report);
    }
    if report.saved {
        log::info!("Saved state for '{}' at serial {}", report.stack, report.state.serial);
    }
    if !ctx.quiet && !report.state.outputs.is_empty() {
        super::outputs::print_table(&report.state.outputs);
    }

    if cancel.is_cancelled() {
        bail!("Apply interrupted; progress so far has been recorded");
    }
    if !report.is_success() {
        bail!(
            "{} operation(s) did not complete; run apply again to retry",
            report.failures().count()
        );
    }
    Ok(())
}
