//! Command implementations for the dockyard CLI
//!
//! - `validate` - check the manifest and show the execution order
//! - `plan` - preview what apply would change
//! - `apply` - converge the stack to the manifest
//! - `destroy` - delete everything recorded for the stack
//! - `outputs` / `state` - read recorded state

pub mod apply;
pub mod destroy;
pub mod outputs;
pub mod plan;
pub mod state;
pub mod validate;

use anyhow::{Context as AnyhowContext, Result};
use reconcile::{CancelToken, FileStateStore, Graph, StackState, StateStore};

use crate::Context;
use crate::manifest::{self, DEFAULT_STACK, Manifest};
use crate::paths;
use crate::ui;

/// A parsed manifest with its validated graph and resolved stack name
pub struct Loaded {
    pub manifest: Manifest,
    pub graph: Graph,
    pub stack: String,
}

/// Load the manifest named by `--file` and build its graph
pub fn load(ctx: &Context) -> Result<Loaded> {
    let (manifest, ignored) = manifest::load(&ctx.file)?;
    for key in &ignored {
        ui::warn(&format!(
            "Ignoring unknown key '{}' in {}",
            key,
            ctx.file.display()
        ));
    }

    let graph = manifest
        .build_graph()
        .with_context(|| format!("Invalid resources in {}", ctx.file.display()))?;
    let stack = manifest.stack_name(ctx.stack.as_deref());

    Ok(Loaded {
        manifest,
        graph,
        stack,
    })
}

/// Stack name and manifest for commands that work without a manifest
pub fn stack_and_manifest(ctx: &Context) -> Result<(String, Option<Manifest>)> {
    if !ctx.file.exists() {
        let stack = ctx.stack.clone().unwrap_or_else(|| DEFAULT_STACK.to_string());
        log::debug!(
            "No manifest at {}, using stack {}",
            ctx.file.display(),
            stack
        );
        return Ok((stack, None));
    }

    let (manifest, _) = manifest::load(&ctx.file)?;
    Ok((manifest.stack_name(ctx.stack.as_deref()), Some(manifest)))
}

/// Open the state store under the resolved state directory
pub fn open_store(ctx: &Context) -> Result<FileStateStore> {
    let dir = paths::state_dir(ctx.state_dir.as_deref())?;
    Ok(FileStateStore::new(dir))
}

/// Load the recorded state of a stack
pub fn load_state(store: &FileStateStore, stack: &str) -> Result<StackState> {
    store
        .load(stack)
        .with_context(|| format!("Failed to load state for stack '{stack}'"))
}

/// Cancel the run on Ctrl+C; running provider calls still finish
pub fn cancel_on_interrupt() -> Result<CancelToken> {
    let token = CancelToken::new();
    let handler = token.clone();

    ctrlc::set_handler(move || {
        if !handler.is_cancelled() {
            eprintln!("Interrupted - waiting for running operations to finish");
        }
        handler.cancel();
    })
    .context("Error setting Ctrl+C handler")?;

    Ok(token)
}
