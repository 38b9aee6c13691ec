//! `dockyard plan` - preview what apply would change

use anyhow::Result;
use reconcile::diff;

use crate::Context;
use crate::engine;

pub fn run(ctx: &Context) -> Result<()> {
    let loaded = super::load(ctx)?;
    let store = super::open_store(ctx)?;

    let previous = super::load_state(&store, &loaded.stack)?;
    let plan = diff(&previous, &loaded.graph);
    log::debug!(
        "Stack '{}' at serial {}: {:?}",
        loaded.stack,
        previous.serial,
        plan.summary()
    );

    engine::display_plan(&loaded.stack, &plan, ctx.verbose > 0);
    Ok(())
}
