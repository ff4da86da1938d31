//! Node synchronization and orphan-reservation recovery.

use crate::context::ControlContext;
use neuronetes_inventory::NodeFilter;
use neuronetes_types::Result;
use std::collections::HashSet;
use tracing::{info, warn};

/// Sync the inventory from the external node source, then release
/// reservations that no live replica record backs. Run on every tick and
/// first thing after leader takeover, so a crash between reserve and bind
/// leaks nothing.
pub async fn reconcile_nodes(ctx: &ControlContext) -> Result<()> {
    let facts = ctx.nodes.fetch().await?;
    let seen: HashSet<_> = facts.iter().map(|f| f.id.clone()).collect();

    for fact in facts {
        ctx.residency.ensure_node(&fact.id, fact.cache_capacity_bytes);
        ctx.inventory.upsert(fact);
    }
    for snapshot in ctx.inventory.list(&NodeFilter::default()) {
        if !seen.contains(&snapshot.fact.id) {
            warn!(node = %snapshot.fact.id, "node vanished from the external inventory");
            ctx.inventory.remove(&snapshot.fact.id);
            ctx.residency.remove_node(&snapshot.fact.id);
        }
    }

    let mut released = 0;
    for (node, replica) in ctx.inventory.assignments() {
        let live = ctx
            .tracker
            .get(&replica)
            .map(|r| !r.state.is_terminal())
            .unwrap_or(false);
        if !live {
            ctx.inventory.release(&node, &replica);
            released += 1;
        }
    }
    if released > 0 {
        info!(released, "orphan reservations released");
    }
    Ok(())
}
