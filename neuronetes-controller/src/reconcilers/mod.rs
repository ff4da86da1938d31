//! Per-kind reconcilers.
//!
//! Each reconciler fetches the desired record and its observed status,
//! calls the relevant core component, and writes status back with the
//! observed generation. Reconciles are idempotent: replaying one with
//! unchanged desired and observed state produces no side effect.

pub mod admission;
pub mod model;
pub mod node;
pub mod pool;

use crate::context::ControlContext;
use neuronetes_store::Kind;
use neuronetes_types::Result;

/// Dispatch one reconcile by kind.
pub async fn reconcile(ctx: &ControlContext, kind: Kind, id: &str) -> Result<()> {
    match kind {
        Kind::Pool => pool::reconcile_pool(ctx, id).await,
        Kind::Model => model::reconcile_model(ctx, id).await,
        Kind::AgentClass => admission::reconcile_agent_class(ctx, id).await,
        Kind::ToolBinding => admission::reconcile_tool_binding(ctx, id).await,
    }
}
