//! Table and YAML rendering for `get` and `describe`.

use neuronetes_store::{Kind, Store};
use neuronetes_types::{
    AgentClassSpec, AgentClassStatus, Condition, ControlError, ModelSpec, ModelStatus, PoolSpec,
    PoolStatus, Result, ToolBindingSpec, ToolBindingStatus,
};

fn yaml<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_yaml::to_string(value)
        .map_err(|e| ControlError::Internal(format!("yaml rendering: {e}")))
}

fn not_found(kind: Kind, id: &str) -> ControlError {
    ControlError::Validation(format!("{kind}/{id} not found"))
}

/// `nnctl get`.
pub async fn get(store: &Store, kind: Kind, id: Option<&str>) -> Result<()> {
    match kind {
        Kind::Model => match id {
            Some(id) => {
                let spec = store
                    .get::<ModelSpec>(id)
                    .await?
                    .ok_or_else(|| not_found(kind, id))?;
                print!("{}", yaml(&spec)?);
            }
            None => {
                println!("{:<24} {:<10} {:<12} {:<10}", "ID", "SHARDS", "PRIORITY", "PHASE");
                for spec in store.list::<ModelSpec>().await? {
                    let status = store
                        .read_status::<ModelStatus>(spec.id.as_str())
                        .await?
                        .unwrap_or_default();
                    println!(
                        "{:<24} {:<10} {:<12} {:<10?}",
                        spec.id, spec.shard_count,
                        format!("{:?}", spec.cache_priority).to_lowercase(),
                        status.phase
                    );
                }
            }
        },
        Kind::AgentClass => match id {
            Some(id) => {
                let spec = store
                    .get::<AgentClassSpec>(id)
                    .await?
                    .ok_or_else(|| not_found(kind, id))?;
                print!("{}", yaml(&spec)?);
            }
            None => {
                println!("{:<24} {:<24} {:<10}", "ID", "MODEL", "PHASE");
                for spec in store.list::<AgentClassSpec>().await? {
                    let status = store
                        .read_status::<AgentClassStatus>(spec.id.as_str())
                        .await?
                        .unwrap_or_default();
                    println!("{:<24} {:<24} {:<10?}", spec.id, spec.model_ref, status.phase);
                }
            }
        },
        Kind::Pool => match id {
            Some(id) => {
                let spec = store
                    .get::<PoolSpec>(id)
                    .await?
                    .ok_or_else(|| not_found(kind, id))?;
                print!("{}", yaml(&spec)?);
            }
            None => {
                println!(
                    "{:<24} {:>4} {:>4} {:>9} {:>6} {:>5}  {:<10}",
                    "ID", "MIN", "MAX", "REPLICAS", "READY", "WARM", "PHASE"
                );
                for spec in store.list::<PoolSpec>().await? {
                    let status = store
                        .read_status::<PoolStatus>(spec.id.as_str())
                        .await?
                        .unwrap_or_default();
                    println!(
                        "{:<24} {:>4} {:>4} {:>9} {:>6} {:>5}  {:<10?}",
                        spec.id,
                        spec.min_replicas,
                        spec.max_replicas,
                        status.replicas,
                        status.ready_replicas,
                        status.warm_replicas,
                        status.phase
                    );
                }
            }
        },
        Kind::ToolBinding => match id {
            Some(id) => {
                let spec = store
                    .get::<ToolBindingSpec>(id)
                    .await?
                    .ok_or_else(|| not_found(kind, id))?;
                print!("{}", yaml(&spec)?);
            }
            None => {
                println!("{:<24} {:<24} {:<20} {:<10}", "ID", "AGENTCLASS", "TOOL", "PHASE");
                for spec in store.list::<ToolBindingSpec>().await? {
                    let status = store
                        .read_status::<ToolBindingStatus>(spec.id.as_str())
                        .await?
                        .unwrap_or_default();
                    println!(
                        "{:<24} {:<24} {:<20} {:<10?}",
                        spec.id, spec.agent_class_ref, spec.tool_name, status.phase
                    );
                }
            }
        },
    }
    Ok(())
}

fn print_conditions(conditions: &[Condition]) {
    if conditions.is_empty() {
        println!("Conditions: none");
        return;
    }
    println!("Conditions:");
    println!(
        "  {:<14} {:<8} {:<24} {:<28} MESSAGE",
        "TYPE", "STATUS", "REASON", "LAST TRANSITION"
    );
    for condition in conditions {
        println!(
            "  {:<14} {:<8?} {:<24} {:<28} {}",
            condition.condition_type,
            condition.status,
            condition.reason,
            condition.last_transition_time.to_rfc3339(),
            condition.message
        );
    }
}

/// `nnctl describe`.
pub async fn describe(store: &Store, kind: Kind, id: &str) -> Result<()> {
    match kind {
        Kind::Model => {
            let spec = store
                .get::<ModelSpec>(id)
                .await?
                .ok_or_else(|| not_found(kind, id))?;
            let status = store
                .read_status::<ModelStatus>(id)
                .await?
                .unwrap_or_default();
            print!("{}", yaml(&spec)?);
            println!("---");
            println!("Phase: {:?} (observed generation {})", status.phase, status.observed_generation);
            if !status.resident_nodes.is_empty() {
                println!(
                    "Resident on: {}",
                    status
                        .resident_nodes
                        .iter()
                        .map(|n| n.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
            print_conditions(&status.conditions);
        }
        Kind::AgentClass => {
            let spec = store
                .get::<AgentClassSpec>(id)
                .await?
                .ok_or_else(|| not_found(kind, id))?;
            let status = store
                .read_status::<AgentClassStatus>(id)
                .await?
                .unwrap_or_default();
            print!("{}", yaml(&spec)?);
            println!("---");
            println!("Phase: {:?} (observed generation {})", status.phase, status.observed_generation);
            print_conditions(&status.conditions);
        }
        Kind::Pool => {
            let spec = store
                .get::<PoolSpec>(id)
                .await?
                .ok_or_else(|| not_found(kind, id))?;
            let status = store
                .read_status::<PoolStatus>(id)
                .await?
                .unwrap_or_default();
            print!("{}", yaml(&spec)?);
            println!("---");
            println!("Phase: {:?} (observed generation {})", status.phase, status.observed_generation);
            println!(
                "Replicas: {} total, {} ready, {} warm",
                status.replicas, status.ready_replicas, status.warm_replicas
            );
            if let Some(last) = status.last_scale_time {
                println!("Last scale: {}", last.to_rfc3339());
            }
            for sample in &status.current_metrics {
                match sample.value.value() {
                    Some(value) => println!("Signal {}: {value:.1}", sample.signal),
                    None => println!("Signal {}: stale", sample.signal),
                }
            }
            print_conditions(&status.conditions);
        }
        Kind::ToolBinding => {
            let spec = store
                .get::<ToolBindingSpec>(id)
                .await?
                .ok_or_else(|| not_found(kind, id))?;
            let status = store
                .read_status::<ToolBindingStatus>(id)
                .await?
                .unwrap_or_default();
            print!("{}", yaml(&spec)?);
            println!("---");
            println!("Phase: {:?} (observed generation {})", status.phase, status.observed_generation);
            print_conditions(&status.conditions);
        }
    }
    Ok(())
}
