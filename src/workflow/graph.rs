/// Step graph validation using petgraph
///
/// Converts a definition into a directed graph (trigger → steps via `next`,
/// `on_true` and `on_false`) and rejects anything that could not be walked
/// safely: duplicate ids, dangling successors, cycles and malformed step
/// configs. Acyclic graphs guarantee every run terminates.

use crate::runtime::executor::check_config;
use crate::workflow::types::{StepKind, WorkflowDefinition};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct StepGraph {
    graph: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
    root: NodeIndex,
}

impl StepGraph {
    /// Validate `definition` and build its graph
    pub fn build(definition: &WorkflowDefinition) -> Result<Self, String> {
        if definition.name.trim().is_empty() {
            return Err("workflow name must not be empty".to_string());
        }
        if definition.trigger.kind != StepKind::Trigger {
            return Err(format!(
                "trigger step '{}' must have kind 'trigger'",
                definition.trigger.id
            ));
        }

        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for step in definition.all_steps() {
            if step.id.trim().is_empty() {
                return Err("step ids must not be empty".to_string());
            }
            if step.kind == StepKind::Trigger && step.id != definition.trigger.id {
                return Err(format!("step '{}' is a second trigger", step.id));
            }
            let kind = step.executor_kind()?;
            check_config(kind, &step.config).map_err(|e| format!("step '{}': {}", step.id, e))?;

            if index.contains_key(&step.id) {
                return Err(format!("duplicate step id '{}'", step.id));
            }
            index.insert(step.id.clone(), graph.add_node(step.id.clone()));
        }

        for step in definition.all_steps() {
            let from = index[&step.id];
            for successor in step.successors() {
                let to = index.get(&successor).ok_or_else(|| {
                    format!("step '{}' references unknown step '{}'", step.id, successor)
                })?;
                graph.update_edge(from, *to, ());
            }
        }

        toposort(&graph, None).map_err(|cycle| {
            format!(
                "workflow contains a cycle through step '{}'",
                graph[cycle.node_id()]
            )
        })?;

        let root = index[&definition.trigger.id];
        Ok(Self { graph, index, root })
    }

    /// Step ids reachable from the trigger (trigger included)
    pub fn reachable(&self) -> HashSet<String> {
        let mut reachable = HashSet::new();
        let mut dfs = Dfs::new(&self.graph, self.root);
        while let Some(node) = dfs.next(&self.graph) {
            reachable.insert(self.graph[node].clone());
        }
        reachable
    }

    /// Declared steps that no path from the trigger can reach
    pub fn unreachable(&self) -> Vec<String> {
        let reachable = self.reachable();
        let mut orphaned: Vec<String> = self
            .index
            .keys()
            .filter(|id| !reachable.contains(*id))
            .cloned()
            .collect();
        orphaned.sort();
        orphaned
    }

    pub fn step_count(&self) -> usize {
        self.graph.node_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn definition(steps: Value) -> WorkflowDefinition {
        serde_json::from_value(json!({
            "name": "wf",
            "trigger": {"id": "start", "kind": "trigger", "next": ["a"]},
            "steps": steps
        }))
        .unwrap()
    }

    fn wait(id: &str, next: &[&str]) -> Value {
        json!({"id": id, "kind": "wait", "config": {"duration_ms": 1}, "next": next})
    }

    #[test]
    fn test_valid_graph_with_branches() {
        let def = definition(json!([
            {"id": "a", "kind": "condition",
             "config": {"expression": "x > 1", "on_true": ["b"], "on_false": ["c"]}},
            wait("b", &["d"]),
            wait("c", &["d"]),
            wait("d", &[]),
            wait("orphan", &[])
        ]));

        let graph = StepGraph::build(&def).unwrap();
        assert_eq!(graph.step_count(), 6);
        assert_eq!(graph.unreachable(), vec!["orphan".to_string()]);
    }

    #[test]
    fn test_rejects_cycles() {
        let def = definition(json!([wait("a", &["b"]), wait("b", &["a"])]));
        let err = StepGraph::build(&def).unwrap_err();
        assert!(err.contains("cycle"));
    }

    #[test]
    fn test_rejects_dangling_and_duplicate_ids() {
        let dangling = definition(json!([wait("a", &["ghost"])]));
        assert!(StepGraph::build(&dangling).unwrap_err().contains("ghost"));

        let duplicate = definition(json!([wait("a", &[]), wait("a", &[])]));
        assert!(StepGraph::build(&duplicate).unwrap_err().contains("duplicate"));
    }

    #[test]
    fn test_rejects_malformed_configs() {
        let bad_db = definition(json!([
            {"id": "a", "kind": "action", "action": "database_operation",
             "config": {"operation": "truncate", "table": "users"}}
        ]));
        assert!(StepGraph::build(&bad_db).unwrap_err().contains("truncate"));

        let second_trigger = definition(json!([{"id": "a", "kind": "trigger"}]));
        assert!(StepGraph::build(&second_trigger).is_err());
    }
}
