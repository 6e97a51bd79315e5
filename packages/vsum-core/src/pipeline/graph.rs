//! DAG structure: adjacency, cycle detection, topological order and
//! entrypoint resolution over a declarative pipeline configuration.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineNodeConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub params: HashMap<String, JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEdgeConfig {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub condition: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub nodes: Vec<PipelineNodeConfig>,
    pub edges: Vec<PipelineEdgeConfig>,
    #[serde(default)]
    pub entrypoint: Option<String>,
}

/// A directed acyclic graph built from a [`PipelineConfig`]. Construction
/// validates edge endpoints, rejects cycles and resolves the entrypoint;
/// a `PipelineGraph` that exists is always executable.
#[derive(Debug)]
pub struct PipelineGraph {
    pub node_ids: HashSet<String>,
    pub node_configs: HashMap<String, PipelineNodeConfig>,
    pub entrypoint: String,
    config_order: Vec<String>,
    adjacency: HashMap<String, Vec<(String, Option<String>)>>,
    reverse_adjacency: HashMap<String, Vec<(String, Option<String>)>>,
    in_degree: HashMap<String, usize>,
}

impl PipelineGraph {
    pub fn build(config: &PipelineConfig) -> Result<Self> {
        let node_ids: HashSet<String> = config.nodes.iter().map(|n| n.id.clone()).collect();
        let node_configs: HashMap<String, PipelineNodeConfig> = config
            .nodes
            .iter()
            .map(|n| (n.id.clone(), n.clone()))
            .collect();
        let config_order: Vec<String> = config.nodes.iter().map(|n| n.id.clone()).collect();

        let mut adjacency: HashMap<String, Vec<(String, Option<String>)>> = HashMap::new();
        let mut reverse_adjacency: HashMap<String, Vec<(String, Option<String>)>> = HashMap::new();
        let mut in_degree: HashMap<String, usize> =
            node_ids.iter().map(|id| (id.clone(), 0)).collect();

        for edge in &config.edges {
            if !node_ids.contains(&edge.source) {
                return Err(CoreError::InvalidInput(format!(
                    "edge source node does not exist: {}",
                    edge.source
                )));
            }
            if !node_ids.contains(&edge.target) {
                return Err(CoreError::InvalidInput(format!(
                    "edge target node does not exist: {}",
                    edge.target
                )));
            }
            adjacency
                .entry(edge.source.clone())
                .or_default()
                .push((edge.target.clone(), edge.condition.clone()));
            reverse_adjacency
                .entry(edge.target.clone())
                .or_default()
                .push((edge.source.clone(), edge.condition.clone()));
            *in_degree.entry(edge.target.clone()).or_insert(0) += 1;
        }

        let graph = Self {
            node_ids,
            node_configs,
            entrypoint: String::new(),
            config_order,
            adjacency,
            reverse_adjacency,
            in_degree,
        };

        graph.detect_cycle()?;
        let entrypoint = graph.resolve_entrypoint(config.entrypoint.as_deref())?;

        Ok(Self { entrypoint, ..graph })
    }

    fn detect_cycle(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum State {
            Unvisited,
            Visiting,
            Done,
        }

        let mut state: HashMap<&str, State> =
            self.node_ids.iter().map(|id| (id.as_str(), State::Unvisited)).collect();
        let mut path: Vec<String> = Vec::new();

        fn dfs<'a>(
            node_id: &'a str,
            adjacency: &'a HashMap<String, Vec<(String, Option<String>)>>,
            state: &mut HashMap<&'a str, State>,
            path: &mut Vec<String>,
        ) -> Result<()> {
            match state.get(node_id) {
                Some(State::Visiting) => {
                    let cycle_start = path.iter().position(|n| n == node_id).unwrap_or(0);
                    let mut cycle = path[cycle_start..].to_vec();
                    cycle.push(node_id.to_string());
                    return Err(CoreError::DagCycle(cycle.join(" -> ")));
                }
                Some(State::Done) => return Ok(()),
                _ => {}
            }

            state.insert(node_id, State::Visiting);
            path.push(node_id.to_string());

            if let Some(targets) = adjacency.get(node_id) {
                for (target, _) in targets {
                    dfs(target, adjacency, state, path)?;
                }
            }

            path.pop();
            state.insert(node_id, State::Done);
            Ok(())
        }

        for node_id in &self.node_ids {
            if state.get(node_id.as_str()) == Some(&State::Unvisited) {
                dfs(node_id, &self.adjacency, &mut state, &mut path)?;
            }
        }
        Ok(())
    }

    fn resolve_entrypoint(&self, explicit: Option<&str>) -> Result<String> {
        if let Some(explicit) = explicit {
            if !self.node_ids.contains(explicit) {
                return Err(CoreError::InvalidInput(format!(
                    "explicit entrypoint node does not exist: {explicit}"
                )));
            }
            return Ok(explicit.to_string());
        }

        let zero_in_degree: Vec<&String> = self
            .config_order
            .iter()
            .filter(|id| self.in_degree.get(id.as_str()).copied().unwrap_or(0) == 0)
            .collect();

        match zero_in_degree.first() {
            Some(id) => Ok((*id).clone()),
            None => Err(CoreError::InvalidInput(
                "no entrypoint node: every node has a predecessor".to_string(),
            )),
        }
    }

    /// Kahn's algorithm. Cycles are already excluded by `build`, so this
    /// always produces a full ordering.
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        let mut in_degree = self.in_degree.clone();
        let mut queue: std::collections::VecDeque<String> = self
            .config_order
            .iter()
            .filter(|id| in_degree.get(id.as_str()).copied().unwrap_or(0) == 0)
            .cloned()
            .collect();
        let mut result = Vec::new();

        while let Some(node_id) = queue.pop_front() {
            result.push(node_id.clone());
            if let Some(targets) = self.adjacency.get(&node_id) {
                for (target, _) in targets {
                    if let Some(d) = in_degree.get_mut(target) {
                        *d -= 1;
                        if *d == 0 {
                            queue.push_back(target.clone());
                        }
                    }
                }
            }
        }

        if result.len() != self.node_ids.len() {
            return Err(CoreError::DagCycle(
                "topological sort failed to cover every node".to_string(),
            ));
        }
        Ok(result)
    }

    pub fn predecessors(&self, node_id: &str) -> &[(String, Option<String>)] {
        self.reverse_adjacency
            .get(node_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn successors(&self, node_id: &str) -> &[(String, Option<String>)] {
        self.adjacency.get(node_id).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> PipelineNodeConfig {
        PipelineNodeConfig {
            id: id.to_string(),
            type_name: "noop".to_string(),
            params: HashMap::new(),
        }
    }

    fn edge(source: &str, target: &str, condition: Option<&str>) -> PipelineEdgeConfig {
        PipelineEdgeConfig {
            source: source.to_string(),
            target: target.to_string(),
            condition: condition.map(|s| s.to_string()),
        }
    }

    #[test]
    fn linear_graph_resolves_entrypoint_and_order() {
        let config = PipelineConfig {
            nodes: vec![node("a"), node("b"), node("c")],
            edges: vec![edge("a", "b", None), edge("b", "c", None)],
            entrypoint: None,
        };
        let graph = PipelineGraph::build(&config).unwrap();
        assert_eq!(graph.entrypoint, "a");
        assert_eq!(graph.topological_sort().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn explicit_entrypoint_is_honored() {
        let config = PipelineConfig {
            nodes: vec![node("a"), node("b")],
            edges: vec![edge("a", "b", None)],
            entrypoint: Some("b".to_string()),
        };
        let graph = PipelineGraph::build(&config).unwrap();
        assert_eq!(graph.entrypoint, "b");
    }

    #[test]
    fn unknown_explicit_entrypoint_is_rejected() {
        let config = PipelineConfig {
            nodes: vec![node("a")],
            edges: vec![],
            entrypoint: Some("ghost".to_string()),
        };
        assert!(PipelineGraph::build(&config).is_err());
    }

    #[test]
    fn multiple_zero_in_degree_nodes_pick_first_in_config_order() {
        let config = PipelineConfig {
            nodes: vec![node("a"), node("b"), node("c")],
            edges: vec![edge("b", "c", None)],
            entrypoint: None,
        };
        let graph = PipelineGraph::build(&config).unwrap();
        assert_eq!(graph.entrypoint, "a");
    }

    #[test]
    fn no_zero_in_degree_node_is_rejected() {
        let config = PipelineConfig {
            nodes: vec![node("a"), node("b")],
            edges: vec![edge("a", "b", None), edge("b", "a", None)],
            entrypoint: None,
        };
        // This also happens to be a cycle, which is caught first.
        assert!(PipelineGraph::build(&config).is_err());
    }

    #[test]
    fn cycle_is_detected_with_path() {
        let config = PipelineConfig {
            nodes: vec![node("a"), node("b"), node("c")],
            edges: vec![edge("a", "b", None), edge("b", "c", None), edge("c", "a", None)],
            entrypoint: None,
        };
        let err = PipelineGraph::build(&config).unwrap_err();
        match err {
            CoreError::DagCycle(path) => assert!(path.contains("->")),
            other => panic!("expected DagCycle, got {other:?}"),
        }
    }

    #[test]
    fn unknown_edge_endpoint_is_rejected() {
        let config = PipelineConfig {
            nodes: vec![node("a")],
            edges: vec![edge("a", "ghost", None)],
            entrypoint: None,
        };
        assert!(PipelineGraph::build(&config).is_err());
    }

    #[test]
    fn predecessors_and_successors_are_queryable() {
        let config = PipelineConfig {
            nodes: vec![node("a"), node("b")],
            edges: vec![edge("a", "b", Some("video_duration > 0"))],
            entrypoint: None,
        };
        let graph = PipelineGraph::build(&config).unwrap();
        assert_eq!(graph.predecessors("b").len(), 1);
        assert_eq!(graph.successors("a").len(), 1);
        assert!(graph.predecessors("a").is_empty());
    }
}
