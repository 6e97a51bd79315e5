use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crate::error::{CoreError, Result};
use crate::pipeline::condition::evaluate;
use crate::pipeline::context::{PipelineContext, TraceEvent, TraceStatus};
use crate::pipeline::graph::PipelineGraph;
use crate::pipeline::registry::StageRegistry;
use crate::pipeline::stage::StageHandler;

/// Executes a [`PipelineGraph`] node by node in topological order.
///
/// Nodes run strictly one at a time, never as a dispatched layer: a
/// node's gating decision needs to see its predecessors' trace status
/// as of the moment it runs, and that is only deterministic if no two
/// nodes are ever mid-execution at once. Stages that want concurrency
/// (transcoding, transcription) get it from their own internal
/// semaphores, not from this loop.
pub struct PipelineRunner {
    graph: PipelineGraph,
    nodes: HashMap<String, Box<dyn StageHandler>>,
}

impl PipelineRunner {
    pub fn build(graph: PipelineGraph, registry: &StageRegistry) -> Result<Self> {
        let mut nodes = HashMap::new();
        for node_id in &graph.node_ids {
            let config = graph
                .node_configs
                .get(node_id)
                .expect("node_configs is keyed by node_ids");
            let stage = registry.create(&config.type_name, node_id, config.params.clone())?;
            nodes.insert(node_id.clone(), stage);
        }
        Ok(Self { graph, nodes })
    }

    pub async fn run(&self, ctx: &mut PipelineContext) -> Result<()> {
        let order = self.graph.topological_sort()?;
        let mut executed: HashSet<String> = HashSet::new();
        let mut skipped: HashSet<String> = HashSet::new();

        for node_id in order {
            let (should_run, skip_reason) =
                self.should_run_node(&node_id, ctx, &executed, &skipped);

            if !should_run {
                skipped.insert(node_id.clone());
                ctx.trace.push(TraceEvent {
                    node_id: node_id.clone(),
                    status: TraceStatus::Skipped,
                    elapsed_ms: 0,
                    error: None,
                    output_keys: None,
                    skip_reason,
                });
                continue;
            }

            let stage = self.nodes.get(&node_id).expect("node exists in registry");
            let start = Instant::now();

            match stage.run(ctx).await {
                Ok(()) => {
                    executed.insert(node_id.clone());
                    ctx.trace.push(TraceEvent {
                        node_id: node_id.clone(),
                        status: TraceStatus::Completed,
                        elapsed_ms: start.elapsed().as_millis() as u64,
                        error: None,
                        output_keys: Some(
                            stage.output_keys().into_iter().map(String::from).collect(),
                        ),
                        skip_reason: None,
                    });
                }
                Err(e) => {
                    ctx.trace.push(TraceEvent {
                        node_id: node_id.clone(),
                        status: TraceStatus::Failed,
                        elapsed_ms: start.elapsed().as_millis() as u64,
                        error: Some(e.to_string()),
                        output_keys: None,
                        skip_reason: None,
                    });
                    return Err(CoreError::PipelineExecutionError {
                        node_id,
                        cause: e.to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    fn should_run_node(
        &self,
        node_id: &str,
        ctx: &PipelineContext,
        executed: &HashSet<String>,
        skipped: &HashSet<String>,
    ) -> (bool, Option<String>) {
        let predecessors = self.graph.predecessors(node_id);

        if predecessors.is_empty() {
            return (true, None);
        }

        let active: Vec<&(String, Option<String>)> = predecessors
            .iter()
            .filter(|(pred_id, _)| !skipped.contains(pred_id))
            .collect();

        if active.is_empty() {
            return (false, Some("all predecessors skipped".to_string()));
        }

        let namespace = ctx.eval_namespace();

        for (pred_id, condition) in active {
            if !executed.contains(pred_id) {
                continue;
            }

            match condition {
                None => return (true, None),
                Some(cond) => match evaluate(cond, &namespace) {
                    Ok(true) => return (true, None),
                    Ok(false) => continue,
                    // A malformed or unevaluable condition is treated as
                    // not satisfied; it never fails the pipeline.
                    Err(_) => continue,
                },
            }
        }

        (false, Some("no incoming condition satisfied".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::graph::{PipelineConfig, PipelineEdgeConfig, PipelineNodeConfig};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct RecordingStage {
        id: String,
        ran: Arc<AtomicBool>,
        fail: bool,
        set_field: Option<fn(&mut PipelineContext)>,
    }

    #[async_trait]
    impl StageHandler for RecordingStage {
        fn node_id(&self) -> &str {
            &self.id
        }
        fn output_keys(&self) -> Vec<&'static str> {
            vec![]
        }
        async fn run(&self, ctx: &mut PipelineContext) -> Result<()> {
            self.ran.store(true, Ordering::SeqCst);
            if let Some(f) = self.set_field {
                f(ctx);
            }
            if self.fail {
                return Err(CoreError::Other(anyhow::anyhow!("boom")));
            }
            Ok(())
        }
    }

    fn node(id: &str) -> PipelineNodeConfig {
        PipelineNodeConfig {
            id: id.to_string(),
            type_name: id.to_string(),
            params: Default::default(),
        }
    }

    fn edge(source: &str, target: &str, condition: Option<&str>) -> PipelineEdgeConfig {
        PipelineEdgeConfig {
            source: source.to_string(),
            target: target.to_string(),
            condition: condition.map(String::from),
        }
    }

    fn context() -> PipelineContext {
        PipelineContext::new("run-1".to_string(), "url", PathBuf::from("/tmp/bundle"))
    }

    #[tokio::test]
    async fn runs_nodes_with_no_predecessors() {
        let config = PipelineConfig {
            nodes: vec![node("a")],
            edges: vec![],
            entrypoint: None,
        };
        let graph = PipelineGraph::build(&config).unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let mut registry = StageRegistry::new();
        let ran2 = ran.clone();
        registry = registry.register("a", move |id, _| {
            Box::new(RecordingStage { id, ran: ran2.clone(), fail: false, set_field: None })
        });
        let runner = PipelineRunner::build(graph, &registry).unwrap();
        let mut ctx = context();
        runner.run(&mut ctx).await.unwrap();
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(ctx.trace.len(), 1);
        assert_eq!(ctx.trace[0].status, TraceStatus::Completed);
    }

    #[tokio::test]
    async fn skips_when_all_predecessors_skipped() {
        // a --(always false condition)--> b --(no condition)--> c
        let config = PipelineConfig {
            nodes: vec![node("a"), node("b"), node("c")],
            edges: vec![
                edge("a", "b", Some("1 == 2")),
                edge("b", "c", None),
            ],
            entrypoint: None,
        };
        let graph = PipelineGraph::build(&config).unwrap();
        let mut registry = StageRegistry::new();
        for id in ["a", "b", "c"] {
            let ran = Arc::new(AtomicBool::new(false));
            let id_owned = id.to_string();
            registry = registry.register(&id_owned.clone(), move |node_id, _| {
                Box::new(RecordingStage {
                    id: node_id,
                    ran: ran.clone(),
                    fail: false,
                    set_field: None,
                })
            });
        }
        let runner = PipelineRunner::build(graph, &registry).unwrap();
        let mut ctx = context();
        runner.run(&mut ctx).await.unwrap();

        let by_id: HashMap<_, _> = ctx.trace.iter().map(|t| (t.node_id.clone(), t)).collect();
        assert_eq!(by_id["a"].status, TraceStatus::Completed);
        assert_eq!(by_id["b"].status, TraceStatus::Skipped);
        assert_eq!(
            by_id["b"].skip_reason.as_deref(),
            Some("no incoming condition satisfied")
        );
        assert_eq!(by_id["c"].status, TraceStatus::Skipped);
        assert_eq!(
            by_id["c"].skip_reason.as_deref(),
            Some("all predecessors skipped")
        );
    }

    #[tokio::test]
    async fn condition_true_runs_the_node() {
        fn mark_valid(ctx: &mut PipelineContext) {
            ctx.subtitle_valid = Some(true);
        }

        let config = PipelineConfig {
            nodes: vec![node("a"), node("b")],
            edges: vec![edge("a", "b", Some("subtitle_valid == True"))],
            entrypoint: None,
        };
        let graph = PipelineGraph::build(&config).unwrap();
        let ran_a = Arc::new(AtomicBool::new(false));
        let ran_b = Arc::new(AtomicBool::new(false));
        let (ra, rb) = (ran_a.clone(), ran_b.clone());
        let registry = StageRegistry::new()
            .register("a", move |id, _| {
                Box::new(RecordingStage {
                    id,
                    ran: ra.clone(),
                    fail: false,
                    set_field: Some(mark_valid),
                })
            })
            .register("b", move |id, _| {
                Box::new(RecordingStage { id, ran: rb.clone(), fail: false, set_field: None })
            });
        let runner = PipelineRunner::build(graph, &registry).unwrap();
        let mut ctx = context();
        runner.run(&mut ctx).await.unwrap();
        assert!(ran_b.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn node_failure_aborts_the_run() {
        let config = PipelineConfig {
            nodes: vec![node("a")],
            edges: vec![],
            entrypoint: None,
        };
        let graph = PipelineGraph::build(&config).unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let registry = StageRegistry::new().register("a", move |id, _| {
            Box::new(RecordingStage { id, ran: ran.clone(), fail: true, set_field: None })
        });
        let runner = PipelineRunner::build(graph, &registry).unwrap();
        let mut ctx = context();
        let err = runner.run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, CoreError::PipelineExecutionError { .. }));
        assert_eq!(ctx.trace[0].status, TraceStatus::Failed);
    }
}
