use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use crate::agent::Agent;
use crate::errors::{AgentError, AgentResult};

/// Reserved edge target that terminates a walk.
pub const END: &str = "__end__";

/// What a node does when the walk reaches it. A node may embed a whole
/// other agent, so flows compose without changing the executor contract.
#[derive(Clone)]
pub enum Step {
    /// Invoke the model over the accumulated conversation
    Model,
    /// Dispatch every tool call of the latest assistant message
    Tools,
    /// Ask the model for the schema-conformant structured result
    Extract,
    /// Run an embedded agent to completion and append its final message
    Delegate(Arc<Agent>),
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Model => write!(f, "Model"),
            Step::Tools => write!(f, "Tools"),
            Step::Extract => write!(f, "Extract"),
            Step::Delegate(agent) => write!(f, "Delegate({})", agent.name()),
        }
    }
}

/// Outgoing edge of a node. A conditional edge branches on whether the
/// latest assistant message requested further action.
#[derive(Debug, Clone, PartialEq)]
pub enum Edge {
    Direct(String),
    Conditional { when_act: String, otherwise: String },
}

impl Edge {
    fn targets(&self) -> Vec<&str> {
        match self {
            Edge::Direct(target) => vec![target],
            Edge::Conditional {
                when_act,
                otherwise,
            } => vec![when_act, otherwise],
        }
    }
}

/// Accumulates named nodes and edges, then compiles them into an immutable,
/// validated executable graph.
#[derive(Default)]
pub struct GraphBuilder {
    nodes: Vec<(String, Step)>,
    edges: Vec<(String, Edge)>,
    entry: Option<String>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        GraphBuilder::default()
    }

    pub fn add_node<S: Into<String>>(mut self, name: S, step: Step) -> Self {
        self.nodes.push((name.into(), step));
        self
    }

    pub fn add_edge<F: Into<String>, T: Into<String>>(mut self, from: F, to: T) -> Self {
        self.edges.push((from.into(), Edge::Direct(to.into())));
        self
    }

    pub fn add_conditional_edges<F, A, O>(mut self, from: F, when_act: A, otherwise: O) -> Self
    where
        F: Into<String>,
        A: Into<String>,
        O: Into<String>,
    {
        self.edges.push((
            from.into(),
            Edge::Conditional {
                when_act: when_act.into(),
                otherwise: otherwise.into(),
            },
        ));
        self
    }

    pub fn set_entry<S: Into<String>>(mut self, name: S) -> Self {
        self.entry = Some(name.into());
        self
    }

    /// Validate and freeze the graph. Rejects duplicate node names, missing
    /// or unknown entry points, edges naming unknown endpoints, nodes
    /// without an outgoing edge, and nodes unreachable from the entry.
    pub fn compile(self) -> AgentResult<Graph> {
        let mut nodes: HashMap<String, Step> = HashMap::new();
        for (name, step) in self.nodes {
            if name == END {
                return Err(AgentError::GraphConfig(format!(
                    "node name '{}' is reserved",
                    END
                )));
            }
            if nodes.insert(name.clone(), step).is_some() {
                return Err(AgentError::GraphConfig(format!(
                    "duplicate node '{}'",
                    name
                )));
            }
        }

        let entry = self
            .entry
            .ok_or_else(|| AgentError::GraphConfig("no entry point set".to_string()))?;
        if !nodes.contains_key(&entry) {
            return Err(AgentError::GraphConfig(format!(
                "entry point '{}' is not a node",
                entry
            )));
        }

        let mut edges: HashMap<String, Edge> = HashMap::new();
        for (from, edge) in self.edges {
            if !nodes.contains_key(&from) {
                return Err(AgentError::GraphConfig(format!(
                    "edge from unknown node '{}'",
                    from
                )));
            }
            for target in edge.targets() {
                if target != END && !nodes.contains_key(target) {
                    return Err(AgentError::GraphConfig(format!(
                        "edge from '{}' to unknown node '{}'",
                        from, target
                    )));
                }
            }
            if edges.insert(from.clone(), edge).is_some() {
                return Err(AgentError::GraphConfig(format!(
                    "node '{}' has more than one outgoing edge",
                    from
                )));
            }
        }

        for name in nodes.keys() {
            if !edges.contains_key(name) {
                return Err(AgentError::GraphConfig(format!(
                    "node '{}' has no outgoing edge",
                    name
                )));
            }
        }

        // Every node must be reachable from the entry
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        seen.insert(entry.as_str());
        queue.push_back(entry.as_str());
        while let Some(current) = queue.pop_front() {
            if let Some(edge) = edges.get(current) {
                for target in edge.targets() {
                    if target != END && seen.insert(target) {
                        queue.push_back(target);
                    }
                }
            }
        }
        for name in nodes.keys() {
            if !seen.contains(name.as_str()) {
                return Err(AgentError::GraphConfig(format!(
                    "node '{}' is unreachable from entry '{}'",
                    name, entry
                )));
            }
        }

        Ok(Graph {
            entry,
            nodes,
            edges,
        })
    }
}

/// An immutable, validated state machine: the executable form of a builder.
#[derive(Debug)]
pub struct Graph {
    entry: String,
    nodes: HashMap<String, Step>,
    edges: HashMap<String, Edge>,
}

impl Graph {
    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn step(&self, node: &str) -> Option<&Step> {
        self.nodes.get(node)
    }

    pub fn edge(&self, node: &str) -> Option<&Edge> {
        self.edges.get(node)
    }
}
