// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt::Write as _;

use super::node::{Binding, Node, NodeId};

/// A data edge `producer.output -> consumer.input`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub producer: NodeId,
    pub output: String,
    pub consumer: NodeId,
    pub input: String,
}

/// An immutable, validated DAG.
///
/// Only [`GraphBuilder::finalize`](super::GraphBuilder::finalize) creates one,
/// so every `Graph` is acyclic, every required input is bound and the
/// topological order is fixed.
#[derive(Debug)]
pub struct Graph {
    nodes: Vec<Node>,
    consumers: Vec<Vec<NodeId>>,
    producers: Vec<Vec<NodeId>>,
    order: Vec<NodeId>,
    rank: Vec<usize>,
    index: HashMap<String, NodeId>,
}

impl Graph {
    pub(crate) fn new(
        nodes: Vec<Node>,
        consumers: Vec<Vec<NodeId>>,
        producers: Vec<Vec<NodeId>>,
        order: Vec<NodeId>,
    ) -> Self {
        let mut rank = vec![0; nodes.len()];
        for (position, id) in order.iter().enumerate() {
            rank[id.0] = position;
        }
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.name().to_string(), NodeId(i)))
            .collect();
        Self {
            nodes,
            consumers,
            producers,
            order,
            rank,
            index,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Panics on an id from another graph.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, node)| (NodeId(i), node))
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.index.get(name).copied()
    }

    /// All expanded members of a template, in expansion order.
    pub fn members_of(&self, template: &str) -> Vec<NodeId> {
        self.nodes()
            .filter(|(_, node)| node.template() == Some(template))
            .map(|(id, _)| id)
            .collect()
    }

    pub fn topological_order(&self) -> &[NodeId] {
        &self.order
    }

    /// Position of a node in the topological order.
    pub fn rank(&self, id: NodeId) -> usize {
        self.rank[id.0]
    }

    pub fn consumers(&self, id: NodeId) -> &[NodeId] {
        &self.consumers[id.0]
    }

    pub fn producers(&self, id: NodeId) -> &[NodeId] {
        &self.producers[id.0]
    }

    /// Every node reachable from `id`, in topological order, excluding `id` itself.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<NodeId> = self.consumers(id).iter().copied().collect();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next) {
                queue.extend(self.consumers(next).iter().copied());
            }
        }
        let mut found: Vec<NodeId> = seen.into_iter().collect();
        found.sort_by_key(|node| self.rank(*node));
        found
    }

    pub fn edges(&self) -> Vec<Edge> {
        let mut edges = Vec::new();
        for (consumer, node) in self.nodes() {
            for (input, binding) in node.bindings() {
                match binding {
                    Binding::Literal(_) => {}
                    Binding::Upstream { node, slot } => edges.push(Edge {
                        producer: *node,
                        output: slot.clone(),
                        consumer,
                        input: input.clone(),
                    }),
                    Binding::Gather { sources } => {
                        edges.extend(sources.iter().map(|(node, slot)| Edge {
                            producer: *node,
                            output: slot.clone(),
                            consumer,
                            input: input.clone(),
                        }));
                    }
                }
            }
        }
        edges
    }

    /// Graphviz rendering. `fill` picks an optional fill colour per node.
    pub(crate) fn render_dot(&self, fill: impl Fn(NodeId) -> Option<&'static str>) -> String {
        let mut dot = String::from("digraph pipeline {\n");
        dot.push_str("  graph [rankdir=LR];\n");
        dot.push_str("  node [shape=box, style=\"rounded,filled\", fontname=\"Helvetica\", fillcolor=white];\n");

        for id in &self.order {
            let node = self.node(*id);
            let identity = node.identity();
            let _ = write!(
                dot,
                "  n{} [label=\"{}\\n{}\"",
                id.0,
                escape(node.name()),
                escape(&identity.to_string())
            );
            if let Some(colour) = fill(*id) {
                let _ = write!(dot, ", fillcolor={}", colour);
            }
            dot.push_str("];\n");
        }

        for edge in self.edges() {
            let _ = writeln!(
                dot,
                "  n{} -> n{} [label=\"{}:{}\"];",
                edge.producer.0,
                edge.consumer.0,
                escape(&edge.output),
                escape(&edge.input)
            );
        }
        dot.push_str("}\n");
        dot
    }

    pub fn to_dot(&self) -> String {
        self.render_dot(|_| None)
    }
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}
