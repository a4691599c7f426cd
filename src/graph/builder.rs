// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Incremental construction and validation of pipeline graphs.
//!
//! The builder owns an arena of [`Node`]s indexed by [`NodeId`] and checks
//! every edge as it is added:
//!
//! 1. **References**: both endpoints and both slots must exist
//! 2. **Binding**: an input slot takes exactly one binding
//! 3. **Types**: the producer's output type must be a subtype of the consumer's input type
//! 4. **Acyclicity**: the consumer must not already reach the producer
//!
//! The acyclicity check is an incremental reachability search from the
//! consumer over the forward adjacency, so a cycle is rejected at the edge
//! that would close it, with the full path in the error:
//!
//! ```text
//! connect(c -> a) with a -> b -> c already present
//!     Cyclic dependency detected: c -> a -> b -> c
//! ```
//!
//! [`GraphBuilder::finalize`] then checks readiness of every node and runs
//! Kahn's algorithm, breaking ties by declaration order so the topological
//! order is stable for a fixed set of declarations.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use ephyflow::actions::FnAction;
//! use ephyflow::graph::{GraphBuilder, InputSlot, Node, SlotType};
//! use ephyflow::traits::ActionOutput;
//!
//! let load = FnAction::new("load", "1", |_| Ok(ActionOutput::new().with("raw", 1.0)));
//! let psd = FnAction::new("psd", "1", |inputs| {
//!     Ok(ActionOutput::new().with("psd", inputs.float("raw")? * 2.0))
//! });
//!
//! let mut builder = GraphBuilder::new();
//! let a = builder.add_node(Node::new("load", Arc::new(load)).output("raw", SlotType::Float))?;
//! let b = builder.add_node(
//!     Node::new("psd", Arc::new(psd))
//!         .input("raw", InputSlot::required(SlotType::Float))
//!         .output("psd", SlotType::Float),
//! )?;
//! builder.connect(a, "raw", b, "raw")?;
//!
//! let graph = builder.finalize()?;
//! assert_eq!(graph.topological_order(), &[a, b]);
//! # Ok::<(), ephyflow::errors::BuildError>(())
//! ```

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet, VecDeque};

use crate::errors::{BuildError, ConfigurationError, SlotError};
use crate::observability::messages::graph::{EmptyExpansion, GraphFinalized, TemplateExpanded};
use crate::observability::messages::StructuredLog;

use super::expansion::{member_name, Expansion, IterationKey, IterationSpace};
use super::graph::Graph;
use super::node::{Binding, Node, NodeId};
use super::slot::SlotType;
use super::value::Value;

#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: Vec<Node>,
    index: HashMap<String, NodeId>,
    consumers: Vec<BTreeSet<NodeId>>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Adds a node with no upstream bindings yet. Literal bindings it carries are type checked.
    pub fn add_node(&mut self, node: Node) -> Result<NodeId, BuildError> {
        self.check_new(&node)?;
        Ok(self.insert(node))
    }

    /// Everything [`add_node`](Self::add_node) checks, without adding the node.
    fn check_new(&self, node: &Node) -> Result<(), BuildError> {
        if self.index.contains_key(node.name()) {
            return Err(ConfigurationError::DuplicateNode {
                name: node.name().to_string(),
            }
            .into());
        }
        if let Some(slot) = node
            .bindings()
            .iter()
            .find(|(_, binding)| !matches!(binding, Binding::Literal(_)))
            .map(|(slot, _)| slot)
        {
            return Err(ConfigurationError::Invalid {
                reason: format!(
                    "node '{}' carries an upstream binding on '{}'; use GraphBuilder::connect",
                    node.name(),
                    slot
                ),
            }
            .into());
        }
        node.check_literals()?;
        Ok(())
    }

    fn insert(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.index.insert(node.name().to_string(), id);
        self.nodes.push(node);
        self.consumers.push(BTreeSet::new());
        id
    }

    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.index.get(name).copied()
    }

    /// Like [`node_id`](Self::node_id) but reports an unknown name as an error.
    pub fn id(&self, name: &str) -> Result<NodeId, ConfigurationError> {
        self.node_id(name).ok_or_else(|| ConfigurationError::UnknownNode {
            name: name.to_string(),
        })
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Binds a literal value to an input slot.
    pub fn bind(&mut self, node: NodeId, slot: &str, value: impl Into<Value>) -> Result<(), BuildError> {
        let node = self.node_mut(node)?;
        node.bind(slot, Binding::Literal(value.into()))?;
        Ok(())
    }

    /// Adds the edge `producer.output -> consumer.input`.
    pub fn connect(
        &mut self,
        producer: NodeId,
        output: &str,
        consumer: NodeId,
        input: &str,
    ) -> Result<(), BuildError> {
        let produced = self.output_type(producer, output)?;
        let expected = self.free_input_type(consumer, input)?;

        if !produced.is_compatible_with(&expected) {
            return Err(self.type_mismatch(producer, output, consumer, input, expected, produced));
        }
        self.check_acyclic(producer, consumer)?;

        self.node_mut(consumer)?.bind(
            input,
            Binding::Upstream {
                node: producer,
                slot: output.to_string(),
            },
        )?;
        self.consumers[producer.0].insert(consumer);
        Ok(())
    }

    /// Clones `template` once per combination of `space`.
    ///
    /// Every iteration field is bound as a literal to the input slot of the same
    /// name when the template declares one. Clones are named `template[label]`.
    pub fn expand(&mut self, template: Node, space: &IterationSpace) -> Result<Expansion, BuildError> {
        self.expand_keys(template, space.keys())
    }

    /// Expands `template` over the same keys, in the same order, as `like`.
    pub fn expand_like(&mut self, template: Node, like: &Expansion) -> Result<Expansion, BuildError> {
        self.expand_keys(template, like.members.iter().map(|(key, _)| key.clone()).collect())
    }

    /// Expands `template` over every key of `upstream` extended by every key of `space`.
    ///
    /// Upstream keys vary slowest, so members read
    /// `conn[subject_id=s1,freq_band=alpha]`, `conn[subject_id=s1,freq_band=beta]`, ...
    /// A field of `space` that `upstream` already iterates over is rejected.
    pub fn expand_over(
        &mut self,
        template: Node,
        upstream: &Expansion,
        space: &IterationSpace,
    ) -> Result<Expansion, BuildError> {
        if let Some((field, _)) = space
            .fields()
            .find(|(field, _)| upstream.members.iter().any(|(key, _)| key.get(field).is_some()))
        {
            return Err(ConfigurationError::Invalid {
                reason: format!(
                    "'{}' cannot iterate over '{}': '{}' already does",
                    template.name(),
                    field,
                    upstream.template
                ),
            }
            .into());
        }

        let inner = space.keys();
        let keys = upstream
            .members
            .iter()
            .flat_map(|(outer, _)| inner.iter().map(move |key| outer.extended(key)))
            .collect();
        self.expand_keys(template, keys)
    }

    fn expand_keys(&mut self, template: Node, keys: Vec<IterationKey>) -> Result<Expansion, BuildError> {
        let template_name = template.name().to_string();

        // All members are checked before the first is inserted.
        let mut clones = Vec::with_capacity(keys.len());
        let mut names = HashSet::with_capacity(keys.len());
        for key in &keys {
            let mut clone = template.clone();
            clone.set_name(member_name(&template_name, key));
            for (field, value) in key.pairs() {
                if clone.inputs().contains_key(field) {
                    clone.bind(field, Binding::Literal(value.clone()))?;
                }
            }
            clone.iteration = (!key.is_empty()).then(|| key.clone());
            clone.template = Some(template_name.clone());

            self.check_new(&clone)?;
            if !names.insert(clone.name().to_string()) {
                return Err(ConfigurationError::DuplicateNode {
                    name: clone.name().to_string(),
                }
                .into());
            }
            clones.push(clone);
        }

        let members: Vec<(IterationKey, NodeId)> = keys
            .into_iter()
            .zip(clones)
            .map(|(key, clone)| (key, self.insert(clone)))
            .collect();

        if members.is_empty() {
            EmptyExpansion {
                template: &template_name,
            }
            .log();
        } else {
            TemplateExpanded {
                template: &template_name,
                members: members.len(),
            }
            .log();
        }

        Ok(Expansion {
            template: template_name,
            members,
        })
    }

    /// Connects two expansions member by member. Both must cover the same keys in the same order.
    pub fn connect_zip(
        &mut self,
        producer: &Expansion,
        output: &str,
        consumer: &Expansion,
        input: &str,
    ) -> Result<(), BuildError> {
        if producer.len() != consumer.len() {
            return Err(ConfigurationError::IterationMismatch {
                producer: producer.template.clone(),
                consumer: consumer.template.clone(),
                reason: format!("{} members vs {}", producer.len(), consumer.len()),
            }
            .into());
        }
        if let Some(((key, _), (other, _))) = producer
            .members
            .iter()
            .zip(&consumer.members)
            .find(|((a, _), (b, _))| a != b)
        {
            return Err(ConfigurationError::IterationMismatch {
                producer: producer.template.clone(),
                consumer: consumer.template.clone(),
                reason: format!("'{}' paired with '{}'", key, other),
            }
            .into());
        }

        for ((_, from), (_, to)) in producer.members.iter().zip(&consumer.members) {
            self.connect(*from, output, *to, input)?;
        }
        Ok(())
    }

    /// Feeds one upstream output into every member of an expansion.
    pub fn connect_fan_out(
        &mut self,
        producer: NodeId,
        output: &str,
        consumer: &Expansion,
        input: &str,
    ) -> Result<(), BuildError> {
        for (_, to) in &consumer.members {
            self.connect(producer, output, *to, input)?;
        }
        Ok(())
    }

    /// Fans an expansion in to a single list-typed input, ordered by expansion order.
    ///
    /// An empty expansion gathered into a required slot without a default is a
    /// build error. Into any other slot it gathers an empty list.
    pub fn connect_gather(
        &mut self,
        producer: &Expansion,
        output: &str,
        consumer: NodeId,
        input: &str,
    ) -> Result<(), BuildError> {
        let expected = self.free_input_type(consumer, input)?;
        let consumer_name = self.name_of(consumer)?;

        if producer.is_empty() {
            let required = self
                .nodes
                .get(consumer.0)
                .and_then(|node| node.inputs().get(input))
                .map(|slot| slot.required && slot.default.is_none())
                .unwrap_or(true);
            if required {
                return Err(ConfigurationError::EmptyExpansion {
                    template: producer.template.clone(),
                    consumer: consumer_name,
                    input: input.to_string(),
                }
                .into());
            }
        }

        let mut sources = Vec::with_capacity(producer.len());
        for (_, member) in &producer.members {
            let produced = self.output_type(*member, output)?;
            let accepted = expected
                .element()
                .map(|element| produced.is_compatible_with(element))
                .unwrap_or(false);
            if !accepted {
                return Err(self.type_mismatch(
                    *member,
                    output,
                    consumer,
                    input,
                    expected,
                    SlotType::list_of(produced),
                ));
            }
            self.check_acyclic(*member, consumer)?;
            sources.push((*member, output.to_string()));
        }

        self.node_mut(consumer)?.bind(input, Binding::Gather { sources })?;
        for (_, member) in &producer.members {
            self.consumers[member.0].insert(consumer);
        }
        Ok(())
    }

    /// Connects each member of `consumer` to the one member of `producer` whose key it extends.
    ///
    /// `psd[subject_id=s1]` feeds every `conn[subject_id=s1,freq_band=..]`.
    /// A consumer member matched by no producer member, or by several, is an
    /// iteration mismatch.
    pub fn connect_nested(
        &mut self,
        producer: &Expansion,
        output: &str,
        consumer: &Expansion,
        input: &str,
    ) -> Result<(), BuildError> {
        let mut edges = Vec::with_capacity(consumer.len());
        for (key, to) in &consumer.members {
            let mut matching = producer
                .members
                .iter()
                .filter(|(outer, _)| outer.is_subset_of(key));
            let from = match (matching.next(), matching.next()) {
                (Some((_, from)), None) => *from,
                (None, _) => {
                    return Err(iteration_mismatch(producer, &consumer.template, format!("no member matches '{}'", key)))
                }
                (Some(_), Some(_)) => {
                    return Err(iteration_mismatch(
                        producer,
                        &consumer.template,
                        format!("several members match '{}'", key),
                    ))
                }
            };
            edges.push((from, *to));
        }

        for (from, to) in edges {
            self.connect(from, output, to, input)?;
        }
        Ok(())
    }

    /// Gathers `producer` over the single iteration field `field`.
    ///
    /// Members are grouped by their key without `field`. `template` is expanded
    /// once per group, and each clone gathers its group's outputs into `input`
    /// in expansion order. Gathering `freq_band` out of
    /// `conn[subject_id=..,freq_band=..]` gives one `summary[subject_id=..]`
    /// per subject; gathering out the last field gives one node named `summary`.
    pub fn connect_gather_by(
        &mut self,
        producer: &Expansion,
        output: &str,
        field: &str,
        template: Node,
        input: &str,
    ) -> Result<Expansion, BuildError> {
        if producer.members.iter().any(|(key, _)| key.get(field).is_none()) {
            return Err(iteration_mismatch(
                producer,
                template.name(),
                format!("'{}' is not an iteration field of every member", field),
            ));
        }

        let expected = template
            .inputs()
            .get(input)
            .map(|slot| slot.ty.clone())
            .ok_or_else(|| SlotError::UnknownInput {
                node: template.name().to_string(),
                slot: input.to_string(),
            })?;
        for (_, member) in &producer.members {
            let produced = self.output_type(*member, output)?;
            let accepted = expected
                .element()
                .map(|element| produced.is_compatible_with(element))
                .unwrap_or(false);
            if !accepted {
                return Err(ConfigurationError::TypeMismatch {
                    producer: self.nodes[member.0].name().to_string(),
                    output: output.to_string(),
                    consumer: template.name().to_string(),
                    input: input.to_string(),
                    expected,
                    found: SlotType::list_of(produced),
                }
                .into());
            }
        }

        let mut groups: Vec<(IterationKey, Vec<(IterationKey, NodeId)>)> = Vec::new();
        for (key, id) in &producer.members {
            let rest = key.without(field);
            match groups.iter_mut().find(|(group, _)| *group == rest) {
                Some((_, members)) => members.push((key.clone(), *id)),
                None => groups.push((rest, vec![(key.clone(), *id)])),
            }
        }

        let consumers = self.expand_keys(template, groups.iter().map(|(key, _)| key.clone()).collect())?;
        for ((_, members), (_, consumer)) in groups.into_iter().zip(&consumers.members) {
            let group = Expansion {
                template: producer.template.clone(),
                members,
            };
            self.connect_gather(&group, output, *consumer, input)?;
        }
        Ok(consumers)
    }

    /// Splices another builder's nodes and edges into this one under `prefix.` names.
    ///
    /// Merged nodes are looked up afterwards by their scoped name, e.g.
    /// `preproc.inputnode`.
    pub fn merge_scoped(&mut self, prefix: &str, other: GraphBuilder) -> Result<(), BuildError> {
        let offset = self.nodes.len();

        for node in &other.nodes {
            let scoped = format!("{}.{}", prefix, node.name());
            if self.index.contains_key(&scoped) {
                return Err(ConfigurationError::DuplicateNode { name: scoped }.into());
            }
        }

        for (mut node, consumers) in other.nodes.into_iter().zip(other.consumers) {
            let scoped = format!("{}.{}", prefix, node.name());
            node.set_name(scoped.clone());
            if let Some(template) = node.template.take() {
                node.template = Some(format!("{}.{}", prefix, template));
            }
            for binding in node.bindings_mut().values_mut() {
                *binding = binding.remap(offset);
            }

            let id = NodeId(self.nodes.len());
            self.index.insert(scoped, id);
            self.nodes.push(node);
            self.consumers
                .push(consumers.into_iter().map(|c| NodeId(c.0 + offset)).collect());
        }
        Ok(())
    }

    /// Checks readiness and acyclicity and freezes the graph.
    pub fn finalize(self) -> Result<Graph, BuildError> {
        for node in &self.nodes {
            if let Some(slot) = node.unbound_required() {
                return Err(ConfigurationError::UnboundInput {
                    node: node.name().to_string(),
                    slot: slot.to_string(),
                }
                .into());
            }
        }

        let producers: Vec<BTreeSet<NodeId>> = self
            .nodes
            .iter()
            .map(|node| {
                node.bindings()
                    .values()
                    .flat_map(Binding::upstream_nodes)
                    .collect()
            })
            .collect();

        let mut in_degree: Vec<usize> = producers.iter().map(BTreeSet::len).collect();
        let mut ready: BinaryHeap<Reverse<NodeId>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(index, _)| Reverse(NodeId(index)))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(id)) = ready.pop() {
            order.push(id);
            for consumer in &self.consumers[id.0] {
                in_degree[consumer.0] -= 1;
                if in_degree[consumer.0] == 0 {
                    ready.push(Reverse(*consumer));
                }
            }
        }

        if order.len() < self.nodes.len() {
            return Err(ConfigurationError::Cycle {
                path: self.residual_cycle(&in_degree, &producers),
            }
            .into());
        }

        let graph = Graph::new(
            self.nodes,
            self.consumers
                .into_iter()
                .map(|set| set.into_iter().collect())
                .collect(),
            producers.into_iter().map(|set| set.into_iter().collect()).collect(),
            order,
        );

        GraphFinalized {
            node_count: graph.len(),
            edge_count: graph.edges().len(),
        }
        .log();
        Ok(graph)
    }

    /// Walks predecessors among the nodes Kahn's algorithm could not drain until one repeats.
    fn residual_cycle(&self, in_degree: &[usize], producers: &[BTreeSet<NodeId>]) -> Vec<String> {
        let Some(start) = in_degree.iter().position(|degree| *degree > 0) else {
            return Vec::new();
        };

        let mut walk = vec![NodeId(start)];
        let mut seen = HashMap::new();
        seen.insert(NodeId(start), 0usize);
        loop {
            let current = walk[walk.len() - 1];
            let Some(previous) = producers[current.0]
                .iter()
                .find(|p| in_degree[p.0] > 0)
                .copied()
            else {
                break;
            };
            if let Some(position) = seen.get(&previous) {
                let mut cycle: Vec<NodeId> = walk[*position..].to_vec();
                cycle.push(previous);
                cycle.reverse();
                return cycle.iter().map(|id| self.nodes[id.0].name().to_string()).collect();
            }
            seen.insert(previous, walk.len());
            walk.push(previous);
        }
        walk.iter().map(|id| self.nodes[id.0].name().to_string()).collect()
    }

    /// Path from `from` to `to` over existing edges, if any.
    fn path_between(&self, from: NodeId, to: NodeId) -> Option<Vec<NodeId>> {
        let mut parent: HashMap<NodeId, NodeId> = HashMap::new();
        let mut queue = VecDeque::from([from]);
        let mut visited = BTreeSet::from([from]);

        while let Some(current) = queue.pop_front() {
            if current == to {
                let mut path = vec![to];
                let mut cursor = to;
                while let Some(previous) = parent.get(&cursor) {
                    path.push(*previous);
                    cursor = *previous;
                }
                path.reverse();
                return Some(path);
            }
            for next in &self.consumers[current.0] {
                if visited.insert(*next) {
                    parent.insert(*next, current);
                    queue.push_back(*next);
                }
            }
        }
        None
    }

    fn check_acyclic(&self, producer: NodeId, consumer: NodeId) -> Result<(), ConfigurationError> {
        let Some(back) = self.path_between(consumer, producer) else {
            return Ok(());
        };
        let mut path = vec![self.nodes[producer.0].name().to_string()];
        path.extend(back.iter().map(|id| self.nodes[id.0].name().to_string()));
        Err(ConfigurationError::Cycle { path })
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, ConfigurationError> {
        self.nodes
            .get_mut(id.0)
            .ok_or_else(|| ConfigurationError::UnknownNode { name: id.to_string() })
    }

    fn name_of(&self, id: NodeId) -> Result<String, ConfigurationError> {
        self.nodes
            .get(id.0)
            .map(|node| node.name().to_string())
            .ok_or_else(|| ConfigurationError::UnknownNode { name: id.to_string() })
    }

    fn output_type(&self, id: NodeId, slot: &str) -> Result<SlotType, BuildError> {
        let node = self
            .nodes
            .get(id.0)
            .ok_or_else(|| ConfigurationError::UnknownNode { name: id.to_string() })?;
        node.outputs().get(slot).cloned().ok_or_else(|| {
            SlotError::UnknownOutput {
                node: node.name().to_string(),
                slot: slot.to_string(),
            }
            .into()
        })
    }

    /// Type of an input slot that exists and is still unbound.
    fn free_input_type(&self, id: NodeId, slot: &str) -> Result<SlotType, BuildError> {
        let node = self
            .nodes
            .get(id.0)
            .ok_or_else(|| ConfigurationError::UnknownNode { name: id.to_string() })?;
        let declared = node.inputs().get(slot).ok_or_else(|| SlotError::UnknownInput {
            node: node.name().to_string(),
            slot: slot.to_string(),
        })?;
        if node.bindings().contains_key(slot) {
            return Err(SlotError::AlreadyBound {
                node: node.name().to_string(),
                slot: slot.to_string(),
            }
            .into());
        }
        Ok(declared.ty.clone())
    }

    fn type_mismatch(
        &self,
        producer: NodeId,
        output: &str,
        consumer: NodeId,
        input: &str,
        expected: SlotType,
        found: SlotType,
    ) -> BuildError {
        ConfigurationError::TypeMismatch {
            producer: self.nodes[producer.0].name().to_string(),
            output: output.to_string(),
            consumer: self.nodes[consumer.0].name().to_string(),
            input: input.to_string(),
            expected,
            found,
        }
        .into()
    }
}

fn iteration_mismatch(producer: &Expansion, consumer: &str, reason: String) -> BuildError {
    ConfigurationError::IterationMismatch {
        producer: producer.template.clone(),
        consumer: consumer.to_string(),
        reason,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::FnAction;
    use crate::graph::InputSlot;
    use crate::traits::ActionOutput;
    use std::sync::Arc;

    fn pass(name: &str) -> Node {
        let action = FnAction::new(name, "1", |inputs| {
            let x = inputs.get("x").cloned().unwrap_or(Value::Float(0.0));
            Ok(ActionOutput::new().with("y", x))
        });
        Node::new(name, Arc::new(action))
            .input("x", InputSlot::optional(SlotType::Float, None))
            .output("y", SlotType::Float)
    }

    fn names(builder: &GraphBuilder, path: &[&str]) -> Vec<NodeId> {
        path.iter().map(|name| builder.node_id(name).unwrap()).collect()
    }

    #[test]
    fn test_diamond_finalizes_in_declaration_order() {
        let mut builder = GraphBuilder::new();
        let a = builder.add_node(pass("a")).unwrap();
        let b = builder.add_node(pass("b").input("z", InputSlot::optional(SlotType::Any, None))).unwrap();
        let c = builder.add_node(pass("c")).unwrap();
        let d = builder
            .add_node(pass("d").input("w", InputSlot::required(SlotType::Float)))
            .unwrap();
        builder.connect(a, "y", b, "x").unwrap();
        builder.connect(a, "y", c, "x").unwrap();
        builder.connect(b, "y", d, "x").unwrap();
        builder.connect(c, "y", d, "w").unwrap();

        let graph = builder.finalize().unwrap();
        assert_eq!(graph.topological_order(), &[a, b, c, d]);
        assert_eq!(graph.producers(d), &[b, c]);
    }

    #[test]
    fn test_cycle_rejected_at_connect_with_path() {
        let mut builder = GraphBuilder::new();
        for name in ["a", "b", "c"] {
            builder
                .add_node(pass(name).input("back", InputSlot::optional(SlotType::Float, None)))
                .unwrap();
        }
        let ids = names(&builder, &["a", "b", "c"]);
        builder.connect(ids[0], "y", ids[1], "x").unwrap();
        builder.connect(ids[1], "y", ids[2], "x").unwrap();

        let err = builder.connect(ids[2], "y", ids[0], "back").unwrap_err();
        assert!(err.is_cycle());
        assert_eq!(
            err,
            BuildError::Configuration(ConfigurationError::Cycle {
                path: vec!["c".into(), "a".into(), "b".into(), "c".into()]
            })
        );
        // the rejected edge leaves the builder untouched
        assert!(builder.finalize().is_ok());
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let mut builder = GraphBuilder::new();
        let a = builder.add_node(pass("a")).unwrap();
        assert!(builder.connect(a, "y", a, "x").unwrap_err().is_cycle());
    }

    #[test]
    fn test_type_mismatch_names_the_edge() {
        let mut builder = GraphBuilder::new();
        let a = builder.add_node(pass("a")).unwrap();
        let b = builder
            .add_node(pass("b").input("label", InputSlot::required(SlotType::Text)))
            .unwrap();
        let err = builder.connect(a, "y", b, "label").unwrap_err();
        assert_eq!(
            err,
            BuildError::Configuration(ConfigurationError::TypeMismatch {
                producer: "a".into(),
                output: "y".into(),
                consumer: "b".into(),
                input: "label".into(),
                expected: SlotType::Text,
                found: SlotType::Float,
            })
        );
    }

    #[test]
    fn test_slot_errors() {
        let mut builder = GraphBuilder::new();
        let a = builder.add_node(pass("a")).unwrap();
        let b = builder.add_node(pass("b")).unwrap();
        assert!(matches!(
            builder.connect(a, "nope", b, "x"),
            Err(BuildError::Slot(SlotError::UnknownOutput { .. }))
        ));
        assert!(matches!(
            builder.connect(a, "y", b, "nope"),
            Err(BuildError::Slot(SlotError::UnknownInput { .. }))
        ));
        builder.connect(a, "y", b, "x").unwrap();
        assert!(matches!(
            builder.connect(a, "y", b, "x"),
            Err(BuildError::Slot(SlotError::AlreadyBound { .. }))
        ));
    }

    #[test]
    fn test_duplicate_and_unknown_nodes() {
        let mut builder = GraphBuilder::new();
        builder.add_node(pass("a")).unwrap();
        assert_eq!(
            builder.add_node(pass("a")).unwrap_err(),
            BuildError::Configuration(ConfigurationError::DuplicateNode { name: "a".into() })
        );
        assert_eq!(
            builder.id("ghost").unwrap_err(),
            ConfigurationError::UnknownNode { name: "ghost".into() }
        );
    }

    #[test]
    fn test_unbound_required_input_fails_finalize() {
        let mut builder = GraphBuilder::new();
        builder
            .add_node(pass("a").input("raw", InputSlot::required(SlotType::Path)))
            .unwrap();
        assert_eq!(
            builder.finalize().unwrap_err(),
            BuildError::Configuration(ConfigurationError::UnboundInput {
                node: "a".into(),
                slot: "raw".into()
            })
        );
    }

    #[test]
    fn test_expand_binds_iteration_fields() {
        let mut builder = GraphBuilder::new();
        let space = IterationSpace::new().field("subject_id", ["s1", "s2"]);
        let template = pass("load").input("subject_id", InputSlot::required(SlotType::Text));
        let expansion = builder.expand(template, &space).unwrap();

        assert_eq!(expansion.len(), 2);
        let first = builder.node(expansion.nodes()[0]).unwrap();
        assert_eq!(first.name(), "load[subject_id=s1]");
        assert_eq!(first.template(), Some("load"));
        assert_eq!(
            first.bindings().get("subject_id"),
            Some(&Binding::Literal(Value::from("s1")))
        );
    }

    #[test]
    fn test_zip_requires_matching_keys() {
        let mut builder = GraphBuilder::new();
        let load = builder
            .expand(pass("load"), &IterationSpace::new().field("subject_id", ["s1", "s2"]))
            .unwrap();
        let psd = builder.expand_like(pass("psd"), &load).unwrap();
        builder.connect_zip(&load, "y", &psd, "x").unwrap();

        let other = builder
            .expand(pass("other"), &IterationSpace::new().field("subject_id", ["s2", "s1"]))
            .unwrap();
        assert!(matches!(
            builder.connect_zip(&load, "y", &other, "x"),
            Err(BuildError::Configuration(ConfigurationError::IterationMismatch { .. }))
        ));

        let graph = builder.finalize().unwrap();
        let psd_s2 = graph.find("psd[subject_id=s2]").unwrap();
        assert_eq!(graph.producers(psd_s2), &[graph.find("load[subject_id=s2]").unwrap()]);
    }

    #[test]
    fn test_gather_checks_element_type() {
        let mut builder = GraphBuilder::new();
        let psd = builder
            .expand(pass("psd"), &IterationSpace::new().field("subject_id", ["s1", "s2"]))
            .unwrap();
        let bad = builder
            .add_node(pass("bad").input("all", InputSlot::required(SlotType::list_of(SlotType::Text))))
            .unwrap();
        assert!(matches!(
            builder.connect_gather(&psd, "y", bad, "all"),
            Err(BuildError::Configuration(ConfigurationError::TypeMismatch { .. }))
        ));

        let good = builder
            .add_node(pass("good").input("all", InputSlot::required(SlotType::list_of(SlotType::Float))))
            .unwrap();
        builder.connect_gather(&psd, "y", good, "all").unwrap();
        builder.bind(bad, "all", vec![Value::from("x")]).unwrap();

        let graph = builder.finalize().unwrap();
        assert_eq!(graph.producers(good).len(), 2);
    }

    #[test]
    fn test_gather_of_empty_expansion_into_required_slot() {
        let mut builder = GraphBuilder::new();
        let empty = builder
            .expand(pass("psd"), &IterationSpace::new().field("subject_id", Vec::<String>::new()))
            .unwrap();
        assert!(empty.is_empty());

        let report = builder
            .add_node(pass("report").input("all", InputSlot::required(SlotType::list_of(SlotType::Float))))
            .unwrap();
        assert_eq!(
            builder.connect_gather(&empty, "y", report, "all").unwrap_err(),
            BuildError::Configuration(ConfigurationError::EmptyExpansion {
                template: "psd".into(),
                consumer: "report".into(),
                input: "all".into(),
            })
        );

        let optional = builder
            .add_node(pass("optional").input("all", InputSlot::optional(SlotType::list_of(SlotType::Float), None)))
            .unwrap();
        builder.connect_gather(&empty, "y", optional, "all").unwrap();
    }

    #[test]
    fn test_merge_scoped_prefixes_names_and_keeps_edges() {
        let mut inner = GraphBuilder::new();
        let a = inner.add_node(pass("inputnode")).unwrap();
        let b = inner.add_node(pass("filter")).unwrap();
        inner.connect(a, "y", b, "x").unwrap();

        let mut outer = GraphBuilder::new();
        outer.add_node(pass("source")).unwrap();
        outer.merge_scoped("preproc", inner).unwrap();

        let source = outer.id("source").unwrap();
        let inputnode = outer.id("preproc.inputnode").unwrap();
        outer.connect(source, "y", inputnode, "x").unwrap();

        let graph = outer.finalize().unwrap();
        let filter = graph.find("preproc.filter").unwrap();
        assert_eq!(graph.producers(filter), &[inputnode]);
        assert_eq!(graph.topological_order(), &[source, inputnode, filter]);
    }

    #[test]
    fn test_add_node_checks_declared_literals() {
        let mut builder = GraphBuilder::new();
        let node = pass("a").with_literal("x", "not a number");
        assert!(matches!(
            builder.add_node(node),
            Err(BuildError::Slot(SlotError::IncompatibleValue { .. }))
        ));
    }

    #[test]
    fn test_expansion_with_colliding_labels_adds_nothing() {
        let mut builder = GraphBuilder::new();
        builder.add_node(pass("psd[subject_id=s2]")).unwrap();

        let space = IterationSpace::new().field("subject_id", ["s1", "s2", "s3"]);
        assert_eq!(
            builder.expand(pass("psd"), &space).unwrap_err(),
            BuildError::Configuration(ConfigurationError::DuplicateNode {
                name: "psd[subject_id=s2]".into()
            })
        );
        assert_eq!(builder.len(), 1);
        assert_eq!(builder.node_id("psd[subject_id=s1]"), None);

        let repeated = IterationSpace::new().field("subject_id", ["s1", "s1"]);
        assert!(builder.expand(pass("load"), &repeated).is_err());
        assert_eq!(builder.len(), 1);
        assert!(builder.finalize().is_ok());
    }

    /// psd per subject, conn per subject x band, summary per subject over bands.
    fn subjects_by_band(builder: &mut GraphBuilder) -> (Expansion, Expansion) {
        let subjects = IterationSpace::new().field("subject_id", ["s1", "s2"]);
        let bands = IterationSpace::new().field("freq_band", ["alpha", "beta", "gamma"]);

        let psd = builder.expand(pass("psd"), &subjects).unwrap();
        let conn = builder
            .expand_over(pass("conn").input("freq_band", InputSlot::required(SlotType::Text)), &psd, &bands)
            .unwrap();
        builder.connect_nested(&psd, "y", &conn, "x").unwrap();
        (psd, conn)
    }

    #[test]
    fn test_expand_over_extends_upstream_keys() {
        let mut builder = GraphBuilder::new();
        let (psd, conn) = subjects_by_band(&mut builder);

        assert_eq!(conn.len(), 6);
        let labels: Vec<String> = conn.keys().iter().map(|key| key.label()).collect();
        assert_eq!(labels[0], "subject_id=s1,freq_band=alpha");
        assert_eq!(labels[3], "subject_id=s2,freq_band=alpha");

        let member = builder.node(conn.nodes()[4]).unwrap();
        assert_eq!(member.name(), "conn[subject_id=s2,freq_band=beta]");
        assert_eq!(member.bindings().get("freq_band"), Some(&Binding::Literal(Value::from("beta"))));

        let graph = builder.finalize().unwrap();
        let s2_beta = graph.find("conn[subject_id=s2,freq_band=beta]").unwrap();
        assert_eq!(graph.producers(s2_beta), &[psd.nodes()[1]]);
    }

    #[test]
    fn test_expand_over_rejects_repeated_field() {
        let mut builder = GraphBuilder::new();
        let psd = builder
            .expand(pass("psd"), &IterationSpace::new().field("subject_id", ["s1"]))
            .unwrap();
        let again = IterationSpace::new().field("subject_id", ["s2"]);
        assert!(matches!(
            builder.expand_over(pass("conn"), &psd, &again),
            Err(BuildError::Configuration(ConfigurationError::Invalid { .. }))
        ));
        assert_eq!(builder.len(), 1);
    }

    #[test]
    fn test_connect_nested_needs_a_matching_member() {
        let mut builder = GraphBuilder::new();
        let psd = builder
            .expand(pass("psd"), &IterationSpace::new().field("subject_id", ["s1"]))
            .unwrap();
        let other = builder
            .expand(pass("other"), &IterationSpace::new().field("subject_id", ["s9"]))
            .unwrap();
        assert!(matches!(
            builder.connect_nested(&psd, "y", &other, "x"),
            Err(BuildError::Configuration(ConfigurationError::IterationMismatch { .. }))
        ));
    }

    #[test]
    fn test_gather_by_one_field_gives_one_consumer_per_remaining_key() {
        let mut builder = GraphBuilder::new();
        let (_, conn) = subjects_by_band(&mut builder);

        let summary = pass("summary")
            .input("subject_id", InputSlot::required(SlotType::Text))
            .input("per_band", InputSlot::required(SlotType::list_of(SlotType::Float)));
        let summaries = builder
            .connect_gather_by(&conn, "y", "freq_band", summary, "per_band")
            .unwrap();

        assert_eq!(summaries.len(), 2);
        let first = builder.node(summaries.nodes()[0]).unwrap();
        assert_eq!(first.name(), "summary[subject_id=s1]");
        assert_eq!(first.bindings().get("subject_id"), Some(&Binding::Literal(Value::from("s1"))));

        let graph = builder.finalize().unwrap();
        let s2 = graph.find("summary[subject_id=s2]").unwrap();
        let expected: Vec<NodeId> = ["alpha", "beta", "gamma"]
            .iter()
            .map(|band| graph.find(&format!("conn[subject_id=s2,freq_band={}]", band)).unwrap())
            .collect();
        assert_eq!(graph.producers(s2), expected.as_slice());
    }

    #[test]
    fn test_gather_by_last_field_gives_a_single_node() {
        let mut builder = GraphBuilder::new();
        let psd = builder
            .expand(pass("psd"), &IterationSpace::new().field("subject_id", ["s1", "s2"]))
            .unwrap();
        let group = pass("group").input("all", InputSlot::required(SlotType::list_of(SlotType::Float)));
        let groups = builder.connect_gather_by(&psd, "y", "subject_id", group, "all").unwrap();

        assert_eq!(groups.len(), 1);
        let node = builder.node(groups.nodes()[0]).unwrap();
        assert_eq!(node.name(), "group");
        assert_eq!(node.iteration(), None);
    }

    #[test]
    fn test_gather_by_checks_field_and_types_before_adding_nodes() {
        let mut builder = GraphBuilder::new();
        let psd = builder
            .expand(pass("psd"), &IterationSpace::new().field("subject_id", ["s1", "s2"]))
            .unwrap();
        let before = builder.len();

        let group = || pass("group").input("all", InputSlot::required(SlotType::list_of(SlotType::Float)));
        assert!(matches!(
            builder.connect_gather_by(&psd, "y", "freq_band", group(), "all"),
            Err(BuildError::Configuration(ConfigurationError::IterationMismatch { .. }))
        ));

        let texts = pass("texts").input("all", InputSlot::required(SlotType::list_of(SlotType::Text)));
        assert!(matches!(
            builder.connect_gather_by(&psd, "y", "subject_id", texts, "all"),
            Err(BuildError::Configuration(ConfigurationError::TypeMismatch { .. }))
        ));
        assert_eq!(builder.len(), before);
    }
}
