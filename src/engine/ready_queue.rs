// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Ready set for the scheduler, ordered by topological rank.
//!
//! Nodes enter the queue once every producer has settled (Completed or
//! Cached). The scheduler always dispatches the ready node with the lowest
//! topological rank, so for a fixed graph the dispatch order depends only on
//! which nodes are ready, never on heap insertion order.
//!
//! ```text
//! rank:   0    1    2    3
//!         A -> B -> D
//!          \-> C --/
//! ready after A: {B(1), C(2)}  ->  B dispatched first
//! ```

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::graph::NodeId;

#[derive(Debug, Clone)]
pub struct ReadyTask {
    pub node: NodeId,
    pub rank: usize,
}

impl ReadyTask {
    pub fn new(node: NodeId, rank: usize) -> Self {
        Self { node, rank }
    }
}

impl PartialEq for ReadyTask {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node
    }
}

impl Eq for ReadyTask {}

impl PartialOrd for ReadyTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyTask {
    /// Reversed so the max-heap yields the lowest rank first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .rank
            .cmp(&self.rank)
            .then_with(|| other.node.cmp(&self.node))
    }
}

#[derive(Debug, Default)]
pub struct ReadyQueue {
    heap: BinaryHeap<ReadyTask>,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: ReadyTask) {
        self.heap.push(task);
    }

    pub fn extend<I>(&mut self, tasks: I)
    where
        I: IntoIterator<Item = ReadyTask>,
    {
        self.heap.extend(tasks);
    }

    pub fn pop_next(&mut self) -> Option<NodeId> {
        self.heap.pop().map(|task| task.node)
    }

    pub fn peek(&self) -> Option<&ReadyTask> {
        self.heap.peek()
    }

    /// Empties the queue, lowest rank first.
    pub fn drain(&mut self) -> Vec<NodeId> {
        let mut drained = Vec::with_capacity(self.heap.len());
        while let Some(node) = self.pop_next() {
            drained.push(node);
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
