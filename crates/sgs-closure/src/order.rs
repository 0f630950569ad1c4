use std::collections::{BTreeSet, HashMap, HashSet};

use sgs_types::ContentHash;
use tracing::debug;

use crate::error::{ClosureError, ClosureResult};

/// One object of an ingest batch as seen by the ordering pass.
#[derive(Clone, Copy, Debug)]
pub struct BatchNode<'a> {
    pub id: ContentHash,
    pub children: &'a [ContentHash],
}

impl<'a> BatchNode<'a> {
    pub fn new(id: ContentHash, children: &'a [ContentHash]) -> Self {
        Self { id, children }
    }
}

/// Order a batch so every object comes after the in-batch children it
/// references.
///
/// Returns indices into `nodes`. Among objects that are ready at the same
/// time, the smaller input index goes first, so a batch that is already in
/// dependency order comes back unchanged.
///
/// A child that is neither in the batch nor in `persisted` is a dangling
/// reference. When an id appears more than once, references to it resolve
/// to its first occurrence.
pub fn ingest_order(
    nodes: &[BatchNode<'_>],
    persisted: &HashSet<ContentHash>,
) -> ClosureResult<Vec<usize>> {
    let mut first_index: HashMap<ContentHash, usize> = HashMap::with_capacity(nodes.len());
    for (i, node) in nodes.iter().enumerate() {
        first_index.entry(node.id).or_insert(i);
    }

    // in_degree[i]: distinct in-batch children of node i not yet placed.
    let mut in_degree = vec![0usize; nodes.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];

    for (i, node) in nodes.iter().enumerate() {
        let mut seen: HashSet<usize> = HashSet::new();
        for child in node.children {
            if *child == node.id {
                return Err(ClosureError::SelfReference(node.id));
            }
            match first_index.get(child) {
                Some(&j) => {
                    if seen.insert(j) {
                        in_degree[i] += 1;
                        dependents[j].push(i);
                    }
                }
                None if persisted.contains(child) => {}
                None => {
                    return Err(ClosureError::DanglingReference {
                        object: node.id,
                        child: *child,
                    })
                }
            }
        }
    }

    let mut ready: BTreeSet<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, deg)| **deg == 0)
        .map(|(i, _)| i)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(current) = ready.pop_first() {
        order.push(current);
        for &dependent in &dependents[current] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() < nodes.len() {
        let stuck = in_degree
            .iter()
            .position(|deg| *deg > 0)
            .map(|i| nodes[i].id);
        if let Some(id) = stuck {
            return Err(ClosureError::CycleDetected(id));
        }
    }

    let reordered = order.iter().enumerate().filter(|(pos, i)| pos != *i).count();
    debug!(nodes = nodes.len(), reordered, "batch ordered for ingest");
    Ok(order)
}
