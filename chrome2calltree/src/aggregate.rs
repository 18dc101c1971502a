//! Call graph aggregation.
//!
//! Every node sharing a call identity is folded into one [`AggregatedCall`],
//! and every (caller, callee) identity pair into one [`AggregatedEdge`].
//! The pass walks the flat node collection, not the tree, so the numeric
//! totals do not depend on node order.

use crate::error::Result;
use crate::profile::{CallFrame, CallId, Profile};
use log::debug;
use std::collections::BTreeMap;

/// Statistics for one call identity across all of its occurrences.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedCall {
    /// Metadata of the first occurrence seen.
    pub frame: CallFrame,
    pub self_time: f64,
    pub self_hit_count: u64,
    /// Outgoing edges, keyed by callee identity.
    pub child_calls: BTreeMap<CallId, AggregatedEdge>,
}

/// Statistics for one caller → callee relationship.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedEdge {
    /// Callee metadata of the first occurrence seen.
    pub frame: CallFrame,
    pub total_time: f64,
    pub total_hit_count: u64,
}

/// The deduplicated call graph, ordered by call identity.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CallGraph {
    calls: BTreeMap<CallId, AggregatedCall>,
}

impl CallGraph {
    /// Call records in ascending call identity order.
    pub fn calls(&self) -> impl Iterator<Item = (CallId, &AggregatedCall)> {
        self.calls.iter().map(|(&id, call)| (id, call))
    }

    pub fn get(&self, call_id: CallId) -> Option<&AggregatedCall> {
        self.calls.get(&call_id)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Number of distinct (caller, callee) pairs.
    pub fn edge_count(&self) -> usize {
        self.calls.values().map(|c| c.child_calls.len()).sum()
    }
}

/// Fold a normalized profile into its call graph.
pub fn aggregate(profile: &Profile) -> Result<CallGraph> {
    let nodes = profile.nodes();
    let mut calls: BTreeMap<CallId, AggregatedCall> = BTreeMap::new();

    for node in nodes {
        let call = calls
            .entry(node.call_id)
            .or_insert_with(|| AggregatedCall {
                frame: node.call_frame.clone(),
                self_time: 0.0,
                self_hit_count: 0,
                child_calls: BTreeMap::new(),
            });
        call.self_hit_count += node.self_hit_count;
        call.self_time += node.self_time;

        for &child_id in &node.children {
            let child = &nodes[profile.child_index(node.id, child_id)?];
            let edge = call
                .child_calls
                .entry(child.call_id)
                .or_insert_with(|| AggregatedEdge {
                    frame: child.call_frame.clone(),
                    total_time: 0.0,
                    total_hit_count: 0,
                });
            edge.total_hit_count += child.total_hit_count;
            edge.total_time += child.total_time;
        }
    }

    let graph = CallGraph { calls };
    debug!(
        "Aggregated {} nodes into {} calls and {} edges",
        nodes.len(),
        graph.len(),
        graph.edge_count()
    );
    Ok(graph)
}
