//! Tree statistics: self and total time and hit counts for every node.
//!
//! The sampling interval is derived from the profile duration and the
//! number of samples reachable from the root:
//!
//! ```text
//! total_time        = 1000 * (end_time - start_time)      (ms)
//! sampling_interval = total_time / total_hit_count
//! ```
//!
//! A profile without samples yields a non-finite interval. It is not
//! rejected: the non-finite value flows into every node's times.

use crate::error::{ConvertError, Result};
use crate::profile::Profile;
use log::{debug, warn};

/// Annotate every node reachable from the root with its timings and set
/// the profile-level totals. The tree topology is left unchanged.
pub fn normalize(profile: &mut Profile) -> Result<()> {
    let order = preorder(profile)?;

    let total_hit_count: u64 = order.iter().map(|&idx| profile.nodes()[idx].hit_count).sum();
    let total_time = 1000.0 * (profile.end_time - profile.start_time);
    let sampling_interval = total_time / total_hit_count as f64;

    if total_hit_count == 0 {
        warn!("Profile has no samples, node times will not be finite");
    }
    debug!(
        "Normalizing {} nodes: {} hits over {}ms, interval {}ms",
        order.len(),
        total_hit_count,
        total_time,
        sampling_interval
    );

    profile.total_hit_count = total_hit_count;
    profile.total_time = total_time;
    profile.sampling_interval = sampling_interval;

    // Reverse pre-order visits every child before its parent
    for &idx in order.iter().rev() {
        let mut subtree_hits = profile.nodes()[idx].hit_count;
        let parent = profile.nodes()[idx].id;
        for &child in &profile.nodes()[idx].children {
            let child_idx = profile.child_index(parent, child)?;
            subtree_hits += profile.nodes()[child_idx].total_hit_count;
        }

        let node = &mut profile.nodes_mut()[idx];
        node.self_time = node.hit_count as f64 * sampling_interval;
        node.self_hit_count = node.hit_count;
        node.total_hit_count = subtree_hits;
        node.total_time = subtree_hits as f64 * sampling_interval;
    }

    Ok(())
}

/// Arena indices of every node reachable from the root, parents first.
///
/// Each node must be reached exactly once; a second path to a node is a
/// [`ConvertError::SharedNode`].
fn preorder(profile: &Profile) -> Result<Vec<usize>> {
    if profile.is_empty() {
        return Err(ConvertError::MissingRoot);
    }

    let nodes = profile.nodes();
    let mut visited = vec![false; nodes.len()];
    let mut order = Vec::with_capacity(nodes.len());
    let mut stack = vec![0usize];
    visited[0] = true;

    while let Some(idx) = stack.pop() {
        order.push(idx);
        let node = &nodes[idx];

        // Reversed so children are visited in call order
        for &child in node.children.iter().rev() {
            let child_idx = profile.child_index(node.id, child)?;
            if visited[child_idx] {
                return Err(ConvertError::SharedNode(child));
            }
            visited[child_idx] = true;
            stack.push(child_idx);
        }
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{CallFrame, ProfileNode};

    fn node(id: u64, hit_count: u64, children: Vec<u64>) -> ProfileNode {
        ProfileNode::new(id, CallFrame::new(format!("f{}", id), "app.js", 1), hit_count)
            .with_children(children)
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    #[test]
    fn two_node_scenario() {
        let mut profile = Profile::new(vec![node(1, 1, vec![2]), node(2, 3, vec![])], 0.0, 0.004).unwrap();
        normalize(&mut profile).unwrap();

        assert_eq!(profile.total_hit_count, 4);
        assert_close(profile.total_time, 4.0);
        assert_close(profile.sampling_interval, 1.0);

        let root = profile.node(1).unwrap();
        assert_close(root.self_time, 1.0);
        assert_eq!(root.self_hit_count, 1);
        assert_close(root.total_time, 4.0);
        assert_eq!(root.total_hit_count, 4);

        let child = profile.node(2).unwrap();
        assert_close(child.self_time, 3.0);
        assert_close(child.total_time, 3.0);
        assert_eq!(child.total_hit_count, 3);
    }

    #[test]
    fn subtree_hit_count_law_holds_everywhere() {
        // 1 -> (2 -> (4, 5), 3 -> 6)
        let mut profile = Profile::new(
            vec![
                node(1, 0, vec![2, 3]),
                node(2, 2, vec![4, 5]),
                node(3, 1, vec![6]),
                node(4, 4, vec![]),
                node(5, 0, vec![]),
                node(6, 3, vec![]),
            ],
            10.0,
            10.01,
        )
        .unwrap();
        normalize(&mut profile).unwrap();

        assert_eq!(profile.total_hit_count, 10);
        assert_close(profile.total_time, 10.0);

        for node in profile.nodes() {
            let children_hits: u64 = node
                .children
                .iter()
                .map(|&c| profile.node(c).unwrap().total_hit_count)
                .sum();
            assert_eq!(node.total_hit_count, node.hit_count + children_hits);
            assert_close(
                node.total_time,
                node.total_hit_count as f64 * profile.sampling_interval,
            );
            assert_close(node.self_time, node.hit_count as f64 * profile.sampling_interval);
        }

        assert_eq!(profile.node(2).unwrap().total_hit_count, 6);
        assert_eq!(profile.node(3).unwrap().total_hit_count, 4);
    }

    #[test]
    fn node_order_in_collection_does_not_matter() {
        // Children listed before their parents in the arena
        let mut profile = Profile::new(
            vec![node(1, 1, vec![3]), node(2, 5, vec![]), node(3, 2, vec![2])],
            0.0,
            0.008,
        )
        .unwrap();
        normalize(&mut profile).unwrap();

        assert_eq!(profile.node(1).unwrap().total_hit_count, 8);
        assert_eq!(profile.node(3).unwrap().total_hit_count, 7);
        assert_eq!(profile.node(2).unwrap().total_hit_count, 5);
    }

    #[test]
    fn unreachable_nodes_are_not_counted() {
        let mut profile = Profile::new(
            vec![node(1, 1, vec![]), node(2, 9, vec![])],
            0.0,
            0.001,
        )
        .unwrap();
        normalize(&mut profile).unwrap();

        assert_eq!(profile.total_hit_count, 1);
        let orphan = profile.node(2).unwrap();
        assert_eq!(orphan.total_hit_count, 0);
        assert_eq!(orphan.self_time, 0.0);
    }

    #[test]
    fn zero_hits_propagate_non_finite_times() {
        let mut profile = Profile::new(vec![node(1, 0, vec![2]), node(2, 0, vec![])], 0.0, 1.0).unwrap();
        normalize(&mut profile).unwrap();

        assert_eq!(profile.total_hit_count, 0);
        assert_close(profile.total_time, 1000.0);
        assert!(profile.sampling_interval.is_infinite());
        for node in profile.nodes() {
            assert!(!node.self_time.is_finite());
            assert!(!node.total_time.is_finite());
        }
    }

    #[test]
    fn dangling_child_is_an_error() {
        let mut profile = Profile::new(vec![node(1, 1, vec![7])], 0.0, 1.0).unwrap();
        let result = normalize(&mut profile);

        assert!(matches!(
            result,
            Err(ConvertError::UnknownNode { parent: 1, child: 7 })
        ));
    }

    #[test]
    fn shared_subtree_is_an_error() {
        let mut profile = Profile::new(
            vec![node(1, 0, vec![2, 3]), node(2, 1, vec![3]), node(3, 1, vec![])],
            0.0,
            1.0,
        )
        .unwrap();
        let result = normalize(&mut profile);

        assert!(matches!(result, Err(ConvertError::SharedNode(3))));
    }

    #[test]
    fn cycle_is_an_error() {
        let mut profile = Profile::new(vec![node(1, 0, vec![2]), node(2, 1, vec![1])], 0.0, 1.0).unwrap();
        let result = normalize(&mut profile);

        assert!(matches!(result, Err(ConvertError::SharedNode(1))));
    }

    #[test]
    fn empty_profile_has_no_root() {
        let mut profile = Profile::new(Vec::new(), 0.0, 1.0).unwrap();
        assert!(matches!(normalize(&mut profile), Err(ConvertError::MissingRoot)));
    }

    #[test]
    fn deep_chain_does_not_overflow() {
        let depth = 100_000u64;
        let nodes: Vec<ProfileNode> = (1..=depth)
            .map(|id| {
                let children = if id < depth { vec![id + 1] } else { vec![] };
                node(id, 1, children)
            })
            .collect();
        let mut profile = Profile::new(nodes, 0.0, depth as f64 / 1000.0).unwrap();
        normalize(&mut profile).unwrap();

        assert_eq!(profile.root().unwrap().total_hit_count, depth);
        assert_close(profile.sampling_interval, 1.0);
    }
}
