//! CPU profile input shapes and the canonical in-memory profile.
//!
//! Three JSON shapes are accepted and normalized into one [`Profile`]:
//!
//! 1. **Nested** (legacy `.cpuprofile`): a `head` node whose `children` are
//!    embedded node objects, with `callUID` as the call identity.
//!
//! 2. **Flat** (current `.cpuprofile`): a `nodes` array whose `children`
//!    (or `parent`) fields are node IDs.
//!
//! 3. **Trace** (DevTools Performance panel export): `traceEvents`
//!    containing `Profile` and `ProfileChunk` events, merged into one flat
//!    profile.
//!
//! # Example
//!
//! ```no_run
//! use chrome2calltree::profile::{Profile, TimeUnit};
//! use std::fs::File;
//! use std::io::BufReader;
//!
//! let input = BufReader::new(File::open("app.cpuprofile").unwrap());
//! let profile = Profile::from_json(input, TimeUnit::Microseconds).unwrap();
//! println!("{} nodes", profile.len());
//! ```

use crate::error::{ConvertError, Result};
use log::debug;
use serde::Deserialize;
use serde::de::{DeserializeOwned, IgnoredAny};
use std::collections::HashMap;
use std::io::Read;

/// Identity of one node in the sampled call tree.
pub type NodeId = u64;

/// Identity used to deduplicate call sites during aggregation.
pub type CallId = u64;

// ============================================================================
// Canonical profile
// ============================================================================

/// Function metadata for a call-tree node.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallFrame {
    pub function_name: String,
    pub url: String,
    /// Line number, negative when unknown.
    pub line_number: i64,
}

impl CallFrame {
    pub fn new(function_name: impl Into<String>, url: impl Into<String>, line_number: i64) -> Self {
        Self {
            function_name: function_name.into(),
            url: url.into(),
            line_number,
        }
    }
}

/// One node of the sampled call tree.
///
/// The timing fields are zero until the profile has been normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileNode {
    pub id: NodeId,
    pub call_id: CallId,
    pub call_frame: CallFrame,
    /// Samples landing exactly on this node.
    pub hit_count: u64,
    /// Child node IDs, in call order.
    pub children: Vec<NodeId>,
    pub self_time: f64,
    pub self_hit_count: u64,
    /// Time of the whole subtree, this node included.
    pub total_time: f64,
    /// Samples in the whole subtree, this node included.
    pub total_hit_count: u64,
}

impl ProfileNode {
    /// Create a node whose call identity is its node ID.
    pub fn new(id: NodeId, call_frame: CallFrame, hit_count: u64) -> Self {
        Self {
            id,
            call_id: id,
            call_frame,
            hit_count,
            children: Vec::new(),
            self_time: 0.0,
            self_hit_count: 0,
            total_time: 0.0,
            total_hit_count: 0,
        }
    }

    pub fn with_call_id(mut self, call_id: CallId) -> Self {
        self.call_id = call_id;
        self
    }

    pub fn with_children(mut self, children: Vec<NodeId>) -> Self {
        self.children = children;
        self
    }
}

/// Whole-profile totals written to the Callgrind summary line.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProfileTotals {
    /// Total time in milliseconds.
    pub total_time: f64,
    pub total_hit_count: u64,
}

/// A sampled profile: an arena of nodes rooted at the first node.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    nodes: Vec<ProfileNode>,
    index: HashMap<NodeId, usize>,
    /// Start timestamp in seconds.
    pub start_time: f64,
    /// End timestamp in seconds.
    pub end_time: f64,
    /// Total time in milliseconds, set by normalization.
    pub total_time: f64,
    /// Samples reachable from the root, set by normalization.
    pub total_hit_count: u64,
    /// Milliseconds per sample, set by normalization.
    pub sampling_interval: f64,
}

impl Profile {
    /// Build a profile from its nodes. `nodes[0]` is the root.
    ///
    /// Node IDs must be unique; a repeated ID is a
    /// [`ConvertError::DuplicateNode`].
    pub fn new(nodes: Vec<ProfileNode>, start_time: f64, end_time: f64) -> Result<Self> {
        let mut index = HashMap::with_capacity(nodes.len());
        for (idx, node) in nodes.iter().enumerate() {
            if index.insert(node.id, idx).is_some() {
                return Err(ConvertError::DuplicateNode(node.id));
            }
        }

        Ok(Self {
            nodes,
            index,
            start_time,
            end_time,
            total_time: 0.0,
            total_hit_count: 0,
            sampling_interval: 0.0,
        })
    }

    /// Decode a profile of any supported shape from a JSON reader.
    pub fn from_json<R: Read>(reader: R, time_unit: TimeUnit) -> Result<Self> {
        Self::from_json_detected(reader, time_unit).map(|(_, profile)| profile)
    }

    /// Decode a profile from a JSON reader, returning the detected shape
    /// along with it.
    pub fn from_json_detected<R: Read>(
        reader: R,
        time_unit: TimeUnit,
    ) -> Result<(ProfileShape, Self)> {
        let value = read_value(serde_json::Deserializer::from_reader(reader))?;
        Self::from_value(value, time_unit)
    }

    /// Decode a profile of any supported shape from a JSON string.
    pub fn from_json_str(contents: &str, time_unit: TimeUnit) -> Result<Self> {
        let value = read_value(serde_json::Deserializer::from_str(contents))?;
        Self::from_value(value, time_unit).map(|(_, profile)| profile)
    }

    fn from_value(value: serde_json::Value, time_unit: TimeUnit) -> Result<(ProfileShape, Self)> {
        let shape = shape_of(&value)?;
        debug!("Detected {} profile", shape.name());

        let profile = match shape {
            ProfileShape::Nested => Self::from_nested(from_value_deep(value)?, time_unit)?,
            ProfileShape::Flat => Self::from_flat(from_value_deep(value)?, time_unit)?,
            ProfileShape::Trace => Self::from_trace(from_value_deep(value)?)?,
        };

        debug!(
            "Loaded {} nodes spanning {}s",
            profile.len(),
            profile.end_time - profile.start_time
        );
        Ok((shape, profile))
    }

    /// Flatten a nested profile into the node arena, in pre-order.
    ///
    /// Nodes without an `id` get fresh IDs above the largest explicit one;
    /// nodes without a `callUID` use their node ID as call identity.
    pub fn from_nested(raw: NestedProfile, time_unit: TimeUnit) -> Result<Self> {
        let mut next_id = raw.head.max_explicit_id().map_or(1, |id| id + 1);
        let mut nodes: Vec<ProfileNode> = Vec::new();
        let mut stack: Vec<(NestedNode, Option<usize>)> = vec![(raw.head, None)];

        while let Some((mut raw_node, parent)) = stack.pop() {
            let id = raw_node.id.unwrap_or_else(|| {
                let id = next_id;
                next_id += 1;
                id
            });
            let children = std::mem::take(&mut raw_node.children);

            let idx = nodes.len();
            let frame = CallFrame::new(raw_node.function_name, raw_node.url, raw_node.line_number);
            nodes.push(
                ProfileNode::new(id, frame, raw_node.hit_count)
                    .with_call_id(raw_node.call_uid.unwrap_or(id)),
            );
            if let Some(parent_idx) = parent {
                nodes[parent_idx].children.push(id);
            }

            // Reversed so children pop in call order
            for child in children.into_iter().rev() {
                stack.push((child, Some(idx)));
            }
        }

        Self::new(
            nodes,
            time_unit.to_seconds(raw.start_time),
            time_unit.to_seconds(raw.end_time),
        )
    }

    /// Build a profile from the flat `nodes` shape.
    ///
    /// Children are rebuilt from `parent` links when no node lists children,
    /// and hit counts are counted from `samples` when no node carries one.
    pub fn from_flat(raw: FlatProfile, time_unit: TimeUnit) -> Result<Self> {
        if raw.nodes.is_empty() {
            return Err(ConvertError::MissingRoot);
        }

        let hit_counts = if raw.nodes.iter().all(|n| n.hit_count.is_none()) {
            debug!("No hitCount fields, counting {} samples", raw.samples.len());
            let mut counts: HashMap<NodeId, u64> = HashMap::new();
            for &sample in &raw.samples {
                *counts.entry(sample).or_insert(0) += 1;
            }
            Some(counts)
        } else {
            None
        };

        let use_parent_links = raw.nodes.iter().all(|n| n.children.is_empty())
            && raw.nodes.iter().any(|n| n.parent.is_some());

        let mut nodes: Vec<ProfileNode> = raw
            .nodes
            .iter()
            .map(|node| {
                let hit_count = match &hit_counts {
                    Some(counts) => counts.get(&node.id).copied().unwrap_or(0),
                    None => node.hit_count.unwrap_or(0),
                };
                let frame = CallFrame::new(
                    node.call_frame.function_name.clone(),
                    node.call_frame.url.clone(),
                    node.call_frame.line_number,
                );
                ProfileNode::new(node.id, frame, hit_count).with_children(node.children.clone())
            })
            .collect();

        if use_parent_links {
            debug!("Rebuilding children from parent links");
            let mut node_map: HashMap<NodeId, usize> = HashMap::new();
            for (idx, node) in nodes.iter().enumerate() {
                node_map.entry(node.id).or_insert(idx);
            }
            for raw_node in &raw.nodes {
                if let Some(parent_id) = raw_node.parent {
                    let parent_idx =
                        *node_map
                            .get(&parent_id)
                            .ok_or(ConvertError::UnknownNode {
                                parent: parent_id,
                                child: raw_node.id,
                            })?;
                    nodes[parent_idx].children.push(raw_node.id);
                }
            }
        }

        Self::new(
            nodes,
            time_unit.to_seconds(raw.start_time),
            time_unit.to_seconds(raw.end_time),
        )
    }

    /// Merge the `ProfileChunk` events of a Performance trace into one
    /// profile. Trace timestamps are always microseconds.
    pub fn from_trace(trace: TraceFile) -> Result<Self> {
        let mut start_time: Option<f64> = None;
        let mut nodes: Vec<FlatNode> = Vec::new();
        let mut samples: Vec<NodeId> = Vec::new();
        let mut total_delta = 0.0;

        for event in trace.trace_events {
            let Some(data) = event.args.get("data") else {
                continue;
            };
            match event.name.as_str() {
                "Profile" => {
                    let profile_data: ProfileEventData = serde_json::from_value(data.clone())?;
                    start_time = profile_data.start_time.or(Some(event.ts));
                }
                "ProfileChunk" => {
                    let chunk: ProfileChunkData = serde_json::from_value(data.clone())?;
                    if let Some(cpu_profile) = chunk.cpu_profile {
                        nodes.extend(cpu_profile.nodes);
                        samples.extend(cpu_profile.samples);
                    }
                    total_delta += chunk.time_deltas.iter().sum::<f64>();
                }
                _ => {}
            }
        }

        if nodes.is_empty() {
            return Err(ConvertError::InvalidProfile(
                "no CPU profile data found in trace".into(),
            ));
        }

        let start_time = start_time.unwrap_or(0.0);
        let flat = FlatProfile {
            nodes,
            start_time,
            end_time: start_time + total_delta,
            samples,
        };
        Self::from_flat(flat, TimeUnit::Microseconds)
    }

    /// All nodes, in collection order.
    pub fn nodes(&self) -> &[ProfileNode] {
        &self.nodes
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut [ProfileNode] {
        &mut self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The root node, `nodes[0]`.
    pub fn root(&self) -> Option<&ProfileNode> {
        self.nodes.first()
    }

    /// Look up a node by ID.
    pub fn node(&self, id: NodeId) -> Option<&ProfileNode> {
        self.index.get(&id).map(|&idx| &self.nodes[idx])
    }

    /// Resolve a child reference of `parent` to its arena index.
    pub fn child_index(&self, parent: NodeId, child: NodeId) -> Result<usize> {
        self.index
            .get(&child)
            .copied()
            .ok_or(ConvertError::UnknownNode { parent, child })
    }

    /// Totals for the Callgrind summary line.
    pub fn totals(&self) -> ProfileTotals {
        ProfileTotals {
            total_time: self.total_time,
            total_hit_count: self.total_hit_count,
        }
    }
}

// ============================================================================
// Shape detection
// ============================================================================

/// The JSON shape of a CPU profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileShape {
    /// Legacy profile with an embedded `head` tree.
    Nested,
    /// Profile with a flat `nodes` array.
    Flat,
    /// DevTools Performance trace with `traceEvents`.
    Trace,
}

impl ProfileShape {
    pub fn name(self) -> &'static str {
        match self {
            ProfileShape::Nested => "nested cpuprofile",
            ProfileShape::Flat => "flat cpuprofile",
            ProfileShape::Trace => "Performance trace",
        }
    }
}

/// Detect the shape of a CPU profile from JSON content.
///
/// Only the top-level keys are kept; nested values are skipped.
pub fn detect_profile_shape(contents: &str) -> Result<ProfileShape> {
    let mut deserializer = serde_json::Deserializer::from_str(contents);
    deserializer.disable_recursion_limit();
    let keys = ShapeKeys::deserialize(serde_stacker::Deserializer::new(&mut deserializer))?;
    deserializer.end()?;
    shape_from_keys(
        keys.trace_events.is_some(),
        keys.head.is_some(),
        keys.nodes.is_some(),
    )
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShapeKeys {
    #[serde(default)]
    trace_events: Option<IgnoredAny>,
    #[serde(default)]
    head: Option<IgnoredAny>,
    #[serde(default)]
    nodes: Option<IgnoredAny>,
}

/// Read one JSON document without a nesting limit.
///
/// Nested profiles take two JSON levels per stack frame, so real call stacks
/// exceed serde_json's default limit of 128. Deep recursion runs on a heap
/// allocated stack instead.
fn read_value<'de, R: serde_json::de::Read<'de>>(
    mut deserializer: serde_json::Deserializer<R>,
) -> Result<serde_json::Value> {
    deserializer.disable_recursion_limit();
    let value =
        serde_json::Value::deserialize(serde_stacker::Deserializer::new(&mut deserializer))?;
    deserializer.end()?;
    Ok(value)
}

/// `serde_json::from_value` on a stack that grows with the nesting depth.
fn from_value_deep<T: DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    Ok(T::deserialize(serde_stacker::Deserializer::new(value))?)
}

fn shape_of(value: &serde_json::Value) -> Result<ProfileShape> {
    shape_from_keys(
        value.get("traceEvents").is_some(),
        value.get("head").is_some(),
        value.get("nodes").is_some(),
    )
}

fn shape_from_keys(trace_events: bool, head: bool, nodes: bool) -> Result<ProfileShape> {
    if trace_events {
        Ok(ProfileShape::Trace)
    } else if head {
        Ok(ProfileShape::Nested)
    } else if nodes {
        Ok(ProfileShape::Flat)
    } else {
        Err(ConvertError::InvalidProfile(
            "unrecognized format: expected 'head', 'nodes' or 'traceEvents' field".into(),
        ))
    }
}

/// Unit of the raw `startTime` / `endTime` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeUnit {
    /// Legacy profiles record seconds.
    #[default]
    Seconds,
    Milliseconds,
    /// Node `--cpu-prof` and DevTools profiles record microseconds.
    Microseconds,
}

impl TimeUnit {
    pub fn to_seconds(self, value: f64) -> f64 {
        match self {
            TimeUnit::Seconds => value,
            TimeUnit::Milliseconds => value / 1_000.0,
            TimeUnit::Microseconds => value / 1_000_000.0,
        }
    }
}

// ============================================================================
// Nested cpuprofile format types
// ============================================================================

/// A legacy CPU profile with an embedded call tree.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NestedProfile {
    /// Root of the call tree.
    pub head: NestedNode,
    #[serde(default)]
    pub start_time: f64,
    #[serde(default)]
    pub end_time: f64,
}

/// A node of a legacy call tree; children are embedded objects.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NestedNode {
    #[serde(default)]
    pub function_name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_line")]
    pub line_number: i64,
    /// Call identity shared by every occurrence of the same call site.
    #[serde(default, rename = "callUID")]
    pub call_uid: Option<u64>,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub hit_count: u64,
    #[serde(default)]
    pub children: Vec<NestedNode>,
}

impl NestedNode {
    fn max_explicit_id(&self) -> Option<u64> {
        let mut max_id = None;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            max_id = max_id.max(node.id);
            stack.extend(node.children.iter());
        }
        max_id
    }
}

fn default_line() -> i64 {
    -1
}

// ============================================================================
// Flat cpuprofile format types
// ============================================================================

/// A CPU profile with a flat node array.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatProfile {
    /// Call tree nodes; the first one is the root.
    pub nodes: Vec<FlatNode>,
    #[serde(default)]
    pub start_time: f64,
    #[serde(default)]
    pub end_time: f64,
    /// Node IDs at the top of the stack for each sample.
    #[serde(default)]
    pub samples: Vec<NodeId>,
}

/// A node in a flat profile.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatNode {
    pub id: NodeId,
    pub call_frame: FlatCallFrame,
    #[serde(default)]
    pub hit_count: Option<u64>,
    #[serde(default)]
    pub children: Vec<NodeId>,
    /// Parent node ID (trace chunks use this instead of children).
    #[serde(default)]
    pub parent: Option<NodeId>,
}

/// Call frame of a flat node.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatCallFrame {
    #[serde(default)]
    pub function_name: String,
    #[serde(default)]
    pub url: String,
    /// Line number (0-based, -1 if unknown).
    #[serde(default = "default_line")]
    pub line_number: i64,
}

// ============================================================================
// Chrome Performance trace format types
// ============================================================================

/// A Chrome Performance trace file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceFile {
    pub trace_events: Vec<TraceEvent>,
}

/// A trace event in the Performance trace.
#[derive(Debug, Clone, Deserialize)]
pub struct TraceEvent {
    pub name: String,
    /// Timestamp in microseconds.
    #[serde(default)]
    pub ts: f64,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileEventData {
    #[serde(default)]
    start_time: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileChunkData {
    #[serde(default)]
    cpu_profile: Option<ProfileChunkCpuProfile>,
    #[serde(default)]
    time_deltas: Vec<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileChunkCpuProfile {
    #[serde(default)]
    nodes: Vec<FlatNode>,
    #[serde(default)]
    samples: Vec<NodeId>,
}
