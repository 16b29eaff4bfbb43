//! Hypergraph store: tool vertices, capability hyperedges, and incidence
//!
//! Tools and capabilities carry stable external string ids; the store assigns
//! contiguous 0-based indices in insertion order and maintains a dense
//! `num_tools × num_capabilities` incidence matrix. Capability containment
//! forms a DAG-ish graph (`parents`/`children`); incidence is built from each
//! capability's transitive tool set, with a visited set so containment cycles
//! terminate.

use std::collections::{HashMap, HashSet};

use log::{debug, info};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::features::{
    HypergraphFeatureUpdate, HypergraphFeatures, ToolFeatureUpdate, ToolGraphFeatures,
};

/// A tool vertex in the hypergraph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolNode {
    /// Stable external identifier
    pub id: String,
    /// Semantic embedding, `embedding_dim` long
    pub embedding: Vec<f32>,
    /// Pre-computed graph features, if available
    #[serde(default)]
    pub features: Option<ToolGraphFeatures>,
}

/// A capability hyperedge connecting a set of tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityNode {
    /// Stable external identifier
    pub id: String,
    /// Semantic embedding, `embedding_dim` long
    pub embedding: Vec<f32>,
    /// Direct member tools (by id)
    #[serde(default)]
    pub tools_used: Vec<String>,
    /// Historical success rate in `[0, 1]`
    #[serde(default = "default_success_rate")]
    pub success_rate: f32,
    /// Containing capabilities (by id)
    #[serde(default)]
    pub parents: Vec<String>,
    /// Contained capabilities (by id); their tools are inherited
    #[serde(default)]
    pub children: Vec<String>,
    /// Pre-computed hypergraph features, if available
    #[serde(default)]
    pub features: Option<HypergraphFeatures>,
}

fn default_success_rate() -> f32 {
    1.0
}

/// Owns the graph: nodes, id→index maps, and the incidence matrix.
#[derive(Debug, Clone)]
pub struct HypergraphStore {
    tools: Vec<ToolNode>,
    capabilities: Vec<CapabilityNode>,
    tool_index: HashMap<String, usize>,
    capability_index: HashMap<String, usize>,
    incidence: DMatrix<f32>,
}

impl Default for HypergraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl HypergraphStore {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            capabilities: Vec::new(),
            tool_index: HashMap::new(),
            capability_index: HashMap::new(),
            incidence: DMatrix::zeros(0, 0),
        }
    }

    /// Insert or replace a tool, then rebuild indices.
    pub fn register_tool(&mut self, tool: ToolNode) {
        match self.tool_index.get(&tool.id) {
            Some(&idx) => self.tools[idx] = tool,
            None => self.tools.push(tool),
        }
        self.rebuild_indices();
    }

    /// Insert or replace a capability, then rebuild indices.
    pub fn register_capability(&mut self, capability: CapabilityNode) {
        match self.capability_index.get(&capability.id) {
            Some(&idx) => self.capabilities[idx] = capability,
            None => self.capabilities.push(capability),
        }
        self.rebuild_indices();
    }

    /// Replace the entire graph from bulk data.
    pub fn build_from_data(&mut self, tools: Vec<ToolNode>, capabilities: Vec<CapabilityNode>) {
        self.tools = tools;
        self.capabilities = capabilities;
        self.rebuild_indices();
    }

    /// Reassign indices in insertion order and refill the incidence matrix.
    ///
    /// Idempotent: running it twice leaves the store unchanged.
    pub fn rebuild_indices(&mut self) {
        self.tool_index = self
            .tools
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.clone(), i))
            .collect();
        self.capability_index = self
            .capabilities
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.clone(), i))
            .collect();

        let num_tools = self.tools.len();
        let num_caps = self.capabilities.len();
        self.incidence = DMatrix::zeros(num_tools, num_caps);

        for ci in 0..num_caps {
            let cap_id = self.capabilities[ci].id.clone();
            let mut visited = HashSet::new();
            let member_tools = self.collect_transitive_tools(&cap_id, &mut visited);
            for tool_id in &member_tools {
                if let Some(&ti) = self.tool_index.get(tool_id) {
                    self.incidence[(ti, ci)] = 1.0;
                }
            }
        }

        info!(
            "rebuilt hypergraph indices: {} tools, {} capabilities, {} incidences",
            num_tools,
            num_caps,
            self.incidence_nnz()
        );
    }

    /// The transitive tool set of a capability: its own `tools_used` plus
    /// everything inherited from capabilities reachable via `children`.
    ///
    /// A revisited capability contributes nothing, so containment cycles
    /// terminate. Only registered tools are included.
    pub fn collect_transitive_tools(
        &self,
        capability_id: &str,
        visited: &mut HashSet<String>,
    ) -> HashSet<String> {
        let mut collected = HashSet::new();
        if !visited.insert(capability_id.to_string()) {
            return collected;
        }
        let Some(&ci) = self.capability_index.get(capability_id) else {
            debug!("transitive collection skipped unknown capability '{}'", capability_id);
            return collected;
        };
        let capability = &self.capabilities[ci];
        for tool_id in &capability.tools_used {
            if self.tool_index.contains_key(tool_id) {
                collected.insert(tool_id.clone());
            }
        }
        for child_id in &capability.children {
            collected.extend(self.collect_transitive_tools(child_id, visited));
        }
        collected
    }

    /// Merge a partial feature update into a tool. Unknown ids are skipped.
    ///
    /// Returns whether anything was updated.
    pub fn update_tool_features(&mut self, tool_id: &str, update: &ToolFeatureUpdate) -> bool {
        let Some(&ti) = self.tool_index.get(tool_id) else {
            debug!("feature update skipped unknown tool '{}'", tool_id);
            return false;
        };
        self.tools[ti]
            .features
            .get_or_insert_with(ToolGraphFeatures::default)
            .apply(update);
        true
    }

    /// Merge a partial feature update into a capability. Unknown ids are
    /// skipped.
    pub fn update_hypergraph_features(
        &mut self,
        capability_id: &str,
        update: &HypergraphFeatureUpdate,
    ) -> bool {
        let Some(&ci) = self.capability_index.get(capability_id) else {
            debug!("feature update skipped unknown capability '{}'", capability_id);
            return false;
        };
        self.capabilities[ci]
            .features
            .get_or_insert_with(HypergraphFeatures::default)
            .apply(update);
        true
    }

    pub fn tools(&self) -> &[ToolNode] {
        &self.tools
    }

    pub fn capabilities(&self) -> &[CapabilityNode] {
        &self.capabilities
    }

    pub fn num_tools(&self) -> usize {
        self.tools.len()
    }

    pub fn num_capabilities(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty() && self.capabilities.is_empty()
    }

    pub fn tool_index(&self, tool_id: &str) -> Option<usize> {
        self.tool_index.get(tool_id).copied()
    }

    pub fn capability_index(&self, capability_id: &str) -> Option<usize> {
        self.capability_index.get(capability_id).copied()
    }

    /// Dense `num_tools × num_capabilities` 0/1 incidence matrix.
    pub fn incidence(&self) -> &DMatrix<f32> {
        &self.incidence
    }

    /// Number of non-zero entries in the incidence matrix.
    pub fn incidence_nnz(&self) -> usize {
        self.incidence.iter().filter(|&&v| v != 0.0).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(id: &str) -> ToolNode {
        ToolNode {
            id: id.to_string(),
            embedding: vec![0.0; 4],
            features: None,
        }
    }

    fn capability(id: &str, tools: &[&str], children: &[&str]) -> CapabilityNode {
        CapabilityNode {
            id: id.to_string(),
            embedding: vec![0.0; 4],
            tools_used: tools.iter().map(|s| s.to_string()).collect(),
            success_rate: 1.0,
            parents: vec![],
            children: children.iter().map(|s| s.to_string()).collect(),
            features: None,
        }
    }

    #[test]
    fn test_indices_follow_insertion_order() {
        let mut store = HypergraphStore::new();
        store.build_from_data(
            vec![tool("t1"), tool("t2"), tool("t3")],
            vec![capability("c1", &["t2"], &[])],
        );
        assert_eq!(store.tool_index("t1"), Some(0));
        assert_eq!(store.tool_index("t2"), Some(1));
        assert_eq!(store.tool_index("t3"), Some(2));
        assert_eq!(store.capability_index("c1"), Some(0));
        assert_eq!(store.incidence()[(1, 0)], 1.0);
        assert_eq!(store.incidence()[(0, 0)], 0.0);
    }

    #[test]
    fn test_transitive_closure_through_containment_chain() {
        let mut store = HypergraphStore::new();
        store.build_from_data(
            vec![tool("t1")],
            vec![
                capability("c_leaf", &["t1"], &[]),
                capability("c_mid", &[], &["c_leaf"]),
                capability("c_top", &[], &["c_mid"]),
            ],
        );
        let top = store.capability_index("c_top").unwrap();
        assert_eq!(store.incidence()[(0, top)], 1.0);
    }

    #[test]
    fn test_containment_cycle_terminates_with_direct_union() {
        let mut store = HypergraphStore::new();
        store.build_from_data(
            vec![tool("t1"), tool("t2")],
            vec![
                capability("c_a", &["t1"], &["c_b"]),
                capability("c_b", &["t2"], &["c_a"]),
            ],
        );
        // Both capabilities see the union of both tool sets.
        for ci in 0..2 {
            assert_eq!(store.incidence()[(0, ci)], 1.0);
            assert_eq!(store.incidence()[(1, ci)], 1.0);
        }
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let mut store = HypergraphStore::new();
        store.build_from_data(
            vec![tool("t1"), tool("t2")],
            vec![capability("c1", &["t1", "t2"], &[])],
        );
        let before = store.incidence().clone();
        store.rebuild_indices();
        assert_eq!(store.incidence(), &before);
        assert_eq!(store.tool_index("t2"), Some(1));
    }

    #[test]
    fn test_unregistered_tool_does_not_contribute() {
        let mut store = HypergraphStore::new();
        store.build_from_data(
            vec![tool("t1")],
            vec![capability("c1", &["t1", "ghost"], &[])],
        );
        assert_eq!(store.incidence_nnz(), 1);
    }

    #[test]
    fn test_register_replaces_existing_id_in_place() {
        let mut store = HypergraphStore::new();
        store.register_tool(tool("t1"));
        store.register_tool(tool("t2"));
        let mut replacement = tool("t1");
        replacement.embedding = vec![1.0; 4];
        store.register_tool(replacement);
        assert_eq!(store.num_tools(), 2);
        assert_eq!(store.tool_index("t1"), Some(0));
        assert_eq!(store.tools()[0].embedding, vec![1.0; 4]);
    }

    #[test]
    fn test_feature_update_unknown_id_is_skipped() {
        let mut store = HypergraphStore::new();
        store.register_tool(tool("t1"));
        let applied = store.update_tool_features(
            "nope",
            &ToolFeatureUpdate {
                page_rank: Some(0.5),
                ..Default::default()
            },
        );
        assert!(!applied);
        let applied = store.update_tool_features(
            "t1",
            &ToolFeatureUpdate {
                page_rank: Some(0.5),
                ..Default::default()
            },
        );
        assert!(applied);
        assert_eq!(store.tools()[0].features.as_ref().unwrap().page_rank, 0.5);
    }
}
