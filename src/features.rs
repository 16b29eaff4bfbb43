//! Per-node feature records consumed by the attention heads
//!
//! The engine does not compute graph statistics itself; callers feed in
//! pre-computed structural and temporal features for tools and capabilities.
//! All float features live in `[0, 1]`; communities and clusters are
//! non-negative integers.

use serde::{Deserialize, Serialize};

/// Structural and temporal features attached to a tool vertex.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolGraphFeatures {
    /// PageRank score over the tool graph
    pub page_rank: f32,
    /// Louvain community assignment
    pub louvain_community: u32,
    /// Adamic-Adar link score
    pub adamic_adar: f32,
    /// Co-occurrence frequency
    pub cooccurrence: f32,
    /// Recency of use
    pub recency: f32,
    /// Heat diffusion score
    pub heat_diffusion: f32,
}

/// Structural and temporal features attached to a capability hyperedge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HypergraphFeatures {
    /// Spectral cluster assignment
    pub spectral_cluster: u32,
    /// PageRank score over the hypergraph
    pub hypergraph_page_rank: f32,
    /// Co-occurrence frequency
    pub cooccurrence: f32,
    /// Recency of use
    pub recency: f32,
    /// Adamic-Adar link score
    pub adamic_adar: f32,
    /// Heat diffusion score
    pub heat_diffusion: f32,
}

/// Partial update for [`ToolGraphFeatures`]; only `Some` fields are applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolFeatureUpdate {
    pub page_rank: Option<f32>,
    pub louvain_community: Option<u32>,
    pub adamic_adar: Option<f32>,
    pub cooccurrence: Option<f32>,
    pub recency: Option<f32>,
    pub heat_diffusion: Option<f32>,
}

/// Partial update for [`HypergraphFeatures`]; only `Some` fields are applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HypergraphFeatureUpdate {
    pub spectral_cluster: Option<u32>,
    pub hypergraph_page_rank: Option<f32>,
    pub cooccurrence: Option<f32>,
    pub recency: Option<f32>,
    pub adamic_adar: Option<f32>,
    pub heat_diffusion: Option<f32>,
}

impl ToolGraphFeatures {
    /// Shallow-merge an update over this record.
    pub fn apply(&mut self, update: &ToolFeatureUpdate) {
        if let Some(v) = update.page_rank {
            self.page_rank = v;
        }
        if let Some(v) = update.louvain_community {
            self.louvain_community = v;
        }
        if let Some(v) = update.adamic_adar {
            self.adamic_adar = v;
        }
        if let Some(v) = update.cooccurrence {
            self.cooccurrence = v;
        }
        if let Some(v) = update.recency {
            self.recency = v;
        }
        if let Some(v) = update.heat_diffusion {
            self.heat_diffusion = v;
        }
    }
}

impl HypergraphFeatures {
    /// Shallow-merge an update over this record.
    pub fn apply(&mut self, update: &HypergraphFeatureUpdate) {
        if let Some(v) = update.spectral_cluster {
            self.spectral_cluster = v;
        }
        if let Some(v) = update.hypergraph_page_rank {
            self.hypergraph_page_rank = v;
        }
        if let Some(v) = update.cooccurrence {
            self.cooccurrence = v;
        }
        if let Some(v) = update.recency {
            self.recency = v;
        }
        if let Some(v) = update.adamic_adar {
            self.adamic_adar = v;
        }
        if let Some(v) = update.heat_diffusion {
            self.heat_diffusion = v;
        }
    }
}
