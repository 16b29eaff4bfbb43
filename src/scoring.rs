//! Intent-conditioned scoring of tools and capabilities
//!
//! Scores combine the propagated node representations (semantic similarity
//! to the projected intent) with structural and temporal feature heads.
//! Six head scores collapse into three group averages, which a learned
//! softmax fusion blends; capabilities additionally carry a reliability
//! multiplier derived from their historical success rate.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::hypergraph::{CapabilityNode, HypergraphStore, ToolNode};
use crate::math::{cosine, sigmoid};
use crate::params::{FusionWeights, ParameterStore};
use crate::propagation::ForwardCache;

/// Number of scoring heads: two semantic, two structural, two temporal.
pub const NUM_SCORE_HEADS: usize = 6;

/// Per-group contribution of the fused score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureContributions {
    pub semantic: f32,
    pub structure: f32,
    pub temporal: f32,
}

/// One scored node, with the per-head breakdown kept for interpretability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreEntry {
    /// Node id (tool or capability)
    pub id: String,
    /// Fused score in `[0, 1]`
    pub score: f32,
    /// Raw per-head scores
    pub head_scores: Vec<f32>,
    /// Effective per-head weights (group weight split evenly within group)
    pub head_weights: Vec<f32>,
    /// Weighted group contributions
    pub feature_contributions: FeatureContributions,
    /// Attention over tools from the last vertex→edge layer, averaged
    /// across heads; capabilities only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_attention: Option<Vec<f32>>,
}

/// Intermediate values of one capability score; the trainer backpropagates
/// through these.
#[derive(Debug, Clone)]
pub(crate) struct ScoreParts {
    pub sim: f32,
    pub head_scores: [f32; NUM_SCORE_HEADS],
    pub groups: [f32; 3],
    pub weights: [f32; 3],
    pub rel: f32,
    pub score: f32,
}

/// Reliability multiplier from a capability's historical success rate.
pub(crate) fn reliability(success_rate: f32) -> f32 {
    if success_rate < 0.5 {
        0.5
    } else if success_rate > 0.9 {
        1.2
    } else {
        1.0
    }
}

/// Project an intent embedding into the post-propagation space.
pub(crate) fn project_intent(params: &ParameterStore, intent: &[f32]) -> Vec<f32> {
    let w = &params.w_intent;
    let mut projected = vec![0.0f32; w.nrows()];
    for (i, out) in projected.iter_mut().enumerate() {
        let mut sum = 0.0;
        for j in 0..w.ncols() {
            sum += w[(i, j)] * intent[j];
        }
        *out = sum;
    }
    projected
}

/// Score one capability against a projected intent.
pub(crate) fn capability_parts(
    capability: &CapabilityNode,
    e_row: &[f32],
    i_proj: &[f32],
    fusion: &FusionWeights,
) -> ScoreParts {
    let sim = cosine(i_proj, e_row);
    let f = capability.features.clone().unwrap_or_default();

    let h0 = sim;
    let h1 = sim;
    let h2 = f.hypergraph_page_rank;
    let h3 = 0.5 * (1.0 / (1.0 + f.spectral_cluster as f32)) + 0.5 * f.adamic_adar;
    let h4 = 0.5 * f.cooccurrence + 0.5 * f.recency;
    let h5 = f.heat_diffusion;

    let groups = [(h0 + h1) / 2.0, (h2 + h3) / 2.0, (h4 + h5) / 2.0];
    let weights = fusion.normalized();
    let rel = reliability(capability.success_rate);
    let base = weights[0] * groups[0] + weights[1] * groups[1] + weights[2] * groups[2];

    ScoreParts {
        sim,
        head_scores: [h0, h1, h2, h3, h4, h5],
        groups,
        weights,
        rel,
        score: sigmoid(base * rel),
    }
}

/// Score one tool against a projected intent.
///
/// Tools without features fall back to the raw cosine similarity, clamped
/// to `[0, 0.95]`.
pub(crate) fn tool_parts(tool: &ToolNode, h_row: &[f32], i_proj: &[f32], fusion: &FusionWeights) -> ScoreParts {
    let sim = cosine(i_proj, h_row);
    let weights = fusion.normalized();

    let Some(f) = &tool.features else {
        return ScoreParts {
            sim,
            head_scores: [sim, sim, 0.0, 0.0, 0.0, 0.0],
            groups: [sim, 0.0, 0.0],
            weights,
            rel: 1.0,
            score: sim.clamp(0.0, 0.95),
        };
    };

    let h0 = sim;
    let h1 = sim;
    let h2 = f.page_rank;
    let h3 = 0.5 * (1.0 / (1.0 + f.louvain_community as f32)) + 0.5 * f.adamic_adar;
    let h4 = 0.5 * f.cooccurrence + 0.5 * f.recency;
    let h5 = f.heat_diffusion;

    let groups = [(h0 + h1) / 2.0, (h2 + h3) / 2.0, (h4 + h5) / 2.0];
    let base = weights[0] * groups[0] + weights[1] * groups[1] + weights[2] * groups[2];

    ScoreParts {
        sim,
        head_scores: [h0, h1, h2, h3, h4, h5],
        groups,
        weights,
        rel: 1.0,
        score: sigmoid(base),
    }
}

fn entry_from_parts(id: &str, parts: &ScoreParts, tool_attention: Option<Vec<f32>>) -> ScoreEntry {
    let w = parts.weights;
    ScoreEntry {
        id: id.to_string(),
        score: parts.score,
        head_scores: parts.head_scores.to_vec(),
        head_weights: vec![
            w[0] / 2.0,
            w[0] / 2.0,
            w[1] / 2.0,
            w[1] / 2.0,
            w[2] / 2.0,
            w[2] / 2.0,
        ],
        feature_contributions: FeatureContributions {
            semantic: w[0] * parts.groups[0],
            structure: w[1] * parts.groups[1],
            temporal: w[2] * parts.groups[2],
        },
        tool_attention,
    }
}

/// Averaged last-layer vertex→edge attention over tools for one capability.
pub(crate) fn average_tool_attention(cache: &ForwardCache, cap_index: usize) -> Vec<f32> {
    let Some(last_layer) = cache.alpha_ve.last() else {
        return Vec::new();
    };
    let num_heads = last_layer.len();
    if num_heads == 0 {
        return Vec::new();
    }
    let num_tools = last_layer[0].nrows();
    let mut averaged = vec![0.0f32; num_tools];
    for head in last_layer {
        for t in 0..num_tools {
            averaged[t] += head[(t, cap_index)];
        }
    }
    for value in &mut averaged {
        *value /= num_heads as f32;
    }
    averaged
}

/// Stable descending sort; equal scores keep insertion order.
pub(crate) fn sort_descending(entries: &mut [ScoreEntry]) {
    entries.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
}

/// Score every capability for an intent, sorted descending.
pub(crate) fn score_all_capabilities(
    store: &HypergraphStore,
    params: &ParameterStore,
    cache: &ForwardCache,
    intent: &[f32],
) -> Vec<ScoreEntry> {
    let i_proj = project_intent(params, intent);
    let finals = cache.final_capabilities();
    let mut entries: Vec<ScoreEntry> = store
        .capabilities()
        .iter()
        .enumerate()
        .map(|(ci, capability)| {
            let e_row: Vec<f32> = finals.row(ci).iter().copied().collect();
            let parts = capability_parts(capability, &e_row, &i_proj, &params.fusion);
            entry_from_parts(
                &capability.id,
                &parts,
                Some(average_tool_attention(cache, ci)),
            )
        })
        .collect();
    sort_descending(&mut entries);
    entries
}

/// Score every tool for an intent, sorted descending.
pub(crate) fn score_all_tools(
    store: &HypergraphStore,
    params: &ParameterStore,
    cache: &ForwardCache,
    intent: &[f32],
) -> Vec<ScoreEntry> {
    let i_proj = project_intent(params, intent);
    let finals = cache.final_tools();
    let mut entries: Vec<ScoreEntry> = store
        .tools()
        .iter()
        .enumerate()
        .map(|(ti, tool)| {
            let h_row: Vec<f32> = finals.row(ti).iter().copied().collect();
            let parts = tool_parts(tool, &h_row, &i_proj, &params.fusion);
            entry_from_parts(&tool.id, &parts, None)
        })
        .collect();
    sort_descending(&mut entries);
    entries
}

/// Weighted average of per-node scores along an ordered path; position `i`
/// weighs `1 + 0.5·i`. Unknown ids contribute nothing; a path with no known
/// nodes predicts the neutral `0.5`.
pub(crate) fn path_success(path: &[String], scores: &HashMap<String, f32>) -> f32 {
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    for (i, id) in path.iter().enumerate() {
        if let Some(&score) = scores.get(id) {
            let weight = 1.0 + 0.5 * i as f32;
            weighted_sum += weight * score;
            weight_total += weight;
        }
    }
    if weight_total == 0.0 {
        0.5
    } else {
        weighted_sum / weight_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{HypergraphFeatures, ToolGraphFeatures};

    fn capability_with(success_rate: f32, features: Option<HypergraphFeatures>) -> CapabilityNode {
        CapabilityNode {
            id: "c".to_string(),
            embedding: vec![1.0, 0.0],
            tools_used: vec![],
            success_rate,
            parents: vec![],
            children: vec![],
            features,
        }
    }

    #[test]
    fn test_reliability_bands() {
        assert_eq!(reliability(0.2), 0.5);
        assert_eq!(reliability(0.5), 1.0);
        assert_eq!(reliability(0.9), 1.0);
        assert_eq!(reliability(0.95), 1.2);
    }

    #[test]
    fn test_capability_parts_uses_feature_heads() {
        let fusion = FusionWeights::default();
        let features = HypergraphFeatures {
            spectral_cluster: 1,
            hypergraph_page_rank: 0.8,
            cooccurrence: 0.6,
            recency: 0.4,
            adamic_adar: 0.5,
            heat_diffusion: 0.3,
        };
        let capability = capability_with(0.95, Some(features));
        let parts = capability_parts(&capability, &[1.0, 0.0], &[1.0, 0.0], &fusion);
        assert!((parts.sim - 1.0).abs() < 1e-6);
        assert_eq!(parts.head_scores[2], 0.8);
        assert!((parts.head_scores[3] - (0.25 + 0.25)).abs() < 1e-6);
        assert!((parts.head_scores[4] - 0.5).abs() < 1e-6);
        assert_eq!(parts.head_scores[5], 0.3);
        assert_eq!(parts.rel, 1.2);
        assert!(parts.score > 0.5 && parts.score < 1.0);
    }

    #[test]
    fn test_featureless_tool_returns_clamped_cosine() {
        let fusion = FusionWeights::default();
        let tool = ToolNode {
            id: "t".to_string(),
            embedding: vec![1.0, 0.0],
            features: None,
        };
        let aligned = tool_parts(&tool, &[1.0, 0.0], &[1.0, 0.0], &fusion);
        assert!((aligned.score - 0.95).abs() < 1e-6);

        let opposed = tool_parts(&tool, &[-1.0, 0.0], &[1.0, 0.0], &fusion);
        assert_eq!(opposed.score, 0.0);
    }

    #[test]
    fn test_tool_with_features_goes_through_fusion() {
        let fusion = FusionWeights::default();
        let tool = ToolNode {
            id: "t".to_string(),
            embedding: vec![1.0, 0.0],
            features: Some(ToolGraphFeatures {
                page_rank: 0.9,
                louvain_community: 0,
                adamic_adar: 0.9,
                cooccurrence: 0.9,
                recency: 0.9,
                heat_diffusion: 0.9,
            }),
        };
        let parts = tool_parts(&tool, &[1.0, 0.0], &[1.0, 0.0], &fusion);
        assert!(parts.score > 0.5);
        assert!(parts.score < 1.0);
    }

    #[test]
    fn test_head_weights_split_groups_evenly() {
        let fusion = FusionWeights::default();
        let capability = capability_with(0.8, None);
        let parts = capability_parts(&capability, &[1.0, 0.0], &[1.0, 0.0], &fusion);
        let entry = entry_from_parts("c", &parts, None);
        assert_eq!(entry.head_weights.len(), NUM_SCORE_HEADS);
        let total: f32 = entry.head_weights.iter().sum();
        assert!((total - 1.0).abs() < 1e-6);
        assert!((entry.head_weights[0] - entry.head_weights[1]).abs() < 1e-7);
    }

    #[test]
    fn test_path_success_weighs_later_positions_more() {
        let mut scores = HashMap::new();
        scores.insert("a".to_string(), 0.2);
        scores.insert("b".to_string(), 0.8);
        let forward = path_success(&["a".to_string(), "b".to_string()], &scores);
        let backward = path_success(&["b".to_string(), "a".to_string()], &scores);
        assert!(forward > backward);
        // 1.0·0.2 + 1.5·0.8 over 2.5
        assert!((forward - 0.56).abs() < 1e-6);
    }

    #[test]
    fn test_path_success_neutral_on_unknown_path() {
        let scores = HashMap::new();
        assert_eq!(path_success(&["x".to_string()], &scores), 0.5);
        assert_eq!(path_success(&[], &scores), 0.5);
    }
}
