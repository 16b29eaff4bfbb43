//! Online training: BCE loss, reduced backward pass, SGD with L2
//!
//! The backward pass covers the parameter groups that dominate scoring:
//! the fusion logits (exact softmax derivative), the intent projection
//! (through the cosine similarity), and each layer's `W_v` matrices
//! (through the attention-weighted vertex→edge aggregation). Remaining
//! gradients are implicitly zero.

use log::debug;

use crate::error::{Result, ShgatError};
use crate::hypergraph::HypergraphStore;
use crate::math::bce;
use crate::params::{GradientAccumulators, ParameterStore};
use crate::propagation::propagate;
use crate::scoring::{capability_parts, project_intent};
use serde::{Deserialize, Serialize};

/// One labeled outcome for a capability under an intent.
///
/// `context_tools` is accepted for API compatibility and ignored: the
/// engine scores context-free, and path planners consume context upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingExample {
    pub intent_embedding: Vec<f32>,
    pub capability_id: String,
    /// Outcome label, 0 or 1
    pub outcome: f32,
    #[serde(default)]
    pub context_tools: Vec<String>,
}

/// Aggregate result of one training batch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrainingResult {
    /// Mean BCE loss over scored examples
    pub loss: f32,
    /// Fraction of scored examples where `round(score)` matched the label
    pub accuracy: f32,
    /// Examples that contributed to loss and gradients
    pub examples_seen: usize,
    /// Examples dropped for unknown capability ids
    pub skipped: usize,
}

/// Run one batch: accumulate gradients over all examples, then apply a
/// single SGD step with L2 regularization.
pub(crate) fn train_batch(
    store: &HypergraphStore,
    params: &mut ParameterStore,
    grads: &mut GradientAccumulators,
    examples: &[TrainingExample],
) -> Result<TrainingResult> {
    grads.reset();

    let config = params.config.clone();
    let mut loss_sum = 0.0;
    let mut correct = 0usize;
    let mut counted = 0usize;
    let mut skipped = 0usize;

    for example in examples {
        if example.intent_embedding.len() != config.embedding_dim {
            return Err(ShgatError::InvalidInput(format!(
                "training intent has dimension {}, expected {}",
                example.intent_embedding.len(),
                config.embedding_dim
            )));
        }
        let Some(ci) = store.capability_index(&example.capability_id) else {
            debug!(
                "training example skipped: unknown capability '{}'",
                example.capability_id
            );
            skipped += 1;
            continue;
        };

        let cache = propagate(store, params, true)?;
        let i_proj = project_intent(params, &example.intent_embedding);
        let e_row: Vec<f32> = cache.final_capabilities().row(ci).iter().copied().collect();
        let capability = &store.capabilities()[ci];
        let parts = capability_parts(capability, &e_row, &i_proj, &params.fusion);

        loss_sum += bce(parts.score, example.outcome);
        if (parts.score > 0.5) == (example.outcome > 0.5) {
            correct += 1;
        }
        counted += 1;

        // dL/d(base·rel) for BCE composed with sigmoid, with the reliability
        // multiplier folded in.
        let d_loss = parts.score - example.outcome;
        let upstream = d_loss * parts.score * (1.0 - parts.score) * parts.rel;

        accumulate_fusion(grads, upstream, &parts.weights, &parts.groups);
        accumulate_intent_and_layers(
            grads,
            &cache,
            &i_proj,
            &e_row,
            &example.intent_embedding,
            upstream * parts.weights[0],
            parts.sim,
            ci,
            &config,
        );
    }

    if counted == 0 {
        return Ok(TrainingResult {
            loss: 0.0,
            accuracy: 0.0,
            examples_seen: 0,
            skipped,
        });
    }

    apply_updates(params, grads, counted);

    Ok(TrainingResult {
        loss: loss_sum / counted as f32,
        accuracy: correct as f32 / counted as f32,
        examples_seen: counted,
        skipped,
    })
}

/// Exact softmax-derivative form for the fusion logits:
/// `∂base/∂rᵢ = wᵢ·(1−wᵢ)·sᵢ − Σ_{j≠i} wᵢ·wⱼ·sⱼ`.
fn accumulate_fusion(
    grads: &mut GradientAccumulators,
    upstream: f32,
    weights: &[f32; 3],
    groups: &[f32; 3],
) {
    for i in 0..3 {
        let mut partial = weights[i] * (1.0 - weights[i]) * groups[i];
        for j in 0..3 {
            if j != i {
                partial -= weights[i] * weights[j] * groups[j];
            }
        }
        grads.d_fusion[i] += upstream * partial;
    }
}

/// Backprop through the cosine similarity into `W_intent` and, via the
/// attention-weighted aggregation pattern, into every layer's `W_v`.
#[allow(clippy::too_many_arguments)]
fn accumulate_intent_and_layers(
    grads: &mut GradientAccumulators,
    cache: &crate::propagation::ForwardCache,
    i_proj: &[f32],
    e_row: &[f32],
    intent: &[f32],
    d_sim: f32,
    sim: f32,
    cap_index: usize,
    config: &crate::params::ShgatConfig,
) {
    let norm_p = i_proj.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_e = e_row.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_p == 0.0 || norm_e == 0.0 {
        debug!("cosine gradient skipped: zero-norm operand");
        return;
    }

    // ∂cos/∂proj and ∂cos/∂e_row.
    let out_dim = i_proj.len();
    let mut d_proj = vec![0.0f32; out_dim];
    let mut d_e = vec![0.0f32; out_dim];
    for i in 0..out_dim {
        d_proj[i] = e_row[i] / (norm_p * norm_e) - sim * i_proj[i] / (norm_p * norm_p);
        d_e[i] = i_proj[i] / (norm_p * norm_e) - sim * e_row[i] / (norm_e * norm_e);
    }

    for i in 0..out_dim {
        let coeff = d_sim * d_proj[i];
        for (j, &intent_j) in intent.iter().enumerate() {
            grads.d_w_intent[(i, j)] += coeff * intent_j;
        }
    }

    let hidden = config.hidden_dim;
    for layer in 0..config.num_layers {
        let h_in = &cache.h[layer];
        let in_dim = h_in.ncols();
        for head in 0..config.num_heads {
            let alpha = &cache.alpha_ve[layer][head];
            for t in 0..alpha.nrows() {
                let weight = alpha[(t, cap_index)];
                if weight == 0.0 {
                    continue;
                }
                for d in 0..hidden {
                    let coeff = d_sim * d_e[head * hidden + d] * weight;
                    if coeff == 0.0 {
                        continue;
                    }
                    for j in 0..in_dim {
                        grads.d_w_v[layer][head][(d, j)] += coeff * h_in[(t, j)];
                    }
                }
            }
        }
    }
}

/// `θ ← θ − (lr / batch) · (grad + λ·θ)` for every trained group.
fn apply_updates(params: &mut ParameterStore, grads: &GradientAccumulators, batch: usize) {
    let scale = params.config.learning_rate / batch as f32;
    let lambda = params.config.l2_lambda;

    for (layer, layer_grads) in params.layers.iter_mut().zip(grads.d_w_v.iter()) {
        for (head, grad) in layer.heads.iter_mut().zip(layer_grads.iter()) {
            for (w, g) in head.w_v.iter_mut().zip(grad.iter()) {
                *w -= scale * (g + lambda * *w);
            }
        }
    }

    params.fusion.semantic -= scale * (grads.d_fusion[0] + lambda * params.fusion.semantic);
    params.fusion.structure -= scale * (grads.d_fusion[1] + lambda * params.fusion.structure);
    params.fusion.temporal -= scale * (grads.d_fusion[2] + lambda * params.fusion.temporal);

    for (w, g) in params.w_intent.iter_mut().zip(grads.d_w_intent.iter()) {
        *w -= scale * (g + lambda * *w);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::HypergraphFeatures;
    use crate::hypergraph::{CapabilityNode, ToolNode};
    use crate::params::ShgatConfig;

    fn test_config() -> ShgatConfig {
        ShgatConfig {
            embedding_dim: 4,
            hidden_dim: 3,
            num_heads: 4,
            num_layers: 1,
            dropout: 0.0,
            learning_rate: 5e-3,
            l2_lambda: 0.0,
        }
    }

    fn structure_features(page_rank: f32) -> HypergraphFeatures {
        HypergraphFeatures {
            spectral_cluster: 9,
            hypergraph_page_rank: page_rank,
            ..Default::default()
        }
    }

    fn test_store() -> HypergraphStore {
        let tool = |id: &str, seed: f32| ToolNode {
            id: id.to_string(),
            embedding: vec![seed, 1.0 - seed, 0.3, 0.7],
            features: None,
        };
        let capability = |id: &str, tools: &[&str], sr: f32, pr: f32| CapabilityNode {
            id: id.to_string(),
            embedding: vec![0.5, 0.5, 0.5, 0.5],
            tools_used: tools.iter().map(|s| s.to_string()).collect(),
            success_rate: sr,
            parents: vec![],
            children: vec![],
            features: Some(structure_features(pr)),
        };
        let mut store = HypergraphStore::new();
        store.build_from_data(
            vec![tool("t1", 0.1), tool("t2", 0.8)],
            vec![
                capability("c_good", &["t1", "t2"], 0.95, 0.95),
                capability("c_bad", &["t1"], 0.3, 0.0),
            ],
        );
        store
    }

    fn training_set() -> Vec<TrainingExample> {
        vec![
            TrainingExample {
                intent_embedding: vec![0.9, 0.1, 0.2, 0.4],
                capability_id: "c_good".to_string(),
                outcome: 1.0,
                context_tools: vec![],
            },
            TrainingExample {
                intent_embedding: vec![0.1, 0.9, 0.6, 0.2],
                capability_id: "c_bad".to_string(),
                outcome: 0.0,
                context_tools: vec![],
            },
        ]
    }

    #[test]
    fn test_unknown_capability_is_skipped() {
        let store = test_store();
        let mut params = ParameterStore::new(test_config());
        let mut grads = GradientAccumulators::new(&params.config);
        let examples = vec![TrainingExample {
            intent_embedding: vec![0.0; 4],
            capability_id: "missing".to_string(),
            outcome: 1.0,
            context_tools: vec![],
        }];
        let result = train_batch(&store, &mut params, &mut grads, &examples).unwrap();
        assert_eq!(result.skipped, 1);
        assert_eq!(result.examples_seen, 0);
        assert_eq!(result.loss, 0.0);
    }

    #[test]
    fn test_dimension_mismatch_is_fatal() {
        let store = test_store();
        let mut params = ParameterStore::new(test_config());
        let mut grads = GradientAccumulators::new(&params.config);
        let examples = vec![TrainingExample {
            intent_embedding: vec![0.0; 3],
            capability_id: "c_good".to_string(),
            outcome: 1.0,
            context_tools: vec![],
        }];
        assert!(train_batch(&store, &mut params, &mut grads, &examples).is_err());
    }

    #[test]
    fn test_loss_trends_down_over_epochs() {
        let store = test_store();
        let mut params = ParameterStore::new(test_config());
        let mut grads = GradientAccumulators::new(&params.config);
        let examples = training_set();

        let mut losses = Vec::new();
        for _ in 0..50 {
            let result = train_batch(&store, &mut params, &mut grads, &examples).unwrap();
            losses.push(result.loss);
        }
        assert!(losses.last().unwrap() <= &(losses[0] + 1e-3));
    }

    #[test]
    fn test_positive_structure_example_raises_structure_weight() {
        let store = test_store();
        let mut params = ParameterStore::new(test_config());
        let mut grads = GradientAccumulators::new(&params.config);
        let before = params.fusion.normalized()[1];

        // One positive outcome on the capability whose structure head fires.
        let examples = vec![TrainingExample {
            intent_embedding: vec![0.9, 0.1, 0.2, 0.4],
            capability_id: "c_good".to_string(),
            outcome: 1.0,
            context_tools: vec![],
        }];
        train_batch(&store, &mut params, &mut grads, &examples).unwrap();
        let after = params.fusion.normalized()[1];
        assert!(after > before);
    }

    #[test]
    fn test_batch_reports_accuracy_fraction() {
        let store = test_store();
        let mut params = ParameterStore::new(test_config());
        let mut grads = GradientAccumulators::new(&params.config);
        let result = train_batch(&store, &mut params, &mut grads, &training_set()).unwrap();
        assert_eq!(result.examples_seen, 2);
        assert!(result.accuracy >= 0.0 && result.accuracy <= 1.0);
        assert!(result.loss > 0.0);
    }
}
