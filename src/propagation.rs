//! Two-phase message passing over the hypergraph
//!
//! Each layer runs, per attention head, a Vertex→Edge phase (tools aggregate
//! into capabilities) followed by an Edge→Vertex phase (capabilities flow
//! back into tools). Attention is masked by the incidence matrix: a pair
//! participates only where `A[t][c] = 1`, and the masked softmax normalizes
//! over each edge's incident tools (phase 1) or each vertex's incident
//! capabilities (phase 2). Head outputs are concatenated; inverted dropout is
//! applied during training only.
//!
//! The cache keeps every layer's node representations and the normalized
//! attention matrices, which the trainer and attention introspection read
//! back.

use nalgebra::{DMatrix, DVector};
use rand::Rng;

use crate::error::{Result, ShgatError};
use crate::features::HypergraphFeatures;
use crate::hypergraph::HypergraphStore;
use crate::math::{elu, leaky_relu, matmul_transposed};
use crate::params::ParameterStore;

/// Negative slope for attention-score activation.
const LEAKY_SLOPE: f32 = 0.2;

/// Activations retained from a forward pass.
#[derive(Debug, Clone)]
pub struct ForwardCache {
    /// Tool representations per layer; `h[0]` is the raw embeddings and
    /// `h[num_layers]` the final propagated features.
    pub h: Vec<DMatrix<f32>>,
    /// Capability representations per layer, same indexing as `h`.
    pub e: Vec<DMatrix<f32>>,
    /// Normalized vertex→edge attention, `[layer][head]`, shaped
    /// `num_tools × num_capabilities`.
    pub alpha_ve: Vec<Vec<DMatrix<f32>>>,
    /// Normalized edge→vertex attention, `[layer][head]`, shaped
    /// `num_capabilities × num_tools`.
    pub alpha_ev: Vec<Vec<DMatrix<f32>>>,
}

impl ForwardCache {
    /// Final propagated tool representations.
    pub fn final_tools(&self) -> &DMatrix<f32> {
        self.h.last().expect("cache always holds layer 0")
    }

    /// Final propagated capability representations.
    pub fn final_capabilities(&self) -> &DMatrix<f32> {
        self.e.last().expect("cache always holds layer 0")
    }
}

/// Head-specific additive score modulation, applied before the masked
/// softmax in both phases. Heads 2 and 3 inject structural and
/// co-occurrence signal from the capability's features.
fn head_modulation(head: usize, features: Option<&HypergraphFeatures>) -> f32 {
    let Some(f) = features else { return 0.0 };
    match head {
        2 => 2.0 * f.hypergraph_page_rank,
        3 => 0.6 * f.cooccurrence + 0.4 * f.recency,
        _ => 0.0,
    }
}

/// `aᵀ · leaky_relu([left_row ‖ right_row])` for one attention pair.
fn pair_score(
    a: &DVector<f32>,
    left: &DMatrix<f32>,
    left_row: usize,
    right: &DMatrix<f32>,
    right_row: usize,
) -> f32 {
    let hidden = left.ncols();
    let mut score = 0.0;
    for d in 0..hidden {
        score += a[d] * leaky_relu(left[(left_row, d)], LEAKY_SLOPE);
    }
    for d in 0..hidden {
        score += a[hidden + d] * leaky_relu(right[(right_row, d)], LEAKY_SLOPE);
    }
    score
}

/// Masked softmax over the incident entries of one row/column.
///
/// `scores` holds `(index, raw_score)` pairs for the unmasked positions;
/// returns the same indices with normalized weights. Empty input yields an
/// empty result, which leaves the corresponding attention entries at zero.
fn masked_softmax(scores: &mut Vec<(usize, f32)>) {
    if scores.is_empty() {
        return;
    }
    let max_score = scores
        .iter()
        .map(|&(_, s)| s)
        .fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for (_, s) in scores.iter_mut() {
        *s = (*s - max_score).exp();
        sum += *s;
    }
    for (_, s) in scores.iter_mut() {
        *s /= sum;
    }
}

/// Inverted dropout: zero with probability `rate`, scale survivors by
/// `1 / (1 - rate)`.
fn apply_dropout(matrix: &mut DMatrix<f32>, rate: f32) {
    let keep = 1.0 - rate;
    let mut rng = rand::thread_rng();
    for value in matrix.iter_mut() {
        if rng.gen::<f32>() < rate {
            *value = 0.0;
        } else {
            *value /= keep;
        }
    }
}

fn stack_embeddings(
    embeddings: impl Iterator<Item = (String, Vec<f32>)>,
    expected_dim: usize,
) -> Result<DMatrix<f32>> {
    let rows: Vec<(String, Vec<f32>)> = embeddings.collect();
    for (id, embedding) in &rows {
        if embedding.len() != expected_dim {
            return Err(ShgatError::InvalidInput(format!(
                "embedding for '{}' has dimension {}, expected {}",
                id,
                embedding.len(),
                expected_dim
            )));
        }
    }
    let flat: Vec<f32> = rows.iter().flat_map(|(_, e)| e.iter().copied()).collect();
    Ok(DMatrix::from_row_slice(rows.len(), expected_dim, &flat))
}

/// Run the full forward pass and return the activation cache.
///
/// With `training` set, inverted dropout is applied to each layer's
/// concatenated outputs; scoring callers pass `false` and get bit-for-bit
/// deterministic results.
pub fn propagate(
    store: &HypergraphStore,
    params: &ParameterStore,
    training: bool,
) -> Result<ForwardCache> {
    let config = &params.config;
    let num_tools = store.num_tools();
    let num_caps = store.num_capabilities();
    let incidence = store.incidence();

    let h0 = stack_embeddings(
        store
            .tools()
            .iter()
            .map(|t| (t.id.clone(), t.embedding.clone())),
        config.embedding_dim,
    )?;
    let e0 = stack_embeddings(
        store
            .capabilities()
            .iter()
            .map(|c| (c.id.clone(), c.embedding.clone())),
        config.embedding_dim,
    )?;

    let mut cache = ForwardCache {
        h: vec![h0],
        e: vec![e0],
        alpha_ve: Vec::with_capacity(config.num_layers),
        alpha_ev: Vec::with_capacity(config.num_layers),
    };

    for layer in 0..config.num_layers {
        let h_in = &cache.h[layer];
        let e_in = &cache.e[layer];
        let in_dim = config.layer_input_dim(layer);
        if h_in.ncols() != in_dim || e_in.ncols() != in_dim {
            return Err(ShgatError::InvalidInput(format!(
                "layer {} expected input dimension {}, got tools {} / capabilities {}",
                layer,
                in_dim,
                h_in.ncols(),
                e_in.ncols()
            )));
        }

        let hidden = config.hidden_dim;
        let mut head_h: Vec<DMatrix<f32>> = Vec::with_capacity(config.num_heads);
        let mut head_e: Vec<DMatrix<f32>> = Vec::with_capacity(config.num_heads);
        let mut layer_alpha_ve: Vec<DMatrix<f32>> = Vec::with_capacity(config.num_heads);
        let mut layer_alpha_ev: Vec<DMatrix<f32>> = Vec::with_capacity(config.num_heads);

        for (head_idx, head) in params.layers[layer].heads.iter().enumerate() {
            // Vertex → Edge: tools project through W_v, capabilities through
            // W_e; incident pairs score through a_ve.
            let h_proj = matmul_transposed(h_in, &head.w_v);
            let e_proj = matmul_transposed(e_in, &head.w_e);

            let mut alpha_ve = DMatrix::zeros(num_tools, num_caps);
            let mut e_agg = DMatrix::zeros(num_caps, hidden);
            for c in 0..num_caps {
                let modulation =
                    head_modulation(head_idx, store.capabilities()[c].features.as_ref());
                let mut incident: Vec<(usize, f32)> = (0..num_tools)
                    .filter(|&t| incidence[(t, c)] != 0.0)
                    .map(|t| {
                        (
                            t,
                            pair_score(&head.a_ve, &h_proj, t, &e_proj, c) + modulation,
                        )
                    })
                    .collect();
                masked_softmax(&mut incident);
                for &(t, weight) in &incident {
                    alpha_ve[(t, c)] = weight;
                    for d in 0..hidden {
                        e_agg[(c, d)] += weight * h_proj[(t, d)];
                    }
                }
                for d in 0..hidden {
                    e_agg[(c, d)] = elu(e_agg[(c, d)]);
                }
            }

            // Edge → Vertex: aggregated capabilities project through W_e2,
            // phase-1 tool projections through W_v2; incident pairs score
            // through a_ev.
            let e_proj2 = matmul_transposed(&e_agg, &head.w_e2);
            let h_proj2 = matmul_transposed(&h_proj, &head.w_v2);

            let mut alpha_ev = DMatrix::zeros(num_caps, num_tools);
            let mut h_agg = DMatrix::zeros(num_tools, hidden);
            for t in 0..num_tools {
                let mut incident: Vec<(usize, f32)> = (0..num_caps)
                    .filter(|&c| incidence[(t, c)] != 0.0)
                    .map(|c| {
                        let modulation =
                            head_modulation(head_idx, store.capabilities()[c].features.as_ref());
                        (
                            c,
                            pair_score(&head.a_ev, &e_proj2, c, &h_proj2, t) + modulation,
                        )
                    })
                    .collect();
                masked_softmax(&mut incident);
                if incident.is_empty() {
                    // An isolated tool keeps its own projection.
                    for d in 0..hidden {
                        h_agg[(t, d)] = elu(h_proj2[(t, d)]);
                    }
                    continue;
                }
                for &(c, weight) in &incident {
                    alpha_ev[(c, t)] = weight;
                    for d in 0..hidden {
                        h_agg[(t, d)] += weight * e_proj2[(c, d)];
                    }
                }
                for d in 0..hidden {
                    h_agg[(t, d)] = elu(h_agg[(t, d)]);
                }
            }

            head_h.push(h_agg);
            head_e.push(e_agg);
            layer_alpha_ve.push(alpha_ve);
            layer_alpha_ev.push(alpha_ev);
        }

        let mut h_next = concat_heads(&head_h, num_tools, hidden);
        let mut e_next = concat_heads(&head_e, num_caps, hidden);
        if training && config.dropout > 0.0 {
            apply_dropout(&mut h_next, config.dropout);
            apply_dropout(&mut e_next, config.dropout);
        }

        cache.h.push(h_next);
        cache.e.push(e_next);
        cache.alpha_ve.push(layer_alpha_ve);
        cache.alpha_ev.push(layer_alpha_ev);
    }

    Ok(cache)
}

fn concat_heads(heads: &[DMatrix<f32>], rows: usize, hidden: usize) -> DMatrix<f32> {
    let mut out = DMatrix::zeros(rows, heads.len() * hidden);
    for (h, head) in heads.iter().enumerate() {
        for r in 0..rows {
            for d in 0..hidden {
                out[(r, h * hidden + d)] = head[(r, d)];
            }
        }
    }
    out
}
