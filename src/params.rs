//! Learnable parameters: allocation, gradients, and the persistence blob
//!
//! All tensors the engine learns live here, grouped per layer and per
//! attention head, plus the shared fusion logits and the intent projection.
//! The export format is a self-describing JSON document; every field except
//! the envelope itself is optional on import so older blobs keep loading.

use chrono::{DateTime, Utc};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ShgatError};
use crate::math::{self, softmax};

/// Engine configuration; drives every parameter allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShgatConfig {
    /// Dimension of tool, capability, and intent embeddings
    pub embedding_dim: usize,
    /// Per-head hidden dimension
    pub hidden_dim: usize,
    /// Number of attention heads per layer
    pub num_heads: usize,
    /// Number of message-passing layers
    pub num_layers: usize,
    /// Inverted-dropout rate applied during training
    pub dropout: f32,
    /// SGD learning rate
    pub learning_rate: f32,
    /// L2 regularization strength
    pub l2_lambda: f32,
}

impl Default for ShgatConfig {
    fn default() -> Self {
        Self {
            embedding_dim: 1024,
            hidden_dim: 64,
            num_heads: 6,
            num_layers: 2,
            dropout: 0.1,
            learning_rate: 1e-3,
            l2_lambda: 1e-4,
        }
    }
}

impl ShgatConfig {
    /// Input width of a layer: raw embeddings for layer 0, concatenated head
    /// outputs afterwards.
    pub fn layer_input_dim(&self, layer: usize) -> usize {
        if layer == 0 {
            self.embedding_dim
        } else {
            self.num_heads * self.hidden_dim
        }
    }

    /// Width of the propagated node representations.
    pub fn output_dim(&self) -> usize {
        self.num_heads * self.hidden_dim
    }
}

/// Per-head weights of one message-passing layer.
#[derive(Debug, Clone)]
pub struct HeadParams {
    /// Vertex projection for the vertex→edge phase, `hidden_dim × in_dim`
    pub w_v: DMatrix<f32>,
    /// Edge projection for the vertex→edge phase, `hidden_dim × in_dim`
    pub w_e: DMatrix<f32>,
    /// Edge projection for the edge→vertex phase, `hidden_dim × hidden_dim`
    pub w_e2: DMatrix<f32>,
    /// Vertex projection for the edge→vertex phase, `hidden_dim × hidden_dim`
    pub w_v2: DMatrix<f32>,
    /// Vertex→edge attention vector, `2·hidden_dim`
    pub a_ve: DVector<f32>,
    /// Edge→vertex attention vector, `2·hidden_dim`
    pub a_ev: DVector<f32>,
}

impl HeadParams {
    fn new(in_dim: usize, hidden_dim: usize) -> Self {
        Self {
            w_v: math::xavier_matrix(hidden_dim, in_dim),
            w_e: math::xavier_matrix(hidden_dim, in_dim),
            w_e2: math::xavier_matrix(hidden_dim, hidden_dim),
            w_v2: math::xavier_matrix(hidden_dim, hidden_dim),
            a_ve: math::init_vector(2 * hidden_dim),
            a_ev: math::init_vector(2 * hidden_dim),
        }
    }
}

/// One message-passing layer: a set of attention heads.
#[derive(Debug, Clone)]
pub struct LayerParams {
    pub heads: Vec<HeadParams>,
}

/// Legacy per-head attention block. Allocated and persisted for blob
/// compatibility; never consulted by the forward pass or scoring.
#[derive(Debug, Clone)]
pub struct LegacyHeadParams {
    pub w_q: DMatrix<f32>,
    pub w_k: DMatrix<f32>,
    pub w_v: DMatrix<f32>,
    pub a: DVector<f32>,
}

impl LegacyHeadParams {
    fn new(embedding_dim: usize, hidden_dim: usize) -> Self {
        Self {
            w_q: math::xavier_matrix(hidden_dim, embedding_dim),
            w_k: math::xavier_matrix(hidden_dim, embedding_dim),
            w_v: math::xavier_matrix(hidden_dim, embedding_dim),
            a: math::init_vector(2 * hidden_dim),
        }
    }
}

/// Raw fusion logits over the three head groups. Softmax-normalized at use.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    pub semantic: f32,
    pub structure: f32,
    pub temporal: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            semantic: 0.0,
            structure: 0.0,
            temporal: 0.0,
        }
    }
}

impl FusionWeights {
    /// Effective weights on the simplex: `softmax([semantic, structure,
    /// temporal])`.
    pub fn normalized(&self) -> [f32; 3] {
        let mut w = [self.semantic, self.structure, self.temporal];
        softmax(&mut w);
        w
    }
}

/// Owns every learnable tensor of the engine.
#[derive(Debug, Clone)]
pub struct ParameterStore {
    pub config: ShgatConfig,
    pub layers: Vec<LayerParams>,
    pub legacy_heads: Vec<LegacyHeadParams>,
    pub fusion: FusionWeights,
    /// Intent projection into the post-propagation space,
    /// `(num_heads · hidden_dim) × embedding_dim`
    pub w_intent: DMatrix<f32>,
}

impl ParameterStore {
    /// Allocate and initialize all parameters for a configuration.
    pub fn new(config: ShgatConfig) -> Self {
        let layers = (0..config.num_layers)
            .map(|l| {
                let in_dim = config.layer_input_dim(l);
                LayerParams {
                    heads: (0..config.num_heads)
                        .map(|_| HeadParams::new(in_dim, config.hidden_dim))
                        .collect(),
                }
            })
            .collect();
        let legacy_heads = (0..config.num_heads)
            .map(|_| LegacyHeadParams::new(config.embedding_dim, config.hidden_dim))
            .collect();
        let w_intent = math::xavier_matrix(config.output_dim(), config.embedding_dim);

        Self {
            config,
            layers,
            legacy_heads,
            fusion: FusionWeights::default(),
            w_intent,
        }
    }

    /// Total scalar parameter count across all groups.
    pub fn parameter_count(&self) -> usize {
        let mut count = 0;
        for layer in &self.layers {
            for head in &layer.heads {
                count += head.w_v.len() + head.w_e.len() + head.w_e2.len() + head.w_v2.len();
                count += head.a_ve.len() + head.a_ev.len();
            }
        }
        for head in &self.legacy_heads {
            count += head.w_q.len() + head.w_k.len() + head.w_v.len() + head.a.len();
        }
        count += 3; // fusion logits
        count += self.w_intent.len();
        count
    }

    /// Serialize all parameters into the stable blob format.
    pub fn export(&self) -> ParamBlob {
        ParamBlob {
            config: Some(self.config.clone()),
            layer_params: Some(
                self.layers
                    .iter()
                    .map(|layer| LayerBlob {
                        heads: layer
                            .heads
                            .iter()
                            .map(|head| HeadBlob {
                                w_v: matrix_to_rows(&head.w_v),
                                w_e: matrix_to_rows(&head.w_e),
                                w_e2: matrix_to_rows(&head.w_e2),
                                w_v2: matrix_to_rows(&head.w_v2),
                                a_ve: head.a_ve.iter().copied().collect(),
                                a_ev: head.a_ev.iter().copied().collect(),
                            })
                            .collect(),
                    })
                    .collect(),
            ),
            head_params: Some(
                self.legacy_heads
                    .iter()
                    .map(|head| LegacyHeadBlob {
                        w_q: matrix_to_rows(&head.w_q),
                        w_k: matrix_to_rows(&head.w_k),
                        w_v: matrix_to_rows(&head.w_v),
                        a: head.a.iter().copied().collect(),
                    })
                    .collect(),
            ),
            fusion_weights: Some(self.fusion),
            w_intent: Some(matrix_to_rows(&self.w_intent)),
            exported_at: Some(Utc::now()),
        }
    }

    /// Replace parameters from a blob.
    ///
    /// Missing fields retain their current values (or, when the blob carries
    /// a new config, their freshly initialized values). Malformed tensors
    /// fail before anything is mutated, leaving the store consistent.
    pub fn import(&mut self, blob: ParamBlob) -> Result<()> {
        let mut next = match &blob.config {
            Some(config) if *config != self.config => Self::new(config.clone()),
            _ => self.clone(),
        };

        if let Some(layer_blobs) = blob.layer_params {
            let mut layers = Vec::with_capacity(layer_blobs.len());
            for layer_blob in layer_blobs {
                let mut heads = Vec::with_capacity(layer_blob.heads.len());
                for head_blob in layer_blob.heads {
                    heads.push(HeadParams {
                        w_v: rows_to_matrix(&head_blob.w_v)?,
                        w_e: rows_to_matrix(&head_blob.w_e)?,
                        w_e2: rows_to_matrix(&head_blob.w_e2)?,
                        w_v2: rows_to_matrix(&head_blob.w_v2)?,
                        a_ve: DVector::from_vec(head_blob.a_ve),
                        a_ev: DVector::from_vec(head_blob.a_ev),
                    });
                }
                layers.push(LayerParams { heads });
            }
            next.layers = layers;
        }

        if let Some(legacy_blobs) = blob.head_params {
            let mut legacy_heads = Vec::with_capacity(legacy_blobs.len());
            for head_blob in legacy_blobs {
                legacy_heads.push(LegacyHeadParams {
                    w_q: rows_to_matrix(&head_blob.w_q)?,
                    w_k: rows_to_matrix(&head_blob.w_k)?,
                    w_v: rows_to_matrix(&head_blob.w_v)?,
                    a: DVector::from_vec(head_blob.a),
                });
            }
            next.legacy_heads = legacy_heads;
        }

        if let Some(fusion) = blob.fusion_weights {
            next.fusion = fusion;
        }
        if let Some(rows) = blob.w_intent {
            next.w_intent = rows_to_matrix(&rows)?;
        }

        *self = next;
        Ok(())
    }
}

/// Self-describing parameter document. Matrices are row-major
/// `Vec<Vec<f32>>`; every field is optional on import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamBlob {
    #[serde(default)]
    pub config: Option<ShgatConfig>,
    #[serde(default)]
    pub layer_params: Option<Vec<LayerBlob>>,
    #[serde(default)]
    pub head_params: Option<Vec<LegacyHeadBlob>>,
    #[serde(default)]
    pub fusion_weights: Option<FusionWeights>,
    #[serde(default, rename = "W_intent")]
    pub w_intent: Option<Vec<Vec<f32>>>,
    #[serde(default)]
    pub exported_at: Option<DateTime<Utc>>,
}

/// One layer of serialized head weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerBlob {
    pub heads: Vec<HeadBlob>,
}

/// Serialized weights of a single attention head.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadBlob {
    #[serde(rename = "W_v")]
    pub w_v: Vec<Vec<f32>>,
    #[serde(rename = "W_e")]
    pub w_e: Vec<Vec<f32>>,
    #[serde(rename = "W_e2")]
    pub w_e2: Vec<Vec<f32>>,
    #[serde(rename = "W_v2")]
    pub w_v2: Vec<Vec<f32>>,
    pub a_ve: Vec<f32>,
    pub a_ev: Vec<f32>,
}

/// Serialized legacy attention block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyHeadBlob {
    #[serde(rename = "W_q")]
    pub w_q: Vec<Vec<f32>>,
    #[serde(rename = "W_k")]
    pub w_k: Vec<Vec<f32>>,
    #[serde(rename = "W_v")]
    pub w_v: Vec<Vec<f32>>,
    pub a: Vec<f32>,
}

fn matrix_to_rows(matrix: &DMatrix<f32>) -> Vec<Vec<f32>> {
    (0..matrix.nrows())
        .map(|i| matrix.row(i).iter().copied().collect())
        .collect()
}

fn rows_to_matrix(rows: &[Vec<f32>]) -> Result<DMatrix<f32>> {
    if rows.is_empty() {
        return Ok(DMatrix::zeros(0, 0));
    }
    let ncols = rows[0].len();
    for (i, row) in rows.iter().enumerate() {
        if row.len() != ncols {
            return Err(ShgatError::InvalidInput(format!(
                "ragged matrix rows: row 0 has {} columns, row {} has {}",
                ncols,
                i,
                row.len()
            )));
        }
    }
    let flat: Vec<f32> = rows.iter().flatten().copied().collect();
    Ok(DMatrix::from_row_slice(rows.len(), ncols, &flat))
}

/// Zero-initialized companions for the gradients the trainer accumulates.
#[derive(Debug, Clone)]
pub struct GradientAccumulators {
    /// `d/dW_v` per layer, per head
    pub d_w_v: Vec<Vec<DMatrix<f32>>>,
    /// `d/d{semantic, structure, temporal}` fusion logits
    pub d_fusion: [f32; 3],
    /// `d/dW_intent`
    pub d_w_intent: DMatrix<f32>,
}

impl GradientAccumulators {
    pub fn new(config: &ShgatConfig) -> Self {
        let d_w_v = (0..config.num_layers)
            .map(|l| {
                let in_dim = config.layer_input_dim(l);
                (0..config.num_heads)
                    .map(|_| DMatrix::zeros(config.hidden_dim, in_dim))
                    .collect()
            })
            .collect();
        Self {
            d_w_v,
            d_fusion: [0.0; 3],
            d_w_intent: DMatrix::zeros(config.output_dim(), config.embedding_dim),
        }
    }

    /// Zero every accumulator; called at the start of each batch.
    pub fn reset(&mut self) {
        for layer in &mut self.d_w_v {
            for grad in layer.iter_mut() {
                grad.fill(0.0);
            }
        }
        self.d_fusion = [0.0; 3];
        self.d_w_intent.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> ShgatConfig {
        ShgatConfig {
            embedding_dim: 8,
            hidden_dim: 4,
            num_heads: 3,
            num_layers: 2,
            dropout: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_allocation_shapes() {
        let config = small_config();
        let params = ParameterStore::new(config.clone());
        assert_eq!(params.layers.len(), 2);
        assert_eq!(params.layers[0].heads.len(), 3);
        let first = &params.layers[0].heads[0];
        assert_eq!(first.w_v.shape(), (4, 8));
        let second = &params.layers[1].heads[0];
        assert_eq!(second.w_v.shape(), (4, 12));
        assert_eq!(second.w_e2.shape(), (4, 4));
        assert_eq!(second.a_ve.len(), 8);
        assert_eq!(params.w_intent.shape(), (12, 8));
    }

    #[test]
    fn test_export_import_round_trip() {
        let mut params = ParameterStore::new(small_config());
        params.fusion.structure = 0.7;
        let blob = params.export();

        let mut restored = ParameterStore::new(small_config());
        restored.import(blob).unwrap();
        assert_eq!(restored.fusion, params.fusion);
        assert_eq!(restored.w_intent, params.w_intent);
        assert_eq!(
            restored.layers[1].heads[2].w_v,
            params.layers[1].heads[2].w_v
        );
        assert_eq!(
            restored.legacy_heads[0].w_q,
            params.legacy_heads[0].w_q
        );
    }

    #[test]
    fn test_import_tolerates_missing_fields() {
        let mut params = ParameterStore::new(small_config());
        let original_intent = params.w_intent.clone();
        let blob: ParamBlob =
            serde_json::from_str(r#"{"fusion_weights": {"semantic": 1.0, "structure": 2.0, "temporal": 3.0}}"#)
                .unwrap();
        params.import(blob).unwrap();
        assert_eq!(params.fusion.temporal, 3.0);
        // Everything else kept its previous values.
        assert_eq!(params.w_intent, original_intent);
    }

    #[test]
    fn test_import_rejects_ragged_matrix_without_mutating() {
        let mut params = ParameterStore::new(small_config());
        let before = params.w_intent.clone();
        let blob: ParamBlob =
            serde_json::from_str(r#"{"W_intent": [[1.0, 2.0], [3.0]]}"#).unwrap();
        assert!(params.import(blob).is_err());
        assert_eq!(params.w_intent, before);
    }

    #[test]
    fn test_json_round_trip_preserves_blob() {
        let params = ParameterStore::new(small_config());
        let blob = params.export();
        let json = serde_json::to_string(&blob).unwrap();
        let parsed: ParamBlob = serde_json::from_str(&json).unwrap();
        assert_eq!(
            parsed.w_intent.as_ref().unwrap(),
            blob.w_intent.as_ref().unwrap()
        );
        assert!(parsed.head_params.is_some());
        assert!(parsed.exported_at.is_some());
    }

    #[test]
    fn test_normalized_fusion_weights_live_on_simplex() {
        let fusion = FusionWeights {
            semantic: 0.3,
            structure: -1.2,
            temporal: 2.0,
        };
        let w = fusion.normalized();
        let sum: f32 = w.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(w.iter().all(|&x| x > 0.0 && x < 1.0));
    }

    #[test]
    fn test_gradient_accumulators_reset() {
        let config = small_config();
        let mut grads = GradientAccumulators::new(&config);
        grads.d_fusion = [1.0, 2.0, 3.0];
        grads.d_w_v[0][0][(0, 0)] = 5.0;
        grads.d_w_intent[(0, 0)] = 7.0;
        grads.reset();
        assert_eq!(grads.d_fusion, [0.0; 3]);
        assert_eq!(grads.d_w_v[0][0][(0, 0)], 0.0);
        assert_eq!(grads.d_w_intent[(0, 0)], 0.0);
    }
}
