//! Public façade of the SHGAT engine
//!
//! `ShgatEngine` owns the hypergraph store, the learnable parameters, and
//! the gradient accumulators. Mutating operations take `&mut self`; scoring
//! takes `&self`, so concurrent readers on a quiescent engine are safe by
//! construction. All operations run to completion synchronously.

use std::collections::HashMap;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ShgatError};
use crate::features::{HypergraphFeatureUpdate, ToolFeatureUpdate};
use crate::hypergraph::{CapabilityNode, HypergraphStore, ToolNode};
use crate::params::{GradientAccumulators, ParamBlob, ParameterStore, ShgatConfig};
use crate::propagation::propagate;
use crate::scoring::{
    self, FeatureContributions, ScoreEntry, NUM_SCORE_HEADS,
};
use crate::trainer::{self, TrainingExample, TrainingResult};

/// Snapshot of engine state for monitoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShgatStats {
    pub num_tools: usize,
    pub num_capabilities: usize,
    pub incidence_nnz: usize,
    pub parameter_count: usize,
    pub num_layers: usize,
    pub num_heads: usize,
    /// Softmax-normalized `[semantic, structure, temporal]` fusion weights
    pub fusion_weights: [f32; 3],
}

/// The SuperHyperGraph attention engine.
pub struct ShgatEngine {
    store: HypergraphStore,
    params: ParameterStore,
    grads: GradientAccumulators,
}

impl Default for ShgatEngine {
    fn default() -> Self {
        Self::new(ShgatConfig::default())
    }
}

impl ShgatEngine {
    /// Create an engine with freshly initialized parameters.
    pub fn new(config: ShgatConfig) -> Self {
        let params = ParameterStore::new(config.clone());
        let grads = GradientAccumulators::new(&config);
        Self {
            store: HypergraphStore::new(),
            params,
            grads,
        }
    }

    pub fn config(&self) -> &ShgatConfig {
        &self.params.config
    }

    /// Register (or replace) a single tool vertex.
    pub fn register_tool(&mut self, tool: ToolNode) -> Result<()> {
        self.check_embedding(&tool.id, &tool.embedding)?;
        self.store.register_tool(tool);
        Ok(())
    }

    /// Register (or replace) a single capability hyperedge.
    pub fn register_capability(&mut self, capability: CapabilityNode) -> Result<()> {
        self.check_embedding(&capability.id, &capability.embedding)?;
        self.store.register_capability(capability);
        Ok(())
    }

    /// Replace the whole graph from bulk data.
    pub fn build_from_data(
        &mut self,
        tools: Vec<ToolNode>,
        capabilities: Vec<CapabilityNode>,
    ) -> Result<()> {
        for tool in &tools {
            self.check_embedding(&tool.id, &tool.embedding)?;
        }
        for capability in &capabilities {
            self.check_embedding(&capability.id, &capability.embedding)?;
        }
        self.store.build_from_data(tools, capabilities);
        Ok(())
    }

    /// Merge a partial feature update into a tool; unknown ids are ignored.
    pub fn update_tool_features(&mut self, tool_id: &str, update: &ToolFeatureUpdate) {
        self.store.update_tool_features(tool_id, update);
    }

    /// Merge a partial feature update into a capability; unknown ids are
    /// ignored.
    pub fn update_hypergraph_features(
        &mut self,
        capability_id: &str,
        update: &HypergraphFeatureUpdate,
    ) {
        self.store.update_hypergraph_features(capability_id, update);
    }

    /// Apply many tool feature updates; returns how many matched a node.
    pub fn update_tool_features_batch(
        &mut self,
        updates: &[(String, ToolFeatureUpdate)],
    ) -> usize {
        updates
            .iter()
            .filter(|(id, update)| self.store.update_tool_features(id, update))
            .count()
    }

    /// Apply many capability feature updates; returns how many matched.
    pub fn update_hypergraph_features_batch(
        &mut self,
        updates: &[(String, HypergraphFeatureUpdate)],
    ) -> usize {
        updates
            .iter()
            .filter(|(id, update)| self.store.update_hypergraph_features(id, update))
            .count()
    }

    /// Score every capability for an intent, sorted by score descending.
    pub fn score_all_capabilities(&self, intent: &[f32]) -> Result<Vec<ScoreEntry>> {
        if self.store.is_empty() {
            return Ok(Vec::new());
        }
        self.check_embedding("intent", intent)?;
        let cache = propagate(&self.store, &self.params, false)?;
        Ok(scoring::score_all_capabilities(
            &self.store,
            &self.params,
            &cache,
            intent,
        ))
    }

    /// Deprecated-context variant: the context arguments are accepted and
    /// ignored.
    pub fn score_all_capabilities_with_context(
        &self,
        intent: &[f32],
        context_tool_embeddings: &[Vec<f32>],
        context_capability_ids: &[String],
    ) -> Result<Vec<ScoreEntry>> {
        if !context_tool_embeddings.is_empty() || !context_capability_ids.is_empty() {
            debug!("ignoring deprecated scoring context arguments");
        }
        self.score_all_capabilities(intent)
    }

    /// Score every tool for an intent, sorted by score descending.
    pub fn score_all_tools(&self, intent: &[f32]) -> Result<Vec<ScoreEntry>> {
        if self.store.is_empty() {
            return Ok(Vec::new());
        }
        self.check_embedding("intent", intent)?;
        let cache = propagate(&self.store, &self.params, false)?;
        Ok(scoring::score_all_tools(
            &self.store,
            &self.params,
            &cache,
            intent,
        ))
    }

    /// Deprecated-context variant: the context arguments are accepted and
    /// ignored.
    pub fn score_all_tools_with_context(
        &self,
        intent: &[f32],
        context_tool_embeddings: &[Vec<f32>],
        context_capability_ids: &[String],
    ) -> Result<Vec<ScoreEntry>> {
        if !context_tool_embeddings.is_empty() || !context_capability_ids.is_empty() {
            debug!("ignoring deprecated scoring context arguments");
        }
        self.score_all_tools(intent)
    }

    /// Score one capability and expose its averaged tool-attention vector.
    ///
    /// An unknown capability id yields a zero-scored entry with empty
    /// attention rather than an error.
    pub fn compute_attention(&self, intent: &[f32], capability_id: &str) -> Result<ScoreEntry> {
        if self.store.capability_index(capability_id).is_none() {
            debug!("attention request for unknown capability '{}'", capability_id);
            return Ok(zero_entry(capability_id));
        }
        self.check_embedding("intent", intent)?;

        let cache = propagate(&self.store, &self.params, false)?;
        let entries = scoring::score_all_capabilities(&self.store, &self.params, &cache, intent);
        let entry = entries
            .into_iter()
            .find(|e| e.id == capability_id)
            .unwrap_or_else(|| zero_entry(capability_id));
        Ok(entry)
    }

    /// Predict the success of an ordered path of tool and capability ids.
    ///
    /// Later positions weigh more (`1 + 0.5·i`). An empty graph, empty
    /// path, or fully unknown path predicts the neutral `0.5`.
    pub fn predict_path_success(&self, intent: &[f32], path: &[String]) -> Result<f32> {
        if self.store.is_empty() || path.is_empty() {
            return Ok(0.5);
        }
        self.check_embedding("intent", intent)?;

        let cache = propagate(&self.store, &self.params, false)?;
        let mut scores: HashMap<String, f32> = HashMap::new();
        for entry in scoring::score_all_tools(&self.store, &self.params, &cache, intent) {
            scores.insert(entry.id, entry.score);
        }
        for entry in scoring::score_all_capabilities(&self.store, &self.params, &cache, intent) {
            scores.insert(entry.id, entry.score);
        }
        Ok(scoring::path_success(path, &scores))
    }

    /// Train on a batch of labeled examples; applies one SGD step.
    pub fn train_batch(&mut self, examples: &[TrainingExample]) -> Result<TrainingResult> {
        trainer::train_batch(&self.store, &mut self.params, &mut self.grads, examples)
    }

    /// Train on a single example (batch of one).
    pub fn train_on_example(&mut self, example: &TrainingExample) -> Result<TrainingResult> {
        self.train_batch(std::slice::from_ref(example))
    }

    /// Run the same batch for several epochs, returning per-epoch results.
    pub fn train_epochs(
        &mut self,
        examples: &[TrainingExample],
        epochs: usize,
    ) -> Result<Vec<TrainingResult>> {
        let mut results = Vec::with_capacity(epochs);
        for _ in 0..epochs {
            results.push(self.train_batch(examples)?);
        }
        Ok(results)
    }

    /// Export all parameters as the stable blob.
    pub fn export_params(&self) -> ParamBlob {
        self.params.export()
    }

    /// Export all parameters as a pretty-printed JSON document.
    pub fn export_params_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.params.export())?)
    }

    /// Replace parameters from a blob. The graph does not need to be built
    /// first; a failed import leaves the engine unchanged.
    pub fn import_params(&mut self, blob: ParamBlob) -> Result<()> {
        self.params.import(blob)?;
        self.grads = GradientAccumulators::new(&self.params.config);
        Ok(())
    }

    /// Replace parameters from a JSON document.
    pub fn import_params_json(&mut self, json: &str) -> Result<()> {
        let blob: ParamBlob = serde_json::from_str(json)?;
        self.import_params(blob)
    }

    /// Write the parameter blob to a file.
    pub fn save_params(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = self.export_params_json()?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load the parameter blob from a file.
    pub fn load_params(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let json = std::fs::read_to_string(path)?;
        self.import_params_json(&json)
    }

    /// Current engine statistics.
    pub fn stats(&self) -> ShgatStats {
        ShgatStats {
            num_tools: self.store.num_tools(),
            num_capabilities: self.store.num_capabilities(),
            incidence_nnz: self.store.incidence_nnz(),
            parameter_count: self.params.parameter_count(),
            num_layers: self.params.config.num_layers,
            num_heads: self.params.config.num_heads,
            fusion_weights: self.params.fusion.normalized(),
        }
    }

    fn check_embedding(&self, id: &str, embedding: &[f32]) -> Result<()> {
        let expected = self.params.config.embedding_dim;
        if embedding.len() != expected {
            return Err(ShgatError::InvalidInput(format!(
                "embedding for '{}' has dimension {}, expected {}",
                id,
                embedding.len(),
                expected
            )));
        }
        Ok(())
    }
}

fn zero_entry(id: &str) -> ScoreEntry {
    ScoreEntry {
        id: id.to_string(),
        score: 0.0,
        head_scores: vec![0.0; NUM_SCORE_HEADS],
        head_weights: vec![0.0; NUM_SCORE_HEADS],
        feature_contributions: FeatureContributions {
            semantic: 0.0,
            structure: 0.0,
            temporal: 0.0,
        },
        tool_attention: Some(Vec::new()),
    }
}
