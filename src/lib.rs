//! SHGAT - a superhypergraph attention engine
//!
//! This crate implements a learnable multi-head attention model over a
//! hypergraph whose vertices are *tools* and whose hyperedges are
//! *capabilities*. Given an intent embedding, the engine:
//! - scores tools and capabilities through two-phase masked message passing
//! - fuses semantic, structural, and temporal signals with learned weights
//! - trains online or in batches from labeled outcomes
//! - persists its parameters as a stable, self-describing blob

pub mod engine;
pub mod error;
pub mod features;
pub mod hypergraph;
pub mod math;
pub mod params;
pub mod propagation;
pub mod scoring;
pub mod trainer;

pub use engine::{ShgatEngine, ShgatStats};
pub use error::{Result, ShgatError};
pub use features::{
    HypergraphFeatureUpdate, HypergraphFeatures, ToolFeatureUpdate, ToolGraphFeatures,
};
pub use hypergraph::{CapabilityNode, HypergraphStore, ToolNode};
pub use params::{FusionWeights, ParamBlob, ParameterStore, ShgatConfig};
pub use propagation::ForwardCache;
pub use scoring::{FeatureContributions, ScoreEntry, NUM_SCORE_HEADS};
pub use trainer::{TrainingExample, TrainingResult};
