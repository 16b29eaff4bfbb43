//! SHGAT Engine Demo
//!
//! This example walks through the engine end to end:
//! - building a small tool/capability hypergraph with containment
//! - scoring capabilities and tools for an intent
//! - inspecting attention and path success predictions
//! - training on labeled outcomes and watching the fusion weights move
//! - exporting and re-importing the parameter blob

use shgat::{
    CapabilityNode, HypergraphFeatureUpdate, HypergraphFeatures, Result, ShgatConfig, ShgatEngine,
    ToolNode, TrainingExample,
};

fn main() -> Result<()> {
    env_logger::init();

    println!("SHGAT Engine Demo");
    println!("=================");

    let config = ShgatConfig {
        embedding_dim: 8,
        hidden_dim: 4,
        num_heads: 6,
        num_layers: 2,
        dropout: 0.0,
        ..Default::default()
    };
    let mut engine = ShgatEngine::new(config);

    // 1. Build a small hypergraph: three tools, a leaf capability, and a
    //    meta-capability that inherits the leaf's tools.
    println!("\nBuilding hypergraph...");
    let tools = vec![
        tool("fs.read", &[0.9, 0.1, 0.0, 0.2, 0.0, 0.1, 0.0, 0.0]),
        tool("fs.write", &[0.8, 0.2, 0.1, 0.3, 0.0, 0.0, 0.1, 0.0]),
        tool("http.get", &[0.0, 0.1, 0.9, 0.0, 0.3, 0.0, 0.0, 0.2]),
    ];
    let mut file_ops = capability(
        "cap.file_ops",
        &[0.85, 0.15, 0.05, 0.25, 0.0, 0.05, 0.05, 0.0],
        &["fs.read", "fs.write"],
    );
    file_ops.features = Some(HypergraphFeatures {
        hypergraph_page_rank: 0.8,
        cooccurrence: 0.7,
        recency: 0.6,
        adamic_adar: 0.5,
        heat_diffusion: 0.4,
        spectral_cluster: 0,
    });
    let mut workspace_sync = capability(
        "cap.workspace_sync",
        &[0.5, 0.1, 0.5, 0.1, 0.2, 0.0, 0.0, 0.1],
        &["http.get"],
    );
    workspace_sync.children = vec!["cap.file_ops".to_string()];

    engine.build_from_data(tools, vec![file_ops, workspace_sync])?;
    let stats = engine.stats();
    println!(
        "  {} tools, {} capabilities, {} incidence entries, {} parameters",
        stats.num_tools, stats.num_capabilities, stats.incidence_nnz, stats.parameter_count
    );

    // 2. Score an intent that looks like file manipulation.
    let intent = [0.9, 0.1, 0.05, 0.2, 0.0, 0.05, 0.0, 0.0];
    println!("\nScoring capabilities for a file-manipulation intent...");
    for entry in engine.score_all_capabilities(&intent)? {
        println!("  {:<22} score {:.3}", entry.id, entry.score);
    }
    println!("Scoring tools...");
    for entry in engine.score_all_tools(&intent)? {
        println!("  {:<22} score {:.3}", entry.id, entry.score);
    }

    // 3. Attention introspection and path prediction.
    let attention = engine.compute_attention(&intent, "cap.file_ops")?;
    println!(
        "\nTool attention for cap.file_ops: {:?}",
        attention.tool_attention.unwrap()
    );
    let path = vec!["fs.read".to_string(), "cap.file_ops".to_string()];
    println!(
        "Path success for fs.read -> cap.file_ops: {:.3}",
        engine.predict_path_success(&intent, &path)?
    );

    // 4. Train on a few labeled outcomes.
    println!("\nTraining on labeled outcomes...");
    let examples = vec![
        TrainingExample {
            intent_embedding: intent.to_vec(),
            capability_id: "cap.file_ops".to_string(),
            outcome: 1.0,
            context_tools: vec![],
        },
        TrainingExample {
            intent_embedding: vec![0.0, 0.2, 0.9, 0.0, 0.4, 0.0, 0.0, 0.3],
            capability_id: "cap.file_ops".to_string(),
            outcome: 0.0,
            context_tools: vec![],
        },
    ];
    for (epoch, result) in engine.train_epochs(&examples, 10)?.iter().enumerate() {
        if epoch % 3 == 0 {
            println!(
                "  epoch {:>2}: loss {:.4}, accuracy {:.2}",
                epoch, result.loss, result.accuracy
            );
        }
    }
    println!("  fusion weights now: {:?}", engine.stats().fusion_weights);

    // 5. Feature updates shift structural scores without retraining.
    engine.update_hypergraph_features(
        "cap.workspace_sync",
        &HypergraphFeatureUpdate {
            hypergraph_page_rank: Some(0.9),
            ..Default::default()
        },
    );

    // 6. Round-trip the parameters through the blob.
    println!("\nExporting and re-importing parameters...");
    let blob_json = engine.export_params_json()?;
    let mut restored = ShgatEngine::new(engine.config().clone());
    restored.import_params_json(&blob_json)?;
    println!(
        "  restored engine fusion weights: {:?}",
        restored.stats().fusion_weights
    );

    println!("\nDone.");
    Ok(())
}

fn tool(id: &str, embedding: &[f32]) -> ToolNode {
    ToolNode {
        id: id.to_string(),
        embedding: embedding.to_vec(),
        features: None,
    }
}

fn capability(id: &str, embedding: &[f32], tools: &[&str]) -> CapabilityNode {
    CapabilityNode {
        id: id.to_string(),
        embedding: embedding.to_vec(),
        tools_used: tools.iter().map(|s| s.to_string()).collect(),
        success_rate: 0.92,
        parents: vec![],
        children: vec![],
        features: None,
    }
}
