//! `graphchat check` — Validate configuration and the knowledge graph.

use std::path::Path;

use graphchat_graph::KnowledgeGraph;

use super::load_config;

pub fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("Checking graphchat setup");
    println!("========================\n");

    let config = match load_config(config_path) {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ Config error: {e}");
            return Err(e.into());
        }
    };

    if config.llm.api_key.is_some() {
        println!("  ✅ API key configured");
    } else {
        println!("  ⚠️  No API key configured (set GRAPHRAG_API_KEY)");
    }
    println!("     Endpoint: {}", config.llm.api_base);
    println!("     Model:    {}", config.llm.model);

    let dir = &config.search.input_dir;
    match KnowledgeGraph::load(dir, config.search.community_level) {
        Ok(graph) => {
            let stats = graph.stats();
            println!("  ✅ Tables loaded from {}", dir.display());
            println!("     Entities:       {}", stats.entities);
            println!("     Relationships:  {}", stats.relationships);
            println!(
                "     Reports:        {} (level <= {})",
                stats.reports, config.search.community_level
            );
            println!("     Text units:     {}", stats.text_units);
            println!("     Claims:         {}", stats.claims);
        }
        Err(e) => {
            println!("  ❌ {e}");
            return Err(e.into());
        }
    }

    println!("\n  All checks passed.");
    Ok(())
}
