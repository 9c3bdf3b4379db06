//! Quick benchmark for planning, rendering and chunking on a large corpus

use std::collections::HashMap;
use std::hint::black_box;
use std::time::Instant;

use bulk_analysis::chunk::split_into_chunks;
use bulk_analysis::corpus::CorpusSnapshot;
use bulk_analysis::group::MapInputs;
use bulk_analysis::planner::{classify, map_output_relative, resolve_map_inputs, PlanningContext};
use bulk_analysis::prompt::{render, DEFAULT_MAP_USER_PROMPT};

fn main() {
    let paths: Vec<String> = (0..10_000)
        .map(|i| format!("records/batch-{:03}/doc-{:05}.md", i % 100, i))
        .collect();
    let outputs: Vec<String> = paths
        .iter()
        .step_by(2)
        .map(|p| map_output_relative(p))
        .collect();

    let context = PlanningContext::new(
        CorpusSnapshot::from_paths(&paths),
        vec!["md".to_string()],
    );
    let output_snapshot = CorpusSnapshot::from_paths(&outputs);
    let inputs = MapInputs {
        files: Vec::new(),
        directories: vec!["records".to_string()],
    };

    println!("Planning Performance Test");
    println!("=========================\n");

    let iterations = 20;
    let start = Instant::now();
    for _ in 0..iterations {
        let resolved = resolve_map_inputs(&inputs, &context);
        let classification = classify(&resolved, &output_snapshot);
        black_box(classification);
    }
    let elapsed = start.elapsed();
    println!("Resolve + classify {} inputs", paths.len());
    println!("  Time for {} iterations: {:?}", iterations, elapsed);
    println!("  Per operation: {:?}\n", elapsed / iterations);

    let mut values = HashMap::new();
    values.insert("document_name".to_string(), "doc-00001.md".to_string());
    values.insert("document_content".to_string(), "x".repeat(20_000));

    let iterations = 10_000;
    let start = Instant::now();
    for _ in 0..iterations {
        black_box(render(DEFAULT_MAP_USER_PROMPT, &values));
    }
    let elapsed = start.elapsed();
    println!("Render default map prompt");
    println!("  Time for {} iterations: {:?}", iterations, elapsed);
    println!("  Per operation: {:?}\n", elapsed / iterations);

    let document: String = (0..5_000)
        .map(|i| format!("Paragraph {} with a sentence or two of transcript text.\n\n", i))
        .collect();

    let iterations = 50;
    let start = Instant::now();
    let mut chunks = 0;
    for _ in 0..iterations {
        chunks = split_into_chunks(&document, 12_000, 600).len();
    }
    let elapsed = start.elapsed();
    println!("Chunk {} chars into {} chunks", document.len(), chunks);
    println!("  Time for {} iterations: {:?}", iterations, elapsed);
    println!("  Per operation: {:?}", elapsed / iterations);
}
