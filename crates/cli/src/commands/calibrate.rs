//! `pursuit calibrate`: fit the sparse sigmoid on a labeled probe set and
//! sweep the fused answer threshold.

use std::path::Path;

use pursuit_config::AppConfig;
use pursuit_retrieval::{LocalStack, probe};

pub async fn run(
    config: AppConfig,
    probes_path: &Path,
    step: f64,
    max_fp: f64,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if config.retrieval.corpus_path.is_none() {
        return Err("Calibration needs [retrieval] corpus_path to point at a corpus export".into());
    }

    let provider = (config.retrieval.dense.embedder == "provider")
        .then(|| pursuit_providers::build_from_config(&config).chain());
    let stack = LocalStack::load(&config.retrieval, provider).await?;
    let probes = probe::load_probes(probes_path).await?;
    if probes.is_empty() {
        return Err(format!("No probes found in {}", probes_path.display()).into());
    }

    let report = probe::calibrate(&stack, &probes, step, max_fp).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let in_corpus = probes.iter().filter(|p| p.in_corpus).count();
    println!("Calibration over {} probes ({} in corpus)", probes.len(), in_corpus);
    println!("  Sparse sigmoid: k = {:.4}, x0 = {:.4}", report.sparse.k, report.sparse.x0);
    println!();
    println!("  {:>9}  {:>11}  {:>9}  {:>8}", "threshold", "answer rate", "false pos", "hit rate");
    for row in &report.rows {
        println!(
            "  {:>9.2}  {:>11.3}  {:>9.3}  {:>8.3}",
            row.threshold, row.answer_rate, row.false_positive_rate, row.in_corpus_hit_rate
        );
    }
    println!();
    match report.recommended_threshold {
        Some(threshold) => println!(
            "  Recommended answer_threshold: {threshold:.2} (false positives <= {max_fp:.2}, currently {:.2})",
            config.retrieval.answer_threshold
        ),
        None => println!("  No threshold keeps false positives at or below {max_fp:.2}"),
    }

    Ok(())
}
