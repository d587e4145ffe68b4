//! Labeled probe sets and the calibration run behind `pursuit calibrate`.
//!
//! A probe set mixes questions the corpus should answer with questions it
//! cannot. Fitting the sparse sigmoid and sweeping the fused threshold over
//! such a set bounds how often the engine is confident but wrong.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use pursuit_core::error::RetrievalError;
use pursuit_core::retrieval::Retriever;

use crate::calibration::{ProbeResult, SigmoidCalibration, SweepRow, recommend, sweep};
use crate::stack::LocalStack;

/// One labeled question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Probe {
    pub id: String,
    pub question: String,
    pub in_corpus: bool,
    /// Parent ids that count as a correct top hit
    #[serde(default)]
    pub expected_parent_ids: Vec<String>,
    #[serde(default)]
    pub filters: Vec<String>,
}

/// Read one JSON probe per line.
pub async fn load_probes(path: &Path) -> std::result::Result<Vec<Probe>, RetrievalError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| RetrievalError::Metadata(format!("{}: {e}", path.display())))?;

    let mut probes = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Probe>(line) {
            Ok(probe) => probes.push(probe),
            Err(e) => warn!(line = line_no + 1, error = %e, "Skipping malformed probe"),
        }
    }
    Ok(probes)
}

/// Run every probe through `retriever`. A failed lookup counts as zero
/// confidence so an outage never looks like a confident answer.
pub async fn evaluate(retriever: &dyn Retriever, probes: &[Probe]) -> Vec<ProbeResult> {
    let mut results = Vec::with_capacity(probes.len());
    for probe in probes {
        let (top_confidence, top_hit_correct) = match retriever.retrieve(&probe.question, &probe.filters).await {
            Ok(outcome) => match outcome.top() {
                Some(top) => (top.confidence, probe.expected_parent_ids.contains(&top.parent_id)),
                None => (0.0, false),
            },
            Err(e) => {
                warn!(probe = %probe.id, error = %e, "Probe lookup failed");
                (0.0, false)
            }
        };
        results.push(ProbeResult {
            question_id: probe.id.clone(),
            in_corpus: probe.in_corpus,
            top_confidence,
            top_hit_correct,
        });
    }
    results
}

/// Result of a calibration run.
#[derive(Debug, Clone, Serialize)]
pub struct CalibrationReport {
    /// Sparse sigmoid fitted on this probe set
    pub sparse: SigmoidCalibration,
    pub rows: Vec<SweepRow>,
    /// Lowest threshold within the false-positive bound, if any
    pub recommended_threshold: Option<f64>,
    pub results: Vec<ProbeResult>,
}

/// Fit the sparse curve on the probes' max raw scores, then sweep the fused
/// threshold with the fitted curve in place.
pub async fn calibrate(
    stack: &LocalStack,
    probes: &[Probe],
    step: f64,
    max_false_positive_rate: f64,
) -> CalibrationReport {
    let sparse = stack.sparse_channel(stack.configured_calibration());
    let raw: Vec<f64> = probes
        .iter()
        .map(|p| sparse.max_raw(&p.question, &p.filters))
        .collect();
    let fitted = SigmoidCalibration::fit_global(&raw);

    let engine = stack.engine_with(fitted, 0.0);
    let results = evaluate(&engine, probes).await;
    let rows = sweep(&results, step);
    let recommended_threshold = recommend(&rows, max_false_positive_rate);

    info!(
        probes = probes.len(),
        k = fitted.k,
        x0 = fitted.x0,
        recommended = ?recommended_threshold,
        "Calibration complete"
    );

    CalibrationReport {
        sparse: fitted,
        rows,
        recommended_threshold,
        results,
    }
}
