//! Score calibration and threshold sweeps.
//!
//! Both channels produce channel-native scores. Calibration maps them into a
//! common [0, 1] confidence so one fused threshold means the same thing for
//! every query. The sweep measures what a threshold costs against a labeled
//! probe set that includes out-of-corpus questions.

use serde::{Deserialize, Serialize};

/// Numerically stable logistic function.
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}

fn logit(p: f64) -> f64 {
    let p = p.clamp(1e-6, 1.0 - 1e-6);
    (p / (1.0 - p)).ln()
}

/// `σ(k · (raw − x0))` over BM25 raw scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SigmoidCalibration {
    pub k: f64,
    pub x0: f64,
}

impl SigmoidCalibration {
    pub fn new(k: f64, x0: f64) -> Self {
        Self { k, x0 }
    }

    pub fn confidence(&self, raw: f64) -> f64 {
        sigmoid(self.k * (raw - self.x0))
    }

    /// Fit a global curve from the per-question max raw scores of a probe set,
    /// mapping the 25th percentile to 0.25 and the 75th to 0.75.
    ///
    /// With fewer than four samples the curve is centred on the median with
    /// slope 1; a degenerate spread does the same around the 50th percentile.
    pub fn fit_global(max_raw_scores: &[f64]) -> Self {
        let mut xs: Vec<f64> = max_raw_scores.iter().copied().filter(|x| x.is_finite()).collect();
        if xs.is_empty() {
            return Self::new(1.0, 0.0);
        }
        xs.sort_by(f64::total_cmp);

        if xs.len() < 4 {
            return Self::new(1.0, xs[xs.len() / 2]);
        }

        let quantile = |p: f64| {
            let idx = (p.clamp(0.0, 1.0) * (xs.len() - 1) as f64).round() as usize;
            xs[idx]
        };

        let q25 = quantile(0.25);
        let q75 = quantile(0.75);
        if (q75 - q25).abs() < 1e-9 {
            return Self::new(1.0, quantile(0.5));
        }

        let a = 3.0_f64.ln();
        Self::new(2.0 * a / (q75 - q25), (q25 + q75) / 2.0)
    }

    /// Fit a per-query curve mapping the top score to `target_top` and the
    /// last of `ranked` to `target_last`. Used for diagnostics only: it makes
    /// every query's best hit look confident, so it cannot drive abstention.
    pub fn fit_top_k(ranked: &[f64], target_top: f64, target_last: f64) -> Self {
        let (Some(&hi), Some(&lo)) = (ranked.first(), ranked.last()) else {
            return Self::new(1.0, 0.0);
        };
        if (hi - lo).abs() < 1e-9 {
            return Self::new(1.0, hi);
        }
        let a = logit(target_top);
        let b = logit(target_last);
        let k = (a - b) / (hi - lo);
        Self::new(k, hi - a / k)
    }
}

/// Cosine distance in [0, 2] to a similarity in [0, 1].
pub fn similarity_from_distance(distance: f64) -> f64 {
    (1.0 - distance / 2.0).clamp(0.0, 1.0)
}

/// Monotonic piecewise-linear map from dense similarity to confidence that
/// sends `anchor_similarity` to `anchor_confidence`, 0 to 0 and 1 to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DenseCalibration {
    pub anchor_similarity: f64,
    pub anchor_confidence: f64,
}

impl DenseCalibration {
    pub fn new(anchor_similarity: f64, anchor_confidence: f64) -> Self {
        Self {
            anchor_similarity: anchor_similarity.clamp(0.0, 1.0),
            anchor_confidence: anchor_confidence.clamp(0.0, 1.0),
        }
    }

    pub fn confidence(&self, similarity: f64) -> f64 {
        let s = similarity.clamp(0.0, 1.0);
        let (a, c) = (self.anchor_similarity, self.anchor_confidence);
        if s <= a {
            if a <= f64::EPSILON { c } else { s * c / a }
        } else if a >= 1.0 - f64::EPSILON {
            1.0
        } else {
            c + (s - a) * (1.0 - c) / (1.0 - a)
        }
    }
}

/// One labeled probe question after running it through the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub question_id: String,
    /// Whether the corpus is expected to answer this question
    pub in_corpus: bool,
    /// Fused confidence of the top candidate (0 when nothing came back)
    pub top_confidence: f64,
    /// Whether the top candidate is one of the expected parents
    pub top_hit_correct: bool,
}

/// What one threshold would have done on the probe set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepRow {
    pub threshold: f64,
    /// Share of all probes that would be answered
    pub answer_rate: f64,
    /// Share of all probes answered confidently but wrongly: out-of-corpus
    /// questions answered at all, plus in-corpus answers with a wrong top hit
    pub false_positive_rate: f64,
    /// Share of in-corpus probes answered with a correct top hit
    pub in_corpus_hit_rate: f64,
}

/// Finest sweep resolution; smaller steps are raised to it.
pub const MIN_SWEEP_STEP: f64 = 0.001;

/// Evaluate thresholds `0, step, 2·step, .. ≤ 1` against the probes.
pub fn sweep(probes: &[ProbeResult], step: f64) -> Vec<SweepRow> {
    let step = if step.is_finite() && step > 0.0 { step.clamp(MIN_SWEEP_STEP, 1.0) } else { 0.05 };
    let total = probes.len().max(1) as f64;
    let in_corpus_total = probes.iter().filter(|p| p.in_corpus).count().max(1) as f64;

    let mut rows = Vec::new();
    let mut i = 0u32;
    loop {
        let threshold = ((f64::from(i) * step * 1e9).round() / 1e9).min(1.0);
        let answered: Vec<&ProbeResult> = probes.iter().filter(|p| p.top_confidence >= threshold).collect();
        let wrong = answered
            .iter()
            .filter(|p| !p.in_corpus || !p.top_hit_correct)
            .count() as f64;
        let hits = answered.iter().filter(|p| p.in_corpus && p.top_hit_correct).count() as f64;

        rows.push(SweepRow {
            threshold,
            answer_rate: answered.len() as f64 / total,
            false_positive_rate: wrong / total,
            in_corpus_hit_rate: hits / in_corpus_total,
        });

        if threshold >= 1.0 - 1e-9 {
            break;
        }
        i += 1;
    }
    rows
}

/// The lowest swept threshold whose false-positive rate is within the bound.
pub fn recommend(rows: &[SweepRow], max_false_positive_rate: f64) -> Option<f64> {
    rows.iter()
        .filter(|row| row.false_positive_rate <= max_false_positive_rate)
        .map(|row| row.threshold)
        .min_by(f64::total_cmp)
}
