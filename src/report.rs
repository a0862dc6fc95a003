//! Aggregate statistics over a [`ResultSet`].

use std::collections::BTreeSet;

use serde::Serialize;

use crate::batch::{ClassificationResult, ResultSet};
use crate::confidence::score_result;
use crate::schema::{SchemaSpec, classification_value};

pub const HISTOGRAM_BINS: usize = 10;

/// One line of the per-row listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowReport {
    pub id: String,
    pub success: bool,
    /// Classification value, or the error message for failed rows.
    pub value: String,
    pub confidence: Option<f64>,
    pub margin: Option<f64>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub successes: usize,
    pub errors: usize,
    pub fingerprints: BTreeSet<String>,
    pub total_duration_ms: u64,
    pub total_cost: f64,
    /// Rows for which a confidence could be extracted.
    pub scored: usize,
    pub mean_confidence: Option<f64>,
    pub mean_margin: Option<f64>,
    pub confidence_bins: [usize; HISTOGRAM_BINS],
    pub margin_bins: [usize; HISTOGRAM_BINS],
    pub rows: Vec<RowReport>,
}

impl RunSummary {
    pub fn from_results(results: &ResultSet, schema: &SchemaSpec) -> Self {
        let mut summary = Self {
            total: results.len(),
            successes: results.success_count(),
            errors: results.error_count(),
            fingerprints: BTreeSet::new(),
            total_duration_ms: 0,
            total_cost: 0.0,
            scored: 0,
            mean_confidence: None,
            mean_margin: None,
            confidence_bins: [0; HISTOGRAM_BINS],
            margin_bins: [0; HISTOGRAM_BINS],
            rows: Vec::with_capacity(results.len()),
        };

        let mut confidence_sum = 0.0;
        let mut margin_sum = 0.0;

        for result in results.ordered() {
            summary.total_duration_ms += result.duration_ms;
            summary.total_cost += result.cost.unwrap_or(0.0);
            if let Some(fp) = &result.model_fingerprint {
                summary.fingerprints.insert(fp.clone());
            }

            let row = row_report(result, schema);
            if let (Some(conf), Some(margin)) = (row.confidence, row.margin) {
                summary.scored += 1;
                confidence_sum += conf;
                margin_sum += margin;
                summary.confidence_bins[histogram_bin(conf)] += 1;
                summary.margin_bins[histogram_bin(margin)] += 1;
            }
            summary.rows.push(row);
        }

        if summary.scored > 0 {
            let n = summary.scored as f64;
            summary.mean_confidence = Some(confidence_sum / n);
            summary.mean_margin = Some(margin_sum / n);
        }
        summary
    }
}

fn row_report(result: &ClassificationResult, schema: &SchemaSpec) -> RowReport {
    if !result.success {
        return RowReport {
            id: result.id.clone(),
            success: false,
            value: result.error.clone().unwrap_or_default(),
            confidence: None,
            margin: None,
            duration_ms: result.duration_ms,
        };
    }

    let confidence = score_result(result, schema);

    RowReport {
        id: result.id.clone(),
        success: true,
        value: classification_value(result.output.as_ref()),
        confidence: confidence.as_ref().map(|c| c.top1),
        margin: confidence.as_ref().map(|c| c.margin),
        duration_ms: result.duration_ms,
    }
}

/// Bin index for a probability in `[0, 1]`; out-of-range values land in the edge bins.
pub fn histogram_bin(value: f64) -> usize {
    if value.is_nan() || value <= 0.0 {
        return 0;
    }
    ((value * HISTOGRAM_BINS as f64).floor() as usize).min(HISTOGRAM_BINS - 1)
}
