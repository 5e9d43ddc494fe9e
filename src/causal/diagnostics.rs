//! 自然病程残差诊断

use crate::error::{GFormulaError, Result};
use crate::sanitize::is_missing;
use crate::stats::{compute_auc, histogram, mean, variance};
use crate::types::{DiagnosticSummary, OutcomeType};

/// 汇总残差（预测值 - 观测值），只使用结局非缺失的行
pub fn summarize_residuals(
    predicted: &[f64],
    observed: &[f64],
    outcome_type: OutcomeType,
    bins: usize,
) -> Result<DiagnosticSummary> {
    let (scores, outcomes): (Vec<f64>, Vec<f64>) = predicted
        .iter()
        .zip(observed.iter())
        .filter(|(_, &y)| !is_missing(y))
        .map(|(&p, &y)| (p, y))
        .unzip();

    if outcomes.is_empty() {
        return Err(GFormulaError::Configuration(
            "no rows with an observed outcome to diagnose".to_string(),
        ));
    }

    let residuals: Vec<f64> = scores
        .iter()
        .zip(outcomes.iter())
        .map(|(p, y)| p - y)
        .collect();

    // 二分类结局额外给出 C 统计量
    let auc = match outcome_type {
        OutcomeType::Binary => {
            let labels: Vec<u8> = outcomes.iter().map(|&y| u8::from(y == 1.0)).collect();
            Some(compute_auc(&scores, &labels))
        }
        OutcomeType::Normal | OutcomeType::Poisson => None,
    };

    Ok(DiagnosticSummary {
        n: residuals.len(),
        mean: mean(&residuals),
        std: variance(&residuals).sqrt(),
        min: residuals.iter().copied().fold(f64::INFINITY, f64::min),
        max: residuals.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        auc,
        histogram: histogram(&residuals, bins),
    })
}
