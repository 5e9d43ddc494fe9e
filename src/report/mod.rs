//! Report rendering
//!
//! Text tables for console output, or pretty JSON for structured consumers.

use std::fmt::Write as _;

use crate::error::Result;
use crate::types::{DiagnosticSummary, HistogramBin, ModelSummary, ReportFormat};

/// Widest bar in a rendered histogram
const HISTOGRAM_WIDTH: usize = 40;

/// Render a fitted model's coefficient table
pub fn render_model_summary(summary: &ModelSummary, format: ReportFormat) -> Result<String> {
    match format {
        ReportFormat::Json => Ok(serde_json::to_string_pretty(summary)? + "\n"),
        ReportFormat::Text => Ok(model_summary_text(summary)),
    }
}

/// Render a residual diagnostics summary, with an optional histogram
pub fn render_diagnostics(
    diagnostics: &DiagnosticSummary,
    plot: bool,
    format: ReportFormat,
) -> Result<String> {
    match format {
        ReportFormat::Json => Ok(serde_json::to_string_pretty(diagnostics)? + "\n"),
        ReportFormat::Text => {
            let mut out = diagnostics_text(diagnostics);
            if plot {
                out.push_str(&render_histogram(&diagnostics.histogram));
            }
            Ok(out)
        }
    }
}

fn model_summary_text(s: &ModelSummary) -> String {
    let rule = "=".repeat(86);
    let thin = "-".repeat(86);
    let mut out = String::new();

    let _ = writeln!(out, "{rule}");
    let _ = writeln!(
        out,
        "Outcome model: {} ~ {}",
        s.outcome,
        if s.formula.is_empty() { "1" } else { &s.formula }
    );
    let _ = writeln!(
        out,
        "Family: {:<10} Link: {:<10} No. obs: {:<8} Df resid: {:<8.0} Iterations: {}",
        s.outcome_type.as_str(),
        s.outcome_type.link_name(),
        s.n_obs,
        s.df_resid,
        s.iterations
    );
    let _ = writeln!(
        out,
        "Deviance: {:<14.4} Scale: {:.4}",
        s.deviance, s.dispersion
    );
    let _ = writeln!(out, "{thin}");
    let _ = writeln!(
        out,
        "{:<20} {:>10} {:>10} {:>9} {:>9} {:>11} {:>11}",
        "", "coef", "std err", "z", "P>|z|", "[0.025", "0.975]"
    );
    let _ = writeln!(out, "{thin}");
    for c in &s.coefficients {
        let _ = writeln!(
            out,
            "{:<20} {:>10.4} {:>10.4} {:>9.3} {:>9.3} {:>11.4} {:>11.4}",
            truncate(&c.term, 20),
            c.estimate,
            c.std_error,
            c.z_value,
            c.p_value,
            c.ci_lower,
            c.ci_upper
        );
    }
    let _ = writeln!(out, "{rule}");
    out
}

fn diagnostics_text(d: &DiagnosticSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Natural-course residuals (predicted - observed)");
    let _ = writeln!(out, "  n     {}", d.n);
    let _ = writeln!(out, "  mean  {:.6}", d.mean);
    let _ = writeln!(out, "  std   {:.6}", d.std);
    let _ = writeln!(out, "  min   {:.6}", d.min);
    let _ = writeln!(out, "  max   {:.6}", d.max);
    if let Some(auc) = d.auc {
        let _ = writeln!(out, "  C-statistic (AUC)  {auc:.4}");
    }
    out
}

/// Horizontal text histogram, one line per bin
pub fn render_histogram(bins: &[HistogramBin]) -> String {
    let max_count = bins.iter().map(|b| b.count).max().unwrap_or(0);
    let mut out = String::new();
    for bin in bins {
        let len = if max_count == 0 {
            0
        } else {
            (bin.count * HISTOGRAM_WIDTH).div_ceil(max_count)
        };
        let _ = writeln!(
            out,
            "[{:>10.4}, {:>10.4}) {:>6} {}",
            bin.lower,
            bin.upper,
            bin.count,
            "#".repeat(len)
        );
    }
    out
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let head: String = s.chars().take(width - 1).collect();
        format!("{head}~")
    }
}
