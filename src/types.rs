//! Common Types and Constants
//!
//! Shared data structures used across the estimator, the regression
//! collaborator and the reporting layer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GFormulaError;

// ==================== Constants ====================

/// Numerical stability epsilon
pub const EPSILON: f64 = 1e-10;

/// Relative pivot tolerance below which a Cholesky factorization is treated as singular
pub const SINGULAR_TOLERANCE: f64 = 1e-10;

/// Z value for two-sided 95% intervals
pub const Z_95: f64 = 1.96;

/// Default number of draws for stochastic interventions
pub const DEFAULT_REPETITIONS: u32 = 100;

/// Default number of bootstrap replicates
pub const DEFAULT_BOOTSTRAP_REPLICATES: u32 = 200;

/// Default IRLS iteration cap
pub const DEFAULT_MAX_ITERATIONS: u32 = 100;

/// Default IRLS relative deviance tolerance
pub const DEFAULT_CONVERGENCE_THRESHOLD: f64 = 1e-8;

/// Default residual histogram resolution
pub const DEFAULT_HISTOGRAM_BINS: u32 = 20;

// ==================== Model Types ====================

/// Outcome distribution family (each with its canonical link)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeType {
    /// Binary 0/1 outcome, logit link
    #[default]
    Binary,
    /// Continuous outcome, identity link
    Normal,
    /// Continuous count outcome, log link
    Poisson,
}

impl OutcomeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Binary => "binary",
            Self::Normal => "normal",
            Self::Poisson => "poisson",
        }
    }

    pub fn link_name(&self) -> &'static str {
        match self {
            Self::Binary => "logit",
            Self::Normal => "identity",
            Self::Poisson => "log",
        }
    }
}

impl fmt::Display for OutcomeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutcomeType {
    type Err = GFormulaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "binary" => Ok(Self::Binary),
            "normal" => Ok(Self::Normal),
            "poisson" => Ok(Self::Poisson),
            other => Err(GFormulaError::Configuration(format!(
                "unsupported outcome type '{other}' (expected binary, normal or poisson)"
            ))),
        }
    }
}

/// Subpopulation the marginal outcome is averaged over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Standardize {
    /// Every row
    #[default]
    Population,
    /// Rows observed as exposed (exposure == 1)
    Exposed,
    /// Rows observed as unexposed (exposure == 0)
    Unexposed,
}

impl Standardize {
    /// Whether a row with the given observed exposure belongs to the target
    pub fn includes(&self, observed_exposure: f64) -> bool {
        match self {
            Self::Population => true,
            Self::Exposed => observed_exposure == 1.0,
            Self::Unexposed => observed_exposure == 0.0,
        }
    }
}

/// Output format for the report sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

/// Lifecycle of an estimator instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorState {
    Unfitted,
    ModelFitted,
    ResultComputed,
}

// ==================== Configuration ====================

/// Estimator configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GFormulaConfig {
    /// Outcome family (default binary)
    pub outcome_type: Option<OutcomeType>,
    /// Optional sampling-weight column
    pub weights: Option<String>,
    /// Averaging target for the marginal outcome
    pub standardize: Option<Standardize>,
    /// IRLS iteration cap
    pub max_iterations: Option<u32>,
    /// IRLS relative deviance tolerance
    pub convergence_threshold: Option<f64>,
    /// Run stochastic trials across the rayon pool
    pub parallel: Option<bool>,
    /// Residual histogram bins for diagnostics
    pub histogram_bins: Option<u32>,
    /// Report sink format
    pub report_format: Option<ReportFormat>,
}

impl Default for GFormulaConfig {
    fn default() -> Self {
        Self {
            outcome_type: Some(OutcomeType::Binary),
            weights: None,
            standardize: Some(Standardize::Population),
            max_iterations: Some(DEFAULT_MAX_ITERATIONS),
            convergence_threshold: Some(DEFAULT_CONVERGENCE_THRESHOLD),
            parallel: Some(true),
            histogram_bins: Some(DEFAULT_HISTOGRAM_BINS),
            report_format: Some(ReportFormat::Text),
        }
    }
}

// ==================== Summaries ====================

/// One row of a fitted model's coefficient table
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoefficientRow {
    /// Term name (`Intercept`, a column, or `a:b`)
    pub term: String,
    pub estimate: f64,
    pub std_error: f64,
    /// Wald z statistic
    pub z_value: f64,
    /// Two-sided p-value
    pub p_value: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
}

/// Human-readable description of a fitted outcome model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub outcome: String,
    pub outcome_type: OutcomeType,
    pub formula: String,
    /// Rows used for fitting (non-missing outcome)
    pub n_obs: usize,
    pub df_resid: f64,
    pub iterations: u32,
    pub deviance: f64,
    /// Scale parameter (1 for binary and poisson)
    pub dispersion: f64,
    pub coefficients: Vec<CoefficientRow>,
}

impl ModelSummary {
    /// Look up a coefficient row by term name
    pub fn coefficient(&self, term: &str) -> Option<&CoefficientRow> {
        self.coefficients.iter().find(|c| c.term == term)
    }
}

/// One residual histogram bin, `[lower, upper)`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

/// Natural-course residual summary (predicted minus observed)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticSummary {
    /// Rows with a non-missing observed outcome
    pub n: usize,
    pub mean: f64,
    /// Sample standard deviation (n - 1)
    pub std: f64,
    pub min: f64,
    pub max: f64,
    /// Concordance of predictions with observed outcomes (binary only)
    pub auc: Option<f64>,
    pub histogram: Vec<HistogramBin>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_type_from_str() {
        assert_eq!("binary".parse::<OutcomeType>().unwrap(), OutcomeType::Binary);
        assert_eq!(" Normal ".parse::<OutcomeType>().unwrap(), OutcomeType::Normal);
        assert_eq!("POISSON".parse::<OutcomeType>().unwrap(), OutcomeType::Poisson);
    }

    #[test]
    fn test_outcome_type_rejects_unknown() {
        let err = "gamma".parse::<OutcomeType>().unwrap_err();
        assert!(matches!(err, GFormulaError::Configuration(_)));
    }

    #[test]
    fn test_outcome_type_default_is_binary() {
        assert_eq!(OutcomeType::default(), OutcomeType::Binary);
        assert_eq!(OutcomeType::Binary.link_name(), "logit");
    }

    #[test]
    fn test_standardize_includes() {
        assert!(Standardize::Population.includes(0.0));
        assert!(Standardize::Exposed.includes(1.0));
        assert!(!Standardize::Exposed.includes(0.0));
        assert!(Standardize::Unexposed.includes(0.0));
        assert!(!Standardize::Unexposed.includes(1.0));
    }

    #[test]
    fn test_config_defaults() {
        let config = GFormulaConfig::default();
        assert_eq!(config.outcome_type, Some(OutcomeType::Binary));
        assert_eq!(config.standardize, Some(Standardize::Population));
        assert!(config.weights.is_none());
        assert_eq!(config.max_iterations, Some(100));
        assert_eq!(config.parallel, Some(true));
        assert_eq!(config.histogram_bins, Some(20));
        assert_eq!(config.report_format, Some(ReportFormat::Text));
    }

    #[test]
    fn test_outcome_type_serde() {
        let json = serde_json::to_string(&OutcomeType::Poisson).unwrap();
        assert_eq!(json, "\"poisson\"");
    }
}
