//! Error taxonomy
//!
//! All errors are local to a single call. A failing call never leaves a
//! partially updated estimator behind.

/// Errors raised by the g-formula estimator and its collaborators
#[derive(Debug, thiserror::Error)]
pub enum GFormulaError {
    /// Bad construction arguments, invalid probabilities, or conditional
    /// groups that overlap / leave rows uncovered
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Regression non-convergence, singular design matrix, unknown formula columns
    #[error("model fit error: {0}")]
    ModelFit(String),
    /// A treatment-rule fit or diagnostics call before `fit_outcome_model`
    #[error("outcome model has not been fitted; call fit_outcome_model first")]
    NotFitted,
    /// A row predicate could not be parsed or evaluated
    #[error("rule evaluation error: {0}")]
    RuleEvaluation(String),
    #[error("report output failed: {0}")]
    Report(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GFormulaError>;
