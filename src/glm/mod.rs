//! Outcome regression
//!
//! 估计器只依赖拟合能力和可预测、可汇总的已拟合模型
//! （[`OutcomeRegression`] / [`FittedModel`]）。
//! 默认实现 [`IrlsRegression`]：迭代重加权最小二乘拟合的广义线性模型。
//!
//! | 结局类型 | 连接函数 | 方差函数 |
//! |---|---|---|
//! | binary | logit | mu (1 - mu) |
//! | normal | identity | 1 |
//! | poisson | log | mu |

use tracing::{debug, warn};

use crate::error::{GFormulaError, Result};
use crate::formula::Formula;
use crate::matrix::{
    cholesky_decompose, dot_product, invert_from_cholesky, mat_vec_mul, solve_cholesky,
    weighted_normal_equations,
};
use crate::sanitize::{is_binary_ignoring_missing, is_missing};
use crate::stats::two_sided_p_value;
use crate::table::ObservationTable;
use crate::types::{
    CoefficientRow, ModelSummary, OutcomeType, DEFAULT_CONVERGENCE_THRESHOLD,
    DEFAULT_MAX_ITERATIONS, EPSILON, Z_95,
};

/// 逆连接前线性预测值的上限，保证 exp() 有限
const MAX_ETA: f64 = 30.0;

/// 二分类拟合残差低于此值视为完全分离
const SEPARATION_TOLERANCE: f64 = 1e-6;

/// 估计器发给回归拟合的请求
#[derive(Debug, Clone)]
pub struct RegressionRequest<'a> {
    pub outcome_type: OutcomeType,
    pub formula: &'a Formula,
    pub data: &'a ObservationTable,
    pub outcome: &'a str,
    /// 先验（抽样）权重，每行一个
    pub weights: Option<&'a [f64]>,
}

/// 回归拟合能力
pub trait OutcomeRegression: Send + Sync {
    /// 仅用结局非缺失的行拟合
    fn fit(&self, request: &RegressionRequest<'_>) -> Result<Box<dyn FittedModel>>;
}

/// 已拟合的结局模型
pub trait FittedModel: Send + Sync + std::fmt::Debug {
    /// `data` 每一行的预测结局（概率或期望值）
    fn predict(&self, data: &ObservationTable) -> Result<Vec<f64>>;

    /// 系数表与拟合统计量
    fn summary(&self) -> &ModelSummary;
}

// ==================== IRLS ====================

/// IRLS 拟合的广义线性模型
#[derive(Debug, Clone)]
pub struct IrlsRegression {
    pub max_iterations: u32,
    pub convergence_threshold: f64,
}

impl Default for IrlsRegression {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            convergence_threshold: DEFAULT_CONVERGENCE_THRESHOLD,
        }
    }
}

impl IrlsRegression {
    pub fn new(max_iterations: u32, convergence_threshold: f64) -> Self {
        Self {
            max_iterations: max_iterations.max(1),
            convergence_threshold,
        }
    }
}

/// 已拟合的 GLM 系数
#[derive(Debug, Clone)]
pub struct GlmModel {
    formula: Formula,
    outcome_type: OutcomeType,
    coefficients: Vec<f64>,
    summary: ModelSummary,
}

impl GlmModel {
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn formula(&self) -> &Formula {
        &self.formula
    }
}

impl FittedModel for GlmModel {
    fn predict(&self, data: &ObservationTable) -> Result<Vec<f64>> {
        let x = self.formula.design_matrix(data)?;
        let eta = mat_vec_mul(&x, &self.coefficients, self.formula.width());
        Ok(eta
            .into_iter()
            .map(|e| inverse_link(self.outcome_type, e))
            .collect())
    }

    fn summary(&self) -> &ModelSummary {
        &self.summary
    }
}

impl OutcomeRegression for IrlsRegression {
    fn fit(&self, request: &RegressionRequest<'_>) -> Result<Box<dyn FittedModel>> {
        Ok(Box::new(self.fit_glm(request)?))
    }
}

impl IrlsRegression {
    /// 拟合并返回具体模型类型
    pub fn fit_glm(&self, request: &RegressionRequest<'_>) -> Result<GlmModel> {
        let RegressionRequest {
            outcome_type,
            formula,
            data,
            outcome,
            weights,
        } = *request;

        formula.check_outcome(outcome)?;
        if formula.uses(outcome) {
            return Err(GFormulaError::ModelFit(format!(
                "outcome column '{outcome}' cannot appear on the right-hand side"
            )));
        }
        formula.validate(data)?;

        let y_all = data.column(outcome).ok_or_else(|| {
            GFormulaError::ModelFit(format!("outcome column '{outcome}' not found"))
        })?;
        check_outcome_support(outcome_type, outcome, y_all)?;

        // 只用结局非缺失的行拟合
        let rows: Vec<usize> = (0..data.n_rows())
            .filter(|&i| !is_missing(y_all[i]))
            .collect();
        let p = formula.width();
        if rows.len() <= p {
            return Err(GFormulaError::ModelFit(format!(
                "{} usable rows for {p} coefficients",
                rows.len()
            )));
        }

        let fit_data = data.select_rows(&rows)?;
        let x = formula.design_matrix(&fit_data)?;
        let y: Vec<f64> = rows.iter().map(|&i| y_all[i]).collect();
        let prior: Vec<f64> = match weights {
            Some(w) => rows.iter().map(|&i| w[i]).collect(),
            None => vec![1.0; rows.len()],
        };

        let (beta, iterations, deviance, xtwx) = self.irls(outcome_type, &x, &y, &prior, p)?;

        let n_obs = rows.len();
        let df_resid = (prior.iter().filter(|&&w| w > 0.0).count() as f64 - p as f64).max(1.0);
        let dispersion = match outcome_type {
            OutcomeType::Normal => deviance / df_resid,
            OutcomeType::Binary | OutcomeType::Poisson => 1.0,
        };

        let l = cholesky_decompose(&xtwx, p)?;
        let cov = invert_from_cholesky(&l, p);

        let coefficients = formula
            .column_names()
            .into_iter()
            .enumerate()
            .map(|(j, term)| {
                let estimate = beta[j];
                let std_error = (cov[j * p + j] * dispersion).max(0.0).sqrt();
                let z_value = if std_error > 0.0 {
                    estimate / std_error
                } else {
                    f64::INFINITY
                };
                CoefficientRow {
                    term,
                    estimate,
                    std_error,
                    z_value,
                    p_value: two_sided_p_value(z_value),
                    ci_lower: estimate - Z_95 * std_error,
                    ci_upper: estimate + Z_95 * std_error,
                }
            })
            .collect();

        debug!(
            outcome,
            outcome_type = %outcome_type,
            formula = %formula,
            n_obs,
            iterations,
            deviance,
            "outcome regression converged"
        );

        Ok(GlmModel {
            formula: formula.clone(),
            outcome_type,
            coefficients: beta,
            summary: ModelSummary {
                outcome: outcome.to_string(),
                outcome_type,
                formula: formula.to_string(),
                n_obs,
                df_resid,
                iterations,
                deviance,
                dispersion,
                coefficients,
            },
        })
    }

    /// IRLS 迭代，返回 (beta, 迭代次数, 偏差, beta 处的 X'WX)
    #[allow(clippy::type_complexity)]
    fn irls(
        &self,
        outcome_type: OutcomeType,
        x: &[f64],
        y: &[f64],
        prior: &[f64],
        p: usize,
    ) -> Result<(Vec<f64>, u32, f64, Vec<f64>)> {
        let mut mu = initial_mu(outcome_type, y, prior);
        let mut eta: Vec<f64> = mu.iter().map(|&m| link(outcome_type, m)).collect();
        let mut deviance = total_deviance(outcome_type, y, &mu, prior);
        let mut beta = vec![0.0; p];

        for iteration in 1..=self.max_iterations {
            // 工作权重与工作响应
            let mut w = Vec::with_capacity(y.len());
            let mut z = Vec::with_capacity(y.len());
            for i in 0..y.len() {
                let d = mu_eta(outcome_type, mu[i]);
                let var = variance(outcome_type, mu[i]);
                w.push(prior[i] * d * d / var);
                z.push(eta[i] + (y[i] - mu[i]) / d);
            }

            let (xtwx, xtwz) = weighted_normal_equations(x, &w, &z, p);
            let l = cholesky_decompose(&xtwx, p)?;
            beta = solve_cholesky(&l, &xtwz, p);

            eta = mat_vec_mul(x, &beta, p);
            mu = eta.iter().map(|&e| inverse_link(outcome_type, e)).collect();
            let new_deviance = total_deviance(outcome_type, y, &mu, prior);

            if !new_deviance.is_finite() || beta.iter().any(|b| !b.is_finite()) {
                return Err(GFormulaError::ModelFit(format!(
                    "IRLS diverged at iteration {iteration}"
                )));
            }

            if outcome_type == OutcomeType::Binary
                && y.iter().zip(mu.iter()).all(|(&yi, &mi)| (yi - mi).abs() < SEPARATION_TOLERANCE)
            {
                return Err(GFormulaError::ModelFit(
                    "perfect separation: fitted probabilities are all 0 or 1".to_string(),
                ));
            }

            let change = (new_deviance - deviance).abs() / (new_deviance.abs() + 0.1);
            deviance = new_deviance;
            if change < self.convergence_threshold {
                let xtwx = final_information(outcome_type, x, &mu, prior, p);
                return Ok((beta, iteration, deviance, xtwx));
            }
        }

        warn!(
            max_iterations = self.max_iterations,
            deviance,
            norm = dot_product(&beta, &beta).sqrt(),
            "IRLS did not converge"
        );
        Err(GFormulaError::ModelFit(format!(
            "IRLS did not converge within {} iterations (possible separation)",
            self.max_iterations
        )))
    }
}

fn check_outcome_support(outcome_type: OutcomeType, outcome: &str, y: &[f64]) -> Result<()> {
    match outcome_type {
        OutcomeType::Binary if !is_binary_ignoring_missing(y) => Err(GFormulaError::ModelFit(
            format!("binary outcome '{outcome}' must be coded 0/1"),
        )),
        OutcomeType::Poisson if y.iter().any(|&v| !is_missing(v) && v < 0.0) => {
            Err(GFormulaError::ModelFit(format!(
                "poisson outcome '{outcome}' must be non-negative"
            )))
        }
        _ => Ok(()),
    }
}

/// 最终 mu 处的 Fisher 信息 X'WX
fn final_information(
    outcome_type: OutcomeType,
    x: &[f64],
    mu: &[f64],
    prior: &[f64],
    p: usize,
) -> Vec<f64> {
    let w: Vec<f64> = mu
        .iter()
        .zip(prior.iter())
        .map(|(&m, &pw)| {
            let d = mu_eta(outcome_type, m);
            pw * d * d / variance(outcome_type, m)
        })
        .collect();
    let zeros = vec![0.0; mu.len()];
    weighted_normal_equations(x, &w, &zeros, p).0
}

fn initial_mu(outcome_type: OutcomeType, y: &[f64], prior: &[f64]) -> Vec<f64> {
    match outcome_type {
        OutcomeType::Binary => y.iter().map(|&v| (v + 0.5) / 2.0).collect(),
        OutcomeType::Normal => y.to_vec(),
        OutcomeType::Poisson => {
            let total: f64 = prior.iter().sum();
            let y_bar = if total > 0.0 {
                y.iter().zip(prior.iter()).map(|(v, w)| v * w).sum::<f64>() / total
            } else {
                0.0
            };
            y.iter().map(|&v| ((v + y_bar) / 2.0).max(0.1)).collect()
        }
    }
}

fn link(outcome_type: OutcomeType, mu: f64) -> f64 {
    match outcome_type {
        OutcomeType::Binary => (mu / (1.0 - mu)).ln(),
        OutcomeType::Normal => mu,
        OutcomeType::Poisson => mu.ln(),
    }
}

/// 逆连接函数
pub fn inverse_link(outcome_type: OutcomeType, eta: f64) -> f64 {
    match outcome_type {
        OutcomeType::Binary => sigmoid(eta),
        OutcomeType::Normal => eta,
        OutcomeType::Poisson => eta.min(MAX_ETA).exp(),
    }
}

/// d mu / d eta
fn mu_eta(outcome_type: OutcomeType, mu: f64) -> f64 {
    match outcome_type {
        OutcomeType::Binary => (mu * (1.0 - mu)).max(EPSILON),
        OutcomeType::Normal => 1.0,
        OutcomeType::Poisson => mu.max(EPSILON),
    }
}

fn variance(outcome_type: OutcomeType, mu: f64) -> f64 {
    match outcome_type {
        OutcomeType::Binary => (mu * (1.0 - mu)).max(EPSILON),
        OutcomeType::Normal => 1.0,
        OutcomeType::Poisson => mu.max(EPSILON),
    }
}

/// Sigmoid 函数（带数值稳定性处理）
fn sigmoid(x: f64) -> f64 {
    let x = x.clamp(-MAX_ETA, MAX_ETA);
    1.0 / (1.0 + (-x).exp())
}

/// 加权偏差
fn total_deviance(outcome_type: OutcomeType, y: &[f64], mu: &[f64], prior: &[f64]) -> f64 {
    y.iter()
        .zip(mu.iter())
        .zip(prior.iter())
        .map(|((&y, &m), &w)| w * unit_deviance(outcome_type, y, m))
        .sum()
}

fn unit_deviance(outcome_type: OutcomeType, y: f64, mu: f64) -> f64 {
    // y ln(y / mu)，y = 0 时取 0
    let ylogy = |y: f64, mu: f64| if y > 0.0 { y * (y / mu).ln() } else { 0.0 };
    match outcome_type {
        OutcomeType::Binary => {
            let mu = mu.clamp(EPSILON, 1.0 - EPSILON);
            2.0 * (ylogy(y, mu) + ylogy(1.0 - y, 1.0 - mu))
        }
        OutcomeType::Normal => (y - mu).powi(2),
        OutcomeType::Poisson => {
            let mu = mu.max(EPSILON);
            2.0 * (ylogy(y, mu) - (y - mu))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;
    use rand_chacha::ChaCha8Rng;

    fn fit(
        outcome_type: OutcomeType,
        formula: &str,
        table: &ObservationTable,
        outcome: &str,
    ) -> Result<GlmModel> {
        let formula = Formula::parse(formula)?;
        IrlsRegression::default().fit_glm(&RegressionRequest {
            outcome_type,
            formula: &formula,
            data: table,
            outcome,
            weights: None,
        })
    }

    /// 带噪声的线性数据: y = 2 + 3x + e
    fn linear_table(n: usize, seed: u64) -> ObservationTable {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let x: Vec<f64> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let y: Vec<f64> = x
            .iter()
            .map(|&v| 2.0 + 3.0 * v + rng.gen_range(-0.1..0.1))
            .collect();
        ObservationTable::from_columns(vec![("x", x), ("y", y)]).unwrap()
    }

    /// 逻辑回归数据: logit P(y=1) = -0.5 + 1.2x
    fn logistic_table(n: usize, seed: u64) -> ObservationTable {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let x: Vec<f64> = (0..n).map(|_| rng.gen_range(-2.0..2.0)).collect();
        let y: Vec<f64> = x
            .iter()
            .map(|&v| {
                let p = sigmoid(-0.5 + 1.2 * v);
                if rng.gen::<f64>() < p {
                    1.0
                } else {
                    0.0
                }
            })
            .collect();
        ObservationTable::from_columns(vec![("x", x), ("y", y)]).unwrap()
    }

    #[test]
    fn test_normal_matches_closed_form_ols() {
        let table = linear_table(200, 7);
        let model = fit(OutcomeType::Normal, "x", &table, "y").unwrap();

        // 闭式解
        let x = table.column("x").unwrap();
        let y = table.column("y").unwrap();
        let n = x.len() as f64;
        let x_bar = x.iter().sum::<f64>() / n;
        let y_bar = y.iter().sum::<f64>() / n;
        let sxy: f64 = x.iter().zip(y).map(|(a, b)| (a - x_bar) * (b - y_bar)).sum();
        let sxx: f64 = x.iter().map(|a| (a - x_bar).powi(2)).sum();
        let slope = sxy / sxx;
        let intercept = y_bar - slope * x_bar;

        assert!((model.coefficients()[0] - intercept).abs() < 1e-8);
        assert!((model.coefficients()[1] - slope).abs() < 1e-8);
        assert!(model.summary().dispersion > 0.0);
        assert!(model.summary().iterations <= 3);
    }

    #[test]
    fn test_logistic_recovers_coefficients() {
        let table = logistic_table(4000, 11);
        let model = fit(OutcomeType::Binary, "x", &table, "y").unwrap();

        assert!((model.coefficients()[0] - (-0.5)).abs() < 0.15);
        assert!((model.coefficients()[1] - 1.2).abs() < 0.15);

        let summary = model.summary();
        assert_eq!(summary.coefficients.len(), 2);
        let slope = summary.coefficient("x").unwrap();
        assert!(slope.p_value < 0.001);
        assert!(slope.ci_lower < slope.estimate && slope.estimate < slope.ci_upper);
        assert_eq!(summary.dispersion, 1.0);
    }

    #[test]
    fn test_logistic_predictions_are_probabilities() {
        let table = logistic_table(500, 3);
        let model = fit(OutcomeType::Binary, "x", &table, "y").unwrap();
        let preds = model.predict(&table).unwrap();
        assert_eq!(preds.len(), 500);
        assert!(preds.iter().all(|&p| p > 0.0 && p < 1.0));
    }

    #[test]
    fn test_logistic_mean_prediction_matches_observed_rate() {
        // 含截距的逻辑回归满足 sum(mu) = sum(y)
        let table = logistic_table(800, 5);
        let model = fit(OutcomeType::Binary, "x", &table, "y").unwrap();
        let preds = model.predict(&table).unwrap();
        let observed: f64 = table.column("y").unwrap().iter().sum();
        let predicted: f64 = preds.iter().sum();
        assert!((observed - predicted).abs() < 1e-4);
    }

    #[test]
    fn test_poisson_recovers_coefficients() {
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let n = 3000;
        let x: Vec<f64> = (0..n).map(|_| rng.gen_range(0.0..1.0)).collect();
        // 连续正值结局，E[y|x] = exp(1 + 0.7x)
        let y: Vec<f64> = x
            .iter()
            .map(|&v| (1.0 + 0.7 * v).exp() * rng.gen_range(0.8..1.2))
            .collect();
        let table = ObservationTable::from_columns(vec![("x", x), ("y", y)]).unwrap();
        let model = fit(OutcomeType::Poisson, "x", &table, "y").unwrap();

        assert!((model.coefficients()[0] - 1.0).abs() < 0.05);
        assert!((model.coefficients()[1] - 0.7).abs() < 0.05);
    }

    #[test]
    fn test_missing_outcomes_are_excluded() {
        let mut table = linear_table(100, 9);
        let mut y = table.column("y").unwrap().to_vec();
        y[0] = f64::NAN;
        y[1] = f64::NAN;
        table.set_column("y", y).unwrap();

        let model = fit(OutcomeType::Normal, "x", &table, "y").unwrap();
        assert_eq!(model.summary().n_obs, 98);
        // 预测仍覆盖所有行
        assert_eq!(model.predict(&table).unwrap().len(), 100);
    }

    #[test]
    fn test_separation_fails_to_converge() {
        let x: Vec<f64> = (0..40).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|&v| if v < 20.0 { 0.0 } else { 1.0 }).collect();
        let table = ObservationTable::from_columns(vec![("x", x), ("y", y)]).unwrap();

        let err = fit(OutcomeType::Binary, "x", &table, "y").unwrap_err();
        assert!(matches!(err, GFormulaError::ModelFit(_)));
    }

    #[test]
    fn test_collinear_terms_fail() {
        let x: Vec<f64> = (0..30).map(|i| i as f64).collect();
        let x2: Vec<f64> = x.iter().map(|v| 2.0 * v).collect();
        let y: Vec<f64> = x.iter().map(|v| v + 1.0).collect();
        let table = ObservationTable::from_columns(vec![("x", x), ("x2", x2), ("y", y)]).unwrap();

        let err = fit(OutcomeType::Normal, "x + x2", &table, "y").unwrap_err();
        assert!(matches!(err, GFormulaError::ModelFit(_)));
    }

    #[test]
    fn test_rejects_bad_outcome_coding() {
        let table = linear_table(50, 1);
        assert!(matches!(
            fit(OutcomeType::Binary, "x", &table, "y"),
            Err(GFormulaError::ModelFit(_))
        ));
    }

    #[test]
    fn test_rejects_outcome_on_rhs_and_unknown_column() {
        let table = linear_table(50, 1);
        assert!(fit(OutcomeType::Normal, "x + y", &table, "y").is_err());
        assert!(fit(OutcomeType::Normal, "x + z", &table, "y").is_err());
    }

    #[test]
    fn test_rejects_mismatched_lhs() {
        let table = linear_table(50, 1);
        assert!(fit(OutcomeType::Normal, "y ~ x", &table, "y").is_ok());
        assert!(matches!(
            fit(OutcomeType::Normal, "x ~ y", &table, "y"),
            Err(GFormulaError::ModelFit(_))
        ));
    }

    #[test]
    fn test_weights_match_row_duplication() {
        let table = linear_table(60, 13);
        let formula = Formula::parse("x").unwrap();
        let mut weights = vec![1.0; 60];
        weights[0] = 2.0;
        weights[1] = 3.0;

        let weighted = IrlsRegression::default()
            .fit_glm(&RegressionRequest {
                outcome_type: OutcomeType::Normal,
                formula: &formula,
                data: &table,
                outcome: "y",
                weights: Some(&weights),
            })
            .unwrap();

        let mut rows: Vec<usize> = (0..60).collect();
        rows.extend([0, 1, 1]);
        let duplicated = table.select_rows(&rows).unwrap();
        let expanded = fit(OutcomeType::Normal, "x", &duplicated, "y").unwrap();

        for (a, b) in weighted.coefficients().iter().zip(expanded.coefficients()) {
            assert!((a - b).abs() < 1e-8);
        }
    }

    #[test]
    fn test_sigmoid() {
        assert!((sigmoid(0.0) - 0.5).abs() < EPSILON);
        assert!(sigmoid(100.0) < 1.0);
        assert!(sigmoid(-100.0) > 0.0);
    }
}
