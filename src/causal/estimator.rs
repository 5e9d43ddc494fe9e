use std::fmt;
use std::io::Write;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use super::diagnostics::summarize_residuals;
use super::treatment::{deterministic_exposure, draw_exposure, row_probabilities, trial_rng};
use super::TreatmentRule;
use crate::error::{GFormulaError, Result};
use crate::formula::Formula;
use crate::glm::{FittedModel, IrlsRegression, OutcomeRegression, RegressionRequest};
use crate::predicate::RowPredicate;
use crate::report::{render_diagnostics, render_model_summary};
use crate::sanitize::{first_invalid_weight, is_binary_column};
use crate::stats::{mean, weighted_mean};
use crate::table::ObservationTable;
use crate::types::{
    DiagnosticSummary, EstimatorState, GFormulaConfig, ModelSummary, OutcomeType, ReportFormat,
    Standardize, DEFAULT_CONVERGENCE_THRESHOLD, DEFAULT_HISTOGRAM_BINS, DEFAULT_MAX_ITERATIONS,
    DEFAULT_REPETITIONS, EPSILON,
};

/// 时间固定暴露的参数 g-formula 估计器
///
/// 持有观测数据、暴露列和结局列，拟合一个结局模型，
/// 然后在各种反事实处理规则下计算边际结局。
///
/// 所有 `fit*` 调用都在表的副本上修改暴露列，原始数据不会被改动。
/// 失败的调用不会改变已保存的模型或结果。
pub struct TimeFixedGFormula {
    /// 观测数据
    table: ObservationTable,
    /// 暴露列名
    exposure: String,
    /// 结局列名
    outcome: String,
    outcome_type: OutcomeType,
    /// 抽样权重（每行一个）
    weights: Option<Vec<f64>>,
    /// 边际平均使用的权重，不在标准化目标人群中的行为 0
    target_weights: Vec<f64>,
    standardize: Standardize,
    parallel: bool,
    histogram_bins: usize,
    report_format: ReportFormat,
    regression: Box<dyn OutcomeRegression>,
    sink: Box<dyn Write + Send + Sync>,
    /// 当前结局模型
    model: Option<Box<dyn FittedModel>>,
    marginal_outcome: Option<f64>,
    /// 最近一次确定性规则下每行的预测值
    predicted_outcomes: Option<Vec<f64>>,
    /// 最近一次随机规则下每次试验的均值
    stochastic_trials: Option<Vec<f64>>,
    diagnostics: Option<DiagnosticSummary>,
}

impl fmt::Debug for TimeFixedGFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeFixedGFormula")
            .field("n_rows", &self.table.n_rows())
            .field("exposure", &self.exposure)
            .field("outcome", &self.outcome)
            .field("outcome_type", &self.outcome_type)
            .field("standardize", &self.standardize)
            .field("state", &self.state())
            .field("marginal_outcome", &self.marginal_outcome)
            .finish_non_exhaustive()
    }
}

impl TimeFixedGFormula {
    /// 创建估计器
    ///
    /// 暴露列必须完整且取值为 0/1；结局列可以含缺失值。
    pub fn new(
        table: ObservationTable,
        exposure: &str,
        outcome: &str,
        config: Option<GFormulaConfig>,
    ) -> Result<Self> {
        let config = config.unwrap_or_default();

        if table.n_rows() == 0 {
            return Err(GFormulaError::Configuration(
                "observation table has no rows".to_string(),
            ));
        }
        if exposure == outcome {
            return Err(GFormulaError::Configuration(format!(
                "exposure and outcome are the same column '{exposure}'"
            )));
        }
        let exposure_values = table.require_column(exposure)?;
        table.require_column(outcome)?;

        if !is_binary_column(exposure_values) {
            return Err(GFormulaError::Configuration(format!(
                "exposure '{exposure}' must be fully observed and coded 0/1"
            )));
        }

        let weights = match config.weights.as_deref() {
            Some(name) => {
                let w = table.require_column(name)?;
                if let Some(row) = first_invalid_weight(w) {
                    return Err(GFormulaError::Configuration(format!(
                        "weight column '{name}' has an invalid value at row {row}"
                    )));
                }
                Some(w.to_vec())
            }
            None => None,
        };

        let standardize = config.standardize.unwrap_or_default();
        let target_weights: Vec<f64> = exposure_values
            .iter()
            .enumerate()
            .map(|(i, &a)| {
                if standardize.includes(a) {
                    weights.as_ref().map_or(1.0, |w| w[i])
                } else {
                    0.0
                }
            })
            .collect();
        if target_weights.iter().sum::<f64>() <= EPSILON {
            return Err(GFormulaError::Configuration(format!(
                "standardization target '{standardize:?}' is empty or has zero total weight"
            )));
        }

        let convergence_threshold = config
            .convergence_threshold
            .unwrap_or(DEFAULT_CONVERGENCE_THRESHOLD);
        if !(convergence_threshold.is_finite() && convergence_threshold > 0.0) {
            return Err(GFormulaError::Configuration(format!(
                "convergence threshold must be positive, got {convergence_threshold}"
            )));
        }
        let regression = IrlsRegression::new(
            config.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS),
            convergence_threshold,
        );

        debug!(
            rows = table.n_rows(),
            exposure,
            outcome,
            weighted = weights.is_some(),
            ?standardize,
            "g-formula estimator created"
        );

        Ok(Self {
            table,
            exposure: exposure.to_string(),
            outcome: outcome.to_string(),
            outcome_type: config.outcome_type.unwrap_or_default(),
            weights,
            target_weights,
            standardize,
            parallel: config.parallel.unwrap_or(true),
            histogram_bins: config
                .histogram_bins
                .unwrap_or(DEFAULT_HISTOGRAM_BINS)
                .max(1) as usize,
            report_format: config.report_format.unwrap_or_default(),
            regression: Box::new(regression),
            sink: Box::new(std::io::stdout()),
            model: None,
            marginal_outcome: None,
            predicted_outcomes: None,
            stochastic_trials: None,
            diagnostics: None,
        })
    }

    /// 替换回归实现
    pub fn with_regression(mut self, regression: Box<dyn OutcomeRegression>) -> Self {
        self.regression = regression;
        self
    }

    /// 替换报告输出（默认 stdout）
    pub fn with_report_sink(mut self, sink: Box<dyn Write + Send + Sync>) -> Self {
        self.sink = sink;
        self
    }

    pub fn set_report_sink(&mut self, sink: Box<dyn Write + Send + Sync>) {
        self.sink = sink;
    }

    // ==================== 结局模型 ====================

    /// 拟合结局模型
    ///
    /// 只使用结局非缺失的行。`report` 为 true 时把系数表写到报告输出。
    /// 成功后替换旧模型，并清除之前的边际结局和诊断结果。
    pub fn fit_outcome_model(&mut self, formula: &str, report: bool) -> Result<&ModelSummary> {
        let formula = Formula::parse(formula)?;
        formula.check_outcome(&self.outcome)?;
        if !formula.uses(&self.exposure) {
            warn!(
                exposure = %self.exposure,
                formula = %formula,
                "outcome model does not include the exposure; every treatment rule will give the same estimate"
            );
        }

        let request = RegressionRequest {
            outcome_type: self.outcome_type,
            formula: &formula,
            data: &self.table,
            outcome: &self.outcome,
            weights: self.weights.as_deref(),
        };
        let model = self.regression.fit(&request)?;

        // 先写报告再提交状态
        if report {
            let text = render_model_summary(model.summary(), self.report_format)?;
            self.sink.write_all(text.as_bytes())?;
            self.sink.flush()?;
        }

        info!(
            outcome = %self.outcome,
            outcome_type = %self.outcome_type,
            formula = %formula,
            n_obs = model.summary().n_obs,
            iterations = model.summary().iterations,
            "outcome model fitted"
        );

        self.marginal_outcome = None;
        self.predicted_outcomes = None;
        self.stochastic_trials = None;
        self.diagnostics = None;
        let model = self.model.insert(model);
        Ok(model.summary())
    }

    // ==================== 处理规则 ====================

    /// 在给定处理规则下估计边际结局
    ///
    /// 随机规则使用默认重复次数和非确定性种子；
    /// 需要控制时直接调用 [`fit_stochastic`](Self::fit_stochastic)。
    pub fn fit(&mut self, rule: &TreatmentRule) -> Result<f64> {
        match rule {
            TreatmentRule::Stochastic { probability } => {
                self.fit_stochastic(*probability, None, None)
            }
            TreatmentRule::ConditionalStochastic {
                groups,
                probabilities,
            } => self.fit_conditional_stochastic(probabilities, groups, None, None),
            TreatmentRule::TreatAll | TreatmentRule::TreatNone | TreatmentRule::Custom(_) => {
                self.fit_deterministic(rule)
            }
        }
    }

    /// 所有人接受暴露
    pub fn fit_all(&mut self) -> Result<f64> {
        self.fit_deterministic(&TreatmentRule::TreatAll)
    }

    /// 所有人不接受暴露
    pub fn fit_none(&mut self) -> Result<f64> {
        self.fit_deterministic(&TreatmentRule::TreatNone)
    }

    /// 满足 `predicate` 的行接受暴露
    pub fn fit_custom(&mut self, predicate: RowPredicate) -> Result<f64> {
        self.fit_deterministic(&TreatmentRule::Custom(predicate))
    }

    fn fit_deterministic(&mut self, rule: &TreatmentRule) -> Result<f64> {
        let model = self.model.as_deref().ok_or(GFormulaError::NotFitted)?;
        let exposure = deterministic_exposure(rule, &self.table)?;
        let predictions = predict_with_exposure(model, &self.table, &self.exposure, exposure)?;
        let marginal = weighted_mean(&predictions, &self.target_weights);

        info!(rule = %rule, marginal_outcome = marginal, "deterministic treatment fitted");

        self.marginal_outcome = Some(marginal);
        self.predicted_outcomes = Some(predictions);
        self.stochastic_trials = None;
        Ok(marginal)
    }

    /// 无条件随机处理：每行独立以概率 `p` 接受暴露
    ///
    /// 结果是 `repetitions` 次试验均值的平均（默认 100 次）。
    /// 给定 `seed` 时结果可完全复现，与是否并行无关。
    pub fn fit_stochastic(
        &mut self,
        p: f64,
        repetitions: Option<u32>,
        seed: Option<u64>,
    ) -> Result<f64> {
        let rule = TreatmentRule::Stochastic { probability: p };
        self.run_stochastic(&rule, &[RowPredicate::Always], &[p], repetitions, seed)
    }

    /// 条件随机处理：第 i 组的行以概率 `probabilities[i]` 接受暴露
    ///
    /// 分组必须互斥且覆盖所有行。
    pub fn fit_conditional_stochastic(
        &mut self,
        probabilities: &[f64],
        conditional: &[RowPredicate],
        repetitions: Option<u32>,
        seed: Option<u64>,
    ) -> Result<f64> {
        let rule = TreatmentRule::ConditionalStochastic {
            groups: conditional.to_vec(),
            probabilities: probabilities.to_vec(),
        };
        self.run_stochastic(&rule, conditional, probabilities, repetitions, seed)
    }

    fn run_stochastic(
        &mut self,
        rule: &TreatmentRule,
        groups: &[RowPredicate],
        probabilities: &[f64],
        repetitions: Option<u32>,
        seed: Option<u64>,
    ) -> Result<f64> {
        let model = self.model.as_deref().ok_or(GFormulaError::NotFitted)?;

        let repetitions = repetitions.unwrap_or(DEFAULT_REPETITIONS);
        if repetitions == 0 {
            return Err(GFormulaError::Configuration(
                "stochastic treatment needs at least one repetition".to_string(),
            ));
        }

        let row_probs = row_probabilities(&self.table, groups, probabilities)?;
        let base_seed = seed.unwrap_or_else(rand::random);

        let table = &self.table;
        let exposure = self.exposure.as_str();
        let targets = &self.target_weights;
        let run_trial = |trial: u32| -> Result<f64> {
            let mut rng = trial_rng(base_seed, u64::from(trial));
            let draws = draw_exposure(&row_probs, &mut rng);
            let predictions = predict_with_exposure(model, table, exposure, draws)?;
            Ok(weighted_mean(&predictions, targets))
        };

        // 每次试验有独立的随机流，按序收集后再求均值
        let trials: Vec<f64> = if self.parallel {
            (0..repetitions)
                .into_par_iter()
                .map(run_trial)
                .collect::<Result<_>>()?
        } else {
            (0..repetitions).map(run_trial).collect::<Result<_>>()?
        };
        let marginal = mean(&trials);

        info!(
            rule = %rule,
            repetitions,
            seed = base_seed,
            marginal_outcome = marginal,
            "stochastic treatment fitted"
        );

        self.marginal_outcome = Some(marginal);
        self.predicted_outcomes = None;
        self.stochastic_trials = Some(trials);
        Ok(marginal)
    }

    // ==================== 诊断 ====================

    /// 自然病程预测（使用观测到的暴露）
    pub fn predict_natural_course(&self) -> Result<Vec<f64>> {
        let model = self.model.as_deref().ok_or(GFormulaError::NotFitted)?;
        model.predict(&self.table)
    }

    /// 自然病程残差诊断
    ///
    /// 不改变模型和边际结局。`plot` 为 true 时附带残差直方图。
    pub fn run_diagnostics(&mut self, plot: bool) -> Result<DiagnosticSummary> {
        let predicted = self.predict_natural_course()?;
        let observed = self.table.require_column(&self.outcome)?;
        let summary =
            summarize_residuals(&predicted, observed, self.outcome_type, self.histogram_bins)?;

        let text = render_diagnostics(&summary, plot, self.report_format)?;
        self.sink.write_all(text.as_bytes())?;
        self.sink.flush()?;

        debug!(
            n = summary.n,
            mean = summary.mean,
            std = summary.std,
            "natural-course diagnostics"
        );

        self.diagnostics = Some(summary.clone());
        Ok(summary)
    }

    // ==================== 访问器 ====================

    /// 最近一次 `fit*` 的边际结局
    pub fn marginal_outcome(&self) -> Option<f64> {
        self.marginal_outcome
    }

    pub fn predicted_outcomes(&self) -> Option<&[f64]> {
        self.predicted_outcomes.as_deref()
    }

    pub fn stochastic_trials(&self) -> Option<&[f64]> {
        self.stochastic_trials.as_deref()
    }

    pub fn model_summary(&self) -> Option<&ModelSummary> {
        self.model.as_deref().map(|m| m.summary())
    }

    pub fn diagnostics(&self) -> Option<&DiagnosticSummary> {
        self.diagnostics.as_ref()
    }

    pub fn state(&self) -> EstimatorState {
        match (&self.model, self.marginal_outcome) {
            (None, _) => EstimatorState::Unfitted,
            (Some(_), None) => EstimatorState::ModelFitted,
            (Some(_), Some(_)) => EstimatorState::ResultComputed,
        }
    }

    pub fn table(&self) -> &ObservationTable {
        &self.table
    }

    pub fn exposure(&self) -> &str {
        &self.exposure
    }

    pub fn outcome(&self) -> &str {
        &self.outcome
    }

    pub fn outcome_type(&self) -> OutcomeType {
        self.outcome_type
    }

    pub fn standardize(&self) -> Standardize {
        self.standardize
    }
}

/// 在表副本上替换暴露列后预测
fn predict_with_exposure(
    model: &dyn FittedModel,
    table: &ObservationTable,
    exposure: &str,
    values: Vec<f64>,
) -> Result<Vec<f64>> {
    let mut working = table.clone();
    working.set_column(exposure, values)?;
    model.predict(&working)
}
