//! Nonparametric bootstrap
//!
//! 有放回地重抽行，把每个重抽样交给调用方闭包。闭包应新建估计器、
//! 拟合结局模型并返回所需对比量，重复之间不共享估计器状态。
//!
//! ```no_run
//! use gformula::bootstrap::{bootstrap, BootstrapConfig};
//! use gformula::{simulate_cohort, TimeFixedGFormula};
//!
//! # fn main() -> gformula::Result<()> {
//! let table = simulate_cohort(500, 1)?;
//! let interval = bootstrap(&table, &BootstrapConfig::default(), |sample| {
//!     let mut g = TimeFixedGFormula::new(sample, "art", "dead", None)?;
//!     g.fit_outcome_model("art + male + age0 + cd40 + dvl0", false)?;
//!     Ok(g.fit_all()? - g.fit_none()?)
//! })?;
//! println!("95% CI: {:.4}, {:.4}", interval.ci_lower, interval.ci_upper);
//! # Ok(())
//! # }
//! ```

use rand::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::causal::treatment::trial_rng;
use crate::error::{GFormulaError, Result};
use crate::stats::{quantile, variance};
use crate::table::ObservationTable;
use crate::types::DEFAULT_BOOTSTRAP_REPLICATES;

/// Bootstrap 配置
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// 重采样次数
    pub replicates: u32,
    /// 基础种子（None 时随机）
    pub seed: Option<u64>,
    /// 置信区间的 alpha（0.05 → 95% 区间）
    pub alpha: f64,
    /// 是否用 rayon 并行
    pub parallel: bool,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            replicates: DEFAULT_BOOTSTRAP_REPLICATES,
            seed: None,
            alpha: 0.05,
            parallel: true,
        }
    }
}

/// Bootstrap 结果
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BootstrapInterval {
    /// 成功重采样的统计量，按重采样序号排列
    pub estimates: Vec<f64>,
    /// 统计量的标准差
    pub std_error: f64,
    /// 百分位下界
    pub ci_lower: f64,
    /// 百分位上界
    pub ci_upper: f64,
    /// 失败并被跳过的重采样数
    pub failed_replicates: u32,
    /// 实际使用的基础种子
    pub seed: u64,
}

/// 对 `table` 的行重抽样计算 `statistic` 的百分位 bootstrap
///
/// 统计量失败或非有限的重复被跳过并计数
pub fn bootstrap<F>(
    table: &ObservationTable,
    config: &BootstrapConfig,
    statistic: F,
) -> Result<BootstrapInterval>
where
    F: Fn(ObservationTable) -> Result<f64> + Sync + Send,
{
    let n = table.n_rows();
    if n == 0 {
        return Err(GFormulaError::Configuration(
            "cannot bootstrap an empty table".to_string(),
        ));
    }
    if config.replicates < 2 {
        return Err(GFormulaError::Configuration(format!(
            "bootstrap needs at least 2 replicates, got {}",
            config.replicates
        )));
    }
    if !(config.alpha > 0.0 && config.alpha < 1.0) {
        return Err(GFormulaError::Configuration(format!(
            "alpha must be in (0, 1), got {}",
            config.alpha
        )));
    }

    let base_seed = config.seed.unwrap_or_else(rand::random);

    let run_replicate = |replicate: u32| -> Result<f64> {
        let mut rng = trial_rng(base_seed, u64::from(replicate));
        let indices: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
        let sample = table.select_rows(&indices)?;
        let value = statistic(sample)?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(GFormulaError::ModelFit(format!(
                "statistic returned a non-finite value ({value})"
            )))
        }
    };

    let outcomes: Vec<Result<f64>> = if config.parallel {
        (0..config.replicates)
            .into_par_iter()
            .map(run_replicate)
            .collect()
    } else {
        (0..config.replicates).map(run_replicate).collect()
    };

    let mut estimates = Vec::with_capacity(outcomes.len());
    let mut failed_replicates = 0u32;
    for (replicate, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(value) => estimates.push(value),
            Err(e) => {
                failed_replicates += 1;
                warn!(replicate, error = %e, "bootstrap replicate skipped");
            }
        }
    }

    if estimates.len() < 2 {
        return Err(GFormulaError::Configuration(format!(
            "only {} of {} bootstrap replicates succeeded",
            estimates.len(),
            config.replicates
        )));
    }

    let std_error = variance(&estimates).sqrt();
    let ci_lower = quantile(&estimates, config.alpha / 2.0);
    let ci_upper = quantile(&estimates, 1.0 - config.alpha / 2.0);

    info!(
        replicates = config.replicates,
        failed_replicates,
        std_error,
        ci_lower,
        ci_upper,
        "bootstrap finished"
    );

    Ok(BootstrapInterval {
        estimates,
        std_error,
        ci_lower,
        ci_upper,
        failed_replicates,
        seed: base_seed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{mean, median};

    fn sample_table() -> ObservationTable {
        let values: Vec<f64> = (0..200).map(|i| f64::from(i % 17)).collect();
        ObservationTable::from_columns(vec![("x", values)]).unwrap()
    }

    fn column_mean(sample: ObservationTable) -> Result<f64> {
        Ok(mean(sample.require_column("x")?))
    }

    #[test]
    fn test_reproducible_with_seed() {
        let config = BootstrapConfig {
            replicates: 50,
            seed: Some(7),
            ..Default::default()
        };
        let a = bootstrap(&sample_table(), &config, column_mean).unwrap();
        let b = bootstrap(&sample_table(), &config, column_mean).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.seed, 7);
        assert_eq!(a.estimates.len(), 50);
    }

    #[test]
    fn test_serial_matches_parallel() {
        let parallel = BootstrapConfig {
            replicates: 30,
            seed: Some(3),
            ..Default::default()
        };
        let serial = BootstrapConfig {
            parallel: false,
            ..parallel.clone()
        };
        let a = bootstrap(&sample_table(), &parallel, column_mean).unwrap();
        let b = bootstrap(&sample_table(), &serial, column_mean).unwrap();
        assert_eq!(a.estimates, b.estimates);
    }

    #[test]
    fn test_interval_brackets_median() {
        let config = BootstrapConfig {
            replicates: 200,
            seed: Some(11),
            ..Default::default()
        };
        let interval = bootstrap(&sample_table(), &config, column_mean).unwrap();
        let mid = median(&interval.estimates);
        assert!(interval.ci_lower <= mid && mid <= interval.ci_upper);
        assert!(interval.std_error > 0.0);

        // 真实均值附近
        let truth = mean(sample_table().column("x").unwrap());
        assert!(interval.ci_lower < truth && truth < interval.ci_upper);
    }

    #[test]
    fn test_failed_replicates_are_counted() {
        let config = BootstrapConfig {
            replicates: 40,
            seed: Some(5),
            parallel: false,
            ..Default::default()
        };
        let interval = bootstrap(&sample_table(), &config, |sample| {
            let m = mean(sample.require_column("x")?);
            if m > 8.0 {
                Err(GFormulaError::ModelFit("too large".to_string()))
            } else {
                Ok(m)
            }
        })
        .unwrap();
        assert_eq!(interval.estimates.len() + interval.failed_replicates as usize, 40);
        assert!(interval.estimates.iter().all(|&m| m <= 8.0));
    }

    #[test]
    fn test_all_failed_is_error() {
        let config = BootstrapConfig {
            replicates: 10,
            seed: Some(1),
            ..Default::default()
        };
        let err = bootstrap(&sample_table(), &config, |_| Ok(f64::NAN)).unwrap_err();
        assert!(matches!(err, GFormulaError::Configuration(_)));
    }

    #[test]
    fn test_rejects_bad_config() {
        let table = sample_table();
        let bad_alpha = BootstrapConfig {
            alpha: 1.5,
            ..Default::default()
        };
        assert!(bootstrap(&table, &bad_alpha, column_mean).is_err());

        let too_few = BootstrapConfig {
            replicates: 1,
            ..Default::default()
        };
        assert!(bootstrap(&table, &too_few, column_mean).is_err());
    }
}
