//! 反事实处理分配

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use super::TreatmentRule;
use crate::error::{GFormulaError, Result};
use crate::predicate::RowPredicate;
use crate::table::ObservationTable;

/// 确定性规则下每行的暴露值（0/1）
///
/// 随机规则不在这里处理，见 [`row_probabilities`]。
pub fn deterministic_exposure(rule: &TreatmentRule, table: &ObservationTable) -> Result<Vec<f64>> {
    let n = table.n_rows();
    match rule {
        TreatmentRule::TreatAll => Ok(vec![1.0; n]),
        TreatmentRule::TreatNone => Ok(vec![0.0; n]),
        TreatmentRule::Custom(predicate) => Ok(predicate
            .mask(table)?
            .into_iter()
            .map(|treated| if treated { 1.0 } else { 0.0 })
            .collect()),
        TreatmentRule::Stochastic { .. } | TreatmentRule::ConditionalStochastic { .. } => {
            Err(GFormulaError::Configuration(format!(
                "'{rule}' is stochastic and has no deterministic exposure"
            )))
        }
    }
}

/// 检查处理概率在 [0, 1] 内
pub fn validate_probability(p: f64) -> Result<()> {
    if p.is_finite() && (0.0..=1.0).contains(&p) {
        Ok(())
    } else {
        Err(GFormulaError::Configuration(format!(
            "treatment probability {p} is outside [0, 1]"
        )))
    }
}

/// 每行的处理概率
///
/// 条件分组必须互斥且覆盖所有行，并且与概率一一对应。
pub fn row_probabilities(
    table: &ObservationTable,
    groups: &[RowPredicate],
    probabilities: &[f64],
) -> Result<Vec<f64>> {
    if groups.is_empty() {
        return Err(GFormulaError::Configuration(
            "conditional stochastic treatment needs at least one group".to_string(),
        ));
    }
    if groups.len() != probabilities.len() {
        return Err(GFormulaError::Configuration(format!(
            "{} conditional groups but {} probabilities",
            groups.len(),
            probabilities.len()
        )));
    }
    for &p in probabilities {
        validate_probability(p)?;
    }

    let masks: Vec<Vec<bool>> = groups
        .iter()
        .map(|g| g.mask(table))
        .collect::<Result<_>>()?;

    (0..table.n_rows())
        .map(|row| {
            let mut matched = masks.iter().enumerate().filter(|(_, m)| m[row]).map(|(i, _)| i);
            match (matched.next(), matched.next()) {
                (Some(i), None) => Ok(probabilities[i]),
                (None, _) => Err(GFormulaError::Configuration(format!(
                    "row {row} matches none of the conditional groups; groups must be exhaustive"
                ))),
                (Some(i), Some(j)) => Err(GFormulaError::Configuration(format!(
                    "row {row} matches groups '{}' and '{}'; groups must not overlap",
                    groups[i], groups[j]
                ))),
            }
        })
        .collect()
}

/// 第 `trial` 次抽样的随机数流
///
/// 同一个基础种子下每个试验使用独立的 ChaCha 流，结果与执行顺序无关。
pub fn trial_rng(base_seed: u64, trial: u64) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(base_seed);
    rng.set_stream(trial);
    rng
}

/// 按行独立抽取 Bernoulli(p_i) 暴露
pub fn draw_exposure<R: Rng>(probabilities: &[f64], rng: &mut R) -> Vec<f64> {
    probabilities
        .iter()
        .map(|&p| if rng.gen::<f64>() < p { 1.0 } else { 0.0 })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> ObservationTable {
        ObservationTable::from_columns(vec![
            ("art", vec![1.0, 0.0, 1.0, 0.0]),
            ("male", vec![1.0, 0.0, 1.0, 0.0]),
            ("age0", vec![30.0, 45.0, 52.0, 61.0]),
        ])
        .unwrap()
    }

    #[test]
    fn test_deterministic_all_none() {
        let table = sample_table();
        assert_eq!(
            deterministic_exposure(&TreatmentRule::TreatAll, &table).unwrap(),
            vec![1.0; 4]
        );
        assert_eq!(
            deterministic_exposure(&TreatmentRule::TreatNone, &table).unwrap(),
            vec![0.0; 4]
        );
    }

    #[test]
    fn test_deterministic_custom() {
        let table = sample_table();
        let rule = TreatmentRule::Custom(RowPredicate::gt("age0", 40.0));
        assert_eq!(
            deterministic_exposure(&rule, &table).unwrap(),
            vec![0.0, 1.0, 1.0, 1.0]
        );
    }

    #[test]
    fn test_deterministic_rejects_stochastic() {
        let table = sample_table();
        let rule = TreatmentRule::Stochastic { probability: 0.5 };
        assert!(deterministic_exposure(&rule, &table).is_err());
    }

    #[test]
    fn test_validate_probability() {
        assert!(validate_probability(0.0).is_ok());
        assert!(validate_probability(1.0).is_ok());
        assert!(validate_probability(-0.01).is_err());
        assert!(validate_probability(1.5).is_err());
        assert!(validate_probability(f64::NAN).is_err());
    }

    #[test]
    fn test_row_probabilities() {
        let table = sample_table();
        let groups = vec![RowPredicate::eq("male", 1.0), RowPredicate::eq("male", 0.0)];
        let probs = row_probabilities(&table, &groups, &[0.75, 0.9]).unwrap();
        assert_eq!(probs, vec![0.75, 0.9, 0.75, 0.9]);
    }

    #[test]
    fn test_row_probabilities_rejects_bad_groups() {
        let table = sample_table();

        // 长度不匹配
        let groups = vec![RowPredicate::eq("male", 1.0), RowPredicate::eq("male", 0.0)];
        assert!(matches!(
            row_probabilities(&table, &groups, &[0.5]),
            Err(GFormulaError::Configuration(_))
        ));

        // 不覆盖所有行
        let partial = vec![RowPredicate::eq("male", 1.0)];
        assert!(matches!(
            row_probabilities(&table, &partial, &[0.5]),
            Err(GFormulaError::Configuration(_))
        ));

        // 重叠
        let overlapping = vec![RowPredicate::Always, RowPredicate::eq("male", 0.0)];
        assert!(matches!(
            row_probabilities(&table, &overlapping, &[0.5, 0.5]),
            Err(GFormulaError::Configuration(_))
        ));

        // 空分组
        assert!(row_probabilities(&table, &[], &[]).is_err());

        // 概率越界
        assert!(row_probabilities(&table, &[RowPredicate::Always], &[1.2]).is_err());
    }

    #[test]
    fn test_row_probabilities_unknown_column() {
        let table = sample_table();
        let err = row_probabilities(&table, &[RowPredicate::eq("sex", 1.0)], &[0.5]).unwrap_err();
        assert!(matches!(err, GFormulaError::RuleEvaluation(_)));
    }

    #[test]
    fn test_trial_rng_reproducible_and_distinct() {
        let mut first = trial_rng(7, 3);
        let mut second = trial_rng(7, 3);
        let a: Vec<u64> = (0..4).map(|_| first.gen()).collect();
        let b: Vec<u64> = (0..4).map(|_| second.gen()).collect();
        assert_eq!(a, b);

        let mut s0 = trial_rng(7, 0);
        let mut s1 = trial_rng(7, 1);
        assert_ne!(s0.gen::<u64>(), s1.gen::<u64>());
    }

    #[test]
    fn test_draw_exposure_extremes() {
        let mut rng = trial_rng(1, 0);
        assert_eq!(draw_exposure(&[1.0; 50], &mut rng), vec![1.0; 50]);
        assert_eq!(draw_exposure(&[0.0; 50], &mut rng), vec![0.0; 50]);
    }

    #[test]
    fn test_draw_exposure_rate() {
        let mut rng = trial_rng(99, 0);
        let draws = draw_exposure(&vec![0.3; 20000], &mut rng);
        let rate = draws.iter().sum::<f64>() / draws.len() as f64;
        assert!((rate - 0.3).abs() < 0.02);
    }
}
