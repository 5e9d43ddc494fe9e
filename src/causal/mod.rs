use std::fmt;

use serde::{Deserialize, Serialize};

use crate::predicate::RowPredicate;

pub mod diagnostics;
pub mod estimator;
pub mod treatment;

pub use estimator::TimeFixedGFormula;

/// 反事实处理规则
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreatmentRule {
    /// 所有人暴露 = 1
    TreatAll,
    /// 所有人暴露 = 0
    TreatNone,
    /// 满足条件的行暴露 = 1，其余为 0
    Custom(RowPredicate),
    /// 每行独立抽取 Bernoulli(p)
    Stochastic { probability: f64 },
    /// 按互斥分组使用不同的处理概率
    ConditionalStochastic {
        groups: Vec<RowPredicate>,
        probabilities: Vec<f64>,
    },
}

impl TreatmentRule {
    /// 是否需要随机抽样
    pub fn is_stochastic(&self) -> bool {
        matches!(
            self,
            Self::Stochastic { .. } | Self::ConditionalStochastic { .. }
        )
    }
}

impl fmt::Display for TreatmentRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TreatAll => f.write_str("all"),
            Self::TreatNone => f.write_str("none"),
            Self::Custom(predicate) => write!(f, "custom({predicate})"),
            Self::Stochastic { probability } => write!(f, "stochastic(p={probability})"),
            Self::ConditionalStochastic {
                groups,
                probabilities,
            } => {
                f.write_str("conditional(")?;
                for (i, (group, p)) in groups.iter().zip(probabilities.iter()).enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{group} => p={p}")?;
                }
                f.write_str(")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_stochastic() {
        assert!(!TreatmentRule::TreatAll.is_stochastic());
        assert!(!TreatmentRule::Custom(RowPredicate::Always).is_stochastic());
        assert!(TreatmentRule::Stochastic { probability: 0.8 }.is_stochastic());
    }

    #[test]
    fn test_display() {
        assert_eq!(TreatmentRule::TreatAll.to_string(), "all");
        assert_eq!(
            TreatmentRule::Stochastic { probability: 0.8 }.to_string(),
            "stochastic(p=0.8)"
        );
        let rule = TreatmentRule::ConditionalStochastic {
            groups: vec![RowPredicate::eq("male", 1.0), RowPredicate::eq("male", 0.0)],
            probabilities: vec![0.75, 0.9],
        };
        let text = rule.to_string();
        assert!(text.starts_with("conditional("));
        assert!(text.contains("p=0.75"));
        assert!(text.contains("p=0.9"));
    }

    #[test]
    fn test_serde_roundtrip() {
        let rule = TreatmentRule::Custom(RowPredicate::gt("age0", 40.0));
        let json = serde_json::to_string(&rule).unwrap();
        let back: TreatmentRule = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rule);
    }
}
