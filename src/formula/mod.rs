//! 模型公式
//!
//! 常见回归记法的右侧项列表：
//!
//! - `art + male + age0` 主效应
//! - `art:male` 交互项（列乘积）
//! - `art*male` 即 `art + male + art:male`
//!
//! 可带左侧 `dead ~ ...`，须与估计器的结局列一致。截距总是设计矩阵第一列。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{GFormulaError, Result};
use crate::sanitize::count_missing;
use crate::table::ObservationTable;

/// 系数表中截距的名称
pub const INTERCEPT: &str = "Intercept";

/// `a*b*...` 最多展开的因子数
pub const MAX_STAR_FACTORS: usize = 8;

/// 一列或多列的乘积
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub factors: Vec<String>,
}

impl Term {
    pub fn name(&self) -> String {
        self.factors.join(":")
    }

    fn evaluate(&self, columns: &[&[f64]], row: usize) -> f64 {
        columns.iter().map(|c| c[row]).product()
    }
}

/// 解析后的结局模型公式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Formula {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    outcome: Option<String>,
    terms: Vec<Term>,
}

impl Formula {
    /// 解析 `+` 分隔的项列表，可带 `outcome ~` 左侧
    pub fn parse(input: &str) -> Result<Self> {
        let (outcome, rhs) = match input.split_once('~') {
            Some((lhs, rhs)) => {
                let lhs = lhs.trim();
                if lhs.is_empty() {
                    (None, rhs)
                } else if is_identifier(lhs) {
                    (Some(lhs.to_string()), rhs)
                } else {
                    return Err(GFormulaError::ModelFit(format!(
                        "invalid left-hand side '{lhs}' in formula '{input}'"
                    )));
                }
            }
            None => (None, input),
        };

        let mut terms: Vec<Term> = Vec::new();
        for raw in rhs.split('+') {
            let raw = raw.trim();
            if raw.is_empty() {
                return Err(GFormulaError::ModelFit(format!(
                    "empty term in formula '{input}'"
                )));
            }
            if raw == "1" {
                // 截距总是包含
                continue;
            }
            for term in expand_term(raw, input)? {
                if !terms.contains(&term) {
                    terms.push(term);
                }
            }
        }

        Ok(Self { outcome, terms })
    }

    /// 左侧结局列（未写则为 None）
    pub fn outcome(&self) -> Option<&str> {
        self.outcome.as_deref()
    }

    /// 左侧若存在，必须是给定的结局列
    pub fn check_outcome(&self, outcome: &str) -> Result<()> {
        match self.outcome() {
            Some(lhs) if lhs != outcome => Err(GFormulaError::ModelFit(format!(
                "formula models '{lhs}' but the estimator outcome is '{outcome}'"
            ))),
            _ => Ok(()),
        }
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    /// 设计矩阵列名，截距在前
    pub fn column_names(&self) -> Vec<String> {
        std::iter::once(INTERCEPT.to_string())
            .chain(self.terms.iter().map(Term::name))
            .collect()
    }

    /// 含截距的设计列数
    pub fn width(&self) -> usize {
        self.terms.len() + 1
    }

    /// 公式读取的表列（去重，按出现顺序）
    pub fn variables(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for factor in self.terms.iter().flat_map(|t| t.factors.iter()) {
            if !out.contains(&factor.as_str()) {
                out.push(factor);
            }
        }
        out
    }

    pub fn uses(&self, column: &str) -> bool {
        self.variables().contains(&column)
    }

    /// 检查引用列存在且无缺失
    pub fn validate(&self, table: &ObservationTable) -> Result<()> {
        for var in self.variables() {
            let column = table.column(var).ok_or_else(|| {
                GFormulaError::ModelFit(format!("formula references unknown column '{var}'"))
            })?;
            let missing = count_missing(column);
            if missing > 0 {
                return Err(GFormulaError::ModelFit(format!(
                    "covariate '{var}' has {missing} missing values; prediction needs complete covariates"
                )));
            }
        }
        Ok(())
    }

    /// 为表的每一行构建 n × p 行主序设计矩阵
    pub fn design_matrix(&self, table: &ObservationTable) -> Result<Vec<f64>> {
        let term_columns = self.term_columns(table)?;
        let p = self.width();
        let n = table.n_rows();
        let mut x = vec![0.0; n * p];

        for row in 0..n {
            let out = &mut x[row * p..(row + 1) * p];
            out[0] = 1.0;
            for (j, (term, cols)) in self.terms.iter().zip(term_columns.iter()).enumerate() {
                out[j + 1] = term.evaluate(cols, row);
            }
        }

        Ok(x)
    }

    fn term_columns<'a>(&self, table: &'a ObservationTable) -> Result<Vec<Vec<&'a [f64]>>> {
        self.terms
            .iter()
            .map(|term| {
                term.factors
                    .iter()
                    .map(|f| {
                        table.column(f).ok_or_else(|| {
                            GFormulaError::ModelFit(format!(
                                "formula references unknown column '{f}'"
                            ))
                        })
                    })
                    .collect()
            })
            .collect()
    }
}

/// 只输出右侧，报告里左侧单独显示
impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.terms.is_empty() {
            return f.write_str("1");
        }
        let names: Vec<String> = self.terms.iter().map(Term::name).collect();
        f.write_str(&names.join(" + "))
    }
}

/// 把 `a*b*c` 展开为全部非空交互，或解析 `a:b` / `a`
fn expand_term(raw: &str, input: &str) -> Result<Vec<Term>> {
    let parse_factors = |s: &str| -> Result<Vec<String>> {
        s.split(':')
            .map(|f| {
                let f = f.trim();
                if is_identifier(f) {
                    Ok(f.to_string())
                } else {
                    Err(GFormulaError::ModelFit(format!(
                        "invalid term '{s}' in formula '{input}'"
                    )))
                }
            })
            .collect()
    };

    if !raw.contains('*') {
        return Ok(vec![Term {
            factors: parse_factors(raw)?,
        }]);
    }

    let parts: Vec<Vec<String>> = raw
        .split('*')
        .map(|p| parse_factors(p.trim()))
        .collect::<Result<_>>()?;

    let k = parts.len();
    if k > MAX_STAR_FACTORS {
        return Err(GFormulaError::ModelFit(format!(
            "'{raw}' expands {k} factors; at most {MAX_STAR_FACTORS} are allowed in formula '{input}'"
        )));
    }

    // 按子集掩码展开：先主效应，后交互项
    let mut masks: Vec<u32> = (1..(1u32 << k)).collect();
    masks.sort_by_key(|m| (m.count_ones(), *m));

    Ok(masks
        .into_iter()
        .map(|mask| Term {
            factors: (0..k)
                .filter(|i| mask & (1 << i) != 0)
                .flat_map(|i| parts[i].iter().cloned())
                .collect(),
        })
        .collect())
}

/// 列名规则，与谓词分词器一致
pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if is_identifier_start(c) => {}
        _ => return false,
    }
    chars.all(is_identifier_char)
}

pub(crate) fn is_identifier_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

pub(crate) fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> ObservationTable {
        ObservationTable::from_columns(vec![
            ("art", vec![1.0, 0.0, 1.0]),
            ("male", vec![1.0, 1.0, 0.0]),
            ("age0", vec![30.0, 40.0, 50.0]),
            ("dead", vec![0.0, f64::NAN, 1.0]),
        ])
        .unwrap()
    }

    #[test]
    fn test_parse_main_effects() {
        let f = Formula::parse("art + male + age0").unwrap();
        assert_eq!(f.width(), 4);
        assert_eq!(f.column_names(), vec!["Intercept", "art", "male", "age0"]);
    }

    #[test]
    fn test_parse_keeps_lhs_and_skips_intercept() {
        let f = Formula::parse("dead ~ 1 + art").unwrap();
        assert_eq!(f.column_names(), vec!["Intercept", "art"]);
        assert_eq!(f.outcome(), Some("dead"));
        assert_eq!(Formula::parse(" ~ art").unwrap().outcome(), None);
        assert_eq!(Formula::parse("art").unwrap().outcome(), None);
    }

    #[test]
    fn test_check_outcome() {
        let f = Formula::parse("cd4_wk45 ~ art + male").unwrap();
        assert!(f.check_outcome("cd4_wk45").is_ok());
        assert!(matches!(
            f.check_outcome("dead"),
            Err(GFormulaError::ModelFit(_))
        ));
        assert!(Formula::parse("art").unwrap().check_outcome("dead").is_ok());
        assert!(matches!(
            Formula::parse("log(y) ~ art"),
            Err(GFormulaError::ModelFit(_))
        ));
    }

    #[test]
    fn test_star_expansion_is_capped() {
        let eight: Vec<String> = (0..MAX_STAR_FACTORS).map(|i| format!("c{i}")).collect();
        let f = Formula::parse(&eight.join("*")).unwrap();
        assert_eq!(f.terms().len(), (1 << MAX_STAR_FACTORS) - 1);

        let many: Vec<String> = (0..32).map(|i| format!("c{i}")).collect();
        assert!(matches!(
            Formula::parse(&many.join("*")),
            Err(GFormulaError::ModelFit(_))
        ));
    }

    #[test]
    fn test_dotted_column_names() {
        let f = Formula::parse("cd4.wk45 + art").unwrap();
        assert_eq!(f.variables(), vec!["cd4.wk45", "art"]);
    }

    #[test]
    fn test_parse_interaction_and_star() {
        let f = Formula::parse("art*male + age0").unwrap();
        assert_eq!(
            f.column_names(),
            vec!["Intercept", "art", "male", "art:male", "age0"]
        );
    }

    #[test]
    fn test_parse_deduplicates() {
        let f = Formula::parse("art + art + art:male + art*male").unwrap();
        assert_eq!(f.column_names(), vec!["Intercept", "art", "art:male", "male"]);
    }

    #[test]
    fn test_parse_rejects_bad_terms() {
        for bad in ["art +", "+ art", "art + np.log(age0)", "art + 2x", "art:"] {
            assert!(
                matches!(Formula::parse(bad), Err(GFormulaError::ModelFit(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_variables() {
        let f = Formula::parse("art + art:male + age0").unwrap();
        assert_eq!(f.variables(), vec!["art", "male", "age0"]);
        assert!(f.uses("male"));
        assert!(!f.uses("dead"));
    }

    #[test]
    fn test_design_matrix() {
        let f = Formula::parse("art + art:age0").unwrap();
        let x = f.design_matrix(&sample_table()).unwrap();
        assert_eq!(x, vec![1.0, 1.0, 30.0, 1.0, 0.0, 0.0, 1.0, 1.0, 50.0]);
    }

    #[test]
    fn test_validate_unknown_column() {
        let f = Formula::parse("art + cd40").unwrap();
        assert!(matches!(
            f.validate(&sample_table()),
            Err(GFormulaError::ModelFit(_))
        ));
        assert!(f.design_matrix(&sample_table()).is_err());
    }

    #[test]
    fn test_validate_missing_covariate() {
        let f = Formula::parse("art + dead").unwrap();
        assert!(matches!(
            f.validate(&sample_table()),
            Err(GFormulaError::ModelFit(_))
        ));
    }

    #[test]
    fn test_display() {
        let f = Formula::parse("art*male").unwrap();
        assert_eq!(f.to_string(), "art + male + art:male");
    }
}
