#![deny(clippy::all)]
//! Parametric g-formula for point exposures.
//!
//! [`TimeFixedGFormula`] fits one outcome regression on the observed data,
//! then estimates the marginal outcome under counterfactual treatment rules:
//! treat everyone, treat no one, a row predicate, or stochastic and
//! conditional-stochastic assignment averaged over repeated draws.
//!
//! ```no_run
//! use gformula::{simulate_cohort, RowPredicate, TimeFixedGFormula};
//!
//! # fn main() -> gformula::Result<()> {
//! let table = simulate_cohort(547, 2024)?;
//! let mut g = TimeFixedGFormula::new(table, "art", "dead", None)?;
//! g.fit_outcome_model("art + male + age0 + cd40 + dvl0", true)?;
//!
//! let rd = g.fit_all()? - g.fit_none()?;
//! let stochastic = g.fit_stochastic(0.8, Some(100), Some(1000191))?;
//! let by_sex = g.fit_conditional_stochastic(
//!     &[0.75, 0.90],
//!     &[RowPredicate::eq("male", 1.0), RowPredicate::eq("male", 0.0)],
//!     None,
//!     Some(518012),
//! )?;
//! # let _ = (rd, stochastic, by_sex);
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod causal;
pub mod error;
pub mod formula;
pub mod glm;
pub mod logging;
pub mod matrix;
pub mod predicate;
pub mod report;
pub mod sanitize;
pub mod simulate;
pub mod stats;
pub mod table;
pub mod types;

// 重新导出主要类型和函数
pub use bootstrap::{bootstrap, BootstrapConfig, BootstrapInterval};
pub use causal::{TimeFixedGFormula, TreatmentRule};
pub use error::{GFormulaError, Result};
pub use formula::Formula;
pub use glm::{FittedModel, GlmModel, IrlsRegression, OutcomeRegression, RegressionRequest};
pub use predicate::{CmpOp, RowPredicate};
pub use simulate::simulate_cohort;
pub use table::ObservationTable;
pub use types::*;
