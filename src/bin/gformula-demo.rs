use std::process::ExitCode;

use gformula::bootstrap::{bootstrap, BootstrapConfig};
use gformula::logging::{init_tracing, LogSettings};
use gformula::{
    simulate_cohort, GFormulaConfig, ObservationTable, OutcomeType, Result, RowPredicate,
    TimeFixedGFormula,
};

const DEAD_FORMULA: &str = "art + male + age0 + cd40 + dvl0 + age0:male";
const CD4_FORMULA: &str = "art + male + age0 + cd40 + dvl0";

#[derive(Debug, Clone)]
struct DemoConfig {
    sample_size: usize,
    seed: u64,
    repetitions: u32,
    bootstrap_replicates: u32,
    log: LogSettings,
}

impl DemoConfig {
    fn from_env() -> Self {
        let sample_size = std::env::var("GFORMULA_SAMPLE_SIZE")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or(547);

        let seed = std::env::var("GFORMULA_SEED")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(20_190_122);

        let repetitions = std::env::var("GFORMULA_REPETITIONS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(100);

        let bootstrap_replicates = std::env::var("GFORMULA_BOOTSTRAP")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(200);

        Self {
            sample_size,
            seed,
            repetitions,
            bootstrap_replicates,
            log: LogSettings::from_env(),
        }
    }
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let config = DemoConfig::from_env();
    let _log_guard = init_tracing(&config.log);

    tracing::info!(?config, "gformula demo starting");

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "demo failed");
            ExitCode::FAILURE
        }
    }
}

fn run(config: &DemoConfig) -> Result<()> {
    let table = simulate_cohort(config.sample_size, config.seed)?;
    binary_outcome(&table, config)?;
    continuous_outcome(&table)?;
    Ok(())
}

fn binary_outcome(table: &ObservationTable, config: &DemoConfig) -> Result<()> {
    println!("== Binary outcome: dead ==");
    let mut g = TimeFixedGFormula::new(table.clone(), "art", "dead", None)?;
    g.fit_outcome_model(DEAD_FORMULA, true)?;

    let r_all = g.fit_all()?;
    let r_none = g.fit_none()?;
    println!("Risk (all treated):   {r_all:.4}");
    println!("Risk (none treated):  {r_none:.4}");
    println!("Risk difference:      {:.4}", r_all - r_none);

    let r_stochastic = g.fit_stochastic(0.8, Some(config.repetitions), Some(1_000_191))?;
    println!("RD, 80% treated:      {:.4}", r_stochastic - r_none);

    let by_sex = [RowPredicate::eq("male", 1.0), RowPredicate::eq("male", 0.0)];
    let r_conditional = g.fit_conditional_stochastic(
        &[0.75, 0.90],
        &by_sex,
        Some(config.repetitions),
        Some(518_012),
    )?;
    println!("RD, 75% men / 90% women treated: {:.4}", r_conditional - r_none);

    let r_custom = g.fit_custom("cd40 < 350 || dvl0 == 1".parse()?)?;
    println!("RD, treat if CD4 < 350 or detectable VL: {:.4}", r_custom - r_none);

    g.run_diagnostics(true)?;

    let boot = BootstrapConfig {
        replicates: config.bootstrap_replicates,
        seed: Some(config.seed),
        ..Default::default()
    };
    let interval = bootstrap(table, &boot, |sample| {
        let mut g = TimeFixedGFormula::new(sample, "art", "dead", None)?;
        g.fit_outcome_model(DEAD_FORMULA, false)?;
        Ok(g.fit_all()? - g.fit_none()?)
    })?;
    println!(
        "Bootstrap RD 95% CI: ({:.4}, {:.4}), SE {:.4}, {} failed replicates",
        interval.ci_lower, interval.ci_upper, interval.std_error, interval.failed_replicates
    );
    Ok(())
}

fn continuous_outcome(table: &ObservationTable) -> Result<()> {
    for outcome_type in [OutcomeType::Normal, OutcomeType::Poisson] {
        println!("== Continuous outcome: cd4_wk45 ({outcome_type}) ==");
        let config = GFormulaConfig {
            outcome_type: Some(outcome_type),
            ..Default::default()
        };
        let mut g = TimeFixedGFormula::new(table.clone(), "art", "cd4_wk45", Some(config))?;
        g.fit_outcome_model(CD4_FORMULA, true)?;
        let difference = g.fit_all()? - g.fit_none()?;
        println!("Mean difference (all - none): {difference:.2}");
    }
    Ok(())
}
