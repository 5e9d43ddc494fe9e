//! Synthetic cohort
//!
//! A confounded point-exposure cohort shaped like an HIV treatment study:
//! sicker patients (low baseline CD4, detectable viral load) are more likely
//! to start ART and more likely to die, so the crude risk difference is
//! biased toward the null and adjustment matters.

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use crate::error::Result;
use crate::table::ObservationTable;
use crate::types::EPSILON;

/// Share of rows whose `dead` outcome is dropped
const DEAD_MISSING_RATE: f64 = 0.05;
/// Share of rows whose `cd4_wk45` outcome is dropped
const CD4_MISSING_RATE: f64 = 0.08;

/// Generate `n` rows with columns `art, male, age0, cd40, dvl0, dead, cd4_wk45`.
///
/// The same `(n, seed)` always yields the same table.
pub fn simulate_cohort(n: usize, seed: u64) -> Result<ObservationTable> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let mut art = Vec::with_capacity(n);
    let mut male = Vec::with_capacity(n);
    let mut age0 = Vec::with_capacity(n);
    let mut cd40 = Vec::with_capacity(n);
    let mut dvl0 = Vec::with_capacity(n);
    let mut dead = Vec::with_capacity(n);
    let mut cd4_wk45 = Vec::with_capacity(n);

    for _ in 0..n {
        let m = bernoulli(&mut rng, 0.8);
        let age = (38.0 + 9.0 * sample_normal(&mut rng)).round().clamp(18.0, 75.0);
        let cd4 = (330.0 + 170.0 * sample_normal(&mut rng)).round().max(10.0);
        let dvl = bernoulli(&mut rng, 0.3);

        // 治疗分配受基线病情影响
        let logit_a = -0.4 + 0.3 * m + 0.02 * (age - 38.0) - 0.004 * (cd4 - 330.0) + 0.6 * dvl;
        let a = bernoulli(&mut rng, sigmoid(logit_a));

        let logit_y = -1.9 - 0.9 * a + 0.04 * (age - 38.0) - 0.004 * (cd4 - 330.0) + 0.6 * dvl
            - 0.2 * m;
        let y = bernoulli(&mut rng, sigmoid(logit_y));

        let cd4_follow = (60.0 + 0.9 * cd4 + 250.0 * a - 2.0 * (age - 38.0) - 40.0 * dvl
            + 120.0 * sample_normal(&mut rng))
        .round()
        .max(0.0);

        art.push(a);
        male.push(m);
        age0.push(age);
        cd40.push(cd4);
        dvl0.push(dvl);
        dead.push(if rng.gen::<f64>() < DEAD_MISSING_RATE {
            f64::NAN
        } else {
            y
        });
        cd4_wk45.push(if rng.gen::<f64>() < CD4_MISSING_RATE {
            f64::NAN
        } else {
            cd4_follow
        });
    }

    ObservationTable::from_columns(vec![
        ("art", art),
        ("male", male),
        ("age0", age0),
        ("cd40", cd40),
        ("dvl0", dvl0),
        ("dead", dead),
        ("cd4_wk45", cd4_wk45),
    ])
}

fn bernoulli<R: Rng>(rng: &mut R, p: f64) -> f64 {
    if rng.gen::<f64>() < p {
        1.0
    } else {
        0.0
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Box-Muller 标准正态采样
fn sample_normal<R: Rng>(rng: &mut R) -> f64 {
    let u1: f64 = rng.gen::<f64>().max(EPSILON);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}
