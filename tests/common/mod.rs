#![allow(dead_code)]

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use gformula::{simulate_cohort, GFormulaConfig, ObservationTable, TimeFixedGFormula};

pub const DEAD_FORMULA: &str = "art + male + age0 + cd40 + dvl0 + age0:male";
pub const CD4_FORMULA: &str = "art + male + age0 + cd40 + dvl0";

/// Report sink shared with the test body
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn cohort() -> ObservationTable {
    simulate_cohort(1000, 2024).unwrap()
}

pub fn estimator(
    table: ObservationTable,
    outcome: &str,
    config: Option<GFormulaConfig>,
) -> TimeFixedGFormula {
    TimeFixedGFormula::new(table, "art", outcome, config)
        .unwrap()
        .with_report_sink(Box::new(io::sink()))
}
