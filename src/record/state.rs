//! US state rows.

use super::cells::{parse_clamped, parse_f64, parse_u64};
use super::require_name;
use crate::{Error, Result};

/// Cells in a state row: the name followed by 9 fields.
pub const STATE_CELLS: usize = 10;

/// One state's counters as scraped.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StateRecord {
    pub name: String,
    pub total_cases: u64,
    pub new_cases: u64,
    pub total_deaths: u64,
    pub new_deaths: u64,
    pub active_cases: u64,
    pub cases_per_1m: f64,
    pub deaths_per_1m: f64,
    pub total_tests: u64,
    pub tests_per_1m: f64,
}

impl StateRecord {
    /// Parse a name-first state row.
    pub fn from_cells<S: AsRef<str>>(cells: &[S]) -> Result<Self> {
        if cells.len() < STATE_CELLS {
            return Err(Error::Schema(format!(
                "{} cells required to parse a state, got {}",
                STATE_CELLS,
                cells.len()
            )));
        }
        let cell = |idx: usize| cells[idx].as_ref();

        Ok(Self {
            name: require_name(cell(0), "state")?,
            total_cases: parse_u64(cell(1), "total cases")?,
            new_cases: parse_u64(cell(2), "new cases")?,
            total_deaths: parse_u64(cell(3), "total deaths")?,
            new_deaths: parse_u64(cell(4), "new deaths")?,
            active_cases: parse_clamped(cell(5), "active cases")?,
            cases_per_1m: parse_f64(cell(6), "cases per 1M")?,
            deaths_per_1m: parse_f64(cell(7), "deaths per 1M")?,
            total_tests: parse_u64(cell(8), "total tests")?,
            tests_per_1m: parse_f64(cell(9), "tests per 1M")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usa_total_row() {
        let row: Vec<&str> =
            "USA Total;5,565,461;+35,672;173,096;+490;2,471,295;16,814;523;70,942,037;214,325;;;"
                .split(';')
                .collect();
        let res = StateRecord::from_cells(&row).unwrap();
        assert_eq!(res.name, "USA Total");
        assert_eq!(res.total_cases, 5_565_461);
        assert_eq!(res.new_cases, 35_672);
        assert_eq!(res.total_deaths, 173_096);
        assert_eq!(res.active_cases, 2_471_295);
        assert_eq!(res.total_tests, 70_942_037);
        assert_eq!(res.tests_per_1m, 214_325.0);
    }

    #[test]
    fn test_negative_active_cases() {
        let row = ["Guam", "1,000", "", "5", "", "-1", "", "", "N/A", ""];
        let res = StateRecord::from_cells(&row).unwrap();
        assert_eq!(res.active_cases, 0);
        assert_eq!(res.total_tests, 0);
    }
}
