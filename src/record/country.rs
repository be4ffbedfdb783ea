//! Country-level rows.

use super::cells::{parse_clamped, parse_f64, parse_u64};
use super::require_name;
use crate::{Error, Result};

/// Cells in a country row: the name followed by 14 fields.
pub const COUNTRY_CELLS: usize = 15;

/// One country's counters as scraped.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CountryRecord {
    pub name: String,
    pub total_cases: u64,
    pub new_cases: u64,
    pub total_deaths: u64,
    pub new_deaths: u64,
    pub total_recovered: u64,
    pub new_recovered: u64,
    pub active_cases: u64,
    pub critical_cases: u64,
    pub cases_per_1m: f64,
    pub deaths_per_1m: f64,
    pub total_tests: u64,
    pub tests_per_1m: f64,
    pub population: u64,
    pub region: String,
}

impl CountryRecord {
    /// Parse a name-first country row.
    pub fn from_cells<S: AsRef<str>>(cells: &[S]) -> Result<Self> {
        if cells.len() < COUNTRY_CELLS {
            return Err(Error::Schema(format!(
                "{} cells required to parse a country, got {}",
                COUNTRY_CELLS,
                cells.len()
            )));
        }
        let cell = |idx: usize| cells[idx].as_ref();

        Ok(Self {
            name: require_name(cell(0), "country")?,
            total_cases: parse_u64(cell(1), "total cases")?,
            new_cases: parse_u64(cell(2), "new cases")?,
            total_deaths: parse_u64(cell(3), "total deaths")?,
            new_deaths: parse_u64(cell(4), "new deaths")?,
            total_recovered: parse_u64(cell(5), "total recovered")?,
            new_recovered: parse_u64(cell(6), "new recovered")?,
            active_cases: parse_clamped(cell(7), "active cases")?,
            critical_cases: parse_clamped(cell(8), "critical cases")?,
            cases_per_1m: parse_f64(cell(9), "cases per 1M")?,
            deaths_per_1m: parse_f64(cell(10), "deaths per 1M")?,
            total_tests: parse_u64(cell(11), "total tests")?,
            tests_per_1m: parse_f64(cell(12), "tests per 1M")?,
            population: parse_u64(cell(13), "population")?,
            region: cell(14).trim().to_string(),
        })
    }
}
