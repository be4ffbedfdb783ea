//! Scrape record parser
//!
//! Turns one row of trimmed text cells into a typed record. Stateless, no I/O.
//!
//! Numeric cells follow the same rules everywhere:
//! - blank cells and the `N/A` placeholder resolve to zero
//! - leading `+` signs and `,` grouping separators are stripped
//! - active/critical case counts may carry a negative "unknown" sentinel,
//!   which resolves to zero

mod cells;
mod country;
mod state;

pub use cells::{parse_clamped, parse_f64, parse_u64, PLACEHOLDER};
pub use country::{CountryRecord, COUNTRY_CELLS};
pub use state::{StateRecord, STATE_CELLS};

use crate::collection::Collection;
use crate::{Error, Result};

/// A parsed row in one of the two supported shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Country(CountryRecord),
    State(StateRecord),
}

impl Record {
    pub fn name(&self) -> &str {
        match self {
            Record::Country(c) => &c.name,
            Record::State(s) => &s.name,
        }
    }

    pub(crate) fn set_name(&mut self, name: String) {
        match self {
            Record::Country(c) => c.name = name,
            Record::State(s) => s.name = name,
        }
    }

    /// Collection this record shape is stored in.
    pub fn collection(&self) -> Collection {
        match self {
            Record::Country(_) => Collection::Countries,
            Record::State(_) => Collection::States,
        }
    }

    pub fn total_cases(&self) -> u64 {
        match self {
            Record::Country(c) => c.total_cases,
            Record::State(s) => s.total_cases,
        }
    }

    pub fn total_deaths(&self) -> u64 {
        match self {
            Record::Country(c) => c.total_deaths,
            Record::State(s) => s.total_deaths,
        }
    }

    pub fn total_tests(&self) -> u64 {
        match self {
            Record::Country(c) => c.total_tests,
            Record::State(s) => s.total_tests,
        }
    }
}

/// Parse a name-first row in the shape the collection stores.
pub fn parse_row<S: AsRef<str>>(collection: Collection, cells: &[S]) -> Result<Record> {
    match collection {
        Collection::Countries => CountryRecord::from_cells(cells).map(Record::Country),
        Collection::States => StateRecord::from_cells(cells).map(Record::State),
    }
}

pub(crate) fn require_name(cell: &str, shape: &str) -> Result<String> {
    let name = cell.trim();
    if name.is_empty() {
        return Err(Error::Schema(format!("{} row has an empty name", shape)));
    }
    Ok(name.to_string())
}
