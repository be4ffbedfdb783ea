//! Wire form of a stored document.
//!
//! Every field is optional on the way in so that current and legacy bodies
//! share one decoder; the canonical encoder fills the fields of its shape
//! and skips the rest.

use super::{timestamp_key, CollectionEntry, Document};
use crate::collection::Collection;
use crate::record::{CountryRecord, Record, StateRecord};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 0001-01-01T00:00:00Z in seconds since the epoch.
const UNSET_TIME_SECS: i64 = -62_135_596_800;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Kind {
    Country,
    State,
}

impl Kind {
    fn collection(self) -> Collection {
        match self {
            Kind::Country => Collection::Countries,
            Kind::State => Collection::States,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct StoredDocument {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<Kind>,
    #[serde(default)]
    pub total_cases: u64,
    #[serde(default)]
    pub total_deaths: u64,
    #[serde(default)]
    pub total_tests: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_cases: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_deaths: Option<u64>,
    // Old country bodies spelled this key with a double r.
    #[serde(
        default,
        alias = "total_recoverred",
        skip_serializing_if = "Option::is_none"
    )]
    pub total_recovered: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_recovered: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_cases: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical_cases: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cases_per_1m: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deaths_per_1m: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests_per_1m: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub population: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl From<&Document> for StoredDocument {
    fn from(doc: &Document) -> Self {
        let when = Some(timestamp_key(doc.when()));
        match doc.record() {
            Record::Country(c) => Self {
                name: c.name.clone(),
                when,
                kind: Some(Kind::Country),
                total_cases: c.total_cases,
                total_deaths: c.total_deaths,
                total_tests: c.total_tests,
                new_cases: Some(c.new_cases),
                new_deaths: Some(c.new_deaths),
                total_recovered: Some(c.total_recovered),
                new_recovered: Some(c.new_recovered),
                active_cases: Some(c.active_cases),
                critical_cases: Some(c.critical_cases),
                cases_per_1m: Some(c.cases_per_1m),
                deaths_per_1m: Some(c.deaths_per_1m),
                tests_per_1m: Some(c.tests_per_1m),
                population: Some(c.population),
                region: Some(c.region.clone()),
            },
            Record::State(s) => Self {
                name: s.name.clone(),
                when,
                kind: Some(Kind::State),
                total_cases: s.total_cases,
                total_deaths: s.total_deaths,
                total_tests: s.total_tests,
                new_cases: Some(s.new_cases),
                new_deaths: Some(s.new_deaths),
                active_cases: Some(s.active_cases),
                cases_per_1m: Some(s.cases_per_1m),
                deaths_per_1m: Some(s.deaths_per_1m),
                tests_per_1m: Some(s.tests_per_1m),
                ..Self::default()
            },
        }
    }
}

impl StoredDocument {
    /// Decode a body previously written to a collection.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn captured_at(&self) -> Result<DateTime<Utc>> {
        let raw = match self.when.as_deref().map(str::trim) {
            None | Some("") => return Err(Error::MissingTimestamp),
            Some(raw) => raw,
        };
        let when = DateTime::parse_from_rfc3339(raw)
            .map(|when| when.with_timezone(&Utc))
            .map_err(|_| Error::Parse {
                field: "when",
                value: raw.to_string(),
            })?;
        // Older writers encoded an unset time as 0001-01-01T00:00:00Z.
        if when.timestamp() == UNSET_TIME_SECS {
            return Err(Error::MissingTimestamp);
        }
        Ok(when)
    }

    /// Build the record in the shape `collection` stores.
    ///
    /// Bodies without a `kind` predate the current schema. For a few weeks
    /// those bodies carried totals in the per-1M fields with the totals
    /// zeroed or truncated, so the larger of the two candidates is taken.
    pub fn into_record(mut self, collection: Collection) -> Result<Record> {
        match self.kind {
            Some(kind) if kind.collection() != collection => {
                return Err(Error::Schema(format!(
                    "{:?} document cannot be stored in {}",
                    kind, collection
                )));
            }
            Some(_) => {}
            None => self.repair_legacy_totals(),
        }

        let record = match collection {
            Collection::Countries => Record::Country(CountryRecord {
                name: self.name,
                total_cases: self.total_cases,
                new_cases: self.new_cases.unwrap_or_default(),
                total_deaths: self.total_deaths,
                new_deaths: self.new_deaths.unwrap_or_default(),
                total_recovered: self.total_recovered.unwrap_or_default(),
                new_recovered: self.new_recovered.unwrap_or_default(),
                active_cases: self.active_cases.unwrap_or_default(),
                critical_cases: self.critical_cases.unwrap_or_default(),
                cases_per_1m: self.cases_per_1m.unwrap_or_default(),
                deaths_per_1m: self.deaths_per_1m.unwrap_or_default(),
                total_tests: self.total_tests,
                tests_per_1m: self.tests_per_1m.unwrap_or_default(),
                population: self.population.unwrap_or_default(),
                region: self.region.unwrap_or_default(),
            }),
            Collection::States => Record::State(StateRecord {
                name: self.name,
                total_cases: self.total_cases,
                new_cases: self.new_cases.unwrap_or_default(),
                total_deaths: self.total_deaths,
                new_deaths: self.new_deaths.unwrap_or_default(),
                active_cases: self.active_cases.unwrap_or_default(),
                cases_per_1m: self.cases_per_1m.unwrap_or_default(),
                deaths_per_1m: self.deaths_per_1m.unwrap_or_default(),
                total_tests: self.total_tests,
                tests_per_1m: self.tests_per_1m.unwrap_or_default(),
            }),
        };
        Ok(record)
    }

    fn repair_legacy_totals(&mut self) {
        larger_wins(&mut self.total_cases, self.cases_per_1m);
        larger_wins(&mut self.total_deaths, self.deaths_per_1m);
        larger_wins(&mut self.total_tests, self.tests_per_1m);
    }
}

fn larger_wins(total: &mut u64, candidate: Option<f64>) {
    if let Some(candidate) = candidate {
        if candidate.is_finite() && candidate > *total as f64 {
            *total = candidate as u64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_tests_moved_into_per_1m() {
        let body = br#"{"name":"Ukraine","when":"2020-05-01T10:00:00Z","total_cases":10,"total_deaths":1,"total_tests":0,"cases_per_1m":3,"deaths_per_1m":0,"tests_per_1m":666147}"#;
        let stored = StoredDocument::decode(body).unwrap();
        let record = stored.into_record(Collection::Countries).unwrap();
        assert_eq!(record.total_tests(), 666_147);
        assert_eq!(record.total_cases(), 10);
        assert_eq!(record.total_deaths(), 1);
    }

    #[test]
    fn current_schema_is_not_repaired() {
        let body = br#"{"name":"Vatican City","when":"2020-05-01T10:00:00Z","kind":"country","total_cases":12,"total_deaths":0,"total_tests":0,"cases_per_1m":14981.0}"#;
        let record = StoredDocument::decode(body)
            .unwrap()
            .into_record(Collection::Countries)
            .unwrap();
        assert_eq!(record.total_cases(), 12);
    }

    #[test]
    fn kind_must_match_collection() {
        let body = br#"{"name":"Texas","when":"2020-05-01T10:00:00Z","kind":"state"}"#;
        let err = StoredDocument::decode(body)
            .unwrap()
            .into_record(Collection::Countries)
            .unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn misspelled_recovered_key_is_accepted() {
        let body = br#"{"name":"Italy","when":"2020-05-01T10:00:00Z","total_recoverred":75945}"#;
        let record = StoredDocument::decode(body)
            .unwrap()
            .into_record(Collection::Countries)
            .unwrap();
        match record {
            Record::Country(c) => assert_eq!(c.total_recovered, 75_945),
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn offsets_normalise_to_utc() {
        let stored = StoredDocument {
            when: Some("2020-05-01T12:00:00+02:00".to_string()),
            ..StoredDocument::default()
        };
        assert_eq!(
            timestamp_key(stored.captured_at().unwrap()),
            "2020-05-01T10:00:00Z"
        );
    }

    #[test]
    fn blank_when_is_missing() {
        let stored = StoredDocument {
            when: Some("  ".to_string()),
            ..StoredDocument::default()
        };
        assert!(matches!(stored.captured_at(), Err(Error::MissingTimestamp)));
    }

    #[test]
    fn zero_time_is_missing() {
        let stored = StoredDocument {
            when: Some("0001-01-01T00:00:00Z".to_string()),
            ..StoredDocument::default()
        };
        assert!(matches!(stored.captured_at(), Err(Error::MissingTimestamp)));
    }
}
