//! Document model tests
//!
//! Decoding of stored bodies in the current and legacy schema, key
//! derivation and timestamp validation.

use chrono::{TimeZone, Utc};
use coviddy::collection::Collection;
use coviddy::document::{storage_key, timestamp_key, CollectionEntry, Document};
use coviddy::record::{CountryRecord, Record, StateRecord};
use coviddy::Error;

fn state_doc(name: &str) -> Document {
    let record = Record::State(StateRecord {
        name: name.to_string(),
        total_cases: 415_767,
        total_deaths: 32_413,
        total_tests: 6_086_424,
        cases_per_1m: 21_373.0,
        ..StateRecord::default()
    });
    Document::from_record(record, Utc.with_ymd_and_hms(2020, 8, 14, 9, 0, 0).unwrap()).unwrap()
}

#[test]
fn test_current_schema_round_trip() {
    let doc = state_doc("New York");
    let bytes = doc.to_bytes().unwrap();
    let parsed = Document::parse_stored(Collection::States, &bytes).unwrap();
    assert_eq!(parsed, doc);
    assert_eq!(parsed.to_bytes().unwrap(), bytes);
}

#[test]
fn test_kind_must_match_collection() {
    let bytes = state_doc("Georgia").to_bytes().unwrap();
    let err = Document::parse_stored(Collection::Countries, &bytes).unwrap_err();
    assert!(matches!(err, Error::Schema(_)));
}

#[test]
fn test_legacy_body_takes_larger_total() {
    // Legacy bodies have no kind; totals were zeroed or truncated while the
    // per-1M fields held the real totals.
    let body = br#"{
        "name": "Italy",
        "when": "2020-04-02T10:00:00Z",
        "total_cases": 0,
        "cases_per_1m": 110574,
        "total_deaths": 13155,
        "deaths_per_1m": 218,
        "total_tests": 5000,
        "tests_per_1m": 541423,
        "total_recoverred": 16847,
        "region": "Europe"
    }"#;
    let doc = Document::parse_stored(Collection::Countries, body).unwrap();
    let Record::Country(italy) = doc.record() else {
        panic!("expected a country record");
    };
    assert_eq!(italy.total_cases, 110_574);
    assert_eq!(italy.total_deaths, 13_155);
    assert_eq!(italy.total_tests, 541_423);
    assert_eq!(italy.total_recovered, 16_847);
    assert_eq!(italy.region, "Europe");
}

#[test]
fn test_current_body_is_not_repaired() {
    let record = Record::Country(CountryRecord {
        name: "Iceland".to_string(),
        total_cases: 1_800,
        cases_per_1m: 5_275.0,
        ..CountryRecord::default()
    });
    let doc =
        Document::from_record(record, Utc.with_ymd_and_hms(2020, 5, 1, 0, 0, 0).unwrap()).unwrap();
    let parsed = Document::parse_stored(Collection::Countries, &doc.to_bytes().unwrap()).unwrap();
    assert_eq!(parsed.record().total_cases(), 1_800);
}

#[test]
fn test_missing_timestamp() {
    for body in [
        &br#"{"name": "Texas", "total_cases": 1}"#[..],
        &br#"{"name": "Texas", "when": "  "}"#[..],
        // Unset time as older writers encoded it
        &br#"{"name": "Texas", "when": "0001-01-01T00:00:00Z", "total_cases": 7}"#[..],
    ] {
        let err = Document::parse_stored(Collection::States, body).unwrap_err();
        assert!(matches!(err, Error::MissingTimestamp), "unexpected error: {err}");
    }
}

#[test]
fn test_timestamp_before_first_cases() {
    let body = br#"{"name": "Texas", "when": "2019-12-30T23:59:59Z"}"#;
    let err = Document::parse_stored(Collection::States, body).unwrap_err();
    assert!(matches!(err, Error::InvalidTimestamp(_)));
}

#[test]
fn test_offsets_normalize_to_utc() {
    let body = br#"{"name": "Texas", "kind": "state", "when": "2020-06-05T09:30:00-05:00"}"#;
    let doc = Document::parse_stored(Collection::States, body).unwrap();
    assert_eq!(doc.timestamp_key(), "2020-06-05T14:30:00Z");
}

#[test]
fn test_garbage_bodies_are_client_errors() {
    let err = Document::parse_stored(Collection::States, b"not json").unwrap_err();
    assert!(err.is_client_error());

    let body = br#"{"name": "", "when": "2020-06-05T09:30:00Z"}"#;
    let err = Document::parse_stored(Collection::States, body).unwrap_err();
    assert!(matches!(err, Error::EmptyName));
}

#[test]
fn test_same_name_in_both_collections_keeps_shape() {
    let when = Utc.with_ymd_and_hms(2020, 6, 5, 0, 0, 0).unwrap();
    let country = Document::from_record(
        Record::Country(CountryRecord {
            name: "Georgia".to_string(),
            ..CountryRecord::default()
        }),
        when,
    )
    .unwrap();
    let state = state_doc("Georgia");

    assert_eq!(country.storage_key().unwrap(), state.storage_key().unwrap());
    assert_eq!(country.collection(), Collection::Countries);
    assert_eq!(state.collection(), Collection::States);
}

#[test]
fn test_keys() {
    assert_eq!(storage_key("Bosnia and Herzegovina").unwrap(), "bosnia_and_herzegovina");
    assert_eq!(storage_key("St. Barth").unwrap(), "st_barth");
    assert_eq!(storage_key("Diamond Princess ").unwrap(), "diamond_princess");
    assert_eq!(
        timestamp_key(Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap()),
        "2020-01-02T03:04:05Z"
    );

    let earlier = timestamp_key(Utc.with_ymd_and_hms(2020, 9, 30, 23, 0, 0).unwrap());
    let later = timestamp_key(Utc.with_ymd_and_hms(2020, 10, 1, 1, 0, 0).unwrap());
    assert!(earlier < later);
}
