//! Scrape telemetry instruments and recording helpers.

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

struct ScrapeInstruments {
    rows: Counter<u64>,
    cycle_duration_seconds: Histogram<f64>,
    fetch_failures: Counter<u64>,
}

fn instruments() -> &'static ScrapeInstruments {
    static INSTRUMENTS: OnceLock<ScrapeInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("coviddy.scrape");
        ScrapeInstruments {
            rows: meter
                .u64_counter("coviddy.scrape.rows")
                .with_description("Scraped rows by outcome")
                .init(),
            cycle_duration_seconds: meter
                .f64_histogram("coviddy.scrape.cycle.duration")
                .with_description("Duration of one fetch-parse-store cycle")
                .with_unit("s")
                .init(),
            fetch_failures: meter
                .u64_counter("coviddy.scrape.fetch.failures")
                .with_description("Page fetches that failed after retries")
                .init(),
        }
    })
}

pub fn record_rows(collection: &'static str, outcome: &'static str, count: u64) {
    instruments().rows.add(
        count,
        &[
            KeyValue::new("collection", collection),
            KeyValue::new("outcome", outcome),
        ],
    );
}

pub fn record_cycle(duration_seconds: f64) {
    instruments().cycle_duration_seconds.record(duration_seconds, &[]);
}

pub fn record_fetch_failure(collection: &'static str) {
    instruments()
        .fetch_failures
        .add(1, &[KeyValue::new("collection", collection)]);
}
