//! Import telemetry instruments and recording helpers.

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

struct ImportInstruments {
    documents: Counter<u64>,
    batches_flushed: Counter<u64>,
    batch_flush_duration_seconds: Histogram<f64>,
    jobs: Counter<u64>,
}

fn instruments() -> &'static ImportInstruments {
    static INSTRUMENTS: OnceLock<ImportInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("coviddy.import");
        ImportInstruments {
            documents: meter
                .u64_counter("coviddy.import.documents")
                .with_description("Snapshot documents by outcome")
                .init(),
            batches_flushed: meter
                .u64_counter("coviddy.import.batches.flushed")
                .with_description("Import batches committed to the store")
                .init(),
            batch_flush_duration_seconds: meter
                .f64_histogram("coviddy.import.batch.duration")
                .with_description("Import batch commit duration")
                .with_unit("s")
                .init(),
            jobs: meter
                .u64_counter("coviddy.import.jobs")
                .with_description("Import jobs by final state")
                .init(),
        }
    })
}

pub fn record_documents(collection: &'static str, outcome: &'static str, count: u64) {
    instruments().documents.add(
        count,
        &[
            KeyValue::new("collection", collection),
            KeyValue::new("outcome", outcome),
        ],
    );
}

pub fn record_batch_flush(collection: &'static str, duration_seconds: f64) {
    let i = instruments();
    let attrs = [KeyValue::new("collection", collection)];
    i.batches_flushed.add(1, &attrs);
    i.batch_flush_duration_seconds.record(duration_seconds, &attrs);
}

pub fn record_job(state: &'static str) {
    instruments().jobs.add(1, &[KeyValue::new("state", state)]);
}
