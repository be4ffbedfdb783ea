//! Store telemetry instruments and recording helpers.

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

struct StoreInstruments {
    documents_written: Counter<u64>,
    transaction_duration_seconds: Histogram<f64>,
    corrupt_documents: Counter<u64>,
}

fn instruments() -> &'static StoreInstruments {
    static INSTRUMENTS: OnceLock<StoreInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("coviddy.store");
        StoreInstruments {
            documents_written: meter
                .u64_counter("coviddy.store.documents.written")
                .with_description("Documents committed to entity buckets")
                .init(),
            transaction_duration_seconds: meter
                .f64_histogram("coviddy.store.transaction.duration")
                .with_description("Write transaction duration including commit")
                .with_unit("s")
                .init(),
            corrupt_documents: meter
                .u64_counter("coviddy.store.documents.corrupt")
                .with_description("Stored bodies skipped because they failed to decode")
                .init(),
        }
    })
}

pub fn record_write(
    operation: &'static str,
    collection: &'static str,
    documents: u64,
    duration_seconds: f64,
) {
    let i = instruments();
    let attrs = [
        KeyValue::new("operation", operation),
        KeyValue::new("collection", collection),
    ];
    i.documents_written.add(documents, &attrs);
    i.transaction_duration_seconds.record(duration_seconds, &attrs);
}

pub fn record_corrupt_document(collection: &'static str) {
    instruments()
        .corrupt_documents
        .add(1, &[KeyValue::new("collection", collection)]);
}
