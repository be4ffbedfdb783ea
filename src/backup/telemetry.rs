//! Backup telemetry instruments and recording helpers.

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

struct BackupInstruments {
    uploads: Counter<u64>,
    upload_duration_seconds: Histogram<f64>,
    upload_bytes: Histogram<u64>,
    dropped: Counter<u64>,
}

fn instruments() -> &'static BackupInstruments {
    static INSTRUMENTS: OnceLock<BackupInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("coviddy.backup");
        BackupInstruments {
            uploads: meter
                .u64_counter("coviddy.backup.uploads")
                .with_description("Backup uploads by outcome")
                .init(),
            upload_duration_seconds: meter
                .f64_histogram("coviddy.backup.upload.duration")
                .with_description("Backup upload duration including retries")
                .with_unit("s")
                .init(),
            upload_bytes: meter
                .u64_histogram("coviddy.backup.upload.bytes")
                .with_description("Compressed backup object size")
                .with_unit("By")
                .init(),
            dropped: meter
                .u64_counter("coviddy.backup.dropped")
                .with_description("Documents dropped before reaching the backup queue")
                .init(),
        }
    })
}

pub fn record_upload(outcome: &'static str, duration_seconds: f64, bytes: u64) {
    let i = instruments();
    let attrs = [KeyValue::new("outcome", outcome)];
    i.uploads.add(1, &attrs);
    i.upload_duration_seconds.record(duration_seconds, &attrs);
    if outcome == "success" {
        i.upload_bytes.record(bytes, &[]);
    }
}

pub fn record_dropped(reason: &'static str) {
    instruments()
        .dropped
        .add(1, &[KeyValue::new("reason", reason)]);
}
