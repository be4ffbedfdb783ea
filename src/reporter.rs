//! Process-wide error reporting sink
//!
//! Components that must not fail on a single bad row or upload hand the
//! error to an [`ErrorReporter`] and carry on. One task drains the channel.

use crate::Error;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use opentelemetry::KeyValue;
use std::sync::OnceLock;
use tokio::sync::mpsc;
use tracing::error;

/// Default capacity of the reporting channel.
pub const DEFAULT_REPORT_CAPACITY: usize = 256;

/// An error together with the component that surfaced it.
#[derive(Debug)]
pub struct ReportedError {
    pub context: &'static str,
    pub error: Error,
}

/// Cheap, cloneable producer side of the reporting channel.
#[derive(Debug, Clone)]
pub struct ErrorReporter {
    tx: mpsc::Sender<ReportedError>,
}

/// Create the reporting channel.
pub fn error_channel(capacity: usize) -> (ErrorReporter, mpsc::Receiver<ReportedError>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ErrorReporter { tx }, rx)
}

impl ErrorReporter {
    /// Hand off an error without waiting.
    ///
    /// When the channel is full or the drain task is gone the error is
    /// logged here instead.
    pub fn report(&self, context: &'static str, error: Error) {
        if let Err(e) = self.tx.try_send(ReportedError { context, error }) {
            let reported = match e {
                mpsc::error::TrySendError::Full(r) | mpsc::error::TrySendError::Closed(r) => r,
            };
            log_reported(&reported);
        }
    }

    /// Reporter whose errors are only logged, for tools without a drain task.
    pub fn log_only() -> Self {
        let (reporter, _rx) = error_channel(1);
        reporter
    }
}

/// Drain the channel until every reporter is dropped. Returns the count drained.
pub async fn run_error_reporter(mut rx: mpsc::Receiver<ReportedError>) -> u64 {
    let mut drained = 0;
    while let Some(reported) = rx.recv().await {
        log_reported(&reported);
        drained += 1;
    }
    drained
}

fn log_reported(reported: &ReportedError) {
    reported_errors().add(1, &[KeyValue::new("context", reported.context)]);
    error!(context = reported.context, error = %reported.error, "Reported error");
}

fn reported_errors() -> &'static Counter<u64> {
    static COUNTER: OnceLock<Counter<u64>> = OnceLock::new();
    COUNTER.get_or_init(|| {
        global::meter("coviddy.reporter")
            .u64_counter("coviddy.errors.reported")
            .with_description("Errors surfaced to the reporting sink")
            .init()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drains_until_reporters_drop() {
        let (reporter, rx) = error_channel(8);
        reporter.report("scrape", Error::EmptyName);
        reporter.clone().report("backup", Error::MissingTimestamp);
        drop(reporter);

        assert_eq!(run_error_reporter(rx).await, 2);
    }

    #[tokio::test]
    async fn full_channel_never_blocks() {
        let (reporter, mut rx) = error_channel(1);
        reporter.report("scrape", Error::EmptyName);
        reporter.report("scrape", Error::EmptyName);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.context, "scrape");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn log_only_reporter_accepts_errors() {
        let reporter = ErrorReporter::log_only();
        reporter.report("import", Error::ImportCancelled);
    }
}
