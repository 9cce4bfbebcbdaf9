use crate::config::Config;
use crate::errors::Result;
use crate::models::rate::EventKind;
use crate::notify::NotificationSink;
use crate::scrapers::base::HistorySource;
use crate::services::reconcile::{ImportReport, Reconciler};
use crate::store::RateStore;
use crate::util;
use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, warn};
use sha2::{Digest, Sha256};

const LOG_TITLE: &str = "import of historical exchange rates";

/// Imports every published historical rate file that is new or has changed
/// since the last run. Files are recognized by content hash, so a re-published
/// file with identical bytes costs one download and nothing else.
pub struct HistoricalRatesImporter<'a> {
    store: &'a RateStore,
    source: &'a (dyn HistorySource + Send + Sync),
    config: &'a Config,
    notifier: &'a (dyn NotificationSink + Send + Sync),
}

impl<'a> HistoricalRatesImporter<'a> {
    pub fn new(
        store: &'a RateStore,
        source: &'a (dyn HistorySource + Send + Sync),
        config: &'a Config,
        notifier: &'a (dyn NotificationSink + Send + Sync),
    ) -> Self {
        Self {
            store,
            source,
            config,
            notifier,
        }
    }

    pub async fn run(&self) -> Result<()> {
        self.run_from(util::today_local(), util::now_local()).await
    }

    pub async fn run_from(&self, today: NaiveDate, started_at: NaiveDateTime) -> Result<()> {
        let mut report = ImportReport::new(LOG_TITLE, started_at);
        debug!("{}", report.started_message());

        match self.import(today, started_at, &mut report).await {
            Ok(true) => {
                if let Some(summary) = report.summary() {
                    self.notifier.notify(&summary).await;
                }
                self.notifier.notify(&report.completed_message()).await;
                Ok(())
            }
            Ok(false) => {
                self.notifier.notify(&report.failed_message()).await;
                Ok(())
            }
            Err(e) => {
                self.notifier.notify(&report.failed_message()).await;
                Err(e)
            }
        }
    }

    async fn import(
        &self,
        today: NaiveDate,
        started_at: NaiveDateTime,
        report: &mut ImportReport,
    ) -> Result<bool> {
        self.store
            .record_event(EventKind::HistoricalRatesLoading, started_at)?;

        let links = match self.source.discover_files().await {
            Ok(links) => links,
            Err(e) => {
                warn!("Unable to find links to rate files: {}", e);
                return Ok(false);
            }
        };

        let reference_date =
            util::effective_rate_date(today, self.config.number_of_days_to_add);
        let reconciler = Reconciler::new(
            self.store,
            started_at,
            reference_date,
            EventKind::HistoricalRatesUpdating,
        );

        for link in links {
            debug!("Link to process: {}", link);

            let content = match self.source.fetch_file(&link).await {
                Ok(content) => content,
                Err(e) => {
                    warn!("Unable to download {}: {}", link, e);
                    continue;
                }
            };

            let hash = file_hash(&content);
            debug!("Downloaded file hash: {}", hash);

            match self.store.historical_file(&link)? {
                None => {
                    debug!("The file has not been processed before.");
                }
                Some(file) if file.hash != hash => {
                    debug!(
                        "The file has been updated since the last processing ({}).",
                        file.import_date.format("%Y-%m-%d %H:%M:%S")
                    );
                }
                Some(file) => {
                    debug!(
                        "The file has not been updated since the last processing ({}).",
                        file.import_date.format("%Y-%m-%d %H:%M:%S")
                    );
                    continue;
                }
            }

            // A file that fails to parse is left unregistered so the next
            // run picks it up again.
            let parsed = match self.source.parse_file(&content) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!("Unable to parse {}: {}", link, e);
                    continue;
                }
            };

            if !parsed.unknown_currencies.is_empty() {
                self.notifier
                    .warn(&format!(
                        "Unknown currencies have been skipped: {}",
                        parsed.unknown_currencies.join(", ")
                    ))
                    .await;
            }

            let changes = reconciler.reconcile(&parsed.rates)?;
            report.record_changes(changes);

            self.store.upsert_historical_file(&link, &hash, started_at)?;
        }

        self.store.mark_import_run(started_at)?;
        Ok(true)
    }
}

/// Content identity of a downloaded file.
pub fn file_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CrawlerError;
    use crate::models::rate::{FileRates, ScrapedRate};
    use crate::store::{RateQuery, RateStore};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[test]
    fn file_hash_is_stable_and_content_sensitive() {
        let a = file_hash(b"rates");
        assert_eq!(a, file_hash(b"rates"));
        assert_ne!(a, file_hash(b"other"));
        // SHA-256, hex encoded.
        assert_eq!(a.len(), 64);
    }

    // Serves canned links and file bodies. A body is "CODE DATE RATE" lines;
    // a body containing "garbled" refuses to parse.
    struct ScriptedHistory {
        links: Vec<String>,
        files: HashMap<String, Vec<u8>>,
        downloads: Mutex<Vec<String>>,
    }

    impl ScriptedHistory {
        fn new(files: Vec<(&str, &str)>) -> Self {
            Self {
                links: files.iter().map(|(url, _)| url.to_string()).collect(),
                files: files
                    .iter()
                    .map(|(url, body)| (url.to_string(), body.as_bytes().to_vec()))
                    .collect(),
                downloads: Mutex::new(Vec::new()),
            }
        }

        fn with_links(mut self, links: Vec<&str>) -> Self {
            self.links = links.into_iter().map(str::to_string).collect();
            self
        }
    }

    #[async_trait]
    impl HistorySource for ScriptedHistory {
        async fn discover_files(&self) -> Result<Vec<String>> {
            Ok(self.links.clone())
        }

        async fn fetch_file(&self, url: &str) -> Result<Vec<u8>> {
            self.downloads.lock().unwrap().push(url.to_string());
            match self.files.get(url) {
                Some(content) => Ok(content.clone()),
                None => Err(CrawlerError::Unknown("not found".to_string())),
            }
        }

        fn parse_file(&self, content: &[u8]) -> Result<FileRates> {
            let text = String::from_utf8_lossy(content);
            if text.contains("garbled") {
                return Err(CrawlerError::PageError("no header row".to_string()));
            }

            let mut rates = Vec::new();
            for line in text.lines() {
                let mut parts = line.split_whitespace();
                if let (Some(code), Some(day), Some(rate)) =
                    (parts.next(), parts.next(), parts.next())
                {
                    rates.push(ScrapedRate {
                        currency_code: code.to_string(),
                        rate_date: day.parse().unwrap(),
                        rate: rate.parse().unwrap(),
                    });
                }
            }

            Ok(FileRates {
                rates,
                unknown_currencies: Vec::new(),
            })
        }
    }

    struct Undiscoverable;

    #[async_trait]
    impl HistorySource for Undiscoverable {
        async fn discover_files(&self) -> Result<Vec<String>> {
            Err(CrawlerError::Unknown("links page unreachable".to_string()))
        }

        async fn fetch_file(&self, _url: &str) -> Result<Vec<u8>> {
            unreachable!()
        }

        fn parse_file(&self, _content: &[u8]) -> Result<FileRates> {
            unreachable!()
        }
    }

    struct RecordingSink {
        messages: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                messages: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn notify(&self, text: &str) {
            self.messages.lock().unwrap().push(text.to_string());
        }

        async fn warn(&self, _text: &str) {}
    }

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[tokio::test]
    async fn imports_new_files_and_skips_unchanged_ones_on_rerun() {
        let store = RateStore::open_in_memory().unwrap();
        let config = Config::default();
        let today = date(2024, 6, 10);

        let source = ScriptedHistory::new(vec![
            ("https://example.org/a.xlsx", "USD 2024-01-02 3.6725"),
            ("https://example.org/b.xlsx", "EUR 2024-01-03 4.1"),
        ]);

        let first_run = today.and_hms_opt(9, 30, 0).unwrap();
        let sink = RecordingSink::new();
        let importer = HistoricalRatesImporter::new(&store, &source, &config, &sink);
        importer.run_from(today, first_run).await.unwrap();

        let messages = sink.messages.lock().unwrap().clone();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].contains("USD: 3.672500 (new)"));
        assert_eq!(
            messages[1],
            "Import of historical exchange rates started at 09:30:00 is completed. \
             Number of changed rates: 0. Number of retroactive rates: 2."
        );

        // A rerun downloads everything again (the hash check needs the
        // bytes) but parses and imports nothing.
        let second_run = today.and_hms_opt(21, 0, 0).unwrap();
        let sink = RecordingSink::new();
        let importer = HistoricalRatesImporter::new(&store, &source, &config, &sink);
        importer.run_from(today, second_run).await.unwrap();

        let messages = sink.messages.lock().unwrap().clone();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("Number of changed rates: 0. Number of retroactive rates: 0."));
        assert_eq!(source.downloads.lock().unwrap().len(), 4);

        let registered = store
            .historical_file("https://example.org/a.xlsx")
            .unwrap()
            .unwrap();
        assert_eq!(registered.import_date, first_run);

        let rates = store.currency_rates("USD", &RateQuery::default()).unwrap();
        assert_eq!(rates.len(), 1);
        assert_eq!(rates[0].import_date, first_run);
    }

    #[tokio::test]
    async fn a_changed_file_is_reprocessed() {
        let store = RateStore::open_in_memory().unwrap();
        let config = Config::default();
        let today = date(2024, 6, 10);

        let first_run = today.and_hms_opt(9, 0, 0).unwrap();
        let source = ScriptedHistory::new(vec![
            ("https://example.org/a.xlsx", "USD 2024-01-02 3.6725"),
            ("https://example.org/b.xlsx", "EUR 2024-01-03 4.1"),
        ]);
        let sink = RecordingSink::new();
        HistoricalRatesImporter::new(&store, &source, &config, &sink)
            .run_from(today, first_run)
            .await
            .unwrap();

        // The bank re-publishes b.xlsx with a corrected rate.
        let second_run = today.and_hms_opt(21, 0, 0).unwrap();
        let source = ScriptedHistory::new(vec![
            ("https://example.org/a.xlsx", "USD 2024-01-02 3.6725"),
            ("https://example.org/b.xlsx", "EUR 2024-01-03 4.2"),
        ]);
        let sink = RecordingSink::new();
        HistoricalRatesImporter::new(&store, &source, &config, &sink)
            .run_from(today, second_run)
            .await
            .unwrap();

        let messages = sink.messages.lock().unwrap().clone();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].contains("EUR: 4.100000 → 4.200000"));
        assert!(messages[1].contains("Number of changed rates: 1. Number of retroactive rates: 1."));

        // The latest view carries the correction, the as-of view does not.
        let rates = store.currency_rates("EUR", &RateQuery::default()).unwrap();
        assert_eq!(rates.len(), 1);
        assert_eq!(rates[0].rate, 4.2);
        assert_eq!(rates[0].import_date, second_run);

        let query = RateQuery {
            as_of: Some(first_run),
            ..RateQuery::default()
        };
        let rates = store.currency_rates("EUR", &query).unwrap();
        assert_eq!(rates[0].rate, 4.1);

        let registered = store
            .historical_file("https://example.org/b.xlsx")
            .unwrap()
            .unwrap();
        assert_eq!(registered.import_date, second_run);
        assert_eq!(
            store
                .historical_file("https://example.org/a.xlsx")
                .unwrap()
                .unwrap()
                .import_date,
            first_run
        );
    }

    #[tokio::test]
    async fn download_and_parse_failures_leave_the_file_unregistered() {
        let store = RateStore::open_in_memory().unwrap();
        let config = Config::default();
        let today = date(2024, 6, 10);
        let started_at = today.and_hms_opt(9, 0, 0).unwrap();

        let source = ScriptedHistory::new(vec![
            ("https://example.org/bad.xlsx", "garbled"),
            ("https://example.org/good.xlsx", "USD 2024-01-02 3.6725"),
        ])
        .with_links(vec![
            "https://example.org/missing.xlsx",
            "https://example.org/bad.xlsx",
            "https://example.org/good.xlsx",
        ]);

        let sink = RecordingSink::new();
        HistoricalRatesImporter::new(&store, &source, &config, &sink)
            .run_from(today, started_at)
            .await
            .unwrap();

        // Only the processable file makes it into the registry; the other
        // two stay eligible for the next run.
        assert!(store
            .historical_file("https://example.org/missing.xlsx")
            .unwrap()
            .is_none());
        assert!(store
            .historical_file("https://example.org/bad.xlsx")
            .unwrap()
            .is_none());
        assert!(store
            .historical_file("https://example.org/good.xlsx")
            .unwrap()
            .is_some());

        assert_eq!(
            store
                .currency_rates("USD", &RateQuery::default())
                .unwrap()
                .len(),
            1
        );
        let messages = sink.messages.lock().unwrap().clone();
        assert!(messages.last().unwrap().contains("is completed."));
    }

    #[tokio::test]
    async fn discovery_failure_fails_the_run_without_a_hard_error() {
        let store = RateStore::open_in_memory().unwrap();
        let config = Config::default();
        let today = date(2024, 6, 10);
        let started_at = today.and_hms_opt(9, 0, 0).unwrap();

        let sink = RecordingSink::new();
        let importer = HistoricalRatesImporter::new(&store, &Undiscoverable, &config, &sink);
        importer.run_from(today, started_at).await.unwrap();

        let messages = sink.messages.lock().unwrap().clone();
        assert_eq!(
            messages,
            vec![
                "Import of historical exchange rates started at 09:00:00 (20240610090000) is failed."
                    .to_string()
            ]
        );
        assert_eq!(store.last_import_run().unwrap(), None);
    }
}
