use crate::config::Config;
use crate::errors::{CrawlerError, Result};
use crate::models::rate::{EventKind, FetchOutcome};
use crate::notify::NotificationSink;
use crate::scrapers::base::RateSource;
use crate::services::reconcile::{ImportReport, Reconciler};
use crate::store::RateStore;
use crate::util;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use log::{debug, error, info, warn};

const LOG_TITLE: &str = "import of current exchange rates";

/// Discrete phases of one current-rates import run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillState {
    AwaitingDate,
    Fetching,
    Reconciling,
    Advancing,
    Done,
    Failed,
}

/// Where the walk goes after one handled date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Fetch this date next.
    Next(NaiveDate),
    /// The whole window has been visited.
    Done,
    /// The source's newest publication predates the window.
    OutOfWindow(NaiveDate),
}

/// The walk rule. One day back by default; re-anchor onto the source's
/// reported date when it points backwards inside the window; stop once the
/// window is exhausted. A reported date older than the window means the
/// source has nothing recent at all.
///
/// `update_date` is what the source last answered for `request_date`, when
/// it answered anything. A report that is not strictly older than the
/// request carries no data for any unvisited date and walks on normally,
/// which also keeps the walk strictly descending.
pub fn advance_after(
    request_date: NaiveDate,
    update_date: Option<NaiveDate>,
    minimal_date: NaiveDate,
) -> Advance {
    if let Some(update_date) = update_date {
        if update_date < minimal_date {
            return Advance::OutOfWindow(update_date);
        }
        if update_date < request_date {
            return Advance::Next(update_date);
        }
    }

    let next = request_date - Duration::days(1);
    if next < minimal_date {
        Advance::Done
    } else {
        Advance::Next(next)
    }
}

/// Walks the configured date window backwards, fetching and reconciling
/// current rates one publication date at a time.
pub struct CurrentRatesImporter<'a> {
    store: &'a RateStore,
    source: &'a (dyn RateSource + Send + Sync),
    config: &'a Config,
    notifier: &'a (dyn NotificationSink + Send + Sync),
}

impl<'a> CurrentRatesImporter<'a> {
    pub fn new(
        store: &'a RateStore,
        source: &'a (dyn RateSource + Send + Sync),
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

    /// Run one complete import. Returns the terminal state reached; store
    /// breakage is the only hard error.
    pub async fn run(&self) -> Result<BackfillState> {
        self.run_from(util::today_local(), util::now_local()).await
    }

    /// Run with an explicit "today" and import stamp.
    pub async fn run_from(
        &self,
        today: NaiveDate,
        started_at: NaiveDateTime,
    ) -> Result<BackfillState> {
        let mut report = ImportReport::new(LOG_TITLE, started_at);
        debug!("{}", report.started_message());

        match self.import(today, started_at, &mut report).await {
            Ok(BackfillState::Done) => {
                if let Some(summary) = report.summary() {
                    self.notifier.notify(&summary).await;
                }
                self.notifier.notify(&report.completed_message()).await;
                Ok(BackfillState::Done)
            }
            Ok(state) => {
                self.notifier.notify(&report.failed_message()).await;
                Ok(state)
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
    ) -> Result<BackfillState> {
        self.store
            .record_event(EventKind::CurrentRatesLoading, started_at)?;

        let reference_date =
            util::effective_rate_date(today, self.config.number_of_days_to_add);
        let reconciler = Reconciler::new(
            self.store,
            started_at,
            reference_date,
            EventKind::CurrentRatesUpdating,
        );

        let minimal_date = today - Duration::days(self.config.number_of_days_to_check as i64);
        let mut request_date = today;
        let mut update_date: Option<NaiveDate> = None;
        let mut pending = None;
        let mut state = BackfillState::AwaitingDate;

        loop {
            match state {
                BackfillState::AwaitingDate => {
                    state = if request_date < minimal_date {
                        BackfillState::Done
                    } else {
                        BackfillState::Fetching
                    };
                }
                BackfillState::Fetching => {
                    debug!("Date to check: {}", request_date);

                    state = match self.source.rates_for_date(request_date).await {
                        Ok(FetchOutcome::Rates(daily)) => {
                            update_date = Some(daily.update_date);
                            if daily.update_date == request_date {
                                pending = Some(daily);
                                BackfillState::Reconciling
                            } else {
                                debug!(
                                    "The source answered for {} instead of {}",
                                    daily.update_date, request_date
                                );
                                BackfillState::Advancing
                            }
                        }
                        Ok(FetchOutcome::Empty) => {
                            debug!("No rates published for {}", request_date);
                            update_date = None;
                            BackfillState::Advancing
                        }
                        Err(CrawlerError::PageError(message)) => {
                            error!("Unexpected page structure: {}", message);
                            BackfillState::Failed
                        }
                        Err(e) => {
                            warn!("Fetching rates for {} failed: {}", request_date, e);
                            update_date = None;
                            BackfillState::Advancing
                        }
                    };
                }
                BackfillState::Reconciling => {
                    if let Some(daily) = pending.take() {
                        if !daily.unknown_currencies.is_empty() {
                            self.notifier
                                .warn(&format!(
                                    "Unknown currencies have been skipped: {}",
                                    daily.unknown_currencies.join(", ")
                                ))
                                .await;
                        }
                        let changes = reconciler.reconcile(&daily.rates)?;
                        report.record_changes(changes);
                    }
                    state = BackfillState::Advancing;
                }
                BackfillState::Advancing => {
                    state = match advance_after(request_date, update_date, minimal_date) {
                        Advance::Next(next) => {
                            request_date = next;
                            update_date = None;
                            BackfillState::Fetching
                        }
                        Advance::Done => BackfillState::Done,
                        Advance::OutOfWindow(date) => {
                            info!(
                                "The newest rates at the source are dated {}, older than the {}-day window. Stopping.",
                                date, self.config.number_of_days_to_check
                            );
                            BackfillState::Failed
                        }
                    };
                }
                BackfillState::Done => {
                    self.store.mark_import_run(started_at)?;
                    return Ok(BackfillState::Done);
                }
                BackfillState::Failed => return Ok(BackfillState::Failed),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::rate::{DailyRates, ScrapedRate};
    use crate::store::RateQuery;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn walks_one_day_back_by_default() {
        assert_eq!(
            advance_after(date(2024, 6, 10), None, date(2024, 6, 1)),
            Advance::Next(date(2024, 6, 9))
        );
        assert_eq!(
            advance_after(date(2024, 6, 10), Some(date(2024, 6, 10)), date(2024, 6, 1)),
            Advance::Next(date(2024, 6, 9))
        );
    }

    #[test]
    fn re_anchors_onto_an_older_reported_date() {
        assert_eq!(
            advance_after(date(2024, 6, 10), Some(date(2024, 6, 7)), date(2024, 6, 1)),
            Advance::Next(date(2024, 6, 7))
        );
    }

    #[test]
    fn a_future_reported_date_never_re_anchors() {
        // A source clock ahead of ours must not push the walk forward.
        assert_eq!(
            advance_after(date(2024, 6, 10), Some(date(2024, 6, 11)), date(2024, 6, 1)),
            Advance::Next(date(2024, 6, 9))
        );
    }

    #[test]
    fn stops_at_the_window_edge() {
        assert_eq!(
            advance_after(date(2024, 6, 1), None, date(2024, 6, 1)),
            Advance::Done
        );
        // The lower bound itself is still visited.
        assert_eq!(
            advance_after(date(2024, 6, 2), None, date(2024, 6, 1)),
            Advance::Next(date(2024, 6, 1))
        );
    }

    #[test]
    fn a_report_older_than_the_window_is_terminal() {
        assert_eq!(
            advance_after(date(2024, 6, 10), Some(date(2024, 5, 20)), date(2024, 6, 1)),
            Advance::OutOfWindow(date(2024, 5, 20))
        );
    }

    enum Scripted {
        Rates(DailyRates),
        Empty,
        PageBroken,
        Unreachable,
    }

    struct ScriptedSource {
        script: HashMap<NaiveDate, Scripted>,
        fetched: Mutex<Vec<NaiveDate>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<(NaiveDate, Scripted)>) -> Self {
            Self {
                script: script.into_iter().collect(),
                fetched: Mutex::new(Vec::new()),
            }
        }

        fn fetched(&self) -> Vec<NaiveDate> {
            self.fetched.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RateSource for ScriptedSource {
        async fn rates_for_date(&self, date: NaiveDate) -> Result<FetchOutcome> {
            self.fetched.lock().unwrap().push(date);
            match self.script.get(&date) {
                Some(Scripted::Rates(daily)) => Ok(FetchOutcome::Rates(daily.clone())),
                Some(Scripted::PageBroken) => {
                    Err(CrawlerError::PageError("the update date is missing".to_string()))
                }
                Some(Scripted::Unreachable) => {
                    Err(CrawlerError::Unknown("connection refused".to_string()))
                }
                Some(Scripted::Empty) | None => Ok(FetchOutcome::Empty),
            }
        }
    }

    // Always answers with a publication three days older than the request.
    struct StaleSource {
        fetches: Mutex<usize>,
    }

    #[async_trait]
    impl RateSource for StaleSource {
        async fn rates_for_date(&self, date: NaiveDate) -> Result<FetchOutcome> {
            *self.fetches.lock().unwrap() += 1;
            let update_date = date - Duration::days(3);
            Ok(FetchOutcome::Rates(DailyRates {
                update_date,
                rates: vec![usd(update_date + Duration::days(1), 3.6725)],
                unknown_currencies: Vec::new(),
            }))
        }
    }

    struct RecordingSink {
        messages: Mutex<Vec<String>>,
        warnings: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                messages: Mutex::new(Vec::new()),
                warnings: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn notify(&self, text: &str) {
            self.messages.lock().unwrap().push(text.to_string());
        }

        async fn warn(&self, text: &str) {
            self.warnings.lock().unwrap().push(text.to_string());
        }
    }

    fn usd(rate_date: NaiveDate, rate: f64) -> ScrapedRate {
        ScrapedRate {
            currency_code: "USD".to_string(),
            rate_date,
            rate,
        }
    }

    fn daily(update_date: NaiveDate, rates: Vec<ScrapedRate>) -> Scripted {
        Scripted::Rates(DailyRates {
            update_date,
            rates,
            unknown_currencies: Vec::new(),
        })
    }

    fn test_config(days_to_check: u32) -> Config {
        Config {
            number_of_days_to_check: days_to_check,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn a_full_walk_imports_reconciles_and_marks_the_run() {
        let store = RateStore::open_in_memory().unwrap();
        let config = test_config(4);
        let sink = RecordingSink::new();

        let today = date(2025, 6, 23);
        let started_at = today.and_hms_opt(6, 0, 14).unwrap();

        let source = ScriptedSource::new(vec![
            (today, daily(today, vec![usd(date(2025, 6, 24), 3.6725)])),
            // The bank answers for the 20th here, re-anchoring the walk.
            (
                date(2025, 6, 22),
                daily(date(2025, 6, 20), vec![usd(date(2025, 6, 21), 3.672)]),
            ),
            (
                date(2025, 6, 20),
                daily(date(2025, 6, 20), vec![usd(date(2025, 6, 21), 3.672)]),
            ),
            (date(2025, 6, 19), Scripted::Empty),
        ]);

        let importer = CurrentRatesImporter::new(&store, &source, &config, &sink);
        let state = importer.run_from(today, started_at).await.unwrap();

        assert_eq!(state, BackfillState::Done);
        // The 21st and the 18th are never requested: the former is skipped
        // by the re-anchor, the latter lies outside the four-day window.
        assert_eq!(
            source.fetched(),
            vec![today, date(2025, 6, 22), date(2025, 6, 20), date(2025, 6, 19)]
        );
        assert_eq!(store.last_import_run().unwrap(), Some(started_at));

        let rates = store.currency_rates("USD", &RateQuery::default()).unwrap();
        assert_eq!(rates.len(), 2);
        assert_eq!(rates[0].rate_date, date(2025, 6, 21));
        assert_eq!(rates[0].rate, 3.672);
        assert_eq!(rates[0].import_date, started_at);
        assert_eq!(rates[1].rate_date, date(2025, 6, 24));
        assert_eq!(rates[1].rate, 3.6725);

        let messages = sink.messages.lock().unwrap().clone();
        assert_eq!(messages.len(), 2);
        assert_eq!(
            messages[0],
            "Summary of changed rates on 2025-06-21:\nUSD: 3.672000 (new)\n\
             Summary of changed rates on 2025-06-24:\nUSD: 3.672500 (new)"
        );
        // The rate for the 21st predates the run's reference date.
        assert_eq!(
            messages[1],
            "Import of current exchange rates started at 06:00:14 is completed. \
             Number of changed rates: 0. Number of retroactive rates: 1."
        );
    }

    #[tokio::test]
    async fn a_rerun_with_identical_rates_imports_nothing() {
        let store = RateStore::open_in_memory().unwrap();
        let config = test_config(2);
        let today = date(2025, 6, 23);

        let source =
            ScriptedSource::new(vec![(today, daily(today, vec![usd(date(2025, 6, 24), 3.6725)]))]);

        let first_run = today.and_hms_opt(6, 0, 0).unwrap();
        let sink = RecordingSink::new();
        let importer = CurrentRatesImporter::new(&store, &source, &config, &sink);
        assert_eq!(
            importer.run_from(today, first_run).await.unwrap(),
            BackfillState::Done
        );

        let second_run = today.and_hms_opt(18, 0, 0).unwrap();
        let sink = RecordingSink::new();
        let importer = CurrentRatesImporter::new(&store, &source, &config, &sink);
        assert_eq!(
            importer.run_from(today, second_run).await.unwrap(),
            BackfillState::Done
        );

        // The repeat run found nothing new: no summary, only the completion.
        let messages = sink.messages.lock().unwrap().clone();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("Number of changed rates: 0. Number of retroactive rates: 0."));

        // The stored version still carries the first run's stamp.
        let rates = store.currency_rates("USD", &RateQuery::default()).unwrap();
        assert_eq!(rates.len(), 1);
        assert_eq!(rates[0].import_date, first_run);
    }

    #[tokio::test]
    async fn a_source_stuck_in_the_past_fails_the_run() {
        let store = RateStore::open_in_memory().unwrap();
        let config = test_config(14);
        let sink = RecordingSink::new();
        let today = date(2025, 6, 23);
        let started_at = today.and_hms_opt(6, 0, 0).unwrap();

        let source = StaleSource {
            fetches: Mutex::new(0),
        };
        let importer = CurrentRatesImporter::new(&store, &source, &config, &sink);
        let state = importer.run_from(today, started_at).await.unwrap();

        assert_eq!(state, BackfillState::Failed);
        // Re-anchoring three days at a time covers the 14-day window in
        // five fetches instead of fifteen.
        assert_eq!(*source.fetches.lock().unwrap(), 5);
        assert_eq!(store.last_import_run().unwrap(), None);

        let messages = sink.messages.lock().unwrap().clone();
        assert_eq!(
            messages,
            vec![
                "Import of current exchange rates started at 06:00:00 (20250623060000) is failed."
                    .to_string()
            ]
        );
    }

    #[tokio::test]
    async fn a_transient_fetch_failure_skips_the_day() {
        let store = RateStore::open_in_memory().unwrap();
        let config = test_config(2);
        let sink = RecordingSink::new();
        let today = date(2025, 6, 23);
        let started_at = today.and_hms_opt(6, 0, 0).unwrap();

        let source = ScriptedSource::new(vec![
            (today, Scripted::Unreachable),
            (
                date(2025, 6, 22),
                daily(date(2025, 6, 22), vec![usd(date(2025, 6, 23), 3.6725)]),
            ),
        ]);

        let importer = CurrentRatesImporter::new(&store, &source, &config, &sink);
        let state = importer.run_from(today, started_at).await.unwrap();

        assert_eq!(state, BackfillState::Done);
        assert_eq!(
            store
                .currency_rates("USD", &RateQuery::default())
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn page_breakage_fails_the_run_without_walking_on() {
        let store = RateStore::open_in_memory().unwrap();
        let config = test_config(14);
        let sink = RecordingSink::new();
        let today = date(2025, 6, 23);
        let started_at = today.and_hms_opt(6, 0, 0).unwrap();

        let source = ScriptedSource::new(vec![(today, Scripted::PageBroken)]);
        let importer = CurrentRatesImporter::new(&store, &source, &config, &sink);
        let state = importer.run_from(today, started_at).await.unwrap();

        assert_eq!(state, BackfillState::Failed);
        assert_eq!(source.fetched(), vec![today]);
        assert!(sink.messages.lock().unwrap()[0].ends_with("is failed."));
    }

    #[tokio::test]
    async fn unknown_currencies_are_reported_through_the_sink() {
        let store = RateStore::open_in_memory().unwrap();
        let config = test_config(1);
        let sink = RecordingSink::new();
        let today = date(2025, 6, 23);
        let started_at = today.and_hms_opt(6, 0, 0).unwrap();

        let source = ScriptedSource::new(vec![(
            today,
            Scripted::Rates(DailyRates {
                update_date: today,
                rates: vec![usd(date(2025, 6, 24), 3.6725)],
                unknown_currencies: vec!["Moon Dollar".to_string(), "Mars Dinar".to_string()],
            }),
        )]);

        let importer = CurrentRatesImporter::new(&store, &source, &config, &sink);
        importer.run_from(today, started_at).await.unwrap();

        let warnings = sink.warnings.lock().unwrap().clone();
        assert_eq!(
            warnings,
            vec!["Unknown currencies have been skipped: Moon Dollar, Mars Dinar".to_string()]
        );
    }

    #[tokio::test]
    async fn a_broken_store_aborts_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rates.sqlite");
        let store =
            RateStore::open(path.to_str().unwrap(), std::time::Duration::from_secs(1)).unwrap();

        // Break the schema behind the store's back.
        let saboteur = rusqlite::Connection::open(&path).unwrap();
        saboteur.execute_batch("DROP TABLE currency_rates;").unwrap();

        let config = test_config(2);
        let sink = RecordingSink::new();
        let today = date(2025, 6, 23);
        let source =
            ScriptedSource::new(vec![(today, daily(today, vec![usd(date(2025, 6, 24), 3.6725)]))]);

        let importer = CurrentRatesImporter::new(&store, &source, &config, &sink);
        let result = importer
            .run_from(today, today.and_hms_opt(6, 0, 0).unwrap())
            .await;

        assert!(result.is_err());
        // The operator still hears about the failure.
        assert!(sink.messages.lock().unwrap()[0].ends_with("is failed."));
    }
}
