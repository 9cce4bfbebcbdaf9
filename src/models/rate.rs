use chrono::{NaiveDate, NaiveDateTime};

use crate::util;

// One rate parsed from a source page or file, before any store decision.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapedRate {
    pub currency_code: String,
    pub rate_date: NaiveDate,
    pub rate: f64,
}

// A stored observation. The store keeps every accepted observation, so one
// (currency_code, rate_date) pair can carry several import_date versions.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrencyRate {
    pub currency_code: String,
    pub rate_date: NaiveDate,
    pub rate: f64,
    pub import_date: NaiveDateTime,
}

// Result of accepting one scraped rate into the store.
#[derive(Debug, Clone, PartialEq)]
pub struct RateChange {
    pub currency_code: String,
    pub rate_date: NaiveDate,
    // Rate previously in effect for this rate date, if any.
    pub previous: Option<f64>,
    pub rate: f64,
    // The rate date lies before the run's reference date.
    pub retroactive: bool,
}

impl RateChange {
    // A genuine value transition, as opposed to a first-ever load.
    pub fn is_changed(&self) -> bool {
        match self.previous {
            Some(previous) => !util::rates_equal(previous, self.rate),
            None => false,
        }
    }

    // Summary line: "USD: 3.672000 → 3.672500", or "USD: 3.672500 (new)"
    // for a first load.
    pub fn presentation(&self) -> String {
        match self.previous {
            Some(previous) if self.is_changed() => format!(
                "{}: {} → {}",
                self.currency_code,
                util::rate_presentation(previous),
                util::rate_presentation(self.rate)
            ),
            _ => format!(
                "{}: {} (new)",
                self.currency_code,
                util::rate_presentation(self.rate)
            ),
        }
    }
}

// One day's parse result from the current-rates page.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyRates {
    // The source's self-reported publication date.
    pub update_date: NaiveDate,
    pub rates: Vec<ScrapedRate>,
    // Currency presentations with no configured code, in first-seen order.
    pub unknown_currencies: Vec<String>,
}

// Parse result for one historical workbook.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRates {
    pub rates: Vec<ScrapedRate>,
    pub unknown_currencies: Vec<String>,
}

// What a fetch produced: "nothing published" is distinct from a real batch.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Rates(DailyRates),
    Empty,
}

// Audit-log event kinds recorded by import runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    CurrentRatesLoading,
    CurrentRatesUpdating,
    HistoricalRatesLoading,
    HistoricalRatesUpdating,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::CurrentRatesLoading => "current_rates_loading",
            EventKind::CurrentRatesUpdating => "current_rates_updating",
            EventKind::HistoricalRatesLoading => "historical_rates_loading",
            EventKind::HistoricalRatesUpdating => "historical_rates_updating",
        }
    }
}
