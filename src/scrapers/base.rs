use crate::errors::Result;
use crate::models::rate::{FetchOutcome, FileRates};
use async_trait::async_trait;
use chrono::NaiveDate;

/// Source of date-addressed current exchange rates
#[async_trait]
pub trait RateSource {
    /// Fetch and parse the rates the source publishes for the given date
    ///
    /// The source may answer with a batch labeled for an older date; callers
    /// must check the reported update date before trusting the batch.
    async fn rates_for_date(&self, date: NaiveDate) -> Result<FetchOutcome>;
}

/// Source of downloadable historical exchange-rate files
#[async_trait]
pub trait HistorySource {
    /// Find links to all published rate files
    async fn discover_files(&self) -> Result<Vec<String>>;

    /// Download one file
    async fn fetch_file(&self, url: &str) -> Result<Vec<u8>>;

    /// Parse rates out of a downloaded workbook
    fn parse_file(&self, content: &[u8]) -> Result<FileRates>;
}
