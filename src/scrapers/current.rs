use crate::config::Config;
use crate::errors::{CrawlerError, Result};
use crate::models::rate::{DailyRates, FetchOutcome, ScrapedRate};
use crate::scrapers::base::RateSource;
use crate::scrapers::client::HttpClient;
use crate::scrapers::html;
use crate::util;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use log::debug;

const PAGE_URL: &str =
    "https://www.centralbank.ae/umbraco/Surface/Exchange/GetExchangeRateAllCurrencyDate";
const UPDATE_DATE_LABEL: &str = "Last updated";

/// Scraper for the date-addressed exchange-rate page of the UAE Central Bank.
///
/// The endpoint returns a server-rendered fragment: a "Last updated" header
/// with the publication date the answer is actually for, and a table of
/// currency names and rates. Asking for a date the bank never published
/// yields the nearest earlier publication, which is why the reported date
/// travels with the batch.
pub struct CurrentRatesScraper {
    client: HttpClient,
    config: Config,
}

impl CurrentRatesScraper {
    pub fn new(config: &Config) -> Result<Self> {
        let client = HttpClient::new(&config.user_agent, config.log_response_text)?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    fn parse_page(&self, text: &str, request_date: NaiveDate) -> Result<FetchOutcome> {
        let cells = html::td_texts(text);
        let update_text = html::tag_text_after(text, UPDATE_DATE_LABEL, "span")
            .or_else(|| html::text_after_label(text, UPDATE_DATE_LABEL));

        let update_date = match update_text.as_deref().and_then(parse_update_date) {
            Some(date) => date,
            None if cells.is_empty() => return Ok(FetchOutcome::Empty),
            None => {
                return Err(CrawlerError::PageError(format!(
                    "no parsable update date on the page for {}",
                    request_date
                )))
            }
        };

        let rate_date =
            util::effective_rate_date(update_date, self.config.number_of_days_to_add);

        let mut rates = Vec::new();
        let mut unknown_currencies: Vec<String> = Vec::new();
        let mut currency_title: Option<String> = None;

        // Cells alternate between a currency name and its rate; anything
        // starting with a digit is treated as a rate for the title before it.
        for cell in cells {
            if cell.is_empty() {
                continue;
            }

            if !cell.chars().next().is_some_and(|c| c.is_ascii_digit()) {
                currency_title = Some(cell);
                continue;
            }

            let title = match currency_title.take() {
                Some(title) => title,
                None => {
                    debug!("Rate cell {} without a currency title, skipped", cell);
                    continue;
                }
            };

            let rate: f64 = cell.parse().map_err(|_| {
                CrawlerError::PageError(format!("unparsable rate value: {}", cell))
            })?;

            match self.config.currency_code(&title) {
                None => {
                    if !unknown_currencies.contains(&title) {
                        unknown_currencies.push(title);
                    }
                }
                Some(code) => {
                    if self.config.is_currency_code_allowed(code) {
                        rates.push(ScrapedRate {
                            currency_code: code.to_string(),
                            rate_date,
                            rate,
                        });
                    }
                }
            }
        }

        if rates.is_empty() && unknown_currencies.is_empty() {
            return Ok(FetchOutcome::Empty);
        }

        Ok(FetchOutcome::Rates(DailyRates {
            update_date,
            rates,
            unknown_currencies,
        }))
    }
}

#[async_trait]
impl RateSource for CurrentRatesScraper {
    async fn rates_for_date(&self, date: NaiveDate) -> Result<FetchOutcome> {
        let url = format!("{}?dateTime={}", PAGE_URL, date.format("%Y-%m-%d"));
        let text = self.client.get_text(&url).await?;
        self.parse_page(&text, date)
    }
}

fn parse_update_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();

    for format in [
        "%A %d %B %Y %I:%M:%S %p",
        "%d %B %Y %I:%M:%S %p",
        "%d %b %Y %I:%M:%S %p",
    ] {
        if let Ok(value) = NaiveDateTime::parse_from_str(text, format) {
            return Some(value.date());
        }
    }

    for format in ["%d %B %Y", "%d %b %Y", "%d-%m-%Y", "%Y-%m-%d"] {
        if let Ok(value) = NaiveDate::parse_from_str(text, format) {
            return Some(value);
        }
    }

    None
}
