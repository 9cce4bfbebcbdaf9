use crate::config::Config;
use crate::errors::{CrawlerError, Result};
use crate::models::rate::{FileRates, ScrapedRate};
use crate::scrapers::base::HistorySource;
use crate::scrapers::client::HttpClient;
use crate::scrapers::html;
use crate::util;
use async_trait::async_trait;
use calamine::{open_workbook_auto_from_rs, DataType, Reader};
use chrono::NaiveDate;
use log::debug;

const LINKS_PAGE_URL: &str = "https://www.centralbank.ae/en/forex-eibor/exchange-rates/";
const SITE_ROOT: &str = "https://www.centralbank.ae";

/// Scraper for the bank's historical rate workbooks.
///
/// The exchange-rates page links one Excel file per period under /media/.
/// Each workbook carries a header row naming Currency, Rate and Date
/// columns; rows before that header are decoration and get skipped.
pub struct HistoryScraper {
    client: HttpClient,
    config: Config,
}

impl HistoryScraper {
    pub fn new(config: &Config) -> Result<Self> {
        let client = HttpClient::new(&config.user_agent, config.log_response_text)?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    fn is_rates_file_link(href: &str) -> bool {
        if !href.contains("/media/") {
            return false;
        }
        match href.strip_suffix(".xlsx") {
            Some(stem) => stem
                .chars()
                .last()
                .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit()),
            None => false,
        }
    }
}

#[async_trait]
impl HistorySource for HistoryScraper {
    async fn discover_files(&self) -> Result<Vec<String>> {
        debug!("Attempting to find links to rate files...");

        let text = self.client.get_text(LINKS_PAGE_URL).await?;

        let mut links = Vec::new();
        for href in html::hrefs(&text) {
            if !Self::is_rates_file_link(&href) {
                continue;
            }

            let link = if href.starts_with('/') {
                format!("{}{}", SITE_ROOT, href)
            } else {
                href
            };

            if !links.contains(&link) {
                links.push(link);
            }
        }

        debug!("Search results: {} link(s).", links.len());
        Ok(links)
    }

    async fn fetch_file(&self, url: &str) -> Result<Vec<u8>> {
        self.client.get_bytes(url).await
    }

    fn parse_file(&self, content: &[u8]) -> Result<FileRates> {
        let mut workbook = open_workbook_auto_from_rs(std::io::Cursor::new(content))
            .map_err(|e| CrawlerError::ExcelError(e))?;

        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| CrawlerError::PageError("workbook has no sheets".to_string()))?
            .map_err(|e| CrawlerError::ExcelError(e))?;

        let mut rows = range.rows();
        let mut columns = None;

        for row in rows.by_ref() {
            if let Some(found) = header_columns(row) {
                columns = Some(found);
                break;
            }
        }

        let (currency_column, rate_column, date_column) = match columns {
            Some(columns) => columns,
            None => {
                return Err(CrawlerError::PageError(
                    "no Currency/Rate/Date header row in the workbook".to_string(),
                ))
            }
        };

        let days_to_add = self.config.number_of_days_to_add;
        let mut rates = Vec::new();
        let mut unknown_currencies: Vec<String> = Vec::new();

        for row in rows {
            let name = match row.get(currency_column).and_then(cell_text) {
                Some(name) => name,
                None => continue,
            };
            let rate = match row.get(rate_column).and_then(cell_rate) {
                Some(rate) => rate,
                None => continue,
            };
            let date = match row.get(date_column).and_then(cell_date) {
                Some(date) => date,
                None => continue,
            };

            match self.config.currency_code(&name) {
                None => {
                    if !unknown_currencies.contains(&name) {
                        unknown_currencies.push(name);
                    }
                }
                Some(code) => {
                    if self.config.is_currency_code_allowed(code) {
                        rates.push(ScrapedRate {
                            currency_code: code.to_string(),
                            rate_date: util::effective_rate_date(date, days_to_add),
                            rate,
                        });
                    }
                }
            }
        }

        debug!("Crawling results: {} rate(s).", rates.len());
        Ok(FileRates {
            rates,
            unknown_currencies,
        })
    }
}

fn header_columns(row: &[DataType]) -> Option<(usize, usize, usize)> {
    let mut currency = None;
    let mut rate = None;
    let mut date = None;

    for (index, cell) in row.iter().enumerate() {
        match cell.to_string().trim() {
            "Currency" => currency = Some(index),
            "Rate" => rate = Some(index),
            "Date" => date = Some(index),
            _ => {}
        }
    }

    match (currency, rate, date) {
        (Some(currency), Some(rate), Some(date)) => Some((currency, rate, date)),
        _ => None,
    }
}

fn cell_text(cell: &DataType) -> Option<String> {
    let text = cell.to_string().trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn cell_rate(cell: &DataType) -> Option<f64> {
    if let Some(value) = cell.as_f64() {
        return Some(value);
    }
    cell.as_string()?.replace(',', "").trim().parse().ok()
}

fn cell_date(cell: &DataType) -> Option<NaiveDate> {
    if let Some(date) = cell.as_date() {
        return Some(date);
    }
    if let Some(datetime) = cell.as_datetime() {
        return Some(datetime.date());
    }

    let text = cell.to_string();
    let text = text.trim();
    for format in ["%d-%m-%Y", "%d/%m/%Y", "%Y-%m-%d", "%d %b %Y", "%d %B %Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some(date);
        }
    }
    None
}
