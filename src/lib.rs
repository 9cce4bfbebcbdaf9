// Publicly exported modules for external use
pub mod errors;
pub mod models;
pub mod store;

// Kept public for the binary and the integration tests; library consumers
// should treat these as internal
#[doc(hidden)]
pub mod api;
#[doc(hidden)]
pub mod config;
#[doc(hidden)]
pub mod notify;
#[doc(hidden)]
pub mod scrapers;
#[doc(hidden)]
pub mod services;
#[doc(hidden)]
pub mod util;

// Re-export common types for convenience
pub use errors::{CrawlerError, Result};
pub use models::rate::{CurrencyRate, RateChange, ScrapedRate};
pub use store::{RateQuery, RateStore};
