use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrawlerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("Store error: {0}")]
    StoreError(#[from] rusqlite::Error),

    #[error("Date parsing error: {0}")]
    DateError(#[from] chrono::ParseError),

    #[error("Excel parsing error: {0}")]
    ExcelError(#[from] calamine::Error),

    #[error("Unexpected page structure: {0}")]
    PageError(String),

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

pub type Result<T> = std::result::Result<T, CrawlerError>;

// For creating errors from strings
impl From<String> for CrawlerError {
    fn from(s: String) -> Self {
        CrawlerError::Unknown(s)
    }
}

// For creating errors from &str
impl From<&str> for CrawlerError {
    fn from(s: &str) -> Self {
        CrawlerError::Unknown(s.to_string())
    }
}
