use std::collections::HashMap;
use std::fs;

use log::warn;
use serde::Deserialize;

// Crawler and API configuration, read from a YAML file. Every key is
// optional: a missing key takes its default below, and a missing or
// unreadable file yields the full default configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    // Currency presentation on the source pages mapped to its stored code.
    pub currency_codes: HashMap<String, String>,
    // When non-empty, only these codes are imported.
    pub currency_codes_filter: Vec<String>,
    pub number_of_days_to_check: u32,
    pub number_of_days_to_add: i64,
    pub database_path: String,
    pub database_busy_timeout: u64,
    pub user_agent: String,
    pub log_response_text: bool,
    pub telegram_bot_api_token: String,
    pub telegram_chat_id: i64,
    pub server_host: String,
    pub server_port: u16,
    pub heartbeat_current_rates_loading_event_lifespan: i64,
    pub heartbeat_historical_rates_loading_event_lifespan: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            currency_codes: HashMap::new(),
            currency_codes_filter: Vec::new(),
            number_of_days_to_check: 14,
            number_of_days_to_add: 1,
            database_path: "uaecb_rates.sqlite".to_string(),
            database_busy_timeout: 5,
            user_agent: String::new(),
            log_response_text: false,
            telegram_bot_api_token: String::new(),
            telegram_chat_id: 0,
            server_host: "127.0.0.1".to_string(),
            server_port: 8080,
            heartbeat_current_rates_loading_event_lifespan: 86_400,
            heartbeat_historical_rates_loading_event_lifespan: 604_800,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                warn!("Unable to read config {}: {}. Using defaults.", path, e);
                return Self::default();
            }
        };

        match serde_yaml::from_str(text.trim_start_matches('\u{feff}')) {
            Ok(config) => config,
            Err(e) => {
                warn!("Unable to parse config {}: {}. Using defaults.", path, e);
                Self::default()
            }
        }
    }

    // Codes of all configured currencies, deduplicated and sorted.
    pub fn known_currency_codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.currency_codes.values().cloned().collect();
        codes.sort();
        codes.dedup();
        codes
    }

    // Resolve a currency presentation on a source page to its code.
    pub fn currency_code(&self, presentation: &str) -> Option<&str> {
        self.currency_codes.get(presentation).map(String::as_str)
    }

    // An empty filter allows every code.
    pub fn is_currency_code_allowed(&self, code: &str) -> bool {
        self.currency_codes_filter.is_empty()
            || self.currency_codes_filter.iter().any(|c| c == code)
    }
}
