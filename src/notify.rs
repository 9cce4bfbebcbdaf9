use crate::config::Config;
use async_trait::async_trait;
use log::{info, warn};
use reqwest::Client;
use std::time::Duration;

const TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Receives operator-facing messages from import runs.
#[async_trait]
pub trait NotificationSink {
    /// Report normal progress.
    async fn notify(&self, text: &str);

    /// Report something that needs operator attention.
    async fn warn(&self, text: &str);
}

/// Logs every message and forwards it to a Telegram chat when both the bot
/// token and the chat id are configured. Delivery problems are logged and
/// swallowed; a notification must never take an import run down.
pub struct Notifier {
    telegram: Option<TelegramChannel>,
}

struct TelegramChannel {
    client: Client,
    token: String,
    chat_id: i64,
}

impl Notifier {
    pub fn from_config(config: &Config) -> Self {
        if config.telegram_bot_api_token.is_empty() || config.telegram_chat_id == 0 {
            return Self { telegram: None };
        }

        let client = match Client::builder().timeout(Duration::from_secs(30)).build() {
            Ok(client) => client,
            Err(e) => {
                warn!("Unable to build a Telegram HTTP client: {}", e);
                return Self { telegram: None };
            }
        };

        Self {
            telegram: Some(TelegramChannel {
                client,
                token: config.telegram_bot_api_token.clone(),
                chat_id: config.telegram_chat_id,
            }),
        }
    }

    async fn send_telegram(&self, text: &str) {
        let channel = match &self.telegram {
            Some(channel) => channel,
            None => return,
        };

        let url = format!("{}/bot{}/sendMessage", TELEGRAM_API_URL, channel.token);
        let form = [
            ("chat_id", channel.chat_id.to_string()),
            ("text", text.to_string()),
        ];

        match channel.client.post(&url).form(&form).send().await {
            Ok(response) => {
                if !response.status().is_success() {
                    warn!("Telegram API answered {} to a notification", response.status());
                }
            }
            Err(e) => warn!("Unable to deliver a Telegram notification: {}", e),
        }
    }
}

#[async_trait]
impl NotificationSink for Notifier {
    async fn notify(&self, text: &str) {
        info!("{}", text);
        self.send_telegram(text).await;
    }

    async fn warn(&self, text: &str) {
        warn!("{}", text);
        self.send_telegram(text).await;
    }
}
