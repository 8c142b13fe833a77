//! One-way outbound chat notifications. Delivery failures are logged and
//! swallowed; nothing in the engine ever waits on or retries a notification.

use log::{debug, warn};

use crate::config::NotifyConfig;

pub struct Notifier {
    client: Option<reqwest::Client>,
    webhook_url: String,
}

impl Notifier {
    pub fn new(config: &NotifyConfig) -> Self {
        if config.enabled && !config.webhook_url.is_empty() {
            Self {
                client: Some(reqwest::Client::new()),
                webhook_url: config.webhook_url.clone(),
            }
        } else {
            Self::disabled()
        }
    }

    pub fn disabled() -> Self {
        Self {
            client: None,
            webhook_url: String::new(),
        }
    }

    pub async fn send(&self, text: &str) {
        let Some(client) = &self.client else {
            debug!("notifier disabled, dropping: {text}");
            return;
        };

        let body = serde_json::json!({ "text": text });
        match client.post(&self.webhook_url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => debug!("notifier: delivered"),
            Ok(resp) => warn!("notifier: webhook returned {}", resp.status()),
            Err(e) => warn!("notifier: delivery failed: {e}"),
        }
    }
}
