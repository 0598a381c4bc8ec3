//! Best-effort operator notifications via a Telegram bot webhook.
//!
//! Delivery is fire-and-forget: the caller never waits and never sees a
//! failure. When no bot token or chat id is configured the notifier is
//! silently disabled.

use std::time::Duration;

use crate::config::NotifyConfig;

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct Notifier {
    client: reqwest::Client,
    bot_token: Option<String>,
    chat_id: Option<String>,
}

impl Notifier {
    pub fn from_config(config: &NotifyConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            bot_token: config.telegram_bot_token.clone(),
            chat_id: config.telegram_chat_id.clone(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.bot_token.is_some() && self.chat_id.is_some()
    }

    /// Dispatch a text notification and return immediately.
    pub fn notify(&self, text: String) {
        let (Some(bot_token), Some(chat_id)) = (self.bot_token.clone(), self.chat_id.clone())
        else {
            return;
        };
        let client = self.client.clone();

        tokio::spawn(async move {
            let url = format!("https://api.telegram.org/bot{bot_token}/sendMessage");
            let result = client
                .post(&url)
                .json(&serde_json::json!({ "chat_id": chat_id, "text": text }))
                .timeout(SEND_TIMEOUT)
                .send()
                .await;
            match result {
                Ok(resp) if !resp.status().is_success() => {
                    tracing::warn!(status = %resp.status(), "notification delivery rejected");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "notification delivery failed");
                }
            }
        });
    }
}
