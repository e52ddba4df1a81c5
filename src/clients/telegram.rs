// src/clients/telegram.rs
//! Channel publisher over the Telegram Bot API: `sendPhoto` with the post
//! text as caption when an image is available, `sendMessage` otherwise.

use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use crate::pipeline::ChannelPublisher;

#[derive(Clone)]
pub struct TelegramChannel {
    api_base: String,
    token: String,
    chat_id: String,
    client: Client,
    timeout: Duration,
}

impl TelegramChannel {
    pub fn new(token: String, chat_id: String) -> Self {
        Self {
            api_base: "https://api.telegram.org".to_string(),
            token,
            chat_id,
            client: Client::new(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_api_base(mut self, base: String) -> Self {
        self.api_base = base;
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    async fn call<T: Serialize>(&self, method: &str, payload: &T) -> Result<()> {
        let rsp = self
            .client
            .post(self.method_url(method))
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await
            .map_err(|e| anyhow!("telegram {method} request failed: {e}"))?;
        if let Err(e) = rsp.error_for_status_ref() {
            let body = rsp.text().await.unwrap_or_default();
            return Err(anyhow!("telegram {method} HTTP error: {e}: {body}"));
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[derive(Serialize)]
struct SendPhoto<'a> {
    chat_id: &'a str,
    photo: &'a str,
    caption: &'a str,
}

#[async_trait::async_trait]
impl ChannelPublisher for TelegramChannel {
    async fn send(&self, text: &str, image_url: Option<&str>) -> Result<()> {
        match image_url {
            Some(photo) => {
                self.call(
                    "sendPhoto",
                    &SendPhoto {
                        chat_id: &self.chat_id,
                        photo,
                        caption: text,
                    },
                )
                .await
            }
            None => {
                self.call(
                    "sendMessage",
                    &SendMessage {
                        chat_id: &self.chat_id,
                        text,
                    },
                )
                .await
            }
        }
    }
}
