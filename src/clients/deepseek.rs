// src/clients/deepseek.rs
//! Content generator over the DeepSeek chat-completions API. An empty or
//! missing completion maps to `Ok(None)` ("try again later"), which the
//! pipeline never retries within the same attempt.

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::pipeline::{ContentGenerator, GenerationRequest};
use crate::sched::PriceSlot;

const DEFAULT_SYSTEM_PROMPT: &str = "You run a crypto channel focused on the TON ecosystem. \
Write short, punchy posts of 3-5 sentences. Keep the key facts (names, numbers) from the \
source material. Plain text only: no markdown, no hashtags, no emoji walls. Never mention \
that the post is generated.";

#[derive(Clone)]
pub struct DeepSeekGenerator {
    api_url: String,
    api_key: String,
    system_prompt: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl DeepSeekGenerator {
    pub fn new(api_url: String, api_key: String) -> Self {
        Self {
            api_url,
            api_key,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            client: Client::new(),
            timeout: Duration::from_secs(60),
            max_retries: 2,
        }
    }

    pub fn with_system_prompt(mut self, prompt: String) -> Self {
        self.system_prompt = prompt;
        self
    }

    fn user_prompt(request: &GenerationRequest) -> String {
        match request {
            GenerationRequest::News { text } => {
                format!("Write a post reacting to this news item:\n\n{text}")
            }
            GenerationRequest::Price { quote, slot } => {
                let when = match slot {
                    PriceSlot::Morning => "morning",
                    PriceSlot::Evening => "evening",
                };
                format!(
                    "Write the daily {when} TON price post. Current price: ${:.4} \
                     ({:.2} RUB, {:+.2}% over 24h), 24h volume ${:.0}.",
                    quote.usd, quote.rub, quote.change_24h, quote.volume_24h
                )
            }
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[async_trait::async_trait]
impl ContentGenerator for DeepSeekGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Option<String>> {
        let user = Self::user_prompt(request);
        let payload = ChatRequest {
            model: "deepseek-chat",
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &self.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: 1.1,
        };

        let mut attempt: u8 = 0;
        let rsp = loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.api_url)
                .bearer_auth(&self.api_key)
                .timeout(self.timeout)
                .json(&payload)
                .send()
                .await;
            match res {
                Ok(rsp) if rsp.status().is_success() => break rsp,
                Ok(rsp) if attempt <= self.max_retries => {
                    debug!(target: "generate", status = %rsp.status(), attempt, "deepseek retry");
                    tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                }
                Ok(rsp) => return Err(anyhow!("deepseek HTTP error: {}", rsp.status())),
                Err(_) if attempt <= self.max_retries => {
                    tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                }
                Err(e) => return Err(anyhow!("deepseek request failed: {e}")),
            }
        };

        let body: ChatResponse = rsp.json().await.context("decoding deepseek response")?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PriceQuote;

    #[test]
    fn price_prompt_includes_both_currencies() {
        let request = GenerationRequest::Price {
            quote: PriceQuote {
                usd: 5.21,
                rub: 498.35,
                change_24h: -1.2,
                volume_24h: 1_000_000.0,
            },
            slot: PriceSlot::Morning,
        };
        let p = DeepSeekGenerator::user_prompt(&request);
        assert!(p.contains("morning"));
        assert!(p.contains("$5.2100"));
        assert!(p.contains("498.35 RUB"));
        assert!(p.contains("-1.20%"));
    }

    #[test]
    fn news_prompt_embeds_source_text() {
        let request = GenerationRequest::News {
            text: "BTC price up 5%".into(),
        };
        let p = DeepSeekGenerator::user_prompt(&request);
        assert!(p.contains("BTC price up 5%"));
    }
}
