// src/clients/nanobanana.rs
//! Image generator over the NanoBanana task API: POST a generation task,
//! then poll `record-info` until the task resolves. The upstream reports
//! progress via `successFlag`: 0 generating, 1 success, 2 create failed,
//! 3 generate failed.

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::pipeline::{ImageGenerator, ImageTask, ImageTaskStatus};

#[derive(Clone)]
pub struct NanoBananaImages {
    api_base: String,
    api_key: String,
    client: Client,
    timeout: Duration,
}

impl NanoBananaImages {
    pub fn new(api_base: String, api_key: String) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
            client: Client::new(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    prompt: &'a str,
    r#type: &'a str,
    call_back_url: &'a str,
    num_images: u8,
    image_size: &'a str,
}

#[derive(Deserialize)]
struct ApiEnvelope<T> {
    code: i32,
    msg: Option<String>,
    data: Option<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateData {
    task_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordInfo {
    success_flag: Option<i32>,
    response: Option<RecordResponse>,
    error_message: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordResponse {
    result_image_url: Option<String>,
    origin_image_url: Option<String>,
}

#[async_trait::async_trait]
impl ImageGenerator for NanoBananaImages {
    async fn start(&self, prompt: &str) -> Result<Option<ImageTask>> {
        let url = format!("{}/api/v1/nanobanana/generate", self.api_base);
        let payload = GenerateRequest {
            prompt,
            r#type: "TEXTTOIAMGE",
            // No public callback endpoint; completion is polled instead.
            call_back_url: "https://example.com/callback",
            num_images: 1,
            image_size: "1:1",
        };
        let rsp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
            .context("nanobanana generate request")?;
        if !rsp.status().is_success() {
            return Err(anyhow!("nanobanana generate HTTP error: {}", rsp.status()));
        }
        let body: ApiEnvelope<GenerateData> =
            rsp.json().await.context("decoding nanobanana generate")?;
        if body.code != 200 {
            debug!(target: "image", code = body.code, msg = ?body.msg, "nanobanana rejected task");
            return Ok(None);
        }
        Ok(body
            .data
            .and_then(|d| d.task_id)
            .map(ImageTask))
    }

    async fn poll(&self, task: &ImageTask) -> Result<ImageTaskStatus> {
        let url = format!("{}/api/v1/nanobanana/record-info", self.api_base);
        let rsp = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(10))
            .query(&[("taskId", task.0.as_str())])
            .send()
            .await
            .context("nanobanana record-info request")?;
        if !rsp.status().is_success() {
            return Err(anyhow!("nanobanana record-info HTTP error: {}", rsp.status()));
        }
        let body: ApiEnvelope<RecordInfo> =
            rsp.json().await.context("decoding nanobanana record-info")?;
        let Some(info) = body.data else {
            return Ok(ImageTaskStatus::Pending);
        };
        match info.success_flag {
            Some(1) => {
                let url = info
                    .response
                    .and_then(|r| r.result_image_url.or(r.origin_image_url));
                match url {
                    Some(u) => Ok(ImageTaskStatus::Succeeded(u)),
                    // Success without a URL is terminal, not worth more polling.
                    None => Ok(ImageTaskStatus::Failed),
                }
            }
            Some(2) | Some(3) => {
                debug!(target: "image", task = %task.0, error = ?info.error_message, "image task failed");
                Ok(ImageTaskStatus::Failed)
            }
            _ => Ok(ImageTaskStatus::Pending),
        }
    }
}
