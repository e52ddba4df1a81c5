// src/ingest/providers/rss.rs
//! RSS-backed news source. Item ids are derived from the guid (or link, or
//! text) via SHA-256 so the same item always maps to the same id across
//! polls and restarts; the seen-id set depends on that stability.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::de::from_str;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::ingest::{NewsItem, NewsSource, SourceError};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}
#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}
#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

/// Stable i64 id from the first 8 bytes of SHA-256(key).
fn stable_id(key: &str) -> i64 {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

fn parse_rfc2822_to_utc(ts: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc2822(ts)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| DateTime::<Utc>::from_timestamp(0, 0).unwrap_or_default())
}

pub struct RssNewsSource {
    name: String,
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http { url: String, client: reqwest::Client },
}

impl RssNewsSource {
    pub fn from_fixture(name: &str, xml: &str) -> Self {
        Self {
            name: name.to_string(),
            mode: Mode::Fixture(xml.to_string()),
        }
    }

    pub fn from_url(name: &str, url: String) -> Self {
        Self {
            name: name.to_string(),
            mode: Mode::Http {
                url,
                client: reqwest::Client::new(),
            },
        }
    }

    fn parse_items_from_str(s: &str) -> Result<Vec<NewsItem>> {
        let xml_clean = scrub_html_entities_for_xml(s);
        let rss: Rss = from_str(&xml_clean).context("parsing rss xml")?;

        let mut out = Vec::with_capacity(rss.channel.item.len());
        for it in rss.channel.item {
            let text_raw = match (it.title.as_deref(), it.description.as_deref()) {
                (Some(t), Some(d)) if !d.is_empty() => format!("{t}. {d}"),
                (Some(t), _) => t.to_string(),
                (None, Some(d)) => d.to_string(),
                (None, None) => continue,
            };
            let key = it
                .guid
                .as_deref()
                .or(it.link.as_deref())
                .unwrap_or(&text_raw);

            out.push(NewsItem {
                id: stable_id(key),
                text: text_raw,
                published_at: it
                    .pub_date
                    .as_deref()
                    .map(parse_rfc2822_to_utc)
                    .unwrap_or_default(),
            });
        }
        // Feeds usually list newest first already; make it explicit.
        out.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        Ok(out)
    }
}

#[async_trait]
impl NewsSource for RssNewsSource {
    async fn fetch_recent(&self, limit: usize) -> Result<Vec<NewsItem>, SourceError> {
        let mut items = match &self.mode {
            Mode::Fixture(s) => Self::parse_items_from_str(s)?,
            Mode::Http { url, client } => {
                let resp = client
                    .get(url)
                    .send()
                    .await
                    .with_context(|| format!("rss http get {url}"))?;
                if resp.status().as_u16() == 429 {
                    let retry_after = resp
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok())
                        .unwrap_or(60);
                    return Err(SourceError::RateLimited {
                        retry_after: std::time::Duration::from_secs(retry_after),
                    });
                }
                let body = resp.text().await.context("rss http .text()")?;
                Self::parse_items_from_str(&body)?
            }
        };
        items.truncate(limit);
        Ok(items)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}
