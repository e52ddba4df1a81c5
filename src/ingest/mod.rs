// src/ingest/mod.rs
pub mod providers;

use crate::relevance::RelevanceEngine;
use crate::store::StateStore;
use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_scanned_total", "Feed items examined during polls.");
        describe_counter!("ingest_accepted_total", "New relevant items returned to the pipeline.");
        describe_counter!(
            "ingest_skipped_seen_total",
            "Items skipped because their id was already ingested."
        );
        describe_counter!(
            "ingest_skipped_irrelevant_total",
            "Items rejected by the relevance gate."
        );
        describe_counter!(
            "ingest_skipped_service_total",
            "Bare-URL/download service messages skipped."
        );
        describe_gauge!("ingest_last_poll_ts", "Unix ts of the last completed poll.");
    });
}

/// A single upstream news item. Identity is `id`; immutable once observed.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NewsItem {
    pub id: i64,
    pub text: String,
    pub published_at: DateTime<Utc>,
}

/// Upstream failures the ingestion path must react to differently.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Flood control: suspend polling for the given duration, then resume.
    #[error("rate limited by source, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
    #[error("source unavailable: {0}")]
    Unavailable(#[from] anyhow::Error),
}

/// An iterable feed of timestamped items, most recent first.
#[async_trait::async_trait]
pub trait NewsSource: Send + Sync {
    /// Fetch up to `limit` most recent items, newest first.
    async fn fetch_recent(&self, limit: usize) -> Result<Vec<NewsItem>, SourceError>;
    fn name(&self) -> &str;
}

/// Normalize feed text: entity decode, strip tags, straighten quotes,
/// collapse whitespace, cap length.
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    if out.chars().count() > 1500 {
        out = out.chars().take(1500).collect();
    }
    out
}

/// Service messages carry no publishable content: bare short links and
/// "Download ..." stubs.
pub fn is_service_message(text: &str) -> bool {
    text.starts_with("Download")
        || ((text.starts_with("http://") || text.starts_with("https://")) && text.len() < 100)
}

/// Tracks which upstream items have ever been examined, so polls never
/// re-scan old content. Returned items are immediately marked seen and the
/// id is appended to durable storage (fail-open).
#[derive(Debug)]
pub struct IngestionTracker {
    seen: HashSet<i64>,
    store: StateStore,
}

impl IngestionTracker {
    pub fn new(store: StateStore) -> Self {
        let seen = store.load_seen_ids();
        Self { seen, store }
    }

    #[cfg(test)]
    pub fn with_seen(store: StateStore, seen: HashSet<i64>) -> Self {
        Self { seen, store }
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// Poll the source for new, relevant items. Scans up to `limit` items in
    /// source order (newest first) and returns the ones that are unseen,
    /// non-empty, not service messages, and pass the relevance gate.
    pub async fn poll(
        &mut self,
        source: &dyn NewsSource,
        relevance: &RelevanceEngine,
        limit: usize,
    ) -> Result<Vec<NewsItem>, SourceError> {
        let items = source.fetch_recent(limit).await?;
        Ok(self.admit(items, relevance, source.name()))
    }

    /// Filter already-fetched items and mark the accepted ones as seen.
    /// Synchronous so callers can run the fetch outside their state lock.
    pub fn admit(
        &mut self,
        items: Vec<NewsItem>,
        relevance: &RelevanceEngine,
        source: &str,
    ) -> Vec<NewsItem> {
        ensure_metrics_described();

        let mut fresh = Vec::new();
        let mut skipped_seen = 0usize;
        let mut skipped_irrelevant = 0usize;
        let mut skipped_service = 0usize;

        for mut item in items {
            counter!("ingest_scanned_total").increment(1);

            if self.seen.contains(&item.id) {
                skipped_seen += 1;
                continue;
            }

            item.text = normalize_text(&item.text);
            if item.text.is_empty() {
                continue;
            }
            if is_service_message(&item.text) {
                skipped_service += 1;
                continue;
            }
            if !relevance.is_relevant(&item.text) {
                skipped_irrelevant += 1;
                debug!(target: "ingest", id = item.id, "not relevant");
                continue;
            }

            // Mark seen right away; a lost append only risks re-seeing the
            // item later, which the duplicate guard catches downstream.
            self.seen.insert(item.id);
            if let Err(e) = self.store.append_seen_id(item.id) {
                warn!(target: "ingest", id = item.id, error = %e, "failed to persist seen id, continuing");
            }
            info!(target: "ingest", id = item.id, "new relevant item");
            fresh.push(item);
        }

        counter!("ingest_accepted_total").increment(fresh.len() as u64);
        counter!("ingest_skipped_seen_total").increment(skipped_seen as u64);
        counter!("ingest_skipped_irrelevant_total").increment(skipped_irrelevant as u64);
        counter!("ingest_skipped_service_total").increment(skipped_service as u64);
        gauge!("ingest_last_poll_ts").set(Utc::now().timestamp().max(0) as f64);

        info!(
            target: "ingest",
            source,
            accepted = fresh.len(),
            skipped_seen,
            skipped_service,
            skipped_irrelevant,
            "poll finished"
        );

        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_strips_tags_and_collapses_ws() {
        let s = "  <b>BTC</b>&nbsp;&nbsp; up   5%  ";
        assert_eq!(normalize_text(s), "BTC up 5%");
    }

    #[test]
    fn service_message_detection() {
        assert!(is_service_message("Download our app"));
        assert!(is_service_message("https://t.me/somechannel/123"));
        assert!(!is_service_message(
            "https://example.com/a-very-long-analysis-url-with-context \
             that keeps going and describes a bitcoin ETF decision in detail"
        ));
        assert!(!is_service_message("BTC price up 5%"));
    }
}
