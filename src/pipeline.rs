// src/pipeline.rs
//! Publish orchestration. Owns the shared mutable state (ingestion tracker,
//! duplicate guard, scheduler) behind a single async mutex: the automatic
//! loop and the manual admin path both go through `Poster`. The lock covers
//! only the guard/eligibility checks and the post-send bookkeeping; the
//! long-latency external calls (the feed fetch, generation, the image wait,
//! the channel send) run with the lock released so the manual path and
//! /status never wait behind an automatic attempt.
//!
//! Order of operations on every attempt: guard checks first (before any
//! external call), then generation, then the channel send, and after a
//! successful send a repeated guard check plus the bookkeeping mutation and
//! a write-through snapshot save in one final critical section.

use anyhow::Result;
use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::dedup::DuplicateGuard;
use crate::ingest::{IngestionTracker, NewsSource, SourceError};
use crate::relevance::RelevanceEngine;
use crate::sched::{PriceSlot, PublicationScheduler};
use crate::store::{StateSnapshot, StateStore};

/// Poll cadence and cap for the image task wait: 36 * 5s = 3 minutes.
pub const IMAGE_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const IMAGE_POLL_MAX_ATTEMPTS: u32 = 36;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("posts_published_total", "Posts accepted by the channel.");
        describe_counter!(
            "posts_duplicate_rejected_total",
            "Publish attempts rejected by the duplicate guard."
        );
        describe_counter!("posts_failed_total", "Publish attempts that failed to send.");
        describe_counter!(
            "image_timeouts_total",
            "Image generations that timed out and fell back to text."
        );
    });
}

/// What a post is being generated from.
#[derive(Debug, Clone)]
pub enum GenerationRequest {
    News { text: String },
    Price { quote: PriceQuote, slot: PriceSlot },
}

/// Point-in-time quote from the price source.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PriceQuote {
    pub usd: f64,
    pub rub: f64,
    pub change_24h: f64,
    pub volume_24h: f64,
}

/// Freeform text generation. `Ok(None)` means "try again later"; it is never
/// retried within the same publish attempt.
#[async_trait::async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<Option<String>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTask(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageTaskStatus {
    Pending,
    Succeeded(String),
    Failed,
}

/// Asynchronous image generation: start a task, then poll it.
#[async_trait::async_trait]
pub trait ImageGenerator: Send + Sync {
    /// `Ok(None)` means the task could not be started; caller goes text-only.
    async fn start(&self, prompt: &str) -> Result<Option<ImageTask>>;
    async fn poll(&self, task: &ImageTask) -> Result<ImageTaskStatus>;
}

/// The channel the posts land in.
#[async_trait::async_trait]
pub trait ChannelPublisher: Send + Sync {
    async fn send(&self, text: &str, image_url: Option<&str>) -> Result<()>;
}

#[async_trait::async_trait]
pub trait PriceSource: Send + Sync {
    async fn latest(&self) -> Result<Option<PriceQuote>>;
}

/// Result of one publish attempt, granular enough for explicit operator acks.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum PublishOutcome {
    Published { with_image: bool },
    DuplicateContent,
    SourceConsumed,
    NotRelevant,
    GeneratorEmpty,
    NoFreshNews,
    NotEligible,
    NoQuote,
    SendFailed,
}

impl PublishOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, PublishOutcome::Published { .. })
    }
}

/// Which scheduler track a successful publish is recorded against.
#[derive(Debug, Clone, Copy)]
enum PublishTrack {
    Cycle,
    Price(PriceSlot),
}

struct SharedState {
    tracker: IngestionTracker,
    guard: DuplicateGuard,
    scheduler: PublicationScheduler,
}

/// Serializable view for the admin /status endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PosterStatus {
    pub scheduler: crate::sched::SchedulerState,
    pub seen_ids: usize,
    pub published_hashes: usize,
    pub published_source_ids: usize,
}

pub struct Poster {
    state: Mutex<SharedState>,
    store: StateStore,
    relevance: RelevanceEngine,
    source: Option<Arc<dyn NewsSource>>,
    generator: Arc<dyn ContentGenerator>,
    images: Arc<dyn ImageGenerator>,
    publisher: Arc<dyn ChannelPublisher>,
    prices: Arc<dyn PriceSource>,
    scan_limit: usize,
    image_poll_interval: Duration,
    image_poll_attempts: u32,
}

impl Poster {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tracker: IngestionTracker,
        guard: DuplicateGuard,
        scheduler: PublicationScheduler,
        store: StateStore,
        relevance: RelevanceEngine,
        source: Option<Arc<dyn NewsSource>>,
        generator: Arc<dyn ContentGenerator>,
        images: Arc<dyn ImageGenerator>,
        publisher: Arc<dyn ChannelPublisher>,
        prices: Arc<dyn PriceSource>,
        scan_limit: usize,
    ) -> Self {
        ensure_metrics_described();
        Self {
            state: Mutex::new(SharedState {
                tracker,
                guard,
                scheduler,
            }),
            store,
            relevance,
            source,
            generator,
            images,
            publisher,
            prices,
            scan_limit,
            image_poll_interval: IMAGE_POLL_INTERVAL,
            image_poll_attempts: IMAGE_POLL_MAX_ATTEMPTS,
        }
    }

    /// Shrink the image wait for tests.
    pub fn with_image_polling(mut self, interval: Duration, attempts: u32) -> Self {
        self.image_poll_interval = interval;
        self.image_poll_attempts = attempts;
        self
    }

    pub async fn status(&self) -> PosterStatus {
        let st = self.state.lock().await;
        PosterStatus {
            scheduler: st.scheduler.state().clone(),
            seen_ids: st.tracker.seen_count(),
            published_hashes: st.guard.hashes().len(),
            published_source_ids: st.guard.source_ids().len(),
        }
    }

    pub async fn near_price_window(&self, now: DateTime<Utc>) -> bool {
        self.state.lock().await.scheduler.near_price_window(now)
    }

    /// One cycle-track attempt at `now`: check eligibility, poll for fresh
    /// news, take the newest unconsumed item, generate, validate, publish.
    pub async fn try_cycle_post(&self, now: DateTime<Utc>) -> Result<PublishOutcome, SourceError> {
        let Some(source) = self.source.clone() else {
            return Ok(PublishOutcome::NoFreshNews);
        };

        {
            let mut st = self.state.lock().await;
            if !st.scheduler.cycle_eligible(now) {
                return Ok(PublishOutcome::NotEligible);
            }
        }

        // The feed fetch runs with the state lock released.
        let items = source.fetch_recent(self.scan_limit).await?;

        let item = {
            let mut st = self.state.lock().await;
            let fresh = st.tracker.admit(items, &self.relevance, source.name());
            // Newest first; skip items that already produced a post.
            let Some(item) = fresh.into_iter().find(|i| !st.guard.is_source_consumed(i.id)) else {
                return Ok(PublishOutcome::NoFreshNews);
            };
            item
        };

        info!(target: "publish", id = item.id, "publishing from news item");
        let request = GenerationRequest::News {
            text: item.text.clone(),
        };
        let content = match self.generator.generate(&request).await {
            Ok(Some(c)) if !c.trim().is_empty() => c,
            Ok(_) => {
                info!(target: "publish", "generator returned nothing, retrying next tick");
                return Ok(PublishOutcome::GeneratorEmpty);
            }
            Err(e) => {
                warn!(target: "publish", error = %e, "generator failed, retrying next tick");
                return Ok(PublishOutcome::GeneratorEmpty);
            }
        };

        // The generated text must itself pass the relevance gate.
        if !self.relevance.is_relevant(&content) {
            warn!(target: "publish", id = item.id, "generated post is off-topic, skipping");
            return Ok(PublishOutcome::NotRelevant);
        }

        Ok(self
            .publish_guarded(&content, Some(item.id), PublishTrack::Cycle, now)
            .await)
    }

    /// One price-track attempt for `slot` at `now`.
    pub async fn try_price_post(&self, slot: PriceSlot, now: DateTime<Utc>) -> PublishOutcome {
        {
            let mut st = self.state.lock().await;
            if st.scheduler.due_price_slot(now) != Some(slot) {
                return PublishOutcome::NotEligible;
            }
        }

        // Quote fetch and generation run with the state lock released.
        let quote = match self.prices.latest().await {
            Ok(Some(q)) => q,
            Ok(None) => return PublishOutcome::NoQuote,
            Err(e) => {
                warn!(target: "publish", error = %e, "price source failed");
                return PublishOutcome::NoQuote;
            }
        };

        let request = GenerationRequest::Price { quote, slot };
        let content = match self.generator.generate(&request).await {
            Ok(Some(c)) if !c.trim().is_empty() => c,
            Ok(_) => return PublishOutcome::GeneratorEmpty,
            Err(e) => {
                warn!(target: "publish", error = %e, "generator failed for price post");
                return PublishOutcome::GeneratorEmpty;
            }
        };

        let outcome = self
            .publish_guarded(&content, None, PublishTrack::Price(slot), now)
            .await;
        if outcome.is_published() {
            info!(target: "publish", %slot, "price post published");
        }
        outcome
    }

    /// Manual operator publish: provided text, optional pre-made image URL.
    /// Negative outcomes surface as explicit acks to the caller.
    pub async fn publish_manual(&self, content: &str, image_url: Option<&str>) -> PublishOutcome {
        {
            let st = self.state.lock().await;
            if st.guard.is_duplicate(content) {
                counter!("posts_duplicate_rejected_total").increment(1);
                return PublishOutcome::DuplicateContent;
            }
        }
        match self.publisher.send(content, image_url).await {
            Ok(()) => {
                let mut st = self.state.lock().await;
                if st.guard.is_duplicate(content) {
                    warn!(target: "publish", "identical post landed while the send ran, not recording");
                    counter!("posts_duplicate_rejected_total").increment(1);
                    return PublishOutcome::DuplicateContent;
                }
                st.guard.mark_published(content, None);
                st.scheduler.record_cycle_publish(Utc::now());
                self.persist(&st);
                counter!("posts_published_total").increment(1);
                info!(target: "publish", "manual post published");
                PublishOutcome::Published {
                    with_image: image_url.is_some(),
                }
            }
            Err(e) => {
                warn!(target: "publish", error = %e, "manual publish failed");
                counter!("posts_failed_total").increment(1);
                PublishOutcome::SendFailed
            }
        }
    }

    /// Guarded automatic publish. The duplicate checks and the bookkeeping
    /// mutation run in short critical sections; the image wait and the
    /// channel send run with the state lock released. After the send the
    /// checks are repeated, since another publish may have landed meanwhile.
    async fn publish_guarded(
        &self,
        content: &str,
        source_id: Option<i64>,
        track: PublishTrack,
        now: DateTime<Utc>,
    ) -> PublishOutcome {
        {
            let st = self.state.lock().await;
            if let Some(rejected) = Self::guard_rejection(&st, content, source_id) {
                return rejected;
            }
        }

        let prompt = build_image_prompt(content, matches!(track, PublishTrack::Price(_)));
        let image_url = self.wait_for_image(&prompt).await;

        let mut with_image = image_url.is_some();
        let sent = match self.publisher.send(content, image_url.as_deref()).await {
            Ok(()) => true,
            Err(e) => {
                warn!(target: "publish", error = %e, "send failed, retrying text-only");
                // One text-only fallback before declaring the attempt failed.
                match self.publisher.send(content, None).await {
                    Ok(()) => {
                        with_image = false;
                        true
                    }
                    Err(e2) => {
                        warn!(target: "publish", error = %e2, "text-only fallback failed");
                        false
                    }
                }
            }
        };

        if !sent {
            counter!("posts_failed_total").increment(1);
            return PublishOutcome::SendFailed;
        }

        let mut st = self.state.lock().await;
        if let Some(rejected) = Self::guard_rejection(&st, content, source_id) {
            warn!(target: "publish", "publish raced a concurrent identical attempt, not recording");
            return rejected;
        }
        st.guard.mark_published(content, source_id);
        match track {
            PublishTrack::Cycle => st.scheduler.record_cycle_publish(now),
            PublishTrack::Price(slot) => st.scheduler.record_price_publish(slot, now),
        }
        self.persist(&st);
        counter!("posts_published_total").increment(1);
        PublishOutcome::Published { with_image }
    }

    /// Idempotency gate shared by the pre-send and post-send checks.
    fn guard_rejection(
        st: &SharedState,
        content: &str,
        source_id: Option<i64>,
    ) -> Option<PublishOutcome> {
        if st.guard.is_duplicate(content) {
            warn!(target: "publish", "duplicate content, skipping");
            counter!("posts_duplicate_rejected_total").increment(1);
            return Some(PublishOutcome::DuplicateContent);
        }
        if let Some(id) = source_id {
            if st.guard.is_source_consumed(id) {
                warn!(target: "publish", id, "source item already consumed, skipping");
                counter!("posts_duplicate_rejected_total").increment(1);
                return Some(PublishOutcome::SourceConsumed);
            }
        }
        None
    }

    /// Bounded image wait: start the task, poll at a fixed interval up to the
    /// attempt cap. Timeout is not an error; the publish falls back to
    /// text-only. Dropping the future cancels the wait.
    async fn wait_for_image(&self, prompt: &str) -> Option<String> {
        let task = match self.images.start(prompt).await {
            Ok(Some(t)) => t,
            Ok(None) => return None,
            Err(e) => {
                warn!(target: "publish", error = %e, "image task start failed, going text-only");
                return None;
            }
        };

        for attempt in 1..=self.image_poll_attempts {
            tokio::time::sleep(self.image_poll_interval).await;
            match self.images.poll(&task).await {
                Ok(ImageTaskStatus::Succeeded(url)) => {
                    info!(target: "publish", attempt, "image ready");
                    return Some(url);
                }
                Ok(ImageTaskStatus::Failed) => {
                    warn!(target: "publish", attempt, "image generation failed, going text-only");
                    return None;
                }
                Ok(ImageTaskStatus::Pending) => continue,
                // A failed status check is treated like pending: keep waiting.
                Err(e) => {
                    warn!(target: "publish", attempt, error = %e, "image status check failed, still waiting");
                    continue;
                }
            }
        }
        warn!(
            target: "publish",
            attempts = self.image_poll_attempts,
            "image generation timed out, going text-only"
        );
        counter!("image_timeouts_total").increment(1);
        None
    }

    /// Write-through snapshot save after a successful publish. Best-effort:
    /// in-memory state stays authoritative if the write fails.
    fn persist(&self, st: &SharedState) {
        let snapshot = StateSnapshot::from_parts(
            st.scheduler.state(),
            st.guard.hashes(),
            st.guard.source_ids(),
        );
        self.store.save(&snapshot);
    }
}

/// Image prompt for the generator. Price posts get a chart-trend scene, news
/// posts reuse the leading words of the content.
pub fn build_image_prompt(content: &str, is_price_post: bool) -> String {
    const NO_TEXT: &str =
        "no text, no letters, no numbers, no captions, no labels, clean image without any writing";
    if is_price_post {
        format!(
            "realistic photo, cryptocurrency trading screen with a price chart, \
             trading terminal with multiple monitors, cinematic lighting, {NO_TEXT}"
        )
    } else {
        let lead: String = content
            .split_whitespace()
            .take(10)
            .collect::<Vec<_>>()
            .join(" ")
            .replace(['@', '#'], "");
        format!("realistic photo, meme style, {lead}, photorealistic, cinematic quality, {NO_TEXT}")
    }
}
