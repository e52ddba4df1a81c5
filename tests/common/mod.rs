// tests/common/mod.rs
// Shared mock collaborators and a poster rig for the integration suites.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use chrono_tz::Tz;

use ton_autoposter::ingest::{NewsItem, NewsSource, SourceError};
use ton_autoposter::pipeline::{
    ChannelPublisher, ContentGenerator, GenerationRequest, ImageGenerator, ImageTask,
    ImageTaskStatus, PriceQuote, PriceSource,
};
use ton_autoposter::sched::{PublicationScheduler, SchedulerConfig, SchedulerState};
use ton_autoposter::{DuplicateGuard, IngestionTracker, Poster, RelevanceEngine, StateStore};

pub fn msk() -> Tz {
    "Europe/Moscow".parse().unwrap()
}

/// A fixed test day, expressed in the scheduling timezone.
pub fn at_msk(h: u32, m: u32) -> DateTime<Utc> {
    msk()
        .with_ymd_and_hms(2025, 9, 6, h, m, 0)
        .unwrap()
        .with_timezone(&Utc)
}

pub fn news(id: i64, text: &str) -> NewsItem {
    NewsItem {
        id,
        text: text.to_string(),
        published_at: at_msk(8, 0),
    }
}

pub fn quote() -> PriceQuote {
    PriceQuote {
        usd: 5.21,
        rub: 498.0,
        change_24h: 3.4,
        volume_24h: 180_000_000.0,
    }
}

/// Replays one prepared batch of items per poll, then empty feeds.
pub struct ScriptedSource {
    batches: Mutex<VecDeque<Vec<NewsItem>>>,
}

impl ScriptedSource {
    pub fn new(batches: Vec<Vec<NewsItem>>) -> Self {
        Self {
            batches: Mutex::new(batches.into()),
        }
    }
}

#[async_trait]
impl NewsSource for ScriptedSource {
    async fn fetch_recent(&self, limit: usize) -> Result<Vec<NewsItem>, SourceError> {
        let mut batches = self.batches.lock().unwrap();
        Ok(batches
            .pop_front()
            .unwrap_or_default()
            .into_iter()
            .take(limit)
            .collect())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Echoes the news text back as the generated post, counting calls.
#[derive(Default)]
pub struct EchoGenerator {
    pub calls: AtomicUsize,
}

#[async_trait]
impl ContentGenerator for EchoGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(match request {
            GenerationRequest::News { text } => text.clone(),
            GenerationRequest::Price { quote, slot } => format!(
                "TON {slot} price update: ${:.2}, {:+.1}% over 24h",
                quote.usd, quote.change_24h
            ),
        }))
    }
}

/// Always answers "try again later".
pub struct EmptyGenerator;

#[async_trait]
impl ContentGenerator for EmptyGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Records delivered posts; optionally fails the first N sends.
#[derive(Default)]
pub struct RecordingPublisher {
    sent: Mutex<Vec<(String, Option<String>)>>,
    fail_next: AtomicUsize,
}

impl RecordingPublisher {
    pub fn failing(n: usize) -> Self {
        Self {
            sent: Mutex::default(),
            fail_next: AtomicUsize::new(n),
        }
    }

    pub fn sent(&self) -> Vec<(String, Option<String>)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelPublisher for RecordingPublisher {
    async fn send(&self, text: &str, image_url: Option<&str>) -> Result<()> {
        if self.fail_next.load(Ordering::SeqCst) > 0 {
            self.fail_next.fetch_sub(1, Ordering::SeqCst);
            bail!("channel rejected the post");
        }
        self.sent
            .lock()
            .unwrap()
            .push((text.to_string(), image_url.map(str::to_string)));
        Ok(())
    }
}

pub enum MockImages {
    /// Task never starts; posts go text-only.
    Disabled,
    /// First status poll reports the image ready at this URL.
    Ready(String),
    /// Task starts but never finishes, forcing the timeout fallback.
    Stuck,
}

#[async_trait]
impl ImageGenerator for MockImages {
    async fn start(&self, _prompt: &str) -> Result<Option<ImageTask>> {
        Ok(match self {
            MockImages::Disabled => None,
            _ => Some(ImageTask("task-1".into())),
        })
    }

    async fn poll(&self, _task: &ImageTask) -> Result<ImageTaskStatus> {
        Ok(match self {
            MockImages::Ready(url) => ImageTaskStatus::Succeeded(url.clone()),
            _ => ImageTaskStatus::Pending,
        })
    }
}

pub struct StaticPrices(pub Option<PriceQuote>);

#[async_trait]
impl PriceSource for StaticPrices {
    async fn latest(&self) -> Result<Option<PriceQuote>> {
        Ok(self.0)
    }
}

pub fn store_in(dir: &tempfile::TempDir) -> StateStore {
    StateStore::new(dir.path().join("state.json"), dir.path().join("seen.txt"))
}

pub fn scheduler_at(now: DateTime<Utc>) -> PublicationScheduler {
    PublicationScheduler::new(
        SchedulerConfig {
            min_cycle_interval: ChronoDuration::minutes(30),
            posts_per_day: 999,
            morning_hour: 11,
            evening_hour: 22,
            tz: msk(),
        },
        SchedulerState::initial(now, msk(), 999),
    )
}

/// A fully wired poster over mock collaborators. The image wait is shrunk so
/// timeout paths finish in milliseconds.
#[allow(clippy::too_many_arguments)]
pub fn poster(
    store: StateStore,
    guard: DuplicateGuard,
    now: DateTime<Utc>,
    batches: Vec<Vec<NewsItem>>,
    generator: Arc<dyn ContentGenerator>,
    images: MockImages,
    publisher: Arc<RecordingPublisher>,
    prices: StaticPrices,
) -> Poster {
    Poster::new(
        IngestionTracker::new(store.clone()),
        guard,
        scheduler_at(now),
        store,
        RelevanceEngine::builtin(),
        Some(Arc::new(ScriptedSource::new(batches)) as Arc<dyn NewsSource>),
        generator,
        Arc::new(images),
        publisher,
        Arc::new(prices),
        30,
    )
    .with_image_polling(Duration::from_millis(1), 3)
}
