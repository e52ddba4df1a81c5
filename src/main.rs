//! Binary entrypoint: wires durable state, the publication pipeline, the
//! driving loop, and the Axum admin surface.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ton_autoposter::clients::{
    coingecko::CoinGeckoPrices, deepseek::DeepSeekGenerator, nanobanana::NanoBananaImages,
    telegram::TelegramChannel,
};
use ton_autoposter::ingest::providers::rss::RssNewsSource;
use ton_autoposter::ingest::{IngestionTracker, NewsSource};
use ton_autoposter::metrics::Metrics;
use ton_autoposter::{
    api, runloop, Config, DuplicateGuard, Poster, PublicationScheduler, RelevanceEngine,
    SchedulerConfig, SchedulerState, StateStore,
};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = Config::from_env();
    let store = StateStore::new(cfg.state_path.clone(), cfg.seen_ids_path.clone());

    // All durable state loads once at startup; anything unreadable means a
    // clean start (logged inside the store).
    let snapshot = store.load();
    let sched_state = snapshot
        .as_ref()
        .map(|s| s.scheduler_state())
        .unwrap_or_else(|| SchedulerState::initial(Utc::now(), cfg.schedule_tz, cfg.posts_per_day));
    let guard = snapshot
        .map(|s| {
            DuplicateGuard::new(
                s.published_content_hashes.into_iter().collect(),
                s.published_source_ids.into_iter().collect(),
            )
        })
        .unwrap_or_else(|| DuplicateGuard::new(HashSet::new(), HashSet::new()));

    let scheduler = PublicationScheduler::new(
        SchedulerConfig {
            min_cycle_interval: cfg.min_cycle_interval,
            posts_per_day: cfg.posts_per_day,
            morning_hour: cfg.morning_hour,
            evening_hour: cfg.evening_hour,
            tz: cfg.schedule_tz,
        },
        sched_state,
    );
    let tracker = IngestionTracker::new(store.clone());
    let relevance = RelevanceEngine::from_toml_or_builtin();

    let source: Option<Arc<dyn NewsSource>> = cfg
        .news_feed_url
        .clone()
        .map(|url| Arc::new(RssNewsSource::from_url("news", url)) as Arc<dyn NewsSource>);
    if source.is_none() {
        tracing::warn!("no NEWS_FEED_URL configured, cycle posts disabled");
    }

    let poster = Arc::new(Poster::new(
        tracker,
        guard,
        scheduler,
        store,
        relevance,
        source,
        Arc::new(DeepSeekGenerator::new(
            cfg.deepseek_api_url.clone(),
            cfg.deepseek_api_key.clone(),
        )),
        Arc::new(NanoBananaImages::new(
            cfg.nanobanana_api_url.clone(),
            cfg.nanobanana_api_key.clone(),
        )),
        Arc::new(TelegramChannel::new(
            cfg.telegram_bot_token.clone(),
            cfg.channel_id.clone(),
        )),
        Arc::new(CoinGeckoPrices::new(
            cfg.coingecko_api_url.clone(),
            cfg.coin_id.clone(),
        )),
        cfg.news_scan_limit,
    ));

    let metrics = Metrics::init();
    let router = api::create_router(api::AppState {
        poster: poster.clone(),
    })
    .merge(metrics.router());

    let _loop_handle = runloop::spawn_poster_loop(poster, cfg.min_cycle_interval);

    let listener = tokio::net::TcpListener::bind(&cfg.admin_bind)
        .await
        .with_context(|| format!("binding admin server to {}", cfg.admin_bind))?;
    tracing::info!(bind = %cfg.admin_bind, "admin server listening");
    axum::serve(listener, router).await.context("admin server")?;
    Ok(())
}
