// src/runloop.rs
//! The driving loop. One cooperative task issues at most one publish attempt
//! at a time; correctness never depends on the poll interval, which only
//! adapts for latency (every minute near a price window, the minimum cycle
//! interval otherwise).

use chrono::{Duration as ChronoDuration, Utc};
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::ingest::SourceError;
use crate::pipeline::Poster;
use crate::sched::PriceSlot;

const NEAR_WINDOW_POLL: Duration = Duration::from_secs(60);

pub fn spawn_poster_loop(poster: Arc<Poster>, min_cycle_interval: ChronoDuration) -> JoinHandle<()> {
    let fallback_poll = Duration::from_secs(min_cycle_interval.num_seconds().max(60) as u64);
    tokio::spawn(async move {
        info!(target: "runloop", "poster loop started");
        // First tick runs immediately: no warm-up delay after a (re)start.
        loop {
            counter!("poster_ticks_total").increment(1);

            for slot in [PriceSlot::Morning, PriceSlot::Evening] {
                let outcome = poster.try_price_post(slot, Utc::now()).await;
                if outcome.is_published() {
                    info!(target: "runloop", %slot, "price post published");
                }
            }

            match poster.try_cycle_post(Utc::now()).await {
                Ok(outcome) => {
                    if outcome.is_published() {
                        info!(target: "runloop", "cycle post published");
                    }
                }
                Err(SourceError::RateLimited { retry_after }) => {
                    // Flood control: honor the mandated pause, then resume.
                    warn!(target: "runloop", secs = retry_after.as_secs(), "source rate limit, suspending ingestion");
                    tokio::time::sleep(retry_after).await;
                    continue;
                }
                Err(SourceError::Unavailable(e)) => {
                    warn!(target: "runloop", error = %e, "news source unavailable, retrying next tick");
                }
            }

            let sleep = if poster.near_price_window(Utc::now()).await {
                NEAR_WINDOW_POLL
            } else {
                fallback_poll
            };
            tokio::time::sleep(sleep).await;
        }
    })
}
