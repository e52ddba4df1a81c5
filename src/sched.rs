// src/sched.rs
//! Publication scheduler: three independent tracks over calendar time.
//!
//! - Cycle track: news-driven posts, gated by a minimum interval since the
//!   last cycle post and a daily quota. The daily counter resets lazily on
//!   access, so a process asleep across midnight still rolls over correctly.
//! - Morning/evening price tracks: each fires at most once per calendar day,
//!   inside a `hour:00..hour:15` window measured in a fixed named timezone
//!   (host-local time is never consulted). Price posts do not touch
//!   `last_cycle_post_time`.
//!
//! Eligibility checks never mutate publish bookkeeping; `record_*` is called
//! explicitly after a successful send, so a failed publish is immediately
//! retryable on the next tick.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Minutes past the top of the hour during which a price post may fire.
pub const PRICE_WINDOW_MINUTES: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSlot {
    Morning,
    Evening,
}

impl std::fmt::Display for PriceSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PriceSlot::Morning => write!(f, "morning"),
            PriceSlot::Evening => write!(f, "evening"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub min_cycle_interval: Duration,
    pub posts_per_day: u32,
    pub morning_hour: u32,
    pub evening_hour: u32,
    pub tz: Tz,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerState {
    pub last_cycle_post_time: Option<DateTime<Utc>>,
    pub last_morning_price_date: Option<NaiveDate>,
    pub last_evening_price_date: Option<NaiveDate>,
    pub posts_today: u32,
    pub posts_target: u32,
    pub day_reset_at: DateTime<Utc>,
}

impl SchedulerState {
    /// Fresh state anchored at today's local midnight.
    pub fn initial(now: DateTime<Utc>, tz: Tz, posts_target: u32) -> Self {
        Self {
            last_cycle_post_time: None,
            last_morning_price_date: None,
            last_evening_price_date: None,
            posts_today: 0,
            posts_target,
            day_reset_at: local_midnight(now, tz),
        }
    }
}

/// Midnight of `now`'s calendar day in `tz`, as a UTC instant.
fn local_midnight(now: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let local = now.with_timezone(&tz);
    tz.with_ymd_and_hms(local.year(), local.month(), local.day(), 0, 0, 0)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now)
}

#[derive(Debug)]
pub struct PublicationScheduler {
    cfg: SchedulerConfig,
    state: SchedulerState,
}

impl PublicationScheduler {
    pub fn new(cfg: SchedulerConfig, state: SchedulerState) -> Self {
        Self { cfg, state }
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.cfg
    }

    /// Lazy daily reset: roll the counter once we are a full day past the
    /// last reset anchor, however many ticks or restarts happened meanwhile.
    pub fn roll_day_if_needed(&mut self, now: DateTime<Utc>) {
        if now >= self.state.day_reset_at + Duration::days(1) {
            self.state.posts_today = 0;
            self.state.posts_target = self.cfg.posts_per_day;
            self.state.day_reset_at = local_midnight(now, self.cfg.tz);
            info!(
                target: "sched",
                target_posts = self.state.posts_target,
                "new day, daily counter reset"
            );
        }
    }

    /// May a cycle (news-driven) post be published at `now`?
    pub fn cycle_eligible(&mut self, now: DateTime<Utc>) -> bool {
        self.roll_day_if_needed(now);

        if self.state.posts_today >= self.state.posts_target {
            debug!(target: "sched", posts_today = self.state.posts_today, "daily quota exhausted");
            return false;
        }

        if let Some(last) = self.state.last_cycle_post_time {
            let elapsed = now.signed_duration_since(last);
            if elapsed < self.cfg.min_cycle_interval {
                debug!(
                    target: "sched",
                    elapsed_secs = elapsed.num_seconds(),
                    min_secs = self.cfg.min_cycle_interval.num_seconds(),
                    "too soon since last cycle post"
                );
                return false;
            }
        }

        true
    }

    /// Which price slot, if any, is due at `now`. Morning is checked first.
    pub fn due_price_slot(&mut self, now: DateTime<Utc>) -> Option<PriceSlot> {
        self.roll_day_if_needed(now);
        let local = now.with_timezone(&self.cfg.tz);
        let today = local.date_naive();

        if local.hour() == self.cfg.morning_hour
            && local.minute() <= PRICE_WINDOW_MINUTES
            && self.state.last_morning_price_date != Some(today)
        {
            return Some(PriceSlot::Morning);
        }
        if local.hour() == self.cfg.evening_hour
            && local.minute() <= PRICE_WINDOW_MINUTES
            && self.state.last_evening_price_date != Some(today)
        {
            return Some(PriceSlot::Evening);
        }
        None
    }

    /// Record a successful cycle publish.
    pub fn record_cycle_publish(&mut self, now: DateTime<Utc>) {
        self.state.last_cycle_post_time = Some(now);
        self.state.posts_today += 1;
    }

    /// Record a successful price publish. Counts against the daily total but
    /// leaves the cycle spacing anchor untouched.
    pub fn record_price_publish(&mut self, slot: PriceSlot, now: DateTime<Utc>) {
        let today = now.with_timezone(&self.cfg.tz).date_naive();
        match slot {
            PriceSlot::Morning => self.state.last_morning_price_date = Some(today),
            PriceSlot::Evening => self.state.last_evening_price_date = Some(today),
        }
        self.state.posts_today += 1;
    }

    /// Operational hint for the driving loop: poll every minute from five
    /// minutes before a price hour through the end of its window.
    pub fn near_price_window(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.cfg.tz);
        let near = |hour: u32| {
            ((local.hour() + 1) % 24 == hour && local.minute() >= 55)
                || (local.hour() == hour && local.minute() <= PRICE_WINDOW_MINUTES)
        };
        near(self.cfg.morning_hour) || near(self.cfg.evening_hour)
    }

    /// Replace bookkeeping wholesale (used when loading persisted state).
    pub fn restore(&mut self, state: SchedulerState) {
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msk() -> Tz {
        "Europe/Moscow".parse().unwrap()
    }

    fn cfg() -> SchedulerConfig {
        SchedulerConfig {
            min_cycle_interval: Duration::minutes(30),
            posts_per_day: 999,
            morning_hour: 11,
            evening_hour: 22,
            tz: msk(),
        }
    }

    fn at_msk(h: u32, m: u32) -> DateTime<Utc> {
        msk()
            .with_ymd_and_hms(2025, 9, 6, h, m, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn sched_at(now: DateTime<Utc>) -> PublicationScheduler {
        PublicationScheduler::new(cfg(), SchedulerState::initial(now, msk(), 999))
    }

    #[test]
    fn first_tick_is_eligible_without_warmup() {
        let now = at_msk(9, 0);
        let mut s = sched_at(now);
        assert!(s.cycle_eligible(now));
    }

    #[test]
    fn min_interval_blocks_back_to_back_posts() {
        let t0 = at_msk(9, 0);
        let mut s = sched_at(t0);
        s.record_cycle_publish(t0);
        // Two checks one second apart, both a second after the publish.
        assert!(!s.cycle_eligible(t0 + Duration::seconds(1)));
        assert!(!s.cycle_eligible(t0 + Duration::seconds(2)));
        assert!(s.cycle_eligible(t0 + Duration::minutes(30)));
    }

    #[test]
    fn quota_exhaustion_blocks() {
        let now = at_msk(9, 0);
        let mut s = PublicationScheduler::new(
            SchedulerConfig {
                posts_per_day: 2,
                ..cfg()
            },
            SchedulerState::initial(now, msk(), 2),
        );
        s.record_cycle_publish(now);
        s.record_cycle_publish(now);
        assert!(!s.cycle_eligible(now + Duration::hours(2)));
    }

    #[test]
    fn day_reset_rolls_counter_once() {
        let now = at_msk(9, 0);
        let mut s = sched_at(now);
        s.record_cycle_publish(now);
        assert_eq!(s.state().posts_today, 1);

        let next_day = now + Duration::days(1) + Duration::hours(1);
        s.roll_day_if_needed(next_day);
        assert_eq!(s.state().posts_today, 0);
        let anchor = s.state().day_reset_at;

        // Repeated checks the same day do not move the anchor again.
        s.roll_day_if_needed(next_day + Duration::hours(3));
        assert_eq!(s.state().day_reset_at, anchor);
    }

    #[test]
    fn restart_with_stale_reset_rolls_before_eligibility() {
        let yesterday = at_msk(9, 0) - Duration::days(1);
        let mut state = SchedulerState::initial(yesterday, msk(), 5);
        state.posts_today = 5;
        let mut s = PublicationScheduler::new(
            SchedulerConfig {
                posts_per_day: 5,
                ..cfg()
            },
            state,
        );
        // Quota looks exhausted, but the lazy reset fires first.
        assert!(s.cycle_eligible(at_msk(9, 0)));
        assert_eq!(s.state().posts_today, 0);
    }

    #[test]
    fn morning_price_fires_once_inside_window() {
        let now = at_msk(11, 3);
        let mut s = sched_at(now);
        assert_eq!(s.due_price_slot(now), Some(PriceSlot::Morning));
        s.record_price_publish(PriceSlot::Morning, now);
        // Polling every minute for the rest of the window stays quiet.
        for m in 4..=15 {
            assert_eq!(s.due_price_slot(at_msk(11, m)), None);
        }
        // Next day it is due again.
        assert_eq!(
            s.due_price_slot(now + Duration::days(1)),
            Some(PriceSlot::Morning)
        );
    }

    #[test]
    fn price_outside_window_not_due() {
        let mut s = sched_at(at_msk(10, 0));
        assert_eq!(s.due_price_slot(at_msk(10, 59)), None);
        assert_eq!(s.due_price_slot(at_msk(11, 16)), None);
        assert_eq!(s.due_price_slot(at_msk(22, 10)), Some(PriceSlot::Evening));
    }

    #[test]
    fn price_publish_leaves_cycle_track_alone() {
        let now = at_msk(11, 0);
        let mut s = sched_at(now);
        s.record_price_publish(PriceSlot::Morning, now);
        assert_eq!(s.state().last_cycle_post_time, None);
        assert!(s.cycle_eligible(now + Duration::seconds(1)));
    }

    #[test]
    fn near_window_detection() {
        let s = sched_at(at_msk(9, 0));
        assert!(s.near_price_window(at_msk(10, 55)));
        assert!(s.near_price_window(at_msk(11, 10)));
        assert!(s.near_price_window(at_msk(21, 58)));
        assert!(!s.near_price_window(at_msk(14, 30)));
    }

    #[test]
    fn near_window_wraps_midnight() {
        let now = at_msk(9, 0);
        let s = PublicationScheduler::new(
            SchedulerConfig {
                morning_hour: 0,
                ..cfg()
            },
            SchedulerState::initial(now, msk(), 999),
        );
        assert!(s.near_price_window(at_msk(23, 57)));
        assert!(s.near_price_window(at_msk(0, 10)));
        assert!(!s.near_price_window(at_msk(23, 30)));
    }
}
