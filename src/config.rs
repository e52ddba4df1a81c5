// src/config.rs
//! Runtime configuration from environment variables (loaded via dotenvy in main).

use chrono::Duration;
use chrono_tz::Tz;
use std::path::PathBuf;

pub const ENV_TELEGRAM_BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
pub const ENV_CHANNEL_ID: &str = "CHANNEL_ID";
pub const ENV_NEWS_FEED_URL: &str = "NEWS_FEED_URL";
pub const ENV_NEWS_SCAN_LIMIT: &str = "NEWS_SCAN_LIMIT";
pub const ENV_DEEPSEEK_API_KEY: &str = "DEEPSEEK_API_KEY";
pub const ENV_DEEPSEEK_API_URL: &str = "DEEPSEEK_API_URL";
pub const ENV_NANOBANANA_API_KEY: &str = "NANOBANANA_API_KEY";
pub const ENV_NANOBANANA_API_URL: &str = "NANOBANANA_API_URL";
pub const ENV_COINGECKO_API_URL: &str = "COINGECKO_API_URL";
pub const ENV_COIN_ID: &str = "COIN_ID";
pub const ENV_POSTS_PER_DAY: &str = "POSTS_PER_DAY";
pub const ENV_MIN_MINUTES_BETWEEN_POSTS: &str = "MIN_MINUTES_BETWEEN_POSTS";
pub const ENV_PRICE_POST_MORNING_HOUR: &str = "PRICE_POST_MORNING_HOUR";
pub const ENV_PRICE_POST_EVENING_HOUR: &str = "PRICE_POST_EVENING_HOUR";
pub const ENV_SCHEDULE_TZ: &str = "SCHEDULE_TZ";
pub const ENV_STATE_PATH: &str = "STATE_PATH";
pub const ENV_SEEN_IDS_PATH: &str = "SEEN_IDS_PATH";
pub const ENV_ADMIN_BIND: &str = "ADMIN_BIND";

pub const DEFAULT_DEEPSEEK_API_URL: &str = "https://api.deepseek.com/v1/chat/completions";
pub const DEFAULT_NANOBANANA_API_URL: &str = "https://api.nanobananaapi.ai";
pub const DEFAULT_COINGECKO_API_URL: &str = "https://api.coingecko.com/api/v3/simple/price";
pub const DEFAULT_COIN_ID: &str = "the-open-network";
pub const DEFAULT_SCHEDULE_TZ: &str = "Europe/Moscow";
pub const DEFAULT_STATE_PATH: &str = "poster_state.json";
pub const DEFAULT_SEEN_IDS_PATH: &str = "seen_ids.txt";
pub const DEFAULT_ADMIN_BIND: &str = "127.0.0.1:8080";

/// 999 means effectively unlimited; spacing is enforced by the min interval.
pub const DEFAULT_POSTS_PER_DAY: u32 = 999;
pub const DEFAULT_MIN_MINUTES_BETWEEN_POSTS: i64 = 30;
pub const DEFAULT_PRICE_POST_MORNING_HOUR: u32 = 11;
pub const DEFAULT_PRICE_POST_EVENING_HOUR: u32 = 22;
pub const DEFAULT_NEWS_SCAN_LIMIT: usize = 100;

#[derive(Debug, Clone)]
pub struct Config {
    pub telegram_bot_token: String,
    pub channel_id: String,
    pub news_feed_url: Option<String>,
    pub news_scan_limit: usize,
    pub deepseek_api_key: String,
    pub deepseek_api_url: String,
    pub nanobanana_api_key: String,
    pub nanobanana_api_url: String,
    pub coingecko_api_url: String,
    pub coin_id: String,
    pub posts_per_day: u32,
    pub min_cycle_interval: Duration,
    pub morning_hour: u32,
    pub evening_hour: u32,
    pub schedule_tz: Tz,
    pub state_path: PathBuf,
    pub seen_ids_path: PathBuf,
    pub admin_bind: String,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse::<T>().ok())
        .unwrap_or(default)
}

impl Config {
    /// Assemble configuration from the environment. Never fails: unknown or
    /// malformed values fall back to defaults with a warning, so the service
    /// can always cold-start.
    pub fn from_env() -> Self {
        let tz_name = env_or(ENV_SCHEDULE_TZ, DEFAULT_SCHEDULE_TZ);
        let schedule_tz: Tz = tz_name.parse().unwrap_or_else(|_| {
            tracing::warn!(tz = %tz_name, "unknown timezone, falling back to {DEFAULT_SCHEDULE_TZ}");
            DEFAULT_SCHEDULE_TZ.parse().expect("builtin tz name")
        });

        let min_minutes = parse_env(
            ENV_MIN_MINUTES_BETWEEN_POSTS,
            DEFAULT_MIN_MINUTES_BETWEEN_POSTS,
        )
        .max(0);

        Self {
            telegram_bot_token: env_or(ENV_TELEGRAM_BOT_TOKEN, ""),
            channel_id: env_or(ENV_CHANNEL_ID, ""),
            news_feed_url: std::env::var(ENV_NEWS_FEED_URL)
                .ok()
                .filter(|s| !s.trim().is_empty()),
            news_scan_limit: parse_env(ENV_NEWS_SCAN_LIMIT, DEFAULT_NEWS_SCAN_LIMIT),
            deepseek_api_key: env_or(ENV_DEEPSEEK_API_KEY, ""),
            deepseek_api_url: env_or(ENV_DEEPSEEK_API_URL, DEFAULT_DEEPSEEK_API_URL),
            nanobanana_api_key: env_or(ENV_NANOBANANA_API_KEY, ""),
            nanobanana_api_url: env_or(ENV_NANOBANANA_API_URL, DEFAULT_NANOBANANA_API_URL),
            coingecko_api_url: env_or(ENV_COINGECKO_API_URL, DEFAULT_COINGECKO_API_URL),
            coin_id: env_or(ENV_COIN_ID, DEFAULT_COIN_ID),
            posts_per_day: parse_env(ENV_POSTS_PER_DAY, DEFAULT_POSTS_PER_DAY),
            min_cycle_interval: Duration::minutes(min_minutes),
            morning_hour: parse_env(ENV_PRICE_POST_MORNING_HOUR, DEFAULT_PRICE_POST_MORNING_HOUR)
                .min(23),
            evening_hour: parse_env(ENV_PRICE_POST_EVENING_HOUR, DEFAULT_PRICE_POST_EVENING_HOUR)
                .min(23),
            schedule_tz,
            state_path: PathBuf::from(env_or(ENV_STATE_PATH, DEFAULT_STATE_PATH)),
            seen_ids_path: PathBuf::from(env_or(ENV_SEEN_IDS_PATH, DEFAULT_SEEN_IDS_PATH)),
            admin_bind: env_or(ENV_ADMIN_BIND, DEFAULT_ADMIN_BIND),
        }
    }
}
