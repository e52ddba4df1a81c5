// src/store.rs
//! Durable state. Two records with different write cadences:
//!
//! - a JSON snapshot of scheduler bookkeeping + publication guard sets,
//!   rewritten atomically after every successful publish (write-through);
//! - an append-only text file of seen news item ids, one per line, appended
//!   on every poll so a crash loses at most the last write.
//!
//! `load` is total: a missing or corrupt file yields defaults with a warning
//! so the service can always cold-start. `save`/`append` are best-effort and
//! never fail the publish path.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::sched::SchedulerState;

/// The durable snapshot document. Human-inspectable JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub last_cycle_post_time: Option<DateTime<Utc>>,
    pub last_morning_price_date: Option<NaiveDate>,
    pub last_evening_price_date: Option<NaiveDate>,
    pub posts_today: u32,
    pub posts_target: u32,
    pub day_reset_at: DateTime<Utc>,
    #[serde(default)]
    pub published_content_hashes: Vec<String>,
    #[serde(default)]
    pub published_source_ids: Vec<i64>,
}

impl StateSnapshot {
    pub fn from_parts(
        sched: &SchedulerState,
        hashes: &HashSet<String>,
        source_ids: &HashSet<i64>,
    ) -> Self {
        let mut published_content_hashes: Vec<String> = hashes.iter().cloned().collect();
        published_content_hashes.sort();
        let mut published_source_ids: Vec<i64> = source_ids.iter().copied().collect();
        published_source_ids.sort_unstable();
        Self {
            last_cycle_post_time: sched.last_cycle_post_time,
            last_morning_price_date: sched.last_morning_price_date,
            last_evening_price_date: sched.last_evening_price_date,
            posts_today: sched.posts_today,
            posts_target: sched.posts_target,
            day_reset_at: sched.day_reset_at,
            published_content_hashes,
            published_source_ids,
        }
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        SchedulerState {
            last_cycle_post_time: self.last_cycle_post_time,
            last_morning_price_date: self.last_morning_price_date,
            last_evening_price_date: self.last_evening_price_date,
            posts_today: self.posts_today,
            posts_target: self.posts_target,
            day_reset_at: self.day_reset_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StateStore {
    state_path: PathBuf,
    seen_ids_path: PathBuf,
}

impl StateStore {
    pub fn new(state_path: impl Into<PathBuf>, seen_ids_path: impl Into<PathBuf>) -> Self {
        Self {
            state_path: state_path.into(),
            seen_ids_path: seen_ids_path.into(),
        }
    }

    /// Load the snapshot. Missing file means a fresh start; a corrupt file is
    /// logged at warning level and treated the same (re-publishing content
    /// from before the corruption is the accepted degraded behavior).
    pub fn load(&self) -> Option<StateSnapshot> {
        let content = match fs::read_to_string(&self.state_path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(target: "store", path = %self.state_path.display(), "no state file, starting clean");
                return None;
            }
            Err(e) => {
                warn!(target: "store", path = %self.state_path.display(), error = %e, "cannot read state file, starting clean");
                return None;
            }
        };
        match serde_json::from_str::<StateSnapshot>(&content) {
            Ok(snapshot) => {
                info!(
                    target: "store",
                    hashes = snapshot.published_content_hashes.len(),
                    source_ids = snapshot.published_source_ids.len(),
                    "state snapshot loaded"
                );
                Some(snapshot)
            }
            Err(e) => {
                warn!(target: "store", path = %self.state_path.display(), error = %e, "corrupt state file, starting clean");
                None
            }
        }
    }

    /// Persist the snapshot atomically (tmp + rename). Best-effort: failures
    /// are logged and swallowed, since the post already reached the channel.
    pub fn save(&self, snapshot: &StateSnapshot) {
        if let Err(e) = self.save_inner(snapshot) {
            warn!(target: "store", path = %self.state_path.display(), error = %e, "failed to save state snapshot");
        }
    }

    fn save_inner(&self, snapshot: &StateSnapshot) -> Result<()> {
        let json = serde_json::to_string_pretty(snapshot).context("serializing state snapshot")?;
        let tmp = self.state_path.with_extension("json.tmp");
        {
            let mut f = fs::File::create(&tmp)
                .with_context(|| format!("creating {}", tmp.display()))?;
            f.write_all(json.as_bytes())
                .with_context(|| format!("writing {}", tmp.display()))?;
            f.sync_all().ok();
        }
        fs::rename(&tmp, &self.state_path)
            .with_context(|| format!("renaming into {}", self.state_path.display()))?;
        Ok(())
    }

    /// Load the append-only seen-id set, skipping malformed lines.
    pub fn load_seen_ids(&self) -> HashSet<i64> {
        match fs::read_to_string(&self.seen_ids_path) {
            Ok(content) => {
                let ids: HashSet<i64> = content
                    .lines()
                    .filter_map(|l| l.trim().parse::<i64>().ok())
                    .collect();
                info!(target: "store", count = ids.len(), "seen ids loaded");
                ids
            }
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(target: "store", path = %self.seen_ids_path.display(), error = %e, "cannot read seen ids, starting clean");
                }
                HashSet::new()
            }
        }
    }

    /// Append a single seen id. Returns the error so the caller can log and
    /// continue (fail-open: losing the write only risks re-seeing the item).
    pub fn append_seen_id(&self, id: i64) -> Result<()> {
        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.seen_ids_path)
            .with_context(|| format!("opening {}", self.seen_ids_path.display()))?;
        writeln!(f, "{id}").with_context(|| format!("appending to {}", self.seen_ids_path.display()))?;
        Ok(())
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot() -> StateSnapshot {
        StateSnapshot {
            last_cycle_post_time: Some(Utc.with_ymd_and_hms(2025, 9, 6, 9, 0, 0).unwrap()),
            last_morning_price_date: Some(NaiveDate::from_ymd_opt(2025, 9, 6).unwrap()),
            last_evening_price_date: None,
            posts_today: 3,
            posts_target: 999,
            day_reset_at: Utc.with_ymd_and_hms(2025, 9, 5, 21, 0, 0).unwrap(),
            published_content_hashes: vec!["abc".into()],
            published_source_ids: vec![7, 9],
        }
    }

    #[test]
    fn save_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"), dir.path().join("seen.txt"));
        let snap = snapshot();
        store.save(&snap);
        assert_eq!(store.load(), Some(snap));
    }

    #[test]
    fn missing_file_loads_clean() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"), dir.path().join("seen.txt"));
        assert_eq!(store.load(), None);
    }

    #[test]
    fn corrupt_file_loads_clean() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json at all").unwrap();
        let store = StateStore::new(path, dir.path().join("seen.txt"));
        assert_eq!(store.load(), None);
    }

    #[test]
    fn seen_ids_append_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"), dir.path().join("seen.txt"));
        store.append_seen_id(11).unwrap();
        store.append_seen_id(12).unwrap();
        let ids = store.load_seen_ids();
        assert!(ids.contains(&11) && ids.contains(&12));
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn seen_ids_skip_garbage_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seen.txt");
        fs::write(&path, "11\nnot-a-number\n12\n\n").unwrap();
        let store = StateStore::new(dir.path().join("state.json"), path);
        assert_eq!(store.load_seen_ids().len(), 2);
    }
}
