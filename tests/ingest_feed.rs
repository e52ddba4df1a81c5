// tests/ingest_feed.rs
// Feed-to-tracker integration over the RSS fixture: filtering, seen-id
// persistence, and scan limits.

mod common;

use tempfile::tempdir;

use common::store_in;
use ton_autoposter::ingest::providers::rss::RssNewsSource;
use ton_autoposter::ingest::IngestionTracker;
use ton_autoposter::RelevanceEngine;

const FEED: &str = include_str!("fixtures/news_rss.xml");

#[tokio::test]
async fn poll_filters_and_marks_seen() {
    let dir = tempdir().unwrap();
    let store = store_in(&dir);
    let src = RssNewsSource::from_fixture("fixture", FEED);
    let relevance = RelevanceEngine::builtin();

    let mut tracker = IngestionTracker::new(store.clone());
    let fresh = tracker.poll(&src, &relevance, 30).await.unwrap();

    // The political story and the bare service link are filtered out; the
    // two crypto stories survive, newest first.
    assert_eq!(fresh.len(), 2);
    assert!(fresh[0].text.starts_with("Toncoin upgrade"));
    assert!(fresh[1].text.starts_with("BTC price up 5%"));
    // The html in the description was decoded and stripped.
    assert!(fresh[1].text.contains("Spot ETFs posted record inflows"));

    // The same feed yields nothing on a second poll.
    let again = tracker.poll(&src, &relevance, 30).await.unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn seen_ids_survive_restart() {
    let dir = tempdir().unwrap();
    let store = store_in(&dir);
    let src = RssNewsSource::from_fixture("fixture", FEED);
    let relevance = RelevanceEngine::builtin();

    let mut tracker = IngestionTracker::new(store.clone());
    let fresh = tracker.poll(&src, &relevance, 30).await.unwrap();
    assert_eq!(fresh.len(), 2);
    drop(tracker);

    let mut reborn = IngestionTracker::new(store);
    assert_eq!(reborn.seen_count(), 2);
    let again = reborn.poll(&src, &relevance, 30).await.unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn scan_limit_bounds_examined_items() {
    let dir = tempdir().unwrap();
    let store = store_in(&dir);
    let src = RssNewsSource::from_fixture("fixture", FEED);
    let relevance = RelevanceEngine::builtin();

    let mut tracker = IngestionTracker::new(store);
    // Limit applies to scanned items, not matches: only the newest item is
    // examined at all.
    let fresh = tracker.poll(&src, &relevance, 1).await.unwrap();
    assert_eq!(fresh.len(), 1);
    assert!(fresh[0].text.starts_with("Toncoin upgrade"));
    assert_eq!(tracker.seen_count(), 1);
}
