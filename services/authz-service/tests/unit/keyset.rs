//! Key set cache tests: single-flight refresh and stale fallback.

use std::sync::Arc;
use std::time::Duration;

use authz_service::jwt::KeySetCache;
use authz_service::{AuthzError, ErrorCode};
use futures::future::join_all;
use tokio_test::{assert_err, assert_ok};

use crate::common::{self, CountingSource, PRIMARY, ROTATED};

#[tokio::test]
async fn test_first_access_fetches_once() {
    let source = CountingSource::new(common::jwks(&[&PRIMARY]));
    let cache = KeySetCache::new(source.clone(), Duration::from_secs(3600));

    let set = cache.get_key_set().await.unwrap();
    assert!(set.find(PRIMARY.kid).is_some());
    cache.get_key_set().await.unwrap();

    assert_eq!(source.fetches(), 1);
    assert!(!cache.is_stale());
}

#[tokio::test]
async fn test_concurrent_refreshes_share_one_fetch() {
    let source = CountingSource::new(common::jwks(&[&PRIMARY]));
    let cache = Arc::new(KeySetCache::new(source.clone(), Duration::from_secs(3600)));

    let refreshes = (0..16).map(|_| {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move { cache.refresh().await })
    });
    for result in join_all(refreshes).await {
        assert_ok!(result.unwrap());
    }

    assert_eq!(source.fetches(), 1);
    assert_eq!(cache.fetch_count(), 1);
}

#[tokio::test]
async fn test_failed_refresh_serves_previous_set() {
    let source = CountingSource::new(common::jwks(&[&PRIMARY]));
    let cache = KeySetCache::new(source.clone(), Duration::from_secs(3600));
    cache.get_key_set().await.unwrap();

    source.set_failing(true);
    let stale = cache.refresh().await.unwrap();
    assert!(stale.find(PRIMARY.kid).is_some());
    assert_eq!(source.fetches(), 2);
}

#[tokio::test]
async fn test_no_set_and_failing_source_is_unavailable() {
    let source = CountingSource::new(common::jwks(&[&PRIMARY]));
    source.set_failing(true);
    let cache = KeySetCache::new(source, Duration::from_secs(3600));

    let err = assert_err!(cache.get_key_set().await);
    assert!(matches!(err, AuthzError::DiscoveryUnavailable { .. }));
    assert_eq!(err.code(), ErrorCode::DiscoveryUnavailable);
    assert!(cache.current().is_none());
}

#[tokio::test]
async fn test_refresh_replaces_whole_set() {
    let source = CountingSource::new(common::jwks(&[&PRIMARY]));
    let cache = KeySetCache::new(source.clone(), Duration::from_secs(3600));
    let before = cache.get_key_set().await.unwrap();

    source.publish(common::jwks(&[&ROTATED]));
    let after = cache.refresh().await.unwrap();

    assert!(after.find(ROTATED.kid).is_some());
    assert!(after.find(PRIMARY.kid).is_none());
    // The earlier snapshot is untouched.
    assert!(before.find(PRIMARY.kid).is_some());
    assert_eq!(after.len(), 1);
}

#[tokio::test]
async fn test_stale_set_refetched_on_access() {
    let source = CountingSource::new(common::jwks(&[&PRIMARY]));
    let cache = KeySetCache::new(source.clone(), Duration::ZERO);

    cache.get_key_set().await.unwrap();
    cache.get_key_set().await.unwrap();
    assert_eq!(source.fetches(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_refresh_runs_until_cancelled() {
    let source = CountingSource::new(common::jwks(&[&PRIMARY]));
    let cache = Arc::new(KeySetCache::new(source.clone(), Duration::from_secs(3600)));
    let cancel = tokio_util::sync::CancellationToken::new();

    let task = tokio::spawn(Arc::clone(&cache).run_refresh_loop(Duration::from_secs(60), cancel.clone()));

    tokio::time::sleep(Duration::from_secs(150)).await;
    assert_eq!(source.fetches(), 2);

    cancel.cancel();
    task.await.unwrap();
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(source.fetches(), 2);
}
