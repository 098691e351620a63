//! End-to-end harvest scenarios against a simulated source.

mod common;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use common::{paged, rate_limited, runtime_with, SimulatedSource};
use viewharvest::harvest::HarvestError;

#[tokio::test]
async fn alice_short_source_returns_everything_it_has() {
    let source = SimulatedSource::new(paged(40, 10, |n| n as u64 * 100));
    let (runtime, _) = runtime_with(source.clone());

    let report = runtime.service.view("alice", Some(50)).await.unwrap();

    assert_eq!(report.subject, "alice");
    assert_eq!(report.items.len(), 40);
    assert!(!report.cached);
    assert!(report.error.is_none());
    // Newest first.
    assert_eq!(report.items[0].item.id, "7000040");
    assert_eq!(report.items[39].item.id, "7000001");
    assert_eq!(source.fetches(), 4);
    assert_eq!(runtime.service.watched().await.unwrap(), vec!["alice"]);
}

#[tokio::test]
async fn bob_falls_back_to_cached_state_when_rate_limited() {
    let limited = Arc::new(AtomicBool::new(false));
    let flag = limited.clone();
    let healthy = paged(10, 30, |n| 1_000 + n as u64);
    let source = SimulatedSource::new(move |mode, target| {
        if flag.load(Ordering::SeqCst) {
            Ok(rate_limited())
        } else {
            healthy(mode, target)
        }
    });
    let (runtime, _) = runtime_with(source);

    let first = runtime.service.view("bob", None).await.unwrap();
    assert_eq!(first.items.len(), 10);
    assert!(!first.cached);

    limited.store(true, Ordering::SeqCst);
    let report = runtime.service.view("bob", None).await.unwrap();

    assert!(report.cached);
    assert_eq!(report.items.len(), 10);
    assert!(matches!(report.error, Some(HarvestError::RateLimited { .. })));
    assert_eq!(report.items[0].item.id, first.items[0].item.id);
}

#[tokio::test]
async fn unknown_subject_without_state_is_an_error() {
    let source = SimulatedSource::new(|_, _| {
        Ok(viewharvest::harvest::session::RawResponse::new(
            200,
            "application/json",
            r#"{"statusCode":10202,"itemList":[]}"#,
        ))
    });
    let (runtime, _) = runtime_with(source);

    let err = runtime.service.view("nobody", None).await.unwrap_err();
    assert!(matches!(err, HarvestError::SubjectNotFound(_)));
}

#[tokio::test]
async fn refresh_tracks_change_until_daily_reset() {
    let bump = Arc::new(AtomicU64::new(0));
    let extra = bump.clone();
    let source = SimulatedSource::new(paged(5, 30, move |n| {
        n as u64 * 1_000 + extra.load(Ordering::SeqCst)
    }));
    let (runtime, _) = runtime_with(source);
    runtime.service.watch("carol").await.unwrap();

    let outcomes = runtime.service.refresh_all(false).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].result, Ok(5));

    bump.store(500, Ordering::SeqCst);
    runtime.service.refresh_all(false).await.unwrap();
    let cached = runtime.service.cached("carol").await.unwrap().unwrap();
    // Item 1 went from 1000 to 1500.
    let item = cached
        .items
        .iter()
        .find(|i| i.item.id == "7000001")
        .unwrap();
    assert_eq!(item.baseline_views, 1_000);
    assert_eq!(item.change, 500);
    assert_eq!(item.change_percent, 50.0);

    runtime.service.refresh_all(true).await.unwrap();
    let cached = runtime.service.cached("carol").await.unwrap().unwrap();
    assert!(cached.items.iter().all(|i| i.change == 0));
}

#[tokio::test]
async fn removing_a_subject_forgets_its_baseline() {
    let source = SimulatedSource::new(paged(3, 30, |_| 10));
    let (runtime, _) = runtime_with(source);

    runtime.service.view("dave", None).await.unwrap();
    assert!(runtime.service.cached("dave").await.unwrap().is_some());

    assert!(runtime.service.remove("dave").await.unwrap());
    assert!(runtime.service.cached("dave").await.unwrap().is_none());
    assert!(!runtime.service.remove("dave").await.unwrap());
}
