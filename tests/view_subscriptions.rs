// Views mounting and unmounting query subscriptions

use color_eyre::Result;
use color_eyre::eyre::eyre;
use govai_query::api::{
    AgencyFilters, AgencyList, EvaluationList, OpportunityFilters, Recommendation,
};
use govai_query::keys;
use govai_query::prelude::*;
use govai_query::transport::mock::MockBackend;
use reqwest::{Method, StatusCode};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{Duration, sleep, timeout};

fn govai_with(backend: &MockBackend, config: QueryConfig) -> GovAi {
    GovAi::with_client(
        Transport::new(backend.clone(), ClientConfig::new("http://api.test/api/v1")),
        QueryClient::with_config(config),
    )
}

fn config() -> QueryConfig {
    QueryConfig::new(Duration::from_secs(60), Duration::from_millis(50))
}

fn script_opportunities(backend: &MockBackend, delay: Duration) {
    backend.respond_after(
        Method::GET,
        "/api/v1/opportunities",
        delay,
        StatusCode::OK,
        json!({"evaluations": [], "total": 0}),
    );
}

async fn subscribers(client: &QueryClient, key: &QueryKey, expected: usize) {
    loop {
        let count = client
            .snapshot::<EvaluationList>(key)
            .map_or(0, |s| s.subscribers);
        if count == expected {
            return;
        }
        sleep(Duration::from_millis(1)).await;
    }
}

#[derive(Debug)]
enum Msg {
    Opportunities(QueryResult<EvaluationList>),
    Agencies(QueryResult<AgencyList>),
}

#[tokio::test]
async fn test_same_query_in_two_places_runs_once() -> Result<()> {
    let backend = MockBackend::new();
    script_opportunities(&backend, Duration::from_millis(10));
    let govai = govai_with(&backend, config());
    let filters = OpportunityFilters::new().limit(20);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut manager = SubscriptionManager::new(tx);
    manager.update([
        Subscription::new(govai.opportunities(&filters)).map(Msg::Opportunities),
        Subscription::new(govai.opportunities(&filters)).map(Msg::Opportunities),
    ]);
    assert_eq!(manager.len(), 1);

    let first = timeout(Duration::from_secs(1), rx.recv())
        .await?
        .ok_or_else(|| eyre!("channel closed"))?;
    assert!(matches!(first, Msg::Opportunities(ref r) if r.is_loading() && r.is_fetching));

    let second = timeout(Duration::from_secs(1), rx.recv())
        .await?
        .ok_or_else(|| eyre!("channel closed"))?;
    assert!(matches!(second, Msg::Opportunities(ref r) if r.is_success() && !r.is_fetching));

    let key = keys::opportunity_list(&filters);
    subscribers(govai.client(), &key, 1).await;
    assert_eq!(backend.count(&Method::GET, "/api/v1/opportunities"), 1);

    manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_changing_filters_swaps_subscription() -> Result<()> {
    let backend = MockBackend::new();
    script_opportunities(&backend, Duration::from_millis(5));
    let govai = govai_with(&backend, config());
    let all = OpportunityFilters::new();
    let bids = OpportunityFilters::new().recommendation(Recommendation::Bid);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut manager = SubscriptionManager::new(tx);
    let view = |filters: &OpportunityFilters| {
        vec![Subscription::new(govai.opportunities(filters)).map(Msg::Opportunities)]
    };

    manager.update(view(&all));
    subscribers(govai.client(), &keys::opportunity_list(&all), 1).await;

    manager.update(view(&bids));
    assert_eq!(manager.len(), 1);
    timeout(Duration::from_secs(1), async {
        subscribers(govai.client(), &keys::opportunity_list(&all), 0).await;
        subscribers(govai.client(), &keys::opportunity_list(&bids), 1).await;
    })
    .await?;

    // Unchanged set: nothing restarts
    manager.update(view(&bids));
    assert_eq!(manager.len(), 1);

    timeout(Duration::from_secs(1), async {
        while let Some(Msg::Opportunities(result)) = rx.recv().await {
            if result.is_success() && backend.count(&Method::GET, "/api/v1/opportunities") == 2 {
                break;
            }
        }
    })
    .await?;
    assert_eq!(backend.count(&Method::GET, "/api/v1/opportunities"), 2);

    manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_unmount_before_response_leaves_nothing_behind() -> Result<()> {
    let backend = MockBackend::new();
    script_opportunities(&backend, Duration::from_millis(30));
    let govai = govai_with(&backend, config());
    let filters = OpportunityFilters::new();
    let key = keys::opportunity_list(&filters);

    let (tx, _rx) = mpsc::unbounded_channel();
    let mut manager = SubscriptionManager::new(tx);
    manager.update([Subscription::new(govai.opportunities(&filters)).map(Msg::Opportunities)]);
    subscribers(govai.client(), &key, 1).await;

    manager.update([]);
    assert!(manager.is_empty());
    timeout(Duration::from_secs(1), subscribers(govai.client(), &key, 0)).await?;

    // The response still lands, then the idle entry is collected
    sleep(Duration::from_millis(200)).await;
    govai.client().gc();
    assert!(!govai.client().contains(&key));
    assert_eq!(backend.count(&Method::GET, "/api/v1/opportunities"), 1);
    Ok(())
}

#[tokio::test]
async fn test_quick_remount_reuses_cached_data() -> Result<()> {
    let backend = MockBackend::new();
    backend.respond(
        Method::GET,
        "/api/v1/agencies",
        StatusCode::OK,
        json!({"agencies": [{"id": "a1", "name": "Department of Energy"}], "total": 1}),
    );
    let govai = govai_with(
        &backend,
        QueryConfig::new(Duration::from_secs(60), Duration::from_secs(300)),
    );
    let filters = AgencyFilters::new();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut manager = SubscriptionManager::new(tx);
    let view = || [Subscription::new(govai.agencies(&filters)).map(Msg::Agencies)];

    manager.update(view());
    timeout(Duration::from_secs(1), async {
        while let Some(msg) = rx.recv().await {
            if matches!(msg, Msg::Agencies(ref r) if r.is_success()) {
                break;
            }
        }
    })
    .await?;
    manager.update([]);
    manager.update(view());

    let remounted = timeout(Duration::from_secs(1), rx.recv())
        .await?
        .ok_or_else(|| eyre!("channel closed"))?;
    match remounted {
        Msg::Agencies(result) => {
            let agencies = result.data().ok_or_else(|| eyre!("no cached data"))?;
            assert_eq!(agencies.agencies[0].name, "Department of Energy");
            assert!(!result.is_fetching);
        }
        Msg::Opportunities(_) => return Err(eyre!("unexpected message")),
    }
    assert_eq!(backend.count(&Method::GET, "/api/v1/agencies"), 1);

    manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_failed_refetch_keeps_last_good_data() -> Result<()> {
    let backend = MockBackend::new();
    backend.respond(
        Method::GET,
        "/api/v1/evaluations/stale-count",
        StatusCode::OK,
        json!({"stale_count": 3}),
    );
    backend.respond(
        Method::GET,
        "/api/v1/evaluations/stale-count",
        StatusCode::BAD_GATEWAY,
        json!({}),
    );
    let govai = govai_with(&backend, config());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut manager = SubscriptionManager::new(tx);
    manager.update([Subscription::new(govai.stale_count())]);
    timeout(Duration::from_secs(1), async {
        while let Some(result) = rx.recv().await {
            if result.is_success() {
                break;
            }
        }
    })
    .await?;

    govai.client().invalidate(&keys::evaluations());

    let failed = timeout(Duration::from_secs(1), async {
        while let Some(result) = rx.recv().await {
            if result.is_error() {
                return Some(result);
            }
        }
        None
    })
    .await?
    .ok_or_else(|| eyre!("channel closed"))?;
    assert_eq!(failed.error().and_then(QueryError::status), Some(502));
    assert_eq!(failed.data().map(|c| c.stale_count), Some(3));

    manager.shutdown().await;
    Ok(())
}
