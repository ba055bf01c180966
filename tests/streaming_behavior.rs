//! Behaviour tests for paged streaming: strategy selection, page planning,
//! fan-in ordering, early-stop tolerance, faults and cancellation.

mod support;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use probewire_core::{
    ClientError, ClientEvent, Content, ErrorKind, FilterOperator, SearchFilter, Strategy,
    TableQuery,
};
use support::{FakeServer, SensorRow};
use tokio::sync::broadcast;

fn ids(rows: &[SensorRow]) -> Vec<usize> {
    rows.iter().map(|row| row.objid).collect()
}

fn distinct(rows: &[SensorRow]) -> usize {
    rows.iter().map(|row| row.objid).collect::<HashSet<_>>().len()
}

// =============================================================================
// Parallel strategy
// =============================================================================

#[tokio::test]
async fn when_900_rows_exist_two_pages_are_fetched_concurrently_in_completion_order() {
    // Given: the first page is much slower than the second
    let server = Arc::new(
        FakeServer::with_rows(900).delay_page(0, Duration::from_millis(150)),
    );
    let client = support::client_for(server.clone(), support::fast_config()).await;

    // When: the sensors table is streamed
    let rows: Vec<SensorRow> = client
        .get(TableQuery::new(Content::Sensors))
        .await
        .expect("stream succeeds");

    // Then: both pages were in flight together and the faster one came first
    let pages: Vec<(usize, usize)> = server
        .page_requests()
        .iter()
        .map(|r| (r.start(), r.count()))
        .collect();
    assert_eq!(pages.len(), 2);
    assert!(pages.contains(&(0, 500)));
    assert!(pages.contains(&(500, 400)));
    assert_eq!(server.peak_in_flight(), 2);

    assert_eq!(rows.len(), 900);
    assert_eq!(distinct(&rows), 900);
    assert_eq!(rows[0].objid, 500, "page 1 finished first");
    assert_eq!(&ids(&rows)[400..], &(0..500).collect::<Vec<_>>()[..]);
}

#[tokio::test]
async fn when_1234_rows_exist_pages_are_500_500_234() {
    let server = Arc::new(FakeServer::with_rows(1_234));
    let client = support::client_for(server.clone(), support::fast_config()).await;

    let rows: Vec<SensorRow> = client
        .get(TableQuery::new(Content::Sensors).serial())
        .await
        .expect("stream succeeds");

    let pages: Vec<(usize, usize)> = server
        .page_requests()
        .iter()
        .map(|r| (r.start(), r.count()))
        .collect();
    assert_eq!(pages, vec![(0, 500), (500, 500), (1_000, 234)]);
    assert_eq!(rows.len(), 1_234);
}

#[tokio::test]
async fn when_total_is_exactly_the_threshold_the_stream_stays_parallel() {
    let server = Arc::new(FakeServer::with_rows(20_000));
    let client = support::client_for(server.clone(), support::fast_config()).await;
    let mut notifications = client.subscribe();

    let rows: Vec<SensorRow> = client
        .get(TableQuery::new(Content::Sensors))
        .await
        .expect("stream succeeds");

    assert_eq!(rows.len(), 20_000);
    assert_eq!(distinct(&rows), 20_000);
    assert_eq!(server.page_requests().len(), 40);
    assert!(server.peak_in_flight() > 1, "pages should overlap");
    while let Ok(event) = notifications.try_recv() {
        assert!(!matches!(event, ClientEvent::StrategySwitch { .. }));
    }
}

#[tokio::test]
async fn when_max_in_flight_is_configured_concurrent_pages_are_bounded() {
    let server = Arc::new(
        FakeServer::with_rows(2_500).delay_page(0, Duration::from_millis(20)),
    );
    let config = support::fast_config().with_max_in_flight(2);
    let client = support::client_for(server.clone(), config).await;

    let rows: Vec<SensorRow> = client
        .get(TableQuery::new(Content::Sensors))
        .await
        .expect("stream succeeds");

    assert_eq!(rows.len(), 2_500);
    assert!(server.peak_in_flight() <= 2);
}

// =============================================================================
// Serial strategy
// =============================================================================

#[tokio::test]
async fn when_25000_rows_exist_pages_are_fetched_one_at_a_time_in_order() {
    // Given: a result set above the 20,000 row threshold
    let server = Arc::new(FakeServer::with_rows(25_000));
    let client = support::client_for(server.clone(), support::fast_config()).await;
    let mut notifications = client.subscribe();

    // When: the table is streamed without asking for serial mode
    let rows: Vec<SensorRow> = client
        .get(TableQuery::new(Content::Sensors))
        .await
        .expect("stream succeeds");

    // Then: 50 sequential fetches, never more than one request in flight
    let pages = server.page_requests();
    assert_eq!(pages.len(), 50);
    assert!(pages.iter().all(|r| r.count() == 500));
    assert_eq!(
        pages.iter().map(|r| r.start()).collect::<Vec<_>>(),
        (0..50).map(|i| i * 500).collect::<Vec<_>>()
    );
    assert_eq!(server.peak_in_flight(), 1);
    assert_eq!(ids(&rows), (0..25_000).collect::<Vec<_>>());

    let mut switched = false;
    while let Ok(event) = notifications.try_recv() {
        if let ClientEvent::StrategySwitch { total, strategy, .. } = event {
            assert_eq!(total, 25_000);
            assert_eq!(strategy, Strategy::Serial);
            switched = true;
        }
    }
    assert!(switched, "threshold crossing should be announced");
}

#[tokio::test]
async fn when_serial_is_requested_small_results_are_yielded_in_page_order() {
    let server = Arc::new(
        FakeServer::with_rows(1_200).delay_page(0, Duration::from_millis(50)),
    );
    let client = support::client_for(server.clone(), support::fast_config()).await;

    let rows: Vec<SensorRow> = client
        .get(TableQuery::new(Content::Sensors).serial())
        .await
        .expect("stream succeeds");

    assert_eq!(ids(&rows), (0..1_200).collect::<Vec<_>>());
    assert_eq!(server.peak_in_flight(), 1);
}

#[tokio::test]
async fn when_server_overreports_its_total_serial_stream_stops_at_the_first_empty_page() {
    // Given: the server claims 1,500 rows but only has 700 (audit-log style anomaly)
    let server = Arc::new(FakeServer::misreporting(1_500, 700));
    let client = support::client_for(server.clone(), support::fast_config()).await;
    let mut notifications = client.subscribe();

    // When: streaming serially
    let rows: Vec<SensorRow> = client
        .get(TableQuery::new(Content::Sensors).serial())
        .await
        .expect("early stop is not an error");

    // Then: every real row arrives once and the stream ends quietly
    assert_eq!(ids(&rows), (0..700).collect::<Vec<_>>());
    assert_eq!(server.page_requests().len(), 3);

    let mut stopped = None;
    while let Ok(event) = notifications.try_recv() {
        if let ClientEvent::EarlyStop { yielded, reported_total, .. } = event {
            stopped = Some((yielded, reported_total));
        }
    }
    assert_eq!(stopped, Some((700, 1_500)));
}

#[tokio::test]
async fn when_server_overreports_its_total_parallel_stream_under_yields_without_error() {
    let server = Arc::new(FakeServer::misreporting(900, 600));
    let client = support::client_for(server, support::fast_config()).await;

    let rows: Vec<SensorRow> = client
        .get(TableQuery::new(Content::Sensors))
        .await
        .expect("short pages are not an error");

    assert_eq!(rows.len(), 600);
    assert_eq!(distinct(&rows), 600);
}

// =============================================================================
// Query shaping
// =============================================================================

#[tokio::test]
async fn limit_caps_the_rows_and_clips_the_final_page() {
    let server = Arc::new(FakeServer::with_rows(1_234));
    let client = support::client_for(server.clone(), support::fast_config()).await;

    let rows: Vec<SensorRow> = client
        .get(TableQuery::new(Content::Sensors).limit(600).serial())
        .await
        .expect("stream succeeds");

    assert_eq!(rows.len(), 600);
    let pages: Vec<(usize, usize)> = server
        .page_requests()
        .iter()
        .map(|r| (r.start(), r.count()))
        .collect();
    assert_eq!(pages, vec![(0, 500), (500, 100)]);
}

#[tokio::test]
async fn filters_and_columns_are_sent_with_every_page() {
    let server = Arc::new(FakeServer::with_rows(1_100));
    let client = support::client_for(server.clone(), support::fast_config()).await;
    let query = TableQuery::new(Content::Sensors)
        .columns(["objid", "name"])
        .filter(SearchFilter::new("status", FilterOperator::NotEquals, "5").expect("valid filter"));

    let _rows: Vec<SensorRow> = client.get(query).await.expect("stream succeeds");

    let requests = server.requests();
    assert!(requests.iter().any(|r| r.is_probe()));
    for request in requests.iter().filter(|r| r.path.ends_with("table.json")) {
        assert_eq!(request.param("content"), Some("sensors"));
        assert_eq!(request.param("columns"), Some("objid,name"));
        assert_eq!(request.param("filter_status"), Some("@neq(5)"));
    }
}

#[tokio::test]
async fn empty_result_set_yields_nothing_after_the_count_request() {
    let server = Arc::new(FakeServer::with_rows(0));
    let client = support::client_for(server.clone(), support::fast_config()).await;

    let rows: Vec<SensorRow> = client
        .get(TableQuery::new(Content::Sensors))
        .await
        .expect("stream succeeds");

    assert!(rows.is_empty());
    assert_eq!(server.requests().len(), 1);
}

// =============================================================================
// Transient page failures
// =============================================================================

fn retry_urls(notifications: &mut broadcast::Receiver<ClientEvent>) -> Vec<String> {
    let mut urls = Vec::new();
    while let Ok(event) = notifications.try_recv() {
        if let ClientEvent::Retry { url, .. } = event {
            urls.push(url);
        }
    }
    urls
}

#[tokio::test]
async fn when_a_parallel_page_fails_transiently_once_it_is_retried_invisibly() {
    // Given: the second page resets its connection on the first attempt
    let server = Arc::new(FakeServer::with_rows(900).flaky_page(500));
    let client = support::client_for(server.clone(), support::fast_config()).await;
    let mut notifications = client.subscribe();

    // When: the table is streamed
    let rows: Vec<SensorRow> = client
        .get(TableQuery::new(Content::Sensors))
        .await
        .expect("retried page is not an error");

    // Then: every row arrives exactly once and one retry was announced
    assert_eq!(rows.len(), 900);
    assert_eq!(distinct(&rows), 900);
    assert_eq!(server.page_requests().len(), 3);

    let urls = retry_urls(&mut notifications);
    assert_eq!(urls.len(), 1);
    assert!(urls[0].contains("start=500"), "retry names the page: {}", urls[0]);
}

#[tokio::test]
async fn retries_of_concurrent_pages_are_distinguishable() {
    let server = Arc::new(FakeServer::with_rows(900).flaky_page(0).flaky_page(500));
    let client = support::client_for(server, support::fast_config()).await;
    let mut notifications = client.subscribe();

    let rows: Vec<SensorRow> = client
        .get(TableQuery::new(Content::Sensors))
        .await
        .expect("retried pages are not an error");

    assert_eq!(distinct(&rows), 900);
    let urls = retry_urls(&mut notifications);
    assert_eq!(urls.len(), 2);
    assert_eq!(urls.iter().collect::<HashSet<_>>().len(), 2);
}

#[tokio::test]
async fn when_a_serial_page_fails_transiently_once_order_is_preserved() {
    let server = Arc::new(FakeServer::with_rows(1_200).flaky_page(500));
    let client = support::client_for(server, support::fast_config()).await;
    let mut notifications = client.subscribe();

    let rows: Vec<SensorRow> = client
        .get(TableQuery::new(Content::Sensors).serial())
        .await
        .expect("retried page is not an error");

    assert_eq!(ids(&rows), (0..1_200).collect::<Vec<_>>());
    assert_eq!(retry_urls(&mut notifications).len(), 1);
}

// =============================================================================
// Faults and cancellation
// =============================================================================

#[tokio::test]
async fn when_a_parallel_page_fails_earlier_rows_are_kept_and_pending_pages_are_reported() {
    // Given: page 0 is fast, page 1 fails, page 2 would take a long time
    let server = Arc::new(
        FakeServer::with_rows(1_500)
            .delay_page(500, Duration::from_millis(50))
            .delay_page(1_000, Duration::from_secs(30))
            .fail_page(500),
    );
    let client = support::client_for(server.clone(), support::fast_config()).await;

    // When: the stream is consumed to the end
    let mut stream = client
        .stream::<SensorRow>(TableQuery::new(Content::Sensors))
        .await
        .expect("count request succeeds");
    let mut rows = Vec::new();
    let mut failure = None;
    while let Some(item) = stream.next().await {
        match item {
            Ok(row) => rows.push(row),
            Err(error) => failure = Some(error),
        }
    }

    // Then: page 0 was delivered, the failure names page 1 and page 2 was abandoned
    assert_eq!(ids(&rows), (0..500).collect::<Vec<_>>());
    let failure = failure.expect("stream reports the failed page");
    assert_eq!(failure.kind(), ErrorKind::Server);
    match failure {
        ClientError::PageFetch { page, abandoned, .. } => {
            assert_eq!(page, 1);
            assert_eq!(abandoned, vec![2]);
        }
        other => panic!("unexpected error {other:?}"),
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.in_flight(), 0, "abandoned page must be cancelled");
}

#[tokio::test]
async fn when_a_serial_page_fails_the_stream_ends_with_that_error() {
    let server = Arc::new(FakeServer::with_rows(1_500).fail_page(500));
    let client = support::client_for(server.clone(), support::fast_config()).await;

    let items: Vec<Result<SensorRow, ClientError>> = client
        .stream::<SensorRow>(TableQuery::new(Content::Sensors).serial())
        .await
        .expect("count request succeeds")
        .collect()
        .await;

    assert_eq!(items.len(), 501);
    assert!(items[..500].iter().all(Result::is_ok));
    assert!(matches!(
        items[500],
        Err(ClientError::PageFetch { page: 1, .. })
    ));
    assert_eq!(server.page_requests().len(), 2, "no page after the failure");
}

#[tokio::test]
async fn when_the_consumer_stops_early_in_flight_pages_are_cancelled() {
    // Given: two fast pages and two very slow ones
    let server = Arc::new(
        FakeServer::with_rows(2_000)
            .delay_page(1_000, Duration::from_secs(30))
            .delay_page(1_500, Duration::from_secs(30)),
    );
    let client = support::client_for(server.clone(), support::fast_config()).await;

    // When: the consumer takes a handful of rows and drops the stream
    let mut stream = client
        .stream::<SensorRow>(TableQuery::new(Content::Sensors))
        .await
        .expect("count request succeeds");
    for _ in 0..10 {
        stream.next().await.expect("row available").expect("row ok");
    }
    drop(stream);

    // Then: the slow requests are torn down instead of running on
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.in_flight(), 0);
}

#[tokio::test]
async fn zero_page_size_is_rejected_before_any_request() {
    let server = Arc::new(FakeServer::with_rows(100));
    let client = support::client_for(server.clone(), support::fast_config()).await;
    let query = TableQuery::new(Content::Sensors).page_size(0);

    let result = client.get::<SensorRow>(query).await;

    assert!(matches!(result, Err(ClientError::InvalidRequest(_))));
    assert!(server.requests().is_empty());
}
