use std::collections::BTreeMap;

use crux_adapters::kilter::BASE_SYNC_DATE;
use crux_adapters::{BoardClient, HttpClientConfig, KilterClient};
use mockito::Matcher;

fn seeded_cursors() -> BTreeMap<String, String> {
    ["ascents", "climbs"]
        .into_iter()
        .map(|table| (table.to_string(), BASE_SYNC_DATE.to_string()))
        .collect()
}

#[tokio::test]
async fn pager_stops_at_page_cap_when_vendor_never_completes() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/sync")
        .with_status(200)
        .with_body(
            r#"{"_complete":false,"ascents":[{"climb_uuid":"c1","angle":40,"difficulty":20,"climbed_at":"2024-03-01 10:00:00"}]}"#,
        )
        .expect(10)
        .create_async()
        .await;

    let client = KilterClient::new(server.url(), HttpClientConfig::default()).unwrap();
    let result = client.fetch_ascents_and_climbs("tok", None).await.unwrap();

    assert_eq!(result.ascents.len(), 10);
    mock.assert_async().await;
}

#[tokio::test]
async fn pager_threads_echoed_watermarks_into_the_next_request() {
    let mut server = mockito::Server::new_async().await;
    let first = server
        .mock("POST", "/sync")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("ascents".into(), BASE_SYNC_DATE.into()),
            Matcher::UrlEncoded("climbs".into(), BASE_SYNC_DATE.into()),
        ]))
        .with_status(200)
        .with_body(
            r#"{
                "_complete": false,
                "user_syncs": [{"table_name":"ascents","last_synchronized_at":"2024-03-02 08:00:00.000000"}],
                "shared_syncs": [{"table_name":"climbs","last_synchronized_at":"2024-03-01 09:00:00.000000"}]
            }"#,
        )
        .expect(1)
        .create_async()
        .await;
    let second = server
        .mock("POST", "/sync")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("ascents".into(), "2024-03-02 08:00:00.000000".into()),
            Matcher::UrlEncoded("climbs".into(), "2024-03-01 09:00:00.000000".into()),
        ]))
        .with_status(200)
        .with_body(r#"{"_complete": true}"#)
        .expect(1)
        .create_async()
        .await;

    let client = KilterClient::new(server.url(), HttpClientConfig::default()).unwrap();
    let mut pager = client.pager(seeded_cursors(), Some("tok"));
    assert!(pager.next_page().await.unwrap().is_some());
    assert!(pager.next_page().await.unwrap().is_some());
    assert!(pager.next_page().await.unwrap().is_none());
    assert!(pager.is_complete());
    assert_eq!(pager.pages_fetched(), 2);
    assert_eq!(pager.cursors()["ascents"], "2024-03-02 08:00:00.000000");

    first.assert_async().await;
    second.assert_async().await;
}

#[tokio::test]
async fn anonymous_pager_ignores_user_cursor_echoes() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/sync")
        .with_status(200)
        .with_body(
            r#"{
                "_complete": true,
                "user_syncs": [{"table_name":"ascents","last_synchronized_at":"2024-03-02 08:00:00.000000"}],
                "shared_syncs": [{"table_name":"climbs","last_synchronized_at":"2024-03-01 09:00:00.000000"}]
            }"#,
        )
        .create_async()
        .await;

    let client = KilterClient::new(server.url(), HttpClientConfig::default()).unwrap();
    let mut pager = client.pager(seeded_cursors(), None);
    pager.next_page().await.unwrap();

    assert_eq!(pager.cursors()["ascents"], BASE_SYNC_DATE);
    assert_eq!(pager.cursors()["climbs"], "2024-03-01 09:00:00.000000");
}

#[tokio::test]
async fn configured_page_cap_is_honoured() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/sync")
        .with_status(200)
        .with_body(r#"{"_complete":false}"#)
        .expect(3)
        .create_async()
        .await;

    let config = HttpClientConfig {
        max_pages: 3,
        ..HttpClientConfig::default()
    };
    let client = KilterClient::new(server.url(), config).unwrap();
    client.fetch_ascents_and_climbs("tok", None).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn mid_stream_failure_discards_the_partial_pull() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/sync")
        .match_body(Matcher::UrlEncoded("ascents".into(), BASE_SYNC_DATE.into()))
        .with_status(200)
        .with_body(
            r#"{"_complete":false,"shared_syncs":[{"table_name":"ascents","last_synchronized_at":"2024-01-01 00:00:00.000000"}]}"#,
        )
        .create_async()
        .await;
    server
        .mock("POST", "/sync")
        .match_body(Matcher::UrlEncoded(
            "ascents".into(),
            "2024-01-01 00:00:00.000000".into(),
        ))
        .with_status(502)
        .create_async()
        .await;

    let client = KilterClient::new(server.url(), HttpClientConfig::default()).unwrap();
    let err = client.fetch_ascents_and_climbs("tok", None).await.unwrap_err();
    assert_eq!(err.status(), Some(502));
}

#[test]
fn climb_url_points_at_public_page() {
    let client = KilterClient::new("http://localhost", HttpClientConfig::default()).unwrap();
    assert_eq!(
        client.climb_url("abc123"),
        "https://kilterboardapp.com/climbs/abc123"
    );
}
