//! Full stack over the real HTTP transport against a mock upstream.

mod common;

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{raw_item, test_settings};
use viewharvest::harvest::{HarvestError, Runtime};
use viewharvest::store::MemoryStore;

fn list_response(items: Vec<serde_json::Value>, cursor: &str, has_more: bool) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "application/json")
        .set_body_json(json!({
            "statusCode": 0,
            "itemList": items,
            "cursor": cursor,
            "hasMore": has_more,
        }))
}

fn runtime_for(server: &MockServer) -> Runtime {
    let mut settings = test_settings();
    settings.source.base_url = server.uri();
    settings.user_agent = None;
    Runtime::with_store(&settings, std::sync::Arc::new(MemoryStore::new())).unwrap()
}

#[tokio::test]
async fn walks_cursor_pages_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/post/item_list/"))
        .and(query_param("uniqueId", "alice"))
        .and(query_param("cursor", "0"))
        .respond_with(list_response(
            vec![raw_item(3, 3_000), raw_item(2, 2_000)],
            "1699999000",
            true,
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/post/item_list/"))
        .and(query_param("cursor", "1699999000"))
        .respond_with(list_response(vec![raw_item(1, 1_000)], "0", false))
        .expect(1)
        .mount(&server)
        .await;

    let runtime = runtime_for(&server);
    let report = runtime.service.refresh("alice", Some(10), false).await.unwrap();

    let ids: Vec<&str> = report.items.iter().map(|i| i.item.id.as_str()).collect();
    assert_eq!(ids, vec!["7000003", "7000002", "7000001"]);
    assert_eq!(report.items[0].item.metric, 3_000);
    assert_eq!(
        report.items[0].item.url,
        format!("{}/@alice/video/7000003", server.uri())
    );
}

#[tokio::test]
async fn upstream_not_found_status_code() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/post/item_list/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/json")
                .set_body_json(json!({"statusCode": 10221, "itemList": []})),
        )
        .mount(&server)
        .await;

    let runtime = runtime_for(&server);
    let err = runtime
        .service
        .refresh("ghost", None, false)
        .await
        .unwrap_err();
    assert_eq!(err, HarvestError::SubjectNotFound("ghost".to_string()));
}
