use news_aggregator::sources::{DeliveryClient, HttpEventSink, ManagementClient};
use news_aggregator::types::*;
use news_aggregator::AggregatorConfig;
use serde_json::json;
use std::collections::HashMap;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ENTRIES_PATH: &str = "/spaces/space1/environments/master/entries";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .try_init();
}

fn config_for(server: &MockServer) -> AggregatorConfig {
    AggregatorConfig {
        space_id: "space1".to_string(),
        delivery_token: "cda-token".to_string(),
        management_token: "cma-token".to_string(),
        delivery_url: server.uri(),
        management_url: server.uri(),
        fetch: FetchConfig {
            page_size: 2,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn delivery_item(id: &str) -> serde_json::Value {
    json!({
        "sys": { "id": id, "type": "Entry", "createdAt": "2025-10-15T09:30:00.123Z" },
        "fields": {
            "title": format!("Title {}", id),
            "is_active": true,
            "image": { "sys": { "type": "Link", "linkType": "Asset", "id": format!("img-{}", id) } }
        }
    })
}

fn asset(id: &str, url: &str) -> serde_json::Value {
    json!({ "sys": { "id": id, "type": "Asset" }, "fields": { "file": { "url": url } } })
}

#[tokio::test]
async fn test_delivery_pages_through_all_entries() -> Result<()> {
    init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(ENTRIES_PATH))
        .and(query_param("content_type", "news"))
        .and(query_param("locale", "en-US"))
        .and(query_param("skip", "0"))
        .and(query_param("limit", "2"))
        .and(header("authorization", "Bearer cda-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": 3, "skip": 0, "limit": 2,
            "items": [delivery_item("a"), delivery_item("b")],
            "includes": { "Asset": [asset("img-a", "//images.example.com/a.png")] }
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(ENTRIES_PATH))
        .and(query_param("skip", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": 3, "skip": 2, "limit": 2,
            "items": [delivery_item("c")],
            "includes": { "Asset": [asset("img-c", "//images.example.com/c.png")] }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = DeliveryClient::new(&config_for(&server))?;
    let entries = client
        .fetch_all("news", None)
        .await
        .map_err(AggregatorError::TransientUpstream)?;

    assert_eq!(entries.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(), vec!["a", "b", "c"]);
    assert_eq!(entries[0].created_at.as_deref(), Some("2025-10-15T09:30:00.123Z"));
    assert_eq!(entries[0].linked_asset_url("image"), Some("//images.example.com/a.png"));
    assert_eq!(entries[1].linked_asset_url("image"), None);
    assert_eq!(entries[2].linked_asset_url("image"), Some("//images.example.com/c.png"));
    Ok(())
}

#[tokio::test]
async fn test_delivery_limited_fetch_is_single_page() -> Result<()> {
    init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(ENTRIES_PATH))
        .and(query_param("content_type", "novedadesFijas"))
        .and(query_param("limit", "8"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": 20,
            "items": [delivery_item("x1"), delivery_item("x2")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = DeliveryClient::new(&config_for(&server))?;
    let entries = client
        .fetch_all("novedadesFijas", Some(8))
        .await
        .map_err(AggregatorError::TransientUpstream)?;

    assert_eq!(entries.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_delivery_fetch_by_id() -> Result<()> {
    init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(ENTRIES_PATH))
        .and(query_param("sys.id", "known"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "total": 1, "items": [delivery_item("known")] })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(ENTRIES_PATH))
        .and(query_param("sys.id", "pending"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "total": 0, "items": [] })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(ENTRIES_PATH))
        .and(query_param("sys.id", "missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(ENTRIES_PATH))
        .and(query_param("sys.id", "flaky"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let client = DeliveryClient::new(&config_for(&server))?;

    let known = client.fetch_by_id("known").await;
    assert_eq!(known.ok().flatten().map(|e| e.id), Some("known".to_string()));
    assert_eq!(client.fetch_by_id("pending").await, Ok(None));
    assert_eq!(client.fetch_by_id("missing").await, Ok(None));
    assert!(matches!(
        client.fetch_by_id("flaky").await,
        Err(SourceError::Status { status: 502, .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_management_query_unpublish_and_delete() -> Result<()> {
    init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(ENTRIES_PATH))
        .and(query_param("content_type", "news"))
        .and(query_param("fields.expiration_date[lte]", "2025-10-19T12:00:00Z"))
        .and(header("authorization", "Bearer cma-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": 1,
            "items": [{
                "sys": { "id": "e1", "version": 7, "publishedVersion": 6 },
                "fields": { "title": { "en-US": "Old news" } }
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path(format!("{}/e1/published", ENTRIES_PATH)))
        .and(header("X-Contentful-Version", "7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sys": { "id": "e1", "version": 8 },
            "fields": { "title": { "en-US": "Old news" } }
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path(format!("{}/e1", ENTRIES_PATH)))
        .and(header("X-Contentful-Version", "8"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = ManagementClient::new(&config_for(&server))?;
    let filters = HashMap::from([(
        "fields.expiration_date[lte]".to_string(),
        "2025-10-19T12:00:00Z".to_string(),
    )]);

    let found = client
        .query("news", &filters)
        .await
        .map_err(AggregatorError::ManagementApi)?;
    assert_eq!(found.len(), 1);
    assert!(found[0].is_published());
    assert_eq!(found[0].str_field("title", "en-US"), Some("Old news"));

    let unpublished = client
        .unpublish(&found[0])
        .await
        .map_err(AggregatorError::ManagementApi)?;
    assert_eq!(unpublished.version, 8);
    assert!(!unpublished.is_published());

    client
        .delete(&unpublished)
        .await
        .map_err(AggregatorError::ManagementApi)?;
    Ok(())
}

#[tokio::test]
async fn test_management_conflict_surfaces_status() -> Result<()> {
    init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path(format!("{}/e2", ENTRIES_PATH)))
        .respond_with(ResponseTemplate::new(409).set_body_string("VersionMismatch"))
        .mount(&server)
        .await;

    let client = ManagementClient::new(&config_for(&server))?;
    let result = client.delete(&ManagementEntry::new("e2", 1)).await;

    assert_eq!(
        result,
        Err(SourceError::Status {
            status: 409,
            body: "VersionMismatch".to_string()
        })
    );
    Ok(())
}

#[tokio::test]
async fn test_event_bridge_posts_single_record() -> Result<()> {
    init_tracing();
    let server = MockServer::start().await;

    let payload = r#"{"type":"REMOVED","id":"e1","item":null}"#;
    Mock::given(method("POST"))
        .and(path("/topics/websocket"))
        .and(header("content-type", "application/vnd.kafka.json.v2+json"))
        .and(body_json(json!({ "records": [{ "value": payload }] })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let sink = HttpEventSink::new(&server.uri(), &FetchConfig::default())?;
    sink.publish("websocket", payload.to_string())
        .await
        .map_err(AggregatorError::TransientUpstream)?;
    Ok(())
}

#[test]
fn test_clients_reject_bad_base_url() {
    let config = AggregatorConfig {
        delivery_url: "::not a url::".to_string(),
        ..Default::default()
    };
    assert!(matches!(DeliveryClient::new(&config), Err(AggregatorError::InvalidUrl(_))));
}
