//! Integration tests for a scrape node
//!
//! A task enters through the job API and is walked through the whole crawl
//! workflow by ticking the node, with wiremock standing in for the crawled
//! site and the peer services.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use rummage::config::parse_config;
use rummage::node::{router, JobApiState};
use rummage::{EventTag, ScrapeNode};
use serde_json::json;
use tower::ServiceExt;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a node configuration pointing every peer at `peers`
fn create_test_config(peers: &str) -> String {
    format!(
        r#"
[node]
listen-address = "127.0.0.1:0"
auth-key = "node-key"
tick-interval-ms = 10

[scraper]
timeout-ms = 2000

[page-store-api]
endpoint = "{peers}"
auth-key = "store-key"

[processing-queue-api]
endpoint = "{peers}"
auth-key = "queue-key"

[big-broker-api]
endpoint = "{peers}"
auth-key = "broker-key"

[messaging.connection]
host = "localhost"
username = "node"
password = "secret"

[[messaging.exchanges]]
name = "crawl"
exchange-type = "topic"

[messaging.consumer]
name = "scrape-tasks"
exchange = "crawl"
routing-keys = ["scrape.new"]
"#
    )
}

fn new_job_request(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/job/new_job")
        .header("content-type", "application/json")
        .header("AuthKey", "node-key")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_job_runs_through_every_peer() {
    let site = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/articles/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><head><title>Article One</title></head>
               <body><a href="2">Next</a><a href="/about">About</a></body></html>"#,
        ))
        .expect(1)
        .mount(&site)
        .await;

    let peers = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/webpage/add"))
        .and(header("AuthKey", "store-key"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&peers)
        .await;
    Mock::given(method("POST"))
        .and(path("/queue/add"))
        .and(header("AuthKey", "queue-key"))
        .and(body_json(json!({
            "links": [{ "url": format!("{}/articles/2", site.uri()) }]
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&peers)
        .await;
    Mock::given(method("POST"))
        .and(path("/task/complete_task"))
        .and(header("AuthKey", "broker-key"))
        .and(body_json(json!({ "task_id": "T42", "is_successful": true })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&peers)
        .await;

    let config = parse_config(&create_test_config(&peers.uri())).unwrap();
    let mut node = ScrapeNode::new(config).unwrap();
    let app = router(JobApiState::new("node-key", node.scheduler_handle()));

    let response = app
        .oneshot(new_job_request(json!({
            "url": format!("{}/articles/1", site.uri()),
            "task_type": "scrape",
            "task_id": "T42"
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut handled = Vec::new();
    for _ in 0..10 {
        match node.tick().await.unwrap() {
            Some(tag) => handled.push(tag),
            None => break,
        }
    }

    assert_eq!(
        handled,
        vec![
            EventTag::NewScrapeTask,
            EventTag::StoreResults,
            EventTag::AddLinksToQueue,
            EventTag::SendCompleteTask
        ]
    );
    assert!(node.scheduler().is_empty());
}

#[tokio::test]
async fn test_unreadable_page_is_stored_and_chain_ends() {
    let site = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&site)
        .await;

    let peers = MockServer::start().await;
    Mock::given(path("/webpage/add"))
        .and(body_json(json!({
            "general_settings": {
                "domain": site.uri(),
                "url_path": "/gone",
                "hash": "0X0DEAD",
                "successfully_read": false
            },
            "metadata": { "title": "", "abstract": "" }
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&peers)
        .await;
    Mock::given(path("/queue/add"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&peers)
        .await;
    Mock::given(path("/task/complete_task"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&peers)
        .await;

    let config = parse_config(&create_test_config(&peers.uri())).unwrap();
    let mut node = ScrapeNode::new(config).unwrap();
    let app = router(JobApiState::new("node-key", node.scheduler_handle()));

    let response = app
        .oneshot(new_job_request(json!({
            "url": format!("{}/gone", site.uri()),
            "task_type": "scrape",
            "task_id": "T43"
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(node.tick().await.unwrap(), Some(EventTag::NewScrapeTask));
    assert_eq!(node.tick().await.unwrap(), Some(EventTag::StoreResults));
    assert_eq!(node.tick().await.unwrap(), None);
    assert!(node.scheduler().is_empty());
}
