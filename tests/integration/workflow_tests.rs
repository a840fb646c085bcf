//! Crawl workflow tests against mocked peer services

use rummage::config::{PeerApiConfig, ScraperConfig};
use rummage::events::{Event, EventScheduler, EventTag, ManualClock};
use rummage::scraper::{PageScraper, ScrapeReport};
use rummage::workflow::{
    LinkBatch, PeerClients, ScrapeTask, TaskCompletion, WorkflowOrchestrator, RETRY_DELAY,
};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NOW: u64 = 1_700_000_000_000;

fn peer(endpoint: &str, key: &str) -> PeerApiConfig {
    PeerApiConfig {
        endpoint: endpoint.to_string(),
        auth_key: key.to_string(),
    }
}

/// Endpoint on a port with nothing listening
fn closed_endpoint() -> String {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    format!("http://127.0.0.1:{}", port)
}

fn workflow_scheduler(page_store: &str, queue: &str, broker: &str) -> (EventScheduler, ManualClock) {
    let clock = ManualClock::new(NOW);
    let mut scheduler = EventScheduler::with_clock(Arc::new(clock.clone()));

    let peers = PeerClients::new(
        &peer(page_store, "store-key"),
        &peer(queue, "queue-key"),
        &peer(broker, "broker-key"),
    )
    .unwrap();
    let scraper = PageScraper::new(&ScraperConfig::default()).unwrap();
    WorkflowOrchestrator::new(scraper, peers).register(&mut scheduler);

    (scheduler, clock)
}

fn store_results_event(success: bool) -> Event {
    Event::with_value(
        EventTag::StoreResults,
        json!({ "success": success, "links": ["/a", "/b"], "task_id": "T1" }),
    )
}

fn pending_tags(scheduler: &EventScheduler) -> Vec<EventTag> {
    scheduler.pending().map(|e| e.tag()).collect()
}

#[tokio::test]
async fn test_stored_results_queue_links() {
    let store = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/webpage/add"))
        .and(header("AuthKey", "store-key"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&store)
        .await;

    let (mut scheduler, _clock) = workflow_scheduler(&store.uri(), &closed_endpoint(), &closed_endpoint());
    scheduler.enqueue(store_results_event(true)).unwrap();

    assert_eq!(
        scheduler.dispatch_one().await.unwrap(),
        Some(EventTag::StoreResults)
    );

    assert_eq!(pending_tags(&scheduler), vec![EventTag::AddLinksToQueue]);
    let batch: LinkBatch = scheduler.pending().next().unwrap().payload_as().unwrap();
    assert_eq!(batch.links, vec!["/a", "/b"]);
    assert_eq!(batch.task_id, "T1");
}

#[tokio::test]
async fn test_existing_page_counts_as_stored() {
    let store = MockServer::start().await;
    Mock::given(path("/webpage/add"))
        .respond_with(ResponseTemplate::new(406))
        .mount(&store)
        .await;

    let (mut scheduler, _clock) = workflow_scheduler(&store.uri(), &closed_endpoint(), &closed_endpoint());
    scheduler.enqueue(store_results_event(true)).unwrap();
    scheduler.dispatch_one().await.unwrap();

    assert_eq!(pending_tags(&scheduler), vec![EventTag::AddLinksToQueue]);
}

#[tokio::test]
async fn test_failed_scrape_ends_after_store() {
    let store = MockServer::start().await;
    Mock::given(path("/webpage/add"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&store)
        .await;

    let (mut scheduler, _clock) = workflow_scheduler(&store.uri(), &closed_endpoint(), &closed_endpoint());
    scheduler.enqueue(store_results_event(false)).unwrap();
    scheduler.dispatch_one().await.unwrap();

    assert!(scheduler.is_empty());
}

#[tokio::test]
async fn test_unreachable_page_store_retries_in_ten_seconds() {
    let (mut scheduler, clock) =
        workflow_scheduler(&closed_endpoint(), &closed_endpoint(), &closed_endpoint());
    let event = store_results_event(true);
    scheduler.enqueue(event.clone()).unwrap();

    scheduler.dispatch_one().await.unwrap();

    assert_eq!(pending_tags(&scheduler), vec![EventTag::StoreResults]);
    let retried = scheduler.pending().next().unwrap();
    assert_eq!(retried.payload(), event.payload());
    assert_eq!(retried.fire_at(), NOW + RETRY_DELAY.as_millis() as u64);

    // Not ready a millisecond early
    clock.advance(9_999);
    assert_eq!(scheduler.dispatch_one().await.unwrap(), None);
}

#[tokio::test]
async fn test_three_failures_then_success_queue_links_once() {
    let store = MockServer::start().await;
    Mock::given(path("/webpage/add"))
        .respond_with(ResponseTemplate::new(500).set_body_string("database busy"))
        .up_to_n_times(3)
        .mount(&store)
        .await;
    Mock::given(path("/webpage/add"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&store)
        .await;

    let (mut scheduler, clock) = workflow_scheduler(&store.uri(), &closed_endpoint(), &closed_endpoint());
    scheduler.enqueue(store_results_event(true)).unwrap();

    for attempt in 1..=3 {
        scheduler.dispatch_one().await.unwrap();
        assert_eq!(
            pending_tags(&scheduler),
            vec![EventTag::StoreResults],
            "after failed attempt {}",
            attempt
        );
        clock.advance(10_000);
    }

    scheduler.dispatch_one().await.unwrap();
    assert_eq!(pending_tags(&scheduler), vec![EventTag::AddLinksToQueue]);
    assert_eq!(store.received_requests().await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_queued_links_complete_the_task() {
    let queue = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/queue/add"))
        .and(header("AuthKey", "queue-key"))
        .and(body_json(json!({ "links": [{ "url": "/a" }, { "url": "/b" }] })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&queue)
        .await;

    let (mut scheduler, _clock) = workflow_scheduler(&closed_endpoint(), &queue.uri(), &closed_endpoint());
    let batch = LinkBatch {
        links: vec!["/a".to_string(), "/b".to_string()],
        task_id: "T1".to_string(),
    };
    scheduler
        .enqueue(Event::with_payload(EventTag::AddLinksToQueue, &batch).unwrap())
        .unwrap();
    scheduler.dispatch_one().await.unwrap();

    assert_eq!(pending_tags(&scheduler), vec![EventTag::SendCompleteTask]);
    let completion: TaskCompletion = scheduler.pending().next().unwrap().payload_as().unwrap();
    assert_eq!(
        completion,
        TaskCompletion {
            task_id: "T1".to_string(),
            is_successful: true
        }
    );
}

#[tokio::test]
async fn test_rejected_links_are_retried() {
    let queue = MockServer::start().await;
    Mock::given(path("/queue/add"))
        .respond_with(ResponseTemplate::new(406))
        .mount(&queue)
        .await;

    let (mut scheduler, _clock) = workflow_scheduler(&closed_endpoint(), &queue.uri(), &closed_endpoint());
    scheduler
        .enqueue(Event::with_value(
            EventTag::AddLinksToQueue,
            json!({ "links": [], "task_id": "T1" }),
        ))
        .unwrap();
    scheduler.dispatch_one().await.unwrap();

    assert_eq!(pending_tags(&scheduler), vec![EventTag::AddLinksToQueue]);
    assert_eq!(
        scheduler.pending().next().unwrap().fire_at(),
        NOW + RETRY_DELAY.as_millis() as u64
    );
}

#[tokio::test]
async fn test_completion_failure_is_retried_then_ends() {
    let broker = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/task/complete_task"))
        .and(header("AuthKey", "broker-key"))
        .and(body_json(json!({ "task_id": "T1", "is_successful": true })))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&broker)
        .await;
    Mock::given(path("/task/complete_task"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&broker)
        .await;

    let (mut scheduler, clock) = workflow_scheduler(&closed_endpoint(), &closed_endpoint(), &broker.uri());
    let completion = TaskCompletion {
        task_id: "T1".to_string(),
        is_successful: true,
    };
    scheduler
        .enqueue(Event::with_payload(EventTag::SendCompleteTask, &completion).unwrap())
        .unwrap();

    scheduler.dispatch_one().await.unwrap();
    assert_eq!(pending_tags(&scheduler), vec![EventTag::SendCompleteTask]);

    clock.advance(10_000);
    scheduler.dispatch_one().await.unwrap();
    assert!(scheduler.is_empty());
}

#[tokio::test]
async fn test_full_chain_from_new_task() {
    let site = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/widgets"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><head><title>Widgets</title>
               <meta name="description" content="All about widgets"></head>
               <body><a href="https://other.com/x">X</a><a href="mailto:team@example.com">Mail</a></body></html>"#,
        ))
        .mount(&site)
        .await;

    let peers = MockServer::start().await;
    Mock::given(path("/webpage/add"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&peers)
        .await;
    Mock::given(path("/queue/add"))
        .and(body_json(json!({ "links": [{ "url": "https://other.com/x" }] })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&peers)
        .await;
    Mock::given(path("/task/complete_task"))
        .and(body_json(json!({ "task_id": "T7", "is_successful": true })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&peers)
        .await;

    let (mut scheduler, _clock) = workflow_scheduler(&peers.uri(), &peers.uri(), &peers.uri());
    let task = ScrapeTask {
        url: format!("{}/widgets", site.uri()),
        task_type: "scrape".to_string(),
        task_id: "T7".to_string(),
    };
    scheduler
        .enqueue(Event::with_payload(EventTag::NewScrapeTask, &task).unwrap())
        .unwrap();

    assert_eq!(
        scheduler.dispatch_one().await.unwrap(),
        Some(EventTag::NewScrapeTask)
    );
    let report: ScrapeReport = scheduler.pending().next().unwrap().payload_as().unwrap();
    assert!(report.success);
    assert_eq!(report.details.title, "Widgets");

    let mut handled = Vec::new();
    while let Some(tag) = scheduler.dispatch_one().await.unwrap() {
        handled.push(tag);
    }

    assert_eq!(
        handled,
        vec![
            EventTag::StoreResults,
            EventTag::AddLinksToQueue,
            EventTag::SendCompleteTask
        ]
    );
    assert!(scheduler.is_empty());

    let store_body: serde_json::Value = peers.received_requests().await.unwrap()[0]
        .body_json()
        .unwrap();
    assert_eq!(store_body["metadata"]["abstract"], "All about widgets");
    assert_eq!(store_body["general_settings"]["successfully_read"], true);
}

#[tokio::test]
async fn test_active_url_query_is_empty_when_idle() {
    let (scheduler, _clock) =
        workflow_scheduler(&closed_endpoint(), &closed_endpoint(), &closed_endpoint());

    let active = rummage::workflow::query_active_url(&scheduler.handle()).unwrap();
    assert_eq!(active, None);
}
