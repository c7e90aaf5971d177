//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and run the full
//! fetch → parse → store cycle end-to-end against a SQLite database in a
//! temporary directory.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use sumi_harvest::config::{load_config, Config};
use sumi_harvest::crawler::{Orchestrator, StartMode, StopReason};
use sumi_harvest::state::{CrawlPhase, TaskOutcome};
use sumi_harvest::storage::{RecordStore, RunStatus, SqliteStore};
use tempfile::TempDir;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Creates a test configuration crawling `seeds` into `db_path`
fn create_test_config(seeds: Vec<String>, db_path: &Path) -> Config {
    let mut config = Config::default();
    config.seeds = seeds;
    config.crawler.max_depth = 2;
    config.crawler.max_concurrency = 4;
    config.crawler.respect_robots = false;
    config.crawler.shutdown_grace_ms = 1_000;
    config.rate_limit.min_interval_ms = 0;
    config.retry.max_retries = 3;
    config.retry.initial_backoff_ms = 10;
    config.retry.max_backoff_ms = 50;
    config.retry.jitter = 0.0;
    config.user_agent.crawler_name = "TestBot".to_string();
    config.output.database_path = db_path.to_string_lossy().into_owned();
    config
}

fn open_store(db_path: &Path) -> Arc<dyn RecordStore> {
    Arc::new(SqliteStore::new(db_path).expect("Failed to open store"))
}

fn html_page(title: &str, body: &str) -> ResponseTemplate {
    // set_body_string would override the content type with text/plain
    ResponseTemplate::new(200).set_body_raw(
        format!(
            "<html><head><title>{}</title></head><body>{}</body></html>",
            title, body
        ),
        "text/html",
    )
}

/// Responder that records when each request arrived
struct Timed {
    hits: Arc<Mutex<Vec<Instant>>>,
    body: String,
}

impl Respond for Timed {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.hits.lock().unwrap().push(Instant::now());
        html_page("timed", &self.body)
    }
}

#[tokio::test]
async fn test_crawl_a_to_b() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(html_page("A", r#"<a href="/b">B</a>"#))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(html_page("B", r#"<a href="/a">back</a>"#))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("harvest.db");
    let store = open_store(&db_path);
    let config = create_test_config(vec![format!("{}/a", base)], &db_path);

    let mut orchestrator = Orchestrator::new(config, Arc::clone(&store), StartMode::Fresh).unwrap();
    let report = orchestrator.run().await.unwrap();

    assert_eq!(report.phase, CrawlPhase::Drained);
    assert_eq!(report.dispatched, 2);
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.records_stored, 2);

    let visited: HashSet<String> = store.visited_urls().unwrap().into_iter().collect();
    let expected: HashSet<String> = [format!("{}/a", base), format!("{}/b", base)]
        .into_iter()
        .collect();
    assert_eq!(visited, expected);

    let sources: HashSet<String> = store
        .load_records()
        .unwrap()
        .into_iter()
        .map(|r| r.source_url)
        .collect();
    assert_eq!(sources, expected);

    let run = store.get_run(report.run_id).unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert!(store.load_frontier().unwrap().is_empty());
}

#[tokio::test]
async fn test_retry_then_success() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(3)
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(html_page("Finally", ""))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("harvest.db");
    let store = open_store(&db_path);
    let mut config = create_test_config(vec![format!("{}/flaky", server.uri())], &db_path);
    config.retry.max_retries = 5;

    let mut orchestrator = Orchestrator::new(config, Arc::clone(&store), StartMode::Fresh).unwrap();
    let report = orchestrator.run().await.unwrap();

    assert_eq!(report.phase, CrawlPhase::Drained);
    assert_eq!(report.count(TaskOutcome::Stored), 1);
    assert_eq!(report.failed(), 0);
    assert_eq!(store.count_records().unwrap(), 1);
}

#[tokio::test]
async fn test_exhausted_retries_do_not_halt_crawl() {
    let server = MockServer::start().await;
    let base = server.uri();

    // max-retries 5 means 6 attempts
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(500))
        .expect(6)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/up"))
        .respond_with(html_page("Up", ""))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("harvest.db");
    let store = open_store(&db_path);
    let mut config = create_test_config(
        vec![format!("{}/down", base), format!("{}/up", base)],
        &db_path,
    );
    config.retry.max_retries = 5;

    let mut orchestrator = Orchestrator::new(config, Arc::clone(&store), StartMode::Fresh).unwrap();
    let report = orchestrator.run().await.unwrap();

    assert_eq!(report.phase, CrawlPhase::Drained);
    assert_eq!(report.count(TaskOutcome::FetchFailed), 1);
    assert_eq!(report.count(TaskOutcome::Stored), 1);

    let failed = store.failed_pages(10).unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].0, format!("{}/down", base));
    assert!(failed[0].1.contains("6 attempts"));
}

#[tokio::test]
async fn test_empty_seeds_make_no_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(html_page("never", ""))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("harvest.db");
    let config = create_test_config(vec![], &db_path);

    let mut orchestrator = Orchestrator::new(config, open_store(&db_path), StartMode::Fresh).unwrap();
    let report = orchestrator.run().await.unwrap();

    assert_eq!(report.phase, CrawlPhase::Drained);
    assert_eq!(report.dispatched, 0);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_robots_disallow_is_skipped() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page(
            "Home",
            r#"<a href="/private/secret">x</a><a href="/public">y</a>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/public"))
        .respond_with(html_page("Public", ""))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/private/secret"))
        .respond_with(html_page("Secret", ""))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("harvest.db");
    let store = open_store(&db_path);
    let mut config = create_test_config(vec![format!("{}/", server.uri())], &db_path);
    config.crawler.respect_robots = true;

    let mut orchestrator = Orchestrator::new(config, Arc::clone(&store), StartMode::Fresh).unwrap();
    let report = orchestrator.run().await.unwrap();

    assert_eq!(report.count(TaskOutcome::Disallowed), 1);
    assert_eq!(report.count(TaskOutcome::Stored), 2);

    let outcomes = store.count_pages_by_outcome().unwrap();
    assert_eq!(outcomes.get(&TaskOutcome::Disallowed), Some(&1));
}

#[tokio::test]
async fn test_non_html_is_parse_failure() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page("Home", r#"<a href="/data.json">data</a>"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data.json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw("{\"a\": 1}", "application/json"),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("harvest.db");
    let config = create_test_config(vec![format!("{}/", base)], &db_path);

    let mut orchestrator = Orchestrator::new(config, open_store(&db_path), StartMode::Fresh).unwrap();
    let report = orchestrator.run().await.unwrap();

    assert_eq!(report.phase, CrawlPhase::Drained);
    assert_eq!(report.count(TaskOutcome::ParseFailed), 1);
    assert_eq!(report.count(TaskOutcome::Stored), 1);
}

#[tokio::test]
async fn test_recrawl_does_not_duplicate_records() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(html_page("A", r#"<a href="/b">B</a>"#))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(html_page("B", ""))
        .expect(2)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("harvest.db");
    let store = open_store(&db_path);
    let seeds = vec![format!("{}/a", server.uri())];

    let mut first = Orchestrator::new(
        create_test_config(seeds.clone(), &db_path),
        Arc::clone(&store),
        StartMode::Fresh,
    )
    .unwrap();
    let report = first.run().await.unwrap();
    assert_eq!(report.records_stored, 2);

    let mut second = Orchestrator::new(
        create_test_config(seeds, &db_path),
        Arc::clone(&store),
        StartMode::Fresh,
    )
    .unwrap();
    let report = second.run().await.unwrap();
    assert_eq!(report.records_stored, 0);
    assert_eq!(report.records_duplicate, 2);

    assert_eq!(store.count_records().unwrap(), 2);
}

#[tokio::test]
async fn test_extraction_rules_from_config_file() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/list"))
        .respond_with(html_page(
            "List",
            r#"<div class="item" data-sku="1"><h2>One</h2><a href="/items/1">more</a></div>
               <div class="item" data-sku="2"><h2> Two </h2></div>
               <a class="next" href="/list2">next</a>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/list2"))
        .respond_with(html_page(
            "List 2",
            r#"<div class="item" data-sku="2"><h2>Two again</h2></div>
               <div class="item" data-sku="3"><h2>Three</h2></div>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/items/"))
        .respond_with(html_page("Item", ""))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("harvest.db");
    let config_path = dir.path().join("harvest.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
seeds = ["{base}/list"]

[crawler]
max-depth = 1
respect-robots = false

[rate-limit]
min-interval-ms = 0

[output]
database-path = "{db}"

[links]
follow = ["a.next[href]"]

[[extract]]
name = "item"
container = "div.item"
key-fields = ["sku"]

[extract.fields]
sku = "@data-sku"
name = "h2"
link = "a@href"
"#,
            base = base,
            db = db_path.display()
        ),
    )
    .unwrap();

    let config = load_config(&config_path).unwrap();
    let store = open_store(&db_path);
    let mut orchestrator = Orchestrator::new(config, Arc::clone(&store), StartMode::Fresh).unwrap();
    let report = orchestrator.run().await.unwrap();

    assert_eq!(report.phase, CrawlPhase::Drained);
    assert_eq!(report.dispatched, 2);
    assert_eq!(report.records_stored, 3);
    assert_eq!(report.records_duplicate, 1);

    let records = store.load_records().unwrap();
    let first = records.iter().find(|r| r.fields["sku"] == "1").unwrap();
    assert_eq!(first.rule, "item");
    assert_eq!(first.fields["name"], "One");
    assert_eq!(first.fields["link"], format!("{}/items/1", base));

    let two = records.iter().find(|r| r.fields["sku"] == "2").unwrap();
    assert_eq!(two.fields["name"], "Two");
}

#[tokio::test]
async fn test_per_host_interval_respected() {
    let server = MockServer::start().await;
    let hits = Arc::new(Mutex::new(Vec::new()));

    let links: String = (1..=4)
        .map(|i| format!(r#"<a href="/p{}">{}</a>"#, i, i))
        .collect();
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(Timed {
            hits: Arc::clone(&hits),
            body: links,
        })
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/p\d$"))
        .respond_with(Timed {
            hits: Arc::clone(&hits),
            body: String::new(),
        })
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("harvest.db");
    let mut config = create_test_config(vec![format!("{}/", server.uri())], &db_path);
    config.rate_limit.min_interval_ms = 150;
    config.crawler.max_concurrency = 4;

    let mut orchestrator = Orchestrator::new(config, open_store(&db_path), StartMode::Fresh).unwrap();
    let report = orchestrator.run().await.unwrap();
    assert_eq!(report.succeeded(), 5);

    let mut hits = hits.lock().unwrap().clone();
    hits.sort();
    assert_eq!(hits.len(), 5);
    for pair in hits.windows(2) {
        // Small allowance for request transit
        assert!(pair[1] - pair[0] >= Duration::from_millis(130));
    }
}

#[tokio::test]
async fn test_max_pages_stops_and_resumes() {
    let server = MockServer::start().await;

    let links: String = (1..=5)
        .map(|i| format!(r#"<a href="/p{}">{}</a>"#, i, i))
        .collect();
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page("Home", &links))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/p\d$"))
        .respond_with(html_page("Leaf", ""))
        .expect(5)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("harvest.db");
    let store = open_store(&db_path);
    let seeds = vec![format!("{}/", server.uri())];

    let mut config = create_test_config(seeds.clone(), &db_path);
    config.crawler.max_concurrency = 1;
    config.crawler.max_pages = Some(2);

    let mut first = Orchestrator::new(config, Arc::clone(&store), StartMode::Fresh).unwrap();
    let report = first.run().await.unwrap();

    assert_eq!(report.phase, CrawlPhase::Stopped);
    assert_eq!(report.stop_reason, Some(StopReason::MaxPages));
    assert_eq!(report.dispatched, 2);
    assert_eq!(report.frontier_saved, 4);
    assert_eq!(store.load_frontier().unwrap().len(), 4);
    assert_eq!(
        store.get_run(report.run_id).unwrap().status,
        RunStatus::Interrupted
    );

    // The interrupted run is picked up automatically
    let mut second = Orchestrator::new(
        create_test_config(seeds, &db_path),
        Arc::clone(&store),
        StartMode::Auto,
    )
    .unwrap();
    let report = second.run().await.unwrap();

    assert_eq!(report.phase, CrawlPhase::Drained);
    assert_eq!(report.dispatched, 4);
    assert_eq!(store.visited_urls().unwrap().len(), 6);
}

#[tokio::test]
async fn test_cancellation_aborts_and_saves_frontier() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(html_page("Slow", "").set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("harvest.db");
    let store = open_store(&db_path);
    let slow_url = format!("{}/slow", server.uri());
    let mut config = create_test_config(vec![slow_url.clone()], &db_path);
    config.crawler.shutdown_grace_ms = 100;

    let mut orchestrator = Orchestrator::new(config, Arc::clone(&store), StartMode::Fresh).unwrap();
    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();
    });

    let started = Instant::now();
    let report = orchestrator.run().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));

    assert_eq!(report.phase, CrawlPhase::Stopped);
    assert_eq!(report.stop_reason, Some(StopReason::Cancelled));
    assert_eq!(report.count(TaskOutcome::Aborted), 1);

    let frontier = store.load_frontier().unwrap();
    assert_eq!(frontier.len(), 1);
    assert_eq!(frontier[0].url, slow_url);
    assert!(store.visited_urls().unwrap().is_empty());
}

#[tokio::test]
async fn test_out_of_scope_links_not_followed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page(
            "Home",
            r#"<a href="https://elsewhere.invalid/page">away</a><a href="/in">in</a>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/in"))
        .respond_with(html_page("In", ""))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("harvest.db");
    let config = create_test_config(vec![format!("{}/", server.uri())], &db_path);

    let mut orchestrator = Orchestrator::new(config, open_store(&db_path), StartMode::Fresh).unwrap();
    let report = orchestrator.run().await.unwrap();

    assert_eq!(report.dispatched, 2);
    assert_eq!(report.links_queued, 1);
}

#[tokio::test]
async fn test_absurd_retry_after_fails_only_that_url() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/limited"))
        .respond_with(
            ResponseTemplate::new(429).insert_header("retry-after", "10000000000000000000"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/fine"))
        .respond_with(html_page("Fine", ""))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("harvest.db");
    let store = open_store(&db_path);
    let mut config = create_test_config(
        vec![format!("{}/limited", base), format!("{}/fine", base)],
        &db_path,
    );
    config.crawler.max_concurrency = 1;
    config.retry.max_retries = 0;
    config.rate_limit.backoff_base_ms = 10;
    config.rate_limit.backoff_max_ms = 100;

    let mut orchestrator = Orchestrator::new(config, Arc::clone(&store), StartMode::Fresh).unwrap();
    let report = orchestrator.run().await.unwrap();

    assert_eq!(report.phase, CrawlPhase::Drained);
    assert_eq!(report.count(TaskOutcome::FetchFailed), 1);
    assert_eq!(report.count(TaskOutcome::Stored), 1);
    assert!(report.fatal_error.is_none());
}

#[tokio::test]
async fn test_max_depth_limits_link_following() {
    let server = MockServer::start().await;

    for (page, next) in [("a", "b"), ("b", "c")] {
        Mock::given(method("GET"))
            .and(path(format!("/{}", page)))
            .respond_with(html_page(page, &format!(r#"<a href="/{}">next</a>"#, next)))
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/c"))
        .respond_with(html_page("too deep", ""))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("harvest.db");
    let store = open_store(&db_path);
    let mut config = create_test_config(vec![format!("{}/a", server.uri())], &db_path);
    config.crawler.max_depth = 1;

    let mut orchestrator = Orchestrator::new(config, Arc::clone(&store), StartMode::Fresh).unwrap();
    let report = orchestrator.run().await.unwrap();

    assert_eq!(report.phase, CrawlPhase::Drained);
    assert_eq!(report.dispatched, 2);
    assert_eq!(report.links_queued, 1);
    assert_eq!(store.visited_urls().unwrap().len(), 2);
}

#[tokio::test]
async fn test_time_budget_stops_crawl() {
    let server = MockServer::start().await;

    let links: String = (1..=20)
        .map(|i| format!(r#"<a href="/p{}">{}</a>"#, i, i))
        .collect();
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page("Home", &links))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/p\d+$"))
        .respond_with(html_page("Leaf", ""))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("harvest.db");
    let store = open_store(&db_path);
    let mut config = create_test_config(vec![format!("{}/", server.uri())], &db_path);
    config.crawler.max_concurrency = 1;
    config.crawler.time_budget_secs = Some(1);
    // 21 pages at 200ms per host take far longer than the budget
    config.rate_limit.min_interval_ms = 200;

    let started = Instant::now();
    let mut orchestrator = Orchestrator::new(config, Arc::clone(&store), StartMode::Fresh).unwrap();
    let report = orchestrator.run().await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(report.phase, CrawlPhase::Stopped);
    assert_eq!(report.stop_reason, Some(StopReason::TimeBudget));
    assert!(report.dispatched < 21);
    assert!(report.frontier_saved > 0);
    assert_eq!(
        store.get_run(report.run_id).unwrap().status,
        RunStatus::Interrupted
    );
}
