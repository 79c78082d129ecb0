use async_trait::async_trait;
use dashmap::DashMap;
use rotacrawl::common::interface::{ExtractionPipeline, FetchTimeout, Fetcher, PersistenceSink};
use rotacrawl::common::model::{DownloadConfig, QueuePolicy, Request, Response};
use rotacrawl::downloader::{Dispatcher, RetryPolicy};
use rotacrawl::engine::{CloseReason, Worker, WorkerSettings};
use rotacrawl::errors::Result;
use rotacrawl::proxy::{IssueOutcome, ProxyApi, ProxyManager, ProxySettings, Validity};
use rotacrawl::queue::Scheduler;
use rotacrawl::sync::{CoordinationStore, LocalStore};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

const SEED: &str = "http://sh.example.com/z/";
const CANARY: &str = "https://www.baidu.com/";

/// Issues 10.0.0.1, 10.0.0.2, ... and counts calls.
#[derive(Default)]
struct SequentialApi {
    calls: AtomicUsize,
}

#[async_trait]
impl ProxyApi for SequentialApi {
    async fn issue(&self) -> Result<IssueOutcome> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(IssueOutcome::Issued(format!("http://10.0.0.{n}:8080")))
    }
}

/// A small listing site. The first fetch of d2 is answered with a ban page.
#[derive(Default)]
struct ListingSite {
    banned_once: AtomicBool,
    page_hits: DashMap<String, usize>,
}

#[async_trait]
impl Fetcher for ListingSite {
    async fn fetch(&self, request: &Request, proxy: &str, _timeout: FetchTimeout) -> Result<Response> {
        let (status, body) = if request.url == CANARY {
            (200, String::new())
        } else {
            *self.page_hits.entry(request.url.clone()).or_default() += 1;
            if request.url == SEED {
                let links = (1..=3)
                    .map(|i| format!("{SEED}d{i}.html"))
                    .chain([format!("{SEED}d1.html#photos")])
                    .collect::<Vec<_>>()
                    .join("\n");
                (200, links)
            } else if request.url.ends_with("d2.html") && !self.banned_once.swap(true, Ordering::SeqCst) {
                (403, "forbidden".to_string())
            } else {
                (200, format!("<h1>{}</h1>", request.url))
            }
        };
        let mut request = request.clone();
        request.proxy = Some(proxy.to_string());
        Ok(Response {
            url: request.url.clone(),
            status,
            headers: Vec::new(),
            body: body.into_bytes(),
            elapsed: Duration::from_millis(10),
            request,
        })
    }
}

/// Listing pages yield detail requests; detail pages yield one record.
struct ListingPipeline;

#[async_trait]
impl ExtractionPipeline for ListingPipeline {
    async fn process(&self, response: Response, sink: &dyn PersistenceSink) -> Result<Vec<Request>> {
        if response.request.callback() == Some("detail") {
            let key = response.url.rsplit('/').next().unwrap_or_default().to_string();
            let mut fields = Map::new();
            fields.insert("url".into(), json!(response.url));
            fields.insert("title".into(), json!(response.text()));
            sink.upsert(&key, fields).await?;
            return Ok(Vec::new());
        }
        Ok(response
            .text()
            .lines()
            .map(|link| {
                response
                    .request
                    .follow(link, -1)
                    .with_meta("callback", json!("detail"))
            })
            .collect())
    }
}

#[derive(Default)]
struct MemorySink {
    records: DashMap<String, Map<String, Value>>,
    disconnects: AtomicUsize,
}

#[async_trait]
impl PersistenceSink for MemorySink {
    async fn upsert(&self, key: &str, fields: Map<String, Value>) -> Result<()> {
        self.records.insert(key.to_string(), fields);
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

fn worker(
    store: Arc<dyn CoordinationStore>,
    api: Arc<SequentialApi>,
    site: Arc<ListingSite>,
    sink: Arc<MemorySink>,
) -> Worker {
    let fetcher: Arc<dyn Fetcher> = site;
    let proxies = Arc::new(ProxyManager::new(
        store.clone(),
        api,
        fetcher.clone(),
        ProxySettings {
            api_request_interval: Duration::from_millis(20),
            ..ProxySettings::default()
        },
    ));
    let dispatcher = Dispatcher::new(
        proxies,
        fetcher,
        RetryPolicy::from(&DownloadConfig::default()),
        Duration::from_secs(5),
    );
    let scheduler = Scheduler::new(store, "ziroom", QueuePolicy::Priority, "ziroom:start_urls");
    Worker::new(
        "ziroom",
        scheduler,
        Arc::new(dispatcher),
        Arc::new(ListingPipeline),
        sink,
        WorkerSettings {
            concurrent_requests: 8,
            concurrent_requests_per_host: 2,
            idle_threshold: 5,
            idle_tick: Duration::from_millis(20),
            max_content_anomalies: None,
        },
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_workers_share_frontier_and_rotate_on_ban() {
    let store: Arc<dyn CoordinationStore> = Arc::new(LocalStore::new());
    store.set_add("ziroom:start_urls", SEED).await.unwrap();

    let api = Arc::new(SequentialApi::default());
    let site = Arc::new(ListingSite::default());
    let sink = Arc::new(MemorySink::default());
    let a = Arc::new(worker(store.clone(), api.clone(), site.clone(), sink.clone()));
    let b = Arc::new(worker(store.clone(), api.clone(), site.clone(), sink.clone()));

    let (ra, rb) = tokio::time::timeout(Duration::from_secs(20), async {
        tokio::join!(a.run(), b.run())
    })
    .await
    .expect("workers should go idle and close");
    assert_eq!(ra.unwrap(), CloseReason::Finished);
    assert_eq!(rb.unwrap(), CloseReason::Finished);

    // every detail page persisted once, the fragment duplicate was filtered
    let mut keys: Vec<_> = sink.records.iter().map(|r| r.key().clone()).collect();
    keys.sort();
    assert_eq!(keys, vec!["d1.html", "d2.html", "d3.html"]);
    assert_eq!(site.page_hits.get(&format!("{SEED}d1.html")).map(|h| *h), Some(1));
    assert_eq!(site.page_hits.get(&format!("{SEED}d2.html")).map(|h| *h), Some(2));
    let filtered = a.stats().snapshot().filtered + b.stats().snapshot().filtered;
    assert_eq!(filtered, 1);

    // the banned proxy was invalidated on whichever worker saw the 403
    let states = [a.proxies().snapshot().await, b.proxies().snapshot().await];
    assert!(states
        .iter()
        .any(|s| s.used_count >= 2 || s.valid == Validity::Invalid));
    assert!(api.calls.load(Ordering::SeqCst) >= 1);

    // seeds drained, frontier empty, both sinks closed exactly once each
    assert!(!store.exists("ziroom:start_urls").await.unwrap());
    assert!(!a.scheduler().has_pending().await.unwrap());
    assert_eq!(sink.disconnects.load(Ordering::SeqCst), 2);
}
