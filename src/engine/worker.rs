use super::idle::{IdleDecision, IdleMonitor};
use super::shutdown::ShutdownHandle;
use super::stats::CrawlStats;
use crate::common::interface::{ExtractionPipeline, PersistenceSink};
use crate::common::model::{Config, CrawlerConfig, Request, Response};
use crate::downloader::{DispatchOutcome, Dispatcher, HttpFetcher, RetryPolicy};
use crate::errors::Result;
use crate::proxy::ProxyManager;
use crate::queue::Scheduler;
use crate::sync::CoordinationStore;
use dashmap::DashMap;
use log::{debug, error, info, warn};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::Instrument;
use uuid::Uuid;

/// Why a worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Idle past the threshold with no seeds left
    Finished,
    NoProxy,
    ContentAnomalies,
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub concurrent_requests: usize,
    pub concurrent_requests_per_host: usize,
    pub idle_threshold: usize,
    pub idle_tick: Duration,
    pub max_content_anomalies: Option<usize>,
}

impl From<&CrawlerConfig> for WorkerSettings {
    fn from(config: &CrawlerConfig) -> Self {
        Self {
            concurrent_requests: config.concurrent_requests.max(1),
            concurrent_requests_per_host: config.concurrent_requests_per_host.max(1),
            idle_threshold: config.idle_threshold,
            idle_tick: Duration::from_secs(config.idle_tick_secs),
            max_content_anomalies: config.max_content_anomalies,
        }
    }
}

/// State every in-flight request task needs.
struct Shared {
    scheduler: Scheduler,
    dispatcher: Arc<Dispatcher>,
    pipeline: Arc<dyn ExtractionPipeline>,
    sink: Arc<dyn PersistenceSink>,
    stats: Arc<CrawlStats>,
    hosts: DashMap<String, Arc<Semaphore>>,
    /// Popped from the frontier and not yet settled
    in_flight: DashMap<Uuid, Request>,
    per_host: usize,
    max_content_anomalies: Option<usize>,
    close_tx: mpsc::UnboundedSender<CloseReason>,
}

impl Shared {
    async fn schedule(&self, request: &Request) {
        match self.scheduler.enqueue(request).await {
            Ok(true) => {
                CrawlStats::incr(&self.stats.scheduled);
            }
            Ok(false) => {
                CrawlStats::incr(&self.stats.filtered);
            }
            Err(e) => {
                CrawlStats::incr(&self.stats.errors);
                error!("Failed to schedule {}: {e}", request.url);
            }
        }
    }

    async fn handle(&self, request: Request, permit: OwnedSemaphorePermit) {
        let id = request.id;
        let host_permit = match request.host() {
            Some(host) => {
                let semaphore = self
                    .hosts
                    .entry(host)
                    .or_insert_with(|| Arc::new(Semaphore::new(self.per_host)))
                    .clone();
                semaphore.acquire_owned().await.ok()
            }
            None => None,
        };
        let outcome = self.dispatcher.dispatch(request.clone()).await;
        drop(host_permit);
        drop(permit);

        if let Err(e) = &outcome
            && e.is_fatal()
        {
            error!("Worker cannot obtain a proxy, closing: {e}");
            match self.scheduler.requeue(&request).await {
                Ok(()) => {
                    self.in_flight.remove(&id);
                }
                Err(e) => error!("Failed to requeue {}: {e}", request.url),
            }
            let _ = self.close_tx.send(CloseReason::NoProxy);
            return;
        }
        self.in_flight.remove(&id);

        match outcome {
            Err(e) => {
                CrawlStats::incr(&self.stats.errors);
                error!("Dispatch failed: {e}");
            }
            Ok(DispatchOutcome::Response(response)) => {
                CrawlStats::incr(&self.stats.responses);
                self.extract(response).await;
            }
            Ok(DispatchOutcome::Retry { request, delay }) => {
                CrawlStats::incr(&self.stats.retries);
                let retry_id = request.id;
                self.in_flight.insert(retry_id, request.clone());
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                self.schedule(&request).await;
                self.in_flight.remove(&retry_id);
            }
            Ok(DispatchOutcome::Dropped(e)) => {
                CrawlStats::incr(&self.stats.dropped);
                debug!("Request dropped: {e}");
            }
        }
    }

    async fn extract(&self, response: Response) {
        let url = response.request.url.clone();
        match self.pipeline.process(response, self.sink.as_ref()).await {
            Ok(requests) => {
                for request in requests {
                    CrawlStats::incr(&self.stats.follow_ups);
                    self.schedule(&request).await;
                }
            }
            Err(e) if e.is_parser() => {
                let seen = CrawlStats::incr(&self.stats.content_anomalies) as usize;
                warn!("Content anomaly on {url}: {e}");
                if let Some(max) = self.max_content_anomalies
                    && seen >= max
                {
                    error!("{seen} content anomalies, closing");
                    let _ = self.close_tx.send(CloseReason::ContentAnomalies);
                }
            }
            Err(e) => {
                CrawlStats::incr(&self.stats.errors);
                error!("Pipeline failed on {url}: {e}");
            }
        }
    }
}

/// One crawl participant: pulls from the shared frontier, fetches through
/// its own rotating proxy and feeds the extraction pipeline.
pub struct Worker {
    name: String,
    shared: Arc<Shared>,
    settings: WorkerSettings,
    close_rx: Mutex<mpsc::UnboundedReceiver<CloseReason>>,
    shutdown: ShutdownHandle,
    closed: OnceCell<CloseReason>,
}

impl Worker {
    pub fn new(
        name: impl Into<String>,
        scheduler: Scheduler,
        dispatcher: Arc<Dispatcher>,
        pipeline: Arc<dyn ExtractionPipeline>,
        sink: Arc<dyn PersistenceSink>,
        settings: WorkerSettings,
    ) -> Self {
        let (close_tx, close_rx) = mpsc::unbounded_channel();
        let shared = Shared {
            scheduler,
            dispatcher,
            pipeline,
            sink,
            stats: Arc::new(CrawlStats::default()),
            hosts: DashMap::new(),
            in_flight: DashMap::new(),
            per_host: settings.concurrent_requests_per_host.max(1),
            max_content_anomalies: settings.max_content_anomalies,
            close_tx,
        };
        Self {
            name: name.into(),
            shared: Arc::new(shared),
            settings,
            close_rx: Mutex::new(close_rx),
            shutdown: ShutdownHandle::new(),
            closed: OnceCell::new(),
        }
    }

    /// Production wiring: reqwest fetcher, HTTP issuing API, shared store.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn CoordinationStore>,
        pipeline: Arc<dyn ExtractionPipeline>,
        sink: Arc<dyn PersistenceSink>,
    ) -> Result<Self> {
        let fetcher = Arc::new(
            HttpFetcher::new(&config.download)
                .with_pool_size(config.crawler.concurrent_requests_per_host),
        );
        let proxies = Arc::new(ProxyManager::from_config(config, store.clone(), fetcher.clone())?);
        let dispatcher = Dispatcher::new(
            proxies,
            fetcher,
            RetryPolicy::from(&config.download),
            config.download.timeout(),
        );
        let scheduler = Scheduler::new(
            store,
            &config.name,
            config.crawler.queue_policy,
            config.seed_key(),
        )
        .with_seed_batch_size(config.crawler.seed_batch_size)
        .with_persist(config.crawler.scheduler_persist);
        Ok(Self::new(
            config.name.clone(),
            scheduler,
            Arc::new(dispatcher),
            pipeline,
            sink,
            WorkerSettings::from(&config.crawler),
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> Arc<CrawlStats> {
        self.shared.stats.clone()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.shared.scheduler
    }

    pub fn proxies(&self) -> &Arc<ProxyManager> {
        self.shared.dispatcher.proxies()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.closed.get().copied()
    }

    /// Pushes a request through the dupefilter into the shared frontier.
    pub async fn schedule(&self, request: Request) -> Result<bool> {
        let accepted = self.shared.scheduler.enqueue(&request).await?;
        if accepted {
            CrawlStats::incr(&self.shared.stats.scheduled);
        } else {
            CrawlStats::incr(&self.shared.stats.filtered);
        }
        Ok(accepted)
    }

    /// Crawls until the worker closes. Calling it again after close returns
    /// the first close reason without doing anything.
    pub async fn run(&self) -> Result<CloseReason> {
        if let Some(reason) = self.close_reason() {
            return Ok(reason);
        }
        let mut close_rx = self.close_rx.lock().await;
        let mut shutdown_rx = self.shutdown.subscribe();
        let global = Arc::new(Semaphore::new(self.settings.concurrent_requests));
        let mut idle = IdleMonitor::new(self.settings.idle_threshold);
        let mut tasks = JoinSet::new();
        info!(
            "Worker {} started (concurrency {}, per host {})",
            self.name, self.settings.concurrent_requests, self.settings.concurrent_requests_per_host
        );

        let reason = loop {
            while let Some(done) = tasks.try_join_next() {
                if let Err(e) = done {
                    error!("Request task failed: {e}");
                }
            }

            let permit = tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break CloseReason::Shutdown,
                Some(reason) = close_rx.recv() => break reason,
                permit = global.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break CloseReason::Shutdown,
                },
            };

            match self.shared.scheduler.next_request().await {
                Ok(Some(request)) => {
                    self.shared.in_flight.insert(request.id, request.clone());
                    let shared = self.shared.clone();
                    let span = tracing::info_span!("request", url = %request.url);
                    tasks.spawn(async move { shared.handle(request, permit).await }.instrument(span));
                }
                Ok(None) => {
                    drop(permit);
                    // not idle while requests are still in flight
                    if !tasks.is_empty() {
                        tokio::select! {
                            _ = tasks.join_next() => {}
                            _ = tokio::time::sleep(self.settings.idle_tick) => {}
                        }
                        continue;
                    }
                    let seeds_pending = match self.shared.scheduler.seeds().exists().await {
                        Ok(exists) => exists,
                        Err(e) => {
                            warn!("Cannot read seed key, assuming seeds pending: {e}");
                            true
                        }
                    };
                    if idle.tick(seeds_pending) == IdleDecision::Shutdown {
                        break CloseReason::Finished;
                    }
                    tokio::select! {
                        _ = shutdown_rx.recv() => break CloseReason::Shutdown,
                        Some(reason) = close_rx.recv() => break reason,
                        _ = tokio::time::sleep(self.settings.idle_tick) => {}
                    }
                }
                Err(e) => {
                    drop(permit);
                    CrawlStats::incr(&self.shared.stats.errors);
                    error!("Scheduler unavailable: {e}");
                    tokio::time::sleep(self.settings.idle_tick).await;
                }
            }
        };

        // in-flight requests are abandoned and go back to the frontier on close
        tasks.shutdown().await;
        Ok(self.close(reason).await)
    }

    async fn close(&self, reason: CloseReason) -> CloseReason {
        if self.closed.set(reason).is_err() {
            return self.close_reason().unwrap_or(reason);
        }
        match reason {
            CloseReason::Finished | CloseReason::Shutdown => {
                info!("Worker {} closing: {reason:?}", self.name)
            }
            CloseReason::NoProxy | CloseReason::ContentAnomalies => {
                error!("Worker {} closing: {reason:?}", self.name)
            }
        }
        self.shared.sink.disconnect().await;
        self.requeue_unfinished().await;
        if let Err(e) = self.shared.scheduler.close().await {
            warn!("Failed to close scheduler: {e}");
        }
        let proxy = self.proxies().snapshot().await;
        info!(
            "Worker {} used {} proxies, last {:?}",
            self.name, proxy.used_count, proxy.url
        );
        self.shared.stats.log(&self.name);
        reason
    }

    /// Returns requests abandoned mid-flight to the frontier so a restarted
    /// worker picks them up despite the dupefilter.
    async fn requeue_unfinished(&self) {
        let unfinished: Vec<Request> = self
            .shared
            .in_flight
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.shared.in_flight.clear();
        if unfinished.is_empty() || !self.shared.scheduler.persist() {
            return;
        }
        let mut requeued = 0;
        for request in &unfinished {
            match self.shared.scheduler.requeue(request).await {
                Ok(()) => requeued += 1,
                Err(e) => error!("Failed to requeue {}: {e}", request.url),
            }
        }
        info!("Worker {} requeued {requeued} unfinished requests", self.name);
    }
}
