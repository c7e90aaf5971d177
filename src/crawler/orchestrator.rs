//! Crawl orchestration
//!
//! The orchestrator owns the crawl state machine and a bounded pool of
//! fetch → parse → store pipelines. It pops URLs from the frontier, claims
//! them in the visited set and hands them to the pool; pipelines push the
//! links they discover back into the frontier.
//!
//! ```text
//! Idle → Running → Drained
//!                → Draining → Stopped
//!                → Stopped            (fatal error)
//! ```

use crate::config::{Config, CrawlerConfig};
use crate::crawler::extract::Extractor;
use crate::crawler::fetcher::{build_http_client, Fetcher};
use crate::crawler::frontier::{Frontier, UrlTask};
use crate::crawler::parser::Parser;
use crate::crawler::rate_limiter::RateLimiter;
use crate::crawler::retry::RetryPolicy;
use crate::robots::RobotsCache;
use crate::state::{CrawlPhase, TaskOutcome};
use crate::storage::{
    Deduplicator, FrontierEntry, PageOutcome, RecordStore, RunStatus, StorageResult,
};
use crate::url::{extract_domain, matches_any, normalize_url};
use crate::HarvestError;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

/// Completed pipelines between progress log lines
const PROGRESS_EVERY: u64 = 10;

/// Completed pipelines between frontier checkpoints
const CHECKPOINT_EVERY: u64 = 50;

/// How a new crawl relates to the state left by earlier runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartMode {
    /// Resume if the latest run did not complete, otherwise start over
    #[default]
    Auto,
    /// Forget visited URLs and the saved frontier (records are kept)
    Fresh,
    /// Reuse visited URLs and the saved frontier
    Resume,
}

/// Why a crawl stopped before its frontier was exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    MaxPages,
    TimeBudget,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "cancelled"),
            Self::MaxPages => write!(f, "page limit reached"),
            Self::TimeBudget => write!(f, "time budget elapsed"),
        }
    }
}

/// Summary of a crawl
#[derive(Debug, Clone)]
pub struct CrawlReport {
    pub run_id: i64,
    pub phase: CrawlPhase,
    pub stop_reason: Option<StopReason>,

    /// URLs handed to a pipeline
    pub dispatched: u64,

    /// Terminal outcomes of the dispatched URLs
    pub outcomes: HashMap<TaskOutcome, u64>,

    /// Records newly persisted
    pub records_stored: u64,

    /// Records dropped as duplicates
    pub records_duplicate: u64,

    pub links_queued: u64,

    /// Frontier entries saved for a later run
    pub frontier_saved: usize,

    pub elapsed: Duration,

    /// Cause of a fatal stop
    pub fatal_error: Option<String>,
}

impl CrawlReport {
    fn new(run_id: i64) -> Self {
        Self {
            run_id,
            phase: CrawlPhase::Idle,
            stop_reason: None,
            dispatched: 0,
            outcomes: HashMap::new(),
            records_stored: 0,
            records_duplicate: 0,
            links_queued: 0,
            frontier_saved: 0,
            elapsed: Duration::ZERO,
            fatal_error: None,
        }
    }

    pub fn count(&self, outcome: TaskOutcome) -> u64 {
        self.outcomes.get(&outcome).copied().unwrap_or(0)
    }

    pub fn succeeded(&self) -> u64 {
        self.sum(TaskOutcome::is_success)
    }

    pub fn failed(&self) -> u64 {
        self.sum(TaskOutcome::is_failure)
    }

    pub fn skipped(&self) -> u64 {
        self.sum(TaskOutcome::is_skipped)
    }

    fn sum(&self, pick: fn(&TaskOutcome) -> bool) -> u64 {
        self.outcomes
            .iter()
            .filter(|(outcome, _)| pick(outcome))
            .map(|(_, n)| n)
            .sum()
    }

    fn add_outcome(&mut self, outcome: TaskOutcome) {
        *self.outcomes.entry(outcome).or_default() += 1;
    }

    fn absorb(&mut self, task: &TaskReport) {
        self.add_outcome(task.outcome);
        self.records_stored += task.records_new;
        self.records_duplicate += task.records_duplicate;
        self.links_queued += task.links_queued;
    }
}

/// What one pipeline did with its URL
#[derive(Debug)]
struct TaskReport {
    outcome: TaskOutcome,
    records_new: u64,
    records_duplicate: u64,
    links_queued: u64,
}

impl TaskReport {
    fn new(outcome: TaskOutcome) -> Self {
        Self {
            outcome,
            records_new: 0,
            records_duplicate: 0,
            links_queued: 0,
        }
    }
}

/// Everything a pipeline needs, shared by all of them
struct Pipeline {
    fetcher: Fetcher,
    parser: Parser,
    robots: Option<RobotsCache>,
    dedup: Arc<Deduplicator>,
    frontier: Arc<Frontier>,
    scope: Vec<String>,
    max_depth: u32,
}

impl Pipeline {
    /// Runs fetch → parse → store for one URL
    ///
    /// Per-URL failures end up in the returned outcome; only storage errors
    /// are returned as errors.
    async fn process(&self, task: &UrlTask) -> StorageResult<TaskReport> {
        let url = &task.url;
        debug!("Processing {} (depth {})", url, task.depth);

        if let Some(robots) = &self.robots {
            if !robots.is_allowed(url).await {
                info!("URL {} disallowed by robots.txt", url);
                return self
                    .finish(
                        task,
                        TaskOutcome::Disallowed,
                        None,
                        Some("Disallowed by robots.txt".to_string()),
                    )
                    .await;
            }
        }

        let fetched = match self.fetcher.fetch(url).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!("{}", e);
                return self
                    .finish(task, TaskOutcome::FetchFailed, e.status(), Some(e.to_string()))
                    .await;
            }
        };

        let page = match self.parser.parse(&fetched, task.depth) {
            Ok(page) => page,
            Err(e) => {
                warn!("{}", e);
                return self
                    .finish(
                        task,
                        TaskOutcome::ParseFailed,
                        Some(fetched.status_code),
                        Some(e.message),
                    )
                    .await;
            }
        };

        let mut report = TaskReport::new(TaskOutcome::Stored);
        let records = page.records;
        let (new, duplicate) = self
            .blocking(move |dedup| {
                let mut counts = (0, 0);
                for record in &records {
                    if dedup.store(record)? {
                        counts.0 += 1;
                    } else {
                        counts.1 += 1;
                    }
                }
                Ok(counts)
            })
            .await?;
        report.records_new = new;
        report.records_duplicate = duplicate;

        // Links sit one level below this page
        if task.depth < self.max_depth {
            for link in page.links {
                if self.in_scope(&link.url) && self.frontier.push(link) {
                    report.links_queued += 1;
                }
            }
        }

        debug!(
            "{}: {} new records, {} duplicates, {} links queued",
            url, report.records_new, report.records_duplicate, report.links_queued
        );

        let outcome = PageOutcome {
            url: url.to_string(),
            depth: task.depth,
            outcome: TaskOutcome::Stored,
            status_code: Some(fetched.status_code),
            error: fetched.error,
        };
        self.blocking(move |dedup| dedup.record_outcome(&outcome))
            .await?;
        Ok(report)
    }

    async fn finish(
        &self,
        task: &UrlTask,
        outcome: TaskOutcome,
        status_code: Option<u16>,
        error: Option<String>,
    ) -> StorageResult<TaskReport> {
        let page = PageOutcome {
            url: task.url.to_string(),
            depth: task.depth,
            outcome,
            status_code,
            error,
        };
        self.blocking(move |dedup| dedup.record_outcome(&page)).await?;
        Ok(TaskReport::new(outcome))
    }

    /// Runs a store operation on the blocking thread pool
    async fn blocking<T, F>(&self, op: F) -> StorageResult<T>
    where
        F: FnOnce(&Deduplicator) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let dedup = Arc::clone(&self.dedup);
        tokio::task::spawn_blocking(move || op(&dedup)).await?
    }

    fn in_scope(&self, url: &Url) -> bool {
        extract_domain(url).is_some_and(|domain| matches_any(&self.scope, &domain))
    }
}

/// Spawned pipelines and the tasks they carry
struct Pool {
    tasks: JoinSet<(String, StorageResult<TaskReport>)>,
    in_flight: HashMap<String, UrlTask>,
}

impl Pool {
    fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
            in_flight: HashMap::new(),
        }
    }

    fn is_idle(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Domains links may be followed to
///
/// The configured `allowed-domains`, or the domains of the seeds when none
/// are configured.
pub fn crawl_scope(config: &Config) -> Vec<String> {
    if !config.crawler.allowed_domains.is_empty() {
        return config.crawler.allowed_domains.clone();
    }

    let mut scope: Vec<String> = Vec::new();
    for seed in &config.seeds {
        let Some(domain) = normalize_url(seed).ok().as_ref().and_then(extract_domain) else {
            continue;
        };
        if !scope.contains(&domain) {
            scope.push(domain);
        }
    }
    scope
}

/// Drives a crawl from seeds to a terminal phase
pub struct Orchestrator {
    crawler: CrawlerConfig,
    phase: CrawlPhase,
    pipeline: Arc<Pipeline>,
    frontier: Arc<Frontier>,
    dedup: Arc<Deduplicator>,
    limiter: Arc<RateLimiter>,
    cancel: CancellationToken,
    report: CrawlReport,
}

impl Orchestrator {
    /// Prepares a crawl over `store`
    ///
    /// Opens a new run, loads the state of earlier runs according to `mode`
    /// and seeds the frontier.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built, the extraction rules do not
    /// compile or the store is unavailable.
    pub fn new(
        config: Config,
        store: Arc<dyn RecordStore>,
        mode: StartMode,
    ) -> Result<Self, HarvestError> {
        let config_hash = config.fingerprint()?;
        let latest = store.latest_run()?;

        let resume = match mode {
            StartMode::Fresh => false,
            StartMode::Resume => true,
            StartMode::Auto => latest.as_ref().is_some_and(|run| run.status.is_resumable()),
        };

        if resume {
            match &latest {
                Some(run) => {
                    info!(
                        "Resuming from run {} ({})",
                        run.id,
                        run.status.to_db_string()
                    );
                    if run.config_hash != config_hash {
                        warn!("Configuration changed since run {}", run.id);
                    }
                }
                None => info!("No previous run found, starting new crawl"),
            }
        } else {
            store.reset_crawl_state()?;
            info!("Starting fresh crawl");
        }

        let run_id = store.create_run(&config_hash)?;
        let dedup = Arc::new(Deduplicator::new(Arc::clone(&store), run_id));
        let (visited, keys) = dedup.preload()?;
        if resume {
            info!("Loaded {} visited URLs and {} record keys", visited, keys);
        }

        let frontier = Arc::new(Frontier::new(dedup.visited()));
        let mut scope = crawl_scope(&config);

        if resume {
            let saved = store.load_frontier()?;
            info!("Loading {} URLs from saved frontier", saved.len());
            for entry in &saved {
                match UrlTask::from_entry(entry) {
                    Ok(task) => {
                        // Saved URLs were in scope when they were queued
                        if config.crawler.allowed_domains.is_empty() {
                            if let Some(domain) = extract_domain(&task.url) {
                                if !scope.contains(&domain) {
                                    scope.push(domain);
                                }
                            }
                        }
                        frontier.push(task);
                    }
                    Err(e) => warn!("Dropping saved frontier entry {}: {}", entry.url, e),
                }
            }
        }

        for seed in &config.seeds {
            frontier.push(UrlTask::seed(seed)?);
        }

        let client = build_http_client(&config.user_agent, &config.crawler)?;
        let limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        let robots = config.crawler.respect_robots.then(|| {
            RobotsCache::new(
                client.clone(),
                config.user_agent.crawler_name.clone(),
                Arc::clone(&limiter),
            )
        });

        let pipeline = Pipeline {
            fetcher: Fetcher::new(
                client,
                Arc::clone(&limiter),
                RetryPolicy::from_config(&config.retry),
            ),
            parser: Parser::new(Extractor::new(&config.extract, &config.links)?),
            robots,
            dedup: Arc::clone(&dedup),
            frontier: Arc::clone(&frontier),
            scope,
            max_depth: config.crawler.max_depth,
        };

        Ok(Self {
            crawler: config.crawler,
            phase: CrawlPhase::Idle,
            pipeline: Arc::new(pipeline),
            frontier,
            dedup,
            limiter,
            cancel: CancellationToken::new(),
            report: CrawlReport::new(run_id),
        })
    }

    /// Token that stops the crawl when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn phase(&self) -> CrawlPhase {
        self.phase
    }

    pub fn run_id(&self) -> i64 {
        self.report.run_id
    }

    /// The report so far; after a fatal error it holds the cause
    pub fn report(&self) -> &CrawlReport {
        &self.report
    }

    pub fn frontier_len(&self) -> usize {
        self.frontier.len()
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Domains links are followed to
    pub fn scope(&self) -> &[String] {
        &self.pipeline.scope
    }

    /// Runs the crawl until the frontier drains, a stop condition hits or a
    /// fatal error occurs
    ///
    /// # Errors
    ///
    /// Only fatal errors (storage failures, panicked pipelines) are returned;
    /// the crawl is then `Stopped` and [`report`](Self::report) names the
    /// cause. Per-URL failures are counted in the report.
    pub async fn run(&mut self) -> Result<CrawlReport, HarvestError> {
        self.phase = self.phase.transition(CrawlPhase::Running)?;
        info!(
            "Starting crawl run {} with {} URLs in frontier",
            self.report.run_id,
            self.frontier.len()
        );

        let started = Instant::now();
        let deadline = self
            .crawler
            .time_budget_secs
            .and_then(|secs| started.checked_add(Duration::from_secs(secs)));
        let mut pool = Pool::new();

        let mut result = self.drive(&mut pool, deadline).await;
        if result.is_ok() {
            result = self.finish(&mut pool).await;
        }

        self.report.elapsed = started.elapsed();
        if let Some(robots) = &self.pipeline.robots {
            debug!("robots.txt cached for {} hosts", robots.len());
        }
        match result {
            Ok(()) => {
                self.report.phase = self.phase;
                info!(
                    "Crawl {}: {} dispatched, {} stored, {} failed, {} skipped, {} new records in {:?}",
                    self.phase,
                    self.report.dispatched,
                    self.report.succeeded(),
                    self.report.failed(),
                    self.report.skipped(),
                    self.report.records_stored,
                    self.report.elapsed
                );
                Ok(self.report.clone())
            }
            Err(e) => Err(self.fail(&mut pool, e).await),
        }
    }

    /// The `Running` loop; returns once the phase is `Drained` or `Draining`
    async fn drive(
        &mut self,
        pool: &mut Pool,
        deadline: Option<Instant>,
    ) -> Result<(), HarvestError> {
        let semaphore = Arc::new(Semaphore::new(self.crawler.max_concurrency.max(1) as usize));
        let cancel = self.cancel.clone();
        let mut completed: u64 = 0;

        loop {
            if let Some(reason) = self.stop_condition(pool, deadline) {
                info!("Stopping crawl: {}", reason);
                self.report.stop_reason = Some(reason);
                self.phase = self.phase.transition(CrawlPhase::Draining)?;
                return Ok(());
            }

            self.dispatch(pool, &semaphore);

            if pool.is_idle() {
                if self.frontier.is_empty() {
                    info!("Frontier is empty, crawl complete");
                    self.phase = self.phase.transition(CrawlPhase::Drained)?;
                    return Ok(());
                }
                continue;
            }

            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = sleep_until_deadline(deadline) => {}
                Some(joined) = pool.tasks.join_next() => {
                    self.absorb(pool, joined)?;
                    completed += 1;

                    if completed % PROGRESS_EVERY == 0 {
                        info!(
                            "Progress: {} pages done, {} in flight, {} in frontier",
                            completed,
                            pool.tasks.len(),
                            self.frontier.len()
                        );
                    }
                    if completed % CHECKPOINT_EVERY == 0 {
                        self.checkpoint(pool)?;
                    }
                }
            }
        }
    }

    fn stop_condition(&self, pool: &Pool, deadline: Option<Instant>) -> Option<StopReason> {
        if self.cancel.is_cancelled() {
            return Some(StopReason::Cancelled);
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Some(StopReason::TimeBudget);
        }
        if let Some(max) = self.crawler.max_pages {
            let work_left = !pool.is_idle() || !self.frontier.is_empty();
            if self.report.dispatched >= max && work_left {
                return Some(StopReason::MaxPages);
            }
        }
        None
    }

    /// Hands frontier tasks to the pool while permits are free
    fn dispatch(&mut self, pool: &mut Pool, semaphore: &Arc<Semaphore>) {
        loop {
            if self
                .crawler
                .max_pages
                .is_some_and(|max| self.report.dispatched >= max)
            {
                break;
            }
            let Ok(permit) = Arc::clone(semaphore).try_acquire_owned() else {
                break;
            };
            let Some(task) = self.frontier.pop() else {
                break;
            };

            if !self.dedup.mark_visited(&task.url) {
                debug!("Skipping already visited {}", task.url);
                continue;
            }

            self.report.dispatched += 1;
            let url = task.url.to_string();
            pool.in_flight.insert(url.clone(), task.clone());

            let pipeline = Arc::clone(&self.pipeline);
            pool.tasks.spawn(async move {
                let _permit = permit;
                let result = pipeline.process(&task).await;
                (url, result)
            });
        }
    }

    fn absorb(
        &mut self,
        pool: &mut Pool,
        joined: Result<(String, StorageResult<TaskReport>), JoinError>,
    ) -> Result<(), HarvestError> {
        match joined {
            Ok((url, Ok(task))) => {
                pool.in_flight.remove(&url);
                self.report.absorb(&task);
                Ok(())
            }
            Ok((url, Err(e))) => {
                pool.in_flight.remove(&url);
                Err(e.into())
            }
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Leaves `Drained` or `Draining` for the terminal bookkeeping
    async fn finish(&mut self, pool: &mut Pool) -> Result<(), HarvestError> {
        let run_id = self.report.run_id;

        match self.phase {
            CrawlPhase::Drained => {
                self.dedup.record_store().save_frontier(&[])?;
                self.dedup
                    .record_store()
                    .finish_run(run_id, RunStatus::Completed)?;
            }
            CrawlPhase::Draining => {
                self.drain(pool).await?;
                self.persist_frontier()?;
                self.dedup
                    .record_store()
                    .finish_run(run_id, RunStatus::Interrupted)?;
                self.phase = self.phase.transition(CrawlPhase::Stopped)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Lets in-flight pipelines finish within the grace period, then aborts
    /// the rest
    async fn drain(&mut self, pool: &mut Pool) -> Result<(), HarvestError> {
        let grace = Duration::from_millis(self.crawler.shutdown_grace_ms);
        if !pool.is_idle() {
            info!(
                "Waiting up to {:?} for {} in-flight pipelines",
                grace,
                pool.tasks.len()
            );
        }

        let deadline = Instant::now() + grace;
        loop {
            match tokio::time::timeout_at(deadline, pool.tasks.join_next()).await {
                Ok(Some(joined)) => self.absorb(pool, joined)?,
                Ok(None) => return Ok(()),
                Err(_) => break,
            }
        }

        warn!("Grace period over, aborting {} pipelines", pool.tasks.len());
        pool.tasks.abort_all();
        while let Some(joined) = pool.tasks.join_next().await {
            self.absorb(pool, joined)?;
        }

        // Whatever is left never finished; hand it back to the frontier
        for (_, task) in pool.in_flight.drain() {
            self.dedup.record_outcome(&PageOutcome {
                url: task.url.to_string(),
                depth: task.depth,
                outcome: TaskOutcome::Aborted,
                status_code: None,
                error: Some("aborted at shutdown".to_string()),
            })?;
            self.report.add_outcome(TaskOutcome::Aborted);
            self.frontier.push(task);
        }
        Ok(())
    }

    fn persist_frontier(&mut self) -> Result<(), HarvestError> {
        let entries: Vec<FrontierEntry> = self
            .frontier
            .drain_pending()
            .iter()
            .map(UrlTask::to_entry)
            .collect();
        self.dedup.record_store().save_frontier(&entries)?;

        info!("Saved {} frontier entries for resume", entries.len());
        self.report.frontier_saved = entries.len();
        Ok(())
    }

    /// Saves pending and in-flight tasks so a crashed run can resume
    fn checkpoint(&self, pool: &Pool) -> Result<(), HarvestError> {
        let mut entries: Vec<FrontierEntry> =
            pool.in_flight.values().map(UrlTask::to_entry).collect();
        entries.extend(self.frontier.snapshot().iter().map(UrlTask::to_entry));
        self.dedup.record_store().save_frontier(&entries)?;

        debug!("Checkpointed {} frontier entries", entries.len());
        Ok(())
    }

    /// Stops the crawl on a fatal error and returns the error
    async fn fail(&mut self, pool: &mut Pool, err: HarvestError) -> HarvestError {
        error!("Fatal error, stopping crawl: {}", err);

        if let Err(e) = self.checkpoint(pool) {
            warn!("Could not save frontier: {}", e);
        }
        pool.tasks.abort_all();
        while pool.tasks.join_next().await.is_some() {}

        self.phase = self
            .phase
            .transition(CrawlPhase::Stopped)
            .unwrap_or(CrawlPhase::Stopped);
        self.report.phase = self.phase;
        self.report.fatal_error = Some(err.to_string());

        if let Err(e) = self
            .dedup
            .record_store()
            .finish_run(self.report.run_id, RunStatus::Failed)
        {
            warn!("Could not mark run {} as failed: {}", self.report.run_id, e);
        }
        err
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
