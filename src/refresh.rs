//! Archive Refresh Actor
//!
//! Each archive gets its own task that periodically drives the fetcher, the
//! stanza parser and the cache store. Tasks never share locks, so a slow or
//! unreachable archive only delays its own refreshes.

use crate::archive::{ArchiveConfig, ArchiveId, IndexScope};
use crate::error::Error;
use crate::fetch::{FetchOutcome, IndexFetcher, IndexState};
use crate::metadata::{ParsedIndex, StanzaContext, parse_index};
use crate::models::{PackageRecord, RefreshResult};
use crate::storage::IndexCache;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Duration, Instant, MissedTickBehavior};

/// What a pass did to one pocket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PocketOutcome {
    /// Snapshot replaced with this many records
    Replaced(usize),
    /// Every index was unchanged
    Unchanged,
    /// Prior snapshot kept because the pocket could not be rebuilt
    Kept,
}

#[derive(Debug)]
pub struct PocketReport {
    pub outcome: PocketOutcome,
    pub error: Option<Error>,
}

/// Runs refresh passes for one archive.
pub struct ArchiveRefresher {
    archive: Arc<ArchiveConfig>,
    fetcher: IndexFetcher,
    index_cache: IndexCache,
}

impl ArchiveRefresher {
    pub fn new(archive: Arc<ArchiveConfig>) -> Self {
        Self {
            fetcher: IndexFetcher::new(archive.client.clone()),
            index_cache: IndexCache::new(&archive.cache_dir),
            archive,
        }
    }

    pub fn archive(&self) -> &ArchiveConfig {
        &self.archive
    }

    pub fn fetcher(&self) -> &IndexFetcher {
        &self.fetcher
    }

    /// One full pass over every configured pocket.
    ///
    /// Pockets are independent: a failure in one never prevents the others
    /// from being replaced.
    pub async fn refresh_once(&self, force: bool) -> RefreshResult {
        let started_at = Utc::now();
        let start = Instant::now();
        self.fetcher.begin_pass().await;

        let mut last_error = None;
        let mut pockets_replaced = 0;
        let mut pockets_unchanged = 0;

        for pocket in &self.archive.pockets {
            let report = self.refresh_pocket(pocket, force).await;
            match report.outcome {
                PocketOutcome::Replaced(_) => pockets_replaced += 1,
                PocketOutcome::Unchanged => pockets_unchanged += 1,
                PocketOutcome::Kept => {}
            }
            if let Some(e) = report.error {
                last_error = Some(e);
            }
        }

        let records = match self.archive.store.record_count() {
            Ok(count) => count,
            Err(e) => {
                last_error = Some(e);
                0
            }
        };

        RefreshResult {
            archive: self.archive.id.to_string(),
            started_at,
            duration: start.elapsed(),
            records,
            pockets_replaced,
            pockets_unchanged,
            error: last_error.map(|e| e.to_string()),
        }
    }

    /// Fetch every index of `pocket` and replace its snapshot if anything changed.
    pub async fn refresh_pocket(&self, pocket: &str, force: bool) -> PocketReport {
        let archive = &self.archive;
        let mut last_error = None;
        let mut outcomes: Vec<(IndexScope, Option<FetchOutcome>)> = Vec::new();

        for scope in archive.scopes(pocket) {
            match self.fetcher.fetch(archive, &scope, force).await {
                Ok(outcome) => outcomes.push((scope, Some(outcome))),
                Err(e) => {
                    tracing::warn!(archive = %archive.id, scope = %scope, error = %e, "Index fetch failed");
                    outcomes.push((scope, None));
                    last_error = Some(e);
                }
            }
        }

        let fresh = outcomes.iter().any(|(_, outcome)| {
            matches!(
                outcome,
                Some(FetchOutcome::Fetched { .. }) | Some(FetchOutcome::Absent)
            )
        });
        if !fresh {
            let outcome = if last_error.is_none() {
                PocketOutcome::Unchanged
            } else {
                PocketOutcome::Kept
            };
            return PocketReport {
                outcome,
                error: last_error,
            };
        }

        let mut records: Vec<PackageRecord> = Vec::new();
        let mut skipped = 0;
        let mut staged: Vec<(IndexScope, IndexState)> = Vec::new();

        for (scope, outcome) in outcomes {
            // A failed index that never stored anything has nothing to lose
            let droppable = outcome.is_none() && !self.fetcher.contributed(&scope).await;
            let data = match outcome {
                Some(FetchOutcome::Fetched { data, digest }) => {
                    match self.index_cache.stage(&scope, &data).await {
                        Ok(()) => staged.push((scope.clone(), IndexState::Present(digest))),
                        Err(e) => {
                            tracing::warn!(archive = %archive.id, scope = %scope, error = %e, "Failed to stage index");
                            last_error = Some(e);
                        }
                    }
                    data
                }
                Some(FetchOutcome::Absent) => {
                    staged.push((scope, IndexState::Absent));
                    continue;
                }
                Some(FetchOutcome::NotModified { absent: true }) => continue,
                Some(FetchOutcome::NotModified { absent: false }) | None => {
                    match self.index_cache.load(&scope).await {
                        Ok(Some(data)) => data,
                        Ok(None) if droppable => continue,
                        cached => {
                            if let Err(e) = cached {
                                tracing::warn!(archive = %archive.id, scope = %scope, error = %e, "Failed to read cached index");
                            }
                            // Next pass downloads it again
                            self.fetcher.forget(&scope).await;
                            self.discard_staged(&staged).await;
                            return PocketReport {
                                outcome: PocketOutcome::Kept,
                                error: last_error.or_else(|| {
                                    Some(Error::Store {
                                        archive: archive.id.to_string(),
                                        msg: format!("no cached copy of {}", scope),
                                    })
                                }),
                            };
                        }
                    }
                }
            };

            match self.parse(&scope, data).await {
                Ok(parsed) => {
                    skipped += parsed.skipped;
                    records.extend(parsed.records);
                }
                Err(e) => {
                    self.discard_staged(&staged).await;
                    return PocketReport {
                        outcome: PocketOutcome::Kept,
                        error: Some(e),
                    };
                }
            }
        }

        match archive.store.replace(pocket, records).await {
            Ok(count) => {
                for (scope, state) in staged {
                    let committed = match &state {
                        IndexState::Present(_) => self.index_cache.promote(&scope).await,
                        IndexState::Absent => self.index_cache.remove(&scope).await,
                    };
                    match committed {
                        Ok(()) => self.fetcher.commit(&scope, state).await,
                        Err(e) => {
                            tracing::warn!(archive = %archive.id, scope = %scope, error = %e, "Failed to commit cached index");
                            self.fetcher.forget(&scope).await;
                            last_error = Some(e);
                        }
                    }
                }
                tracing::info!(
                    archive = %archive.id,
                    pocket,
                    records = count,
                    skipped,
                    "Pocket snapshot replaced"
                );
                PocketReport {
                    outcome: PocketOutcome::Replaced(count),
                    error: last_error,
                }
            }
            Err(e) => {
                tracing::error!(archive = %archive.id, pocket, error = %e, "Failed to replace pocket snapshot");
                self.discard_staged(&staged).await;
                PocketReport {
                    outcome: PocketOutcome::Kept,
                    error: Some(e),
                }
            }
        }
    }

    async fn parse(&self, scope: &IndexScope, data: Vec<u8>) -> Result<ParsedIndex, Error> {
        let archive = self.archive.id.to_string();
        let pocket = scope.pocket.clone();
        let component = scope.component.clone();

        tokio::task::spawn_blocking(move || {
            let ctx = StanzaContext {
                archive: &archive,
                pocket: &pocket,
                component: &component,
            };
            parse_index(&data, &ctx)
        })
        .await
        .map_err(|e| Error::Store {
            archive: self.archive.id.to_string(),
            msg: format!("parser task failed for {}: {}", scope, e),
        })
    }

    async fn discard_staged(&self, staged: &[(IndexScope, IndexState)]) {
        for (scope, _) in staged {
            self.index_cache.discard(scope).await;
        }
    }
}

/// Message sent to a refresh task
#[derive(Debug)]
pub enum RefreshMessage {
    /// Run a pass now and reply with its result
    RefreshNow {
        force: bool,
        reply: oneshot::Sender<RefreshResult>,
    },
    /// Stop the task after the current pass
    Shutdown,
}

/// Handle for sending messages to a refresh task
#[derive(Clone)]
pub struct RefreshHandle {
    archive: ArchiveId,
    tx: mpsc::Sender<RefreshMessage>,
}

impl RefreshHandle {
    pub fn archive(&self) -> &ArchiveId {
        &self.archive
    }

    /// Run a pass on the task and wait for its result.
    pub async fn refresh_now(&self, force: bool) -> Option<RefreshResult> {
        let (reply, rx) = oneshot::channel();
        if let Err(e) = self.tx.send(RefreshMessage::RefreshNow { force, reply }).await {
            tracing::error!(archive = %self.archive, error = %e, "Failed to send refresh request");
            return None;
        }
        rx.await.ok()
    }

    /// Request graceful shutdown of the task
    pub async fn shutdown(&self) {
        if let Err(e) = self.tx.send(RefreshMessage::Shutdown).await {
            tracing::warn!(archive = %self.archive, error = %e, "Failed to send shutdown message to refresh task");
        }
    }
}

/// Timed refresh loop for one archive.
pub struct RefreshTask {
    rx: mpsc::Receiver<RefreshMessage>,
    refresher: Arc<ArchiveRefresher>,
    interval: Duration,
    reports: mpsc::Sender<RefreshResult>,
}

impl RefreshTask {
    /// Channel capacity
    const CHANNEL_CAPACITY: usize = 16;

    /// Create a new task and its handle
    pub fn new(
        refresher: Arc<ArchiveRefresher>,
        interval: Duration,
        reports: mpsc::Sender<RefreshResult>,
    ) -> (Self, RefreshHandle) {
        let (tx, rx) = mpsc::channel(Self::CHANNEL_CAPACITY);

        let handle = RefreshHandle {
            archive: refresher.archive().id.clone(),
            tx,
        };

        let task = Self {
            rx,
            refresher,
            interval,
            reports,
        };

        (task, handle)
    }

    /// Run the refresh loop. The first timed pass happens one interval from now.
    pub async fn run(mut self) {
        let archive = self.refresher.archive().id.clone();
        tracing::info!(
            archive = %archive,
            interval_secs = self.interval.as_secs(),
            "Refresh task started"
        );

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                msg = self.rx.recv() => {
                    match msg {
                        Some(RefreshMessage::RefreshNow { force, reply }) => {
                            let result = self.refresher.refresh_once(force).await;
                            self.report(result.clone()).await;
                            let _ = reply.send(result);
                        }
                        Some(RefreshMessage::Shutdown) => {
                            tracing::info!(archive = %archive, "Refresh task received shutdown signal");
                            break;
                        }
                        None => {
                            tracing::info!(archive = %archive, "Refresh task channel closed");
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    let result = self.refresher.refresh_once(false).await;
                    self.report(result).await;
                }
            }
        }

        tracing::info!(archive = %archive, "Refresh task stopped");
    }

    async fn report(&self, result: RefreshResult) {
        if self.reports.send(result).await.is_err() {
            tracing::debug!("Refresh report receiver dropped");
        }
    }
}

/// Owns the refresh tasks of every archive.
pub struct RefreshSupervisor {
    tasks: Vec<(RefreshHandle, JoinHandle<()>)>,
}

impl RefreshSupervisor {
    /// Spawn one refresh task per archive.
    pub fn start(
        refreshers: &[Arc<ArchiveRefresher>],
        interval: Duration,
        reports: mpsc::Sender<RefreshResult>,
    ) -> Self {
        let tasks = refreshers
            .iter()
            .map(|refresher| {
                let (task, handle) = RefreshTask::new(Arc::clone(refresher), interval, reports.clone());
                (handle, tokio::spawn(task.run()))
            })
            .collect();

        Self { tasks }
    }

    pub fn handles(&self) -> impl Iterator<Item = &RefreshHandle> {
        self.tasks.iter().map(|(handle, _)| handle)
    }

    /// Stop every task and wait for them to finish their current pass.
    pub async fn shutdown(self) {
        for (handle, _) in &self.tasks {
            handle.shutdown().await;
        }
        for (handle, join) in self.tasks {
            if let Err(e) = join.await {
                tracing::error!(archive = %handle.archive(), error = %e, "Refresh task failed");
            }
        }
    }
}

/// Forced pass over every archive, run concurrently. Results keep the
/// order of `refreshers`.
pub async fn initial_refresh(refreshers: &[Arc<ArchiveRefresher>]) -> Vec<RefreshResult> {
    let mut set = JoinSet::new();
    for (i, refresher) in refreshers.iter().enumerate() {
        let refresher = Arc::clone(refresher);
        set.spawn(async move { (i, refresher.refresh_once(true).await) });
    }

    let mut results: Vec<Option<RefreshResult>> = vec![None; refreshers.len()];
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((i, result)) => results[i] = Some(result),
            Err(e) => tracing::error!(error = %e, "Startup refresh task failed"),
        }
    }

    results.into_iter().flatten().collect()
}
