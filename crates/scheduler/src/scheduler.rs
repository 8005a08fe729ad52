//! Discovery and order-sync cycles over all active users.
//!
//! # Overview
//!
//! Two intervals drive the scheduler. Each tick starts a round that runs
//! the cycle for every active user on a pool of `min(users, max)` permits.
//! A cycle holds the `(user, kind)` lease for its whole run and is aborted
//! once it exceeds the cycle deadline; every state change it already made
//! stays, since each one is a single store write.
//!
//! - **Discovery**: resume interrupted offers, search each configured
//!   category, discover new listings, evaluate them against the full item
//!   record and publish while the tier allows, then expire stale offers.
//! - **Sync**: fetch orders since the stored cursor, record sales, fulfil
//!   new and interrupted orders, audit published offers.
//!
//! # Example
//!
//! ```ignore
//! let scheduler = Scheduler::new(reconciler, directory, factory, config.scheduler);
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! tokio::spawn(async move { scheduler.run(shutdown_rx).await });
//! ```

use crate::directory::{AdapterFactory, UserAdapters, UserDirectory};
use crate::lease::{CycleKind, LeaseGuard, LeaseRegistry};
use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use relist_core::{EngineEvent, SchedulerConfig, UserId, UserSettings};
use relist_engine::{
    with_timeout, AuditReport, Discovery, ListingOutcome, Reconciler, ResumeReport, SaleOutcome,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Sync cursors are stored this far behind the fetch time so orders that
/// land late on the sink are still seen. Repeats are deduplicated.
const SYNC_OVERLAP_SECS: i64 = 60;

// =============================================================================
// Results
// =============================================================================

/// Why a manual trigger was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    AlreadyRunning,
}

/// Result of [`Scheduler::trigger_discovery_now`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerResult {
    Accepted,
    Rejected(RejectReason),
}

/// Why a cycle did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    LeaseHeld,
    NotConfigured,
    MissingCredentials,
}

/// Counters from one user cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub user_id: UserId,
    pub kind: CycleKind,
    pub listings: usize,
    pub duplicates: usize,
    pub filtered: usize,
    pub published: usize,
    pub deferred: usize,
    pub publish_failed: usize,
    pub sales_recorded: usize,
    pub sales_duplicate: usize,
    pub sales_unmatched: usize,
    /// Sales against offers no longer for sale, cancelled on the sink.
    pub sales_refused: usize,
    pub expired: usize,
    pub resumed: ResumeReport,
    pub audit: AuditReport,
    pub errors: usize,
    pub duration_ms: u64,
}

impl CycleReport {
    fn new(user_id: UserId, kind: CycleKind) -> Self {
        Self {
            user_id,
            kind,
            listings: 0,
            duplicates: 0,
            filtered: 0,
            published: 0,
            deferred: 0,
            publish_failed: 0,
            sales_recorded: 0,
            sales_duplicate: 0,
            sales_unmatched: 0,
            sales_refused: 0,
            expired: 0,
            resumed: ResumeReport::default(),
            audit: AuditReport::default(),
            errors: 0,
            duration_ms: 0,
        }
    }

    fn count_listing(&mut self, outcome: &ListingOutcome) {
        match outcome {
            ListingOutcome::Duplicate(_) => self.duplicates += 1,
            ListingOutcome::Filtered(_) => self.filtered += 1,
            ListingOutcome::Published(_) => self.published += 1,
            ListingOutcome::Deferred(_) => self.deferred += 1,
            ListingOutcome::PublishFailed(_) => self.publish_failed += 1,
        }
    }
}

/// What happened to one scheduled or triggered cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(CycleReport),
    Skipped(SkipReason),
    DeadlineExceeded,
    Failed(String),
}

// =============================================================================
// Scheduler
// =============================================================================

#[derive(Clone)]
pub struct Scheduler {
    reconciler: Arc<Reconciler>,
    directory: Arc<dyn UserDirectory>,
    adapters: Arc<dyn AdapterFactory>,
    leases: LeaseRegistry,
    config: SchedulerConfig,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    #[must_use]
    pub fn new(
        reconciler: Arc<Reconciler>,
        directory: Arc<dyn UserDirectory>,
        adapters: Arc<dyn AdapterFactory>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            reconciler,
            directory,
            adapters,
            leases: LeaseRegistry::new(config.lease_ttl()),
            config,
        }
    }

    #[must_use]
    pub fn leases(&self) -> &LeaseRegistry {
        &self.leases
    }

    #[must_use]
    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Runs both intervals until `shutdown` flips to `true` or its sender
    /// is dropped. Rounds run as background tasks; missed ticks are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Currently always returns `Ok`; round failures are logged.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut discovery = tokio::time::interval(self.config.discovery_interval());
        discovery.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sync = tokio::time::interval(self.config.sync_interval());
        sync.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            discovery_secs = self.config.discovery_interval_secs,
            sync_secs = self.config.sync_interval_secs,
            "scheduler started"
        );

        loop {
            tokio::select! {
                _ = discovery.tick() => self.spawn_round(CycleKind::Discovery),
                _ = sync.tick() => self.spawn_round(CycleKind::Sync),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("scheduler stopped");
        Ok(())
    }

    fn spawn_round(&self, kind: CycleKind) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            if let Err(e) = scheduler.run_round(kind).await {
                error!(kind = %kind, error = %e, "round failed");
            }
        });
    }

    /// Runs `kind` for every active user on the bounded pool and returns
    /// each user's outcome.
    ///
    /// # Errors
    ///
    /// Returns an error if the active users cannot be listed.
    pub async fn run_round(&self, kind: CycleKind) -> Result<Vec<(UserId, CycleOutcome)>> {
        let users = self.directory.active_users().await?;
        if users.is_empty() {
            debug!(kind = %kind, "no active users");
            return Ok(Vec::new());
        }

        let permits = users.len().min(self.config.max_concurrent_users).max(1);
        let semaphore = Arc::new(Semaphore::new(permits));
        let mut tasks = JoinSet::new();

        for user_id in users {
            let scheduler = self.clone();
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => scheduler.run_cycle(user_id, kind).await,
                    Err(_) => CycleOutcome::Failed("worker pool closed".to_string()),
                };
                (user_id, outcome)
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => outcomes.push(result),
                Err(e) => error!(kind = %kind, error = %e, "cycle task panicked"),
            }
        }
        Ok(outcomes)
    }

    /// Runs one cycle for one user if its lease is free.
    pub async fn run_cycle(&self, user_id: UserId, kind: CycleKind) -> CycleOutcome {
        match self.leases.try_acquire(user_id, kind) {
            Some(lease) => self.run_leased(lease).await,
            None => {
                info!(user_id = %user_id, kind = %kind, "cycle still running, tick skipped");
                CycleOutcome::Skipped(SkipReason::LeaseHeld)
            }
        }
    }

    /// Starts a discovery cycle in the background unless one is running.
    #[must_use]
    pub fn trigger_discovery_now(&self, user_id: UserId) -> TriggerResult {
        let Some(lease) = self.leases.try_acquire(user_id, CycleKind::Discovery) else {
            info!(user_id = %user_id, "manual discovery rejected, cycle already running");
            return TriggerResult::Rejected(RejectReason::AlreadyRunning);
        };

        info!(user_id = %user_id, "manual discovery accepted");
        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.run_leased(lease).await;
        });
        TriggerResult::Accepted
    }

    async fn run_leased(&self, lease: LeaseGuard) -> CycleOutcome {
        let user_id = lease.user_id();
        let kind = lease.kind();
        let started = Instant::now();

        let outcome =
            match tokio::time::timeout(self.config.cycle_deadline(), self.cycle(user_id, kind))
                .await
            {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    error!(user_id = %user_id, kind = %kind, error = %e, "cycle failed");
                    CycleOutcome::Failed(e.to_string())
                }
                Err(_) => {
                    warn!(
                        user_id = %user_id,
                        kind = %kind,
                        deadline_secs = self.config.cycle_deadline_secs,
                        "cycle exceeded deadline, aborted"
                    );
                    CycleOutcome::DeadlineExceeded
                }
            };
        drop(lease);

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let outcome = match outcome {
            CycleOutcome::Completed(mut report) => {
                report.duration_ms = duration_ms;
                info!(
                    user_id = %user_id,
                    kind = %kind,
                    duration_ms,
                    published = report.published,
                    sales = report.sales_recorded,
                    errors = report.errors,
                    "cycle completed"
                );
                CycleOutcome::Completed(report)
            }
            other => other,
        };

        if !matches!(outcome, CycleOutcome::Skipped(_)) {
            let _ = self.reconciler.event_sender().send(EngineEvent::CycleCompleted {
                user_id,
                kind: kind.as_str().to_string(),
                duration_ms,
            });
        }
        outcome
    }

    async fn cycle(&self, user_id: UserId, kind: CycleKind) -> Result<CycleOutcome> {
        let Some(settings) = self.directory.settings(user_id).await? else {
            debug!(user_id = %user_id, "no settings, cycle skipped");
            return Ok(CycleOutcome::Skipped(SkipReason::NotConfigured));
        };
        let Some(adapters) = self.adapters.adapters(user_id).await? else {
            warn!(user_id = %user_id, "credentials incomplete, cycle skipped");
            return Ok(CycleOutcome::Skipped(SkipReason::MissingCredentials));
        };

        let mut report = CycleReport::new(user_id, kind);
        match kind {
            CycleKind::Discovery => self.discovery(&settings, &adapters, &mut report).await?,
            CycleKind::Sync => self.sync(&settings, &adapters, &mut report).await?,
        }
        Ok(CycleOutcome::Completed(report))
    }

    // =========================================================================
    // Cycles
    // =========================================================================

    async fn discovery(
        &self,
        settings: &UserSettings,
        adapters: &UserAdapters,
        report: &mut CycleReport,
    ) -> Result<()> {
        let user_id = settings.user_id;
        let timeout = self.adapter_timeout();
        let source = adapters.source.as_ref();
        let sink = adapters.sink.as_ref();
        let now = Utc::now();

        report.resumed = self.reconciler.resume_offers(settings, source, sink, now).await?;

        'categories: for &category in settings.categories() {
            let listings = match with_timeout(
                timeout,
                source.fetch_listings(category, settings.price_min(), settings.price_max()),
            )
            .await
            {
                Ok(listings) => listings,
                Err(e) => {
                    warn!(user_id = %user_id, category = %category, error = %e, "listing search failed");
                    report.errors += 1;
                    continue;
                }
            };

            for listing in listings {
                report.listings += 1;
                if !self.reconciler.has_capacity(settings).await? {
                    info!(
                        user_id = %user_id,
                        limit = settings.offer_limit(),
                        "tier limit reached, discovery stops"
                    );
                    break 'categories;
                }

                let offer = match self.reconciler.discover(&listing, settings).await {
                    Ok(Discovery::Created(offer)) => offer,
                    Ok(Discovery::Duplicate(_)) => {
                        report.duplicates += 1;
                        continue;
                    }
                    Err(e) => {
                        warn!(user_id = %user_id, source_id = %listing.source_id, error = %e, "discovery failed");
                        report.errors += 1;
                        continue;
                    }
                };

                let detail = match with_timeout(timeout, source.fetch_listing_detail(&listing.source_id)).await {
                    Ok(detail) if detail.category == listing.category => detail,
                    Ok(_) => listing.clone(),
                    Err(e) => {
                        debug!(source_id = %listing.source_id, error = %e, "detail unavailable, using search record");
                        listing.clone()
                    }
                };

                match self
                    .reconciler
                    .advance_discovered(&offer, &detail, settings, sink, now)
                    .await
                {
                    Ok(outcome) => report.count_listing(&outcome),
                    Err(e) => {
                        warn!(offer_id = %offer.offer_id, error = %e, "offer processing failed");
                        report.errors += 1;
                    }
                }
            }
        }

        report.expired = self.reconciler.expire_stale(user_id, sink, Utc::now()).await?;
        Ok(())
    }

    async fn sync(
        &self,
        settings: &UserSettings,
        adapters: &UserAdapters,
        report: &mut CycleReport,
    ) -> Result<()> {
        let user_id = settings.user_id;
        let source = adapters.source.as_ref();
        let sink = adapters.sink.as_ref();
        let store = self.reconciler.store();

        let since = store.sync_cursor(user_id).await?;
        let fetched_at = Utc::now();
        match with_timeout(self.adapter_timeout(), sink.fetch_orders(since)).await {
            Ok(orders) => {
                let mut record_errors = 0;
                for sale in &orders {
                    match self.reconciler.record_sale(user_id, sale, sink).await {
                        Ok(SaleOutcome::Recorded(_)) => report.sales_recorded += 1,
                        Ok(SaleOutcome::Duplicate(_)) => report.sales_duplicate += 1,
                        Ok(SaleOutcome::Unmatched) => report.sales_unmatched += 1,
                        Ok(SaleOutcome::Refused(_)) => report.sales_refused += 1,
                        Err(e) => {
                            warn!(user_id = %user_id, sink_order_id = %sale.sink_order_id, error = %e, "sale not recorded");
                            record_errors += 1;
                        }
                    }
                }
                report.errors += record_errors;
                if record_errors == 0 {
                    store
                        .set_sync_cursor(user_id, fetched_at - ChronoDuration::seconds(SYNC_OVERLAP_SECS))
                        .await?;
                }
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "order fetch failed");
                report.errors += 1;
            }
        }

        report.resumed = self.reconciler.resume_orders(user_id, source, sink).await?;
        report.audit = self.reconciler.audit_published(user_id, sink).await?;
        Ok(())
    }

    fn adapter_timeout(&self) -> Duration {
        self.reconciler.config().adapter_timeout
    }
}
