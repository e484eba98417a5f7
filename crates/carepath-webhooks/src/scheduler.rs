//! Retry scheduler.
//!
//! Background worker that sweeps due deliveries, claims them, and hands each
//! one to the dispatcher. Attempts within a sweep run in parallel up to the
//! configured concurrency; a sweep returns only once all of them have been
//! persisted or released.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{
    DEFAULT_BATCH_SIZE, DEFAULT_CLAIM_LEASE_SECS, DEFAULT_CONCURRENCY, DEFAULT_POLL_INTERVAL_SECS,
};
use crate::models::{AttemptRecord, WebhookDelivery};
use crate::retry::BackoffStrategy;
use crate::services::dispatcher::{AttemptOutcome, AttemptResult, Dispatcher};
use crate::store::{DeliveryStore, StoreError, SubscriptionStore};

pub const SUBSCRIPTION_NOT_FOUND_ERROR: &str = "subscription not found";

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between sweeps.
    pub poll_interval: Duration,

    /// Maximum deliveries claimed per sweep.
    pub batch_size: usize,

    /// Maximum attempts in flight at once.
    pub concurrency: usize,

    /// How long a claim hides a delivery from other workers.
    pub claim_lease: Duration,

    pub backoff: BackoffStrategy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            claim_lease: Duration::from_secs(DEFAULT_CLAIM_LEASE_SECS),
            backoff: BackoffStrategy::Fixed,
        }
    }
}

/// Per-sweep counters. `claimed` equals the sum of the other four.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub claimed: usize,
    pub delivered: usize,
    pub retrying: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl SweepStats {
    fn record(&mut self, outcome: AttemptOutcome) {
        match outcome {
            AttemptOutcome::Delivered => self.delivered += 1,
            AttemptOutcome::Retrying => self.retrying += 1,
            AttemptOutcome::Failed => self.failed += 1,
            AttemptOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Everything a spawned attempt needs.
#[derive(Clone)]
struct SweepContext {
    subscriptions: Arc<dyn SubscriptionStore>,
    deliveries: Arc<dyn DeliveryStore>,
    dispatcher: Arc<Dispatcher>,
}

/// Periodically dispatches pending and due retrying deliveries.
pub struct RetryScheduler {
    ctx: SweepContext,
    config: SchedulerConfig,
    shutdown: CancellationToken,
}

impl RetryScheduler {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        deliveries: Arc<dyn DeliveryStore>,
        dispatcher: Arc<Dispatcher>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            ctx: SweepContext {
                subscriptions,
                deliveries,
                dispatcher,
            },
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Tie the scheduler's lifetime to an externally owned token.
    #[must_use]
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Request graceful shutdown. In-flight attempts finish; no new ones start.
    pub fn shutdown(&self) {
        info!("Retry scheduler shutdown requested");
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Sweep on `poll_interval` until shutdown is requested.
    #[instrument(skip(self))]
    pub async fn run(&self) {
        info!(
            concurrency = self.config.concurrency,
            batch_size = self.config.batch_size,
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "Starting webhook retry scheduler"
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    info!("Shutdown requested, stopping sweep loop");
                    break;
                }
                _ = ticker.tick() => {
                    match self.process_due_deliveries().await {
                        Ok(stats) if stats.claimed > 0 => {
                            info!(
                                claimed = stats.claimed,
                                delivered = stats.delivered,
                                retrying = stats.retrying,
                                failed = stats.failed,
                                skipped = stats.skipped,
                                "Webhook sweep completed"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => {
                            // Nothing was claimed; the next tick tries again.
                            error!(error = %e, "Failed to claim due deliveries");
                        }
                    }
                }
            }
        }

        info!("Webhook retry scheduler stopped");
    }

    pub async fn process_due_deliveries(&self) -> Result<SweepStats, StoreError> {
        self.process_due_at(Utc::now()).await
    }

    /// One sweep with `now` as the clock for due checks.
    ///
    /// Each attempt is stamped with `now` plus the real time that passed
    /// before it got a concurrency permit.
    pub async fn process_due_at(&self, now: DateTime<Utc>) -> Result<SweepStats, StoreError> {
        let mut stats = SweepStats::default();
        if self.shutdown.is_cancelled() {
            return Ok(stats);
        }

        let sweep_started = Instant::now();
        let lease = chrono::Duration::from_std(self.config.claim_lease)
            .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_CLAIM_LEASE_SECS as i64));
        let claimed = self
            .ctx
            .deliveries
            .claim_due(now, now + lease, self.config.batch_size)
            .await?;

        if claimed.is_empty() {
            return Ok(stats);
        }
        stats.claimed = claimed.len();
        debug!(count = claimed.len(), "Claimed due deliveries");

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut pending = claimed.into_iter();

        while let Some(delivery) = pending.next() {
            if self.shutdown.is_cancelled() {
                let remaining: Vec<_> = std::iter::once(delivery).chain(pending.by_ref()).collect();
                info!(
                    count = remaining.len(),
                    "Shutdown requested mid-sweep, releasing unstarted claims"
                );
                for delivery in remaining {
                    release(&self.ctx, &delivery).await;
                    stats.skipped += 1;
                }
                break;
            }

            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                release(&self.ctx, &delivery).await;
                stats.skipped += 1;
                continue;
            };
            let ctx = self.ctx.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let started = now
                    + chrono::Duration::from_std(sweep_started.elapsed())
                        .unwrap_or_else(|_| chrono::Duration::zero());
                // The batch was claimed up front; the tail of a large batch may
                // have outlived that lease while waiting for a permit.
                if !renew(&ctx, &delivery, started + lease).await {
                    return AttemptOutcome::Skipped;
                }
                process_delivery(ctx, delivery, started).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => stats.record(outcome),
                Err(e) => {
                    // The claim expires after the lease; the delivery is retried then.
                    error!(error = %e, "Delivery task aborted");
                    stats.skipped += 1;
                }
            }
        }

        Ok(stats)
    }
}

/// Load, attempt, persist. Store failures never touch the attempt count.
async fn process_delivery(
    ctx: SweepContext,
    delivery: WebhookDelivery,
    now: DateTime<Utc>,
) -> AttemptOutcome {
    let expected_attempt_count = delivery.attempt_count;

    let subscription = match ctx
        .subscriptions
        .find_subscription(delivery.tenant_id, delivery.subscription_id)
        .await
    {
        Ok(subscription) => subscription,
        Err(e) => {
            error!(
                target: "webhook_delivery",
                delivery_id = %delivery.id,
                subscription_id = %delivery.subscription_id,
                error = %e,
                "Failed to load subscription for delivery"
            );
            release(&ctx, &delivery).await;
            return AttemptOutcome::Skipped;
        }
    };

    let result = match subscription {
        Some(subscription) => ctx.dispatcher.attempt(&delivery, &subscription, now).await,
        None => {
            warn!(
                target: "webhook_delivery",
                delivery_id = %delivery.id,
                subscription_id = %delivery.subscription_id,
                tenant_id = %delivery.tenant_id,
                "Subscription no longer exists, failing delivery"
            );
            let mut failed = delivery.clone();
            let outcome = match failed
                .mark_failed(AttemptRecord::classification(SUBSCRIPTION_NOT_FOUND_ERROR), now)
            {
                Ok(()) => AttemptOutcome::Failed,
                Err(_) => AttemptOutcome::Skipped,
            };
            AttemptResult {
                delivery: failed,
                outcome,
                dispatched: false,
            }
        }
    };

    if result.outcome == AttemptOutcome::Skipped {
        release(&ctx, &delivery).await;
        return AttemptOutcome::Skipped;
    }

    match ctx
        .deliveries
        .complete_attempt(&result.delivery, expected_attempt_count)
        .await
    {
        Ok(true) => result.outcome,
        Ok(false) => {
            warn!(
                target: "webhook_delivery",
                delivery_id = %delivery.id,
                expected_attempt_count,
                "Delivery changed while in flight, outcome discarded"
            );
            AttemptOutcome::Skipped
        }
        Err(e) => {
            error!(
                target: "webhook_delivery",
                delivery_id = %delivery.id,
                dispatched = result.dispatched,
                error = %e,
                "Failed to persist delivery outcome"
            );
            release(&ctx, &delivery).await;
            AttemptOutcome::Skipped
        }
    }
}

/// Extend this worker's claim before dispatch. False means the delivery must
/// not be attempted by this worker.
async fn renew(ctx: &SweepContext, delivery: &WebhookDelivery, claim_until: DateTime<Utc>) -> bool {
    let Some(held_until) = delivery.claimed_until else {
        warn!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            "Claimed delivery carries no claim, skipping"
        );
        return false;
    };

    match ctx
        .deliveries
        .renew_claim(delivery.id, held_until, claim_until)
        .await
    {
        Ok(true) => true,
        Ok(false) => {
            warn!(
                target: "webhook_delivery",
                delivery_id = %delivery.id,
                held_until = %held_until,
                "Claim lapsed before dispatch and was taken over, skipping"
            );
            false
        }
        Err(e) => {
            // Not released: the claim may already belong to another worker.
            error!(
                target: "webhook_delivery",
                delivery_id = %delivery.id,
                error = %e,
                "Failed to renew delivery claim"
            );
            false
        }
    }
}

async fn release(ctx: &SweepContext, delivery: &WebhookDelivery) {
    if let Err(e) = ctx.deliveries.release_claim(delivery.id).await {
        // Best effort; the lease expires on its own.
        warn!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            error = %e,
            "Failed to release delivery claim"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_config_default() {
        let config = SchedulerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.claim_lease, Duration::from_secs(300));
        assert_eq!(config.backoff, BackoffStrategy::Fixed);
    }

    #[test]
    fn test_sweep_stats_record() {
        let mut stats = SweepStats::default();
        for outcome in [
            AttemptOutcome::Delivered,
            AttemptOutcome::Retrying,
            AttemptOutcome::Retrying,
            AttemptOutcome::Failed,
            AttemptOutcome::Skipped,
        ] {
            stats.record(outcome);
        }
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.retrying, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.skipped, 1);
    }
}
