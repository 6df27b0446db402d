//! Periodic background tasks: expiration warnings and sweeps, delivery
//! retries, and retention garbage collection. Each loop carries an
//! "already running" flag so a slow pass never stacks on itself.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use centavo_core::money::format_brl;
use chrono::Utc;

use crate::config::Config;
use crate::confirmation::repo::{ConfirmationRepo, RepoError};
use crate::delivery::DeliveryService;
use crate::providers::{NotificationContext, NotificationSink};

const WARNING_BATCH: i64 = 50;

/// Spawn a detached loop running `task` every `period`. Ticks that land
/// while a previous run is still marked in-flight are skipped.
pub fn spawn_periodic<F, Fut>(name: &'static str, period: Duration, task: F)
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let running = Arc::new(AtomicBool::new(false));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if running
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                tracing::warn!(job = name, "Previous run still in flight, skipping tick");
                continue;
            }
            task().await;
            running.store(false, Ordering::SeqCst);
        }
    });
}

/// Warns about soon-to-expire pending confirmations, then expires the
/// overdue ones. Expiration is irreversible.
pub struct ExpirationJob {
    repo: Arc<dyn ConfirmationRepo>,
    notifier: Arc<dyn NotificationSink>,
    warning_window: Duration,
}

impl ExpirationJob {
    pub fn new(
        repo: Arc<dyn ConfirmationRepo>,
        notifier: Arc<dyn NotificationSink>,
        warning_window: Duration,
    ) -> Self {
        Self {
            repo,
            notifier,
            warning_window,
        }
    }

    pub async fn run_once(&self, now: chrono::DateTime<Utc>) -> Result<(), RepoError> {
        let expiring = self
            .repo
            .due_for_warning(now, self.warning_window, WARNING_BATCH)
            .await?;
        for row in expiring {
            let seconds_left = (row.expires_at - now).num_seconds().max(0);
            self.notifier
                .notify(
                    &row.conversation_id,
                    &format!(
                        "⏰ Sua confirmação de {} em {} expira em {}s. Responda sim ou não.",
                        format_brl(row.amount_minor_units),
                        row.display_category(),
                        seconds_left
                    ),
                    NotificationContext::ExpirationWarning,
                    serde_json::json!({ "confirmation_id": row.id }),
                )
                .await;
            self.repo.mark_warned(row.id).await?;
        }

        let expired = self.repo.expire_overdue(now).await?;
        for row in &expired {
            self.notifier
                .notify(
                    &row.conversation_id,
                    &format!(
                        "A confirmação de {} em {} expirou. Envie a transação novamente quando quiser registrá-la.",
                        format_brl(row.amount_minor_units),
                        row.display_category()
                    ),
                    NotificationContext::Expired,
                    serde_json::json!({ "confirmation_id": row.id }),
                )
                .await;
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Expired stale confirmations");
        }

        Ok(())
    }
}

/// Deletes delivered rows past the retention window. Rejected and expired
/// rows are kept for audit.
pub struct RetentionJob {
    repo: Arc<dyn ConfirmationRepo>,
    retention: Duration,
}

impl RetentionJob {
    pub fn new(repo: Arc<dyn ConfirmationRepo>, retention: Duration) -> Self {
        Self { repo, retention }
    }

    pub async fn run_once(&self, now: chrono::DateTime<Utc>) -> Result<u64, RepoError> {
        let cutoff = now - chrono::Duration::from_std(self.retention).unwrap_or_default();
        let swept = self.repo.sweep_delivered(cutoff).await?;
        if swept > 0 {
            tracing::info!(swept, "Garbage-collected delivered confirmations");
        }
        Ok(swept)
    }
}

/// Wire all periodic jobs to the runtime.
pub fn spawn_all(
    config: &Config,
    repo: Arc<dyn ConfirmationRepo>,
    delivery: Arc<DeliveryService>,
    notifier: Arc<dyn NotificationSink>,
) {
    let expiration = Arc::new(ExpirationJob::new(
        repo.clone(),
        notifier,
        config.expiration_warning_window,
    ));
    spawn_periodic("expiration", config.expiration_interval, move || {
        let job = expiration.clone();
        async move {
            if let Err(err) = job.run_once(Utc::now()).await {
                tracing::error!(error = %err, "Expiration sweep failed");
            }
        }
    });

    let batch_size = config.delivery_batch_size;
    spawn_periodic("delivery-retry", config.delivery_interval, move || {
        let delivery = delivery.clone();
        async move {
            match delivery.run_sweep(batch_size).await {
                Ok(stats) if stats.delivered + stats.failed > 0 => {
                    tracing::info!(
                        delivered = stats.delivered,
                        failed = stats.failed,
                        "Delivery retry sweep finished"
                    );
                }
                Ok(_) => {}
                Err(err) => tracing::error!(error = %err, "Delivery retry sweep failed"),
            }
        }
    });

    let retention = Arc::new(RetentionJob::new(repo, config.delivered_retention));
    spawn_periodic("retention", config.sweep_interval, move || {
        let job = retention.clone();
        async move {
            if let Err(err) = job.run_once(Utc::now()).await {
                tracing::error!(error = %err, "Retention sweep failed");
            }
        }
    });
}
