//! Background sweeper - ages out orders nobody moved forward.
//!
//! Each pass, in order:
//! 1. tells admins once about every CREATED order idle longer than the notice threshold,
//! 2. cancels CREATED orders nobody took within the cancel threshold,
//! 3. completes in-progress orders idle longer than the completion threshold.
//!
//! Cancellation and completion replay the regular workflow transitions as the
//! bootstrap admin, one transaction per order. A failing order is logged and
//! skipped.

use crate::{
    config::app::SweeperConfig,
    core::{order_repository, users, workflow::OrderWorkflow},
    entities::{StaleOrderNotice, order, stale_order_notice, user},
    errors::{Error, Result},
    notify::{Notification, NotificationQueue},
};
use sea_orm::{DatabaseConnection, EntityTrait, Set, sea_query::OnConflict};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Comment stored on orders the sweeper cancels
pub const CANCEL_COMMENT: &str = "Order was not taken into work within 48 hours";

/// What one sweep did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Stale-order notices queued
    pub stale_notices: usize,
    /// Orders cancelled
    pub cancelled: usize,
    /// Orders completed
    pub completed: usize,
    /// Orders that failed and were skipped
    pub failed: usize,
}

/// Periodic aging of stale orders
pub struct Sweeper {
    db: DatabaseConnection,
    workflow: OrderWorkflow,
    queue: NotificationQueue,
    config: SweeperConfig,
    admin_email: String,
}

impl Sweeper {
    /// Creates a sweeper acting as the admin with `admin_email`.
    #[must_use]
    pub const fn new(
        db: DatabaseConnection,
        workflow: OrderWorkflow,
        queue: NotificationQueue,
        config: SweeperConfig,
        admin_email: String,
    ) -> Self {
        Self {
            db,
            workflow,
            queue,
            config,
            admin_email,
        }
    }

    /// Sweeps forever, sleeping `interval_secs` between passes.
    pub async fn run(&self) {
        info!(interval_secs = self.config.interval_secs, "Sweeper started");
        loop {
            match self.sweep_once().await {
                Ok(report) if report == SweepReport::default() => debug!("Sweep found nothing"),
                Ok(report) => info!(?report, "Sweep finished"),
                Err(e) => error!("Sweep failed: {e}"),
            }
            tokio::time::sleep(Duration::from_secs(self.config.interval_secs)).await;
        }
    }

    async fn admin(&self) -> Result<user::Model> {
        users::find_by_email(&self.db, &self.admin_email)
            .await?
            .filter(user::Model::is_admin)
            .ok_or_else(|| Error::internal("Admin user is not initialized"))
    }

    /// Runs one pass.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let admin = self.admin().await?;
        let now = chrono::Utc::now();
        let cancel_cutoff = now - self.config.cancel_after();
        let mut report = SweepReport::default();

        let idle = order_repository::created_before(&self.db, now - self.config.stale_notice_after())
            .await?;
        for order in idle
            .iter()
            .filter(|o| o.last_status_update_time >= cancel_cutoff)
        {
            match self.notice_once(order).await {
                Ok(true) => {
                    let idle_minutes = (now - order.last_status_update_time).num_minutes();
                    self.queue.publish(Notification::StaleOrder {
                        order_id: order.id,
                        idle_minutes,
                    });
                    report.stale_notices += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(order_id = order.id, "Could not record stale notice: {e}");
                    report.failed += 1;
                }
            }
        }

        for order in order_repository::created_before(&self.db, cancel_cutoff).await? {
            match self
                .workflow
                .cancel_order(&admin, order.id, CANCEL_COMMENT)
                .await
            {
                Ok(_) => report.cancelled += 1,
                Err(e) => {
                    error!(order_id = order.id, "Cancelling outdated order failed: {e}");
                    report.failed += 1;
                }
            }
        }

        let complete_cutoff = now - self.config.complete_after();
        for order in order_repository::in_progress_unchanged_since(&self.db, complete_cutoff).await? {
            match self.workflow.complete(&admin, order.id).await {
                Ok(_) => report.completed += 1,
                Err(e) => {
                    error!(order_id = order.id, "Completing outdated order failed: {e}");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Records a notice for the order's current idle period; false if one exists.
    async fn notice_once(&self, order: &order::Model) -> Result<bool> {
        let notice = stale_order_notice::ActiveModel {
            order_id: Set(order.id),
            status_update_time: Set(order.last_status_update_time),
            notified_at: Set(chrono::Utc::now()),
            ..Default::default()
        };
        let inserted = StaleOrderNotice::insert(notice)
            .on_conflict(
                OnConflict::columns([
                    stale_order_notice::Column::OrderId,
                    stale_order_notice::Column::StatusUpdateTime,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        Ok(inserted > 0)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::{entities::OrderStatus, test_utils::*};

    async fn sweeper(
        db: &DatabaseConnection,
    ) -> Result<(
        Sweeper,
        tokio::sync::mpsc::Receiver<Notification>,
        user::Model,
    )> {
        let admin = create_test_admin(db).await?;
        let (workflow, rx) = test_workflow(db);
        let queue = workflow.queue().clone();
        let sweeper = Sweeper::new(
            db.clone(),
            workflow,
            queue,
            SweeperConfig::default(),
            admin.email.clone().unwrap(),
        );
        Ok((sweeper, rx, admin))
    }

    fn drain(rx: &mut tokio::sync::mpsc::Receiver<Notification>) -> Vec<Notification> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_cancels_unclaimed_and_completes_abandoned() -> Result<()> {
        let db = setup_test_db().await?;
        let (sweeper, _rx, admin) = sweeper(&db).await?;
        let region = create_test_region(&db, "Moscow").await?;
        let master = create_test_master(&db, region.id, 0).await?;

        let unclaimed = create_test_order(&db, region.id, &[]).await?;
        backdate_test_order(&db, unclaimed.id, chrono::Duration::hours(49)).await?;
        let abandoned = create_test_order(&db, region.id, &[]).await?;
        assign_test_master(&db, abandoned.id, master.id, OrderStatus::Accepted).await?;
        backdate_test_order(&db, abandoned.id, chrono::Duration::days(32)).await?;
        let fresh = create_test_order(&db, region.id, &[]).await?;

        let report = sweeper.sweep_once().await?;
        assert_eq!(report.cancelled, 1);
        assert_eq!(report.completed, 1);
        assert_eq!(report.failed, 0);

        let cancelled = order_repository::find_model(&db, unclaimed.id).await?;
        assert_eq!(cancelled.status, OrderStatus::Cancel);
        let last = order_repository::history(&db, unclaimed.id).await?.pop().unwrap();
        assert_eq!(last.updated_by, admin.id);
        assert_eq!(last.comment.as_deref(), Some(CANCEL_COMMENT));

        let completed = order_repository::find_model(&db, abandoned.id).await?;
        assert_eq!(completed.status, OrderStatus::Completed);
        assert_eq!(completed.master_id, Some(master.id));

        let untouched = order_repository::find_model(&db, fresh.id).await?;
        assert_eq!(untouched.status, OrderStatus::Created);

        let second = sweeper.sweep_once().await?;
        assert_eq!(second, SweepReport::default());
        Ok(())
    }

    #[tokio::test]
    async fn test_stale_notice_sent_once_per_idle_period() -> Result<()> {
        let db = setup_test_db().await?;
        let (sweeper, mut rx, _admin) = sweeper(&db).await?;
        let region = create_test_region(&db, "Moscow").await?;
        let order = create_test_order(&db, region.id, &[]).await?;
        backdate_test_order(&db, order.id, chrono::Duration::minutes(20)).await?;

        let first = sweeper.sweep_once().await?;
        assert_eq!(first.stale_notices, 1);
        let events = drain(&mut rx);
        assert!(matches!(
            events.as_slice(),
            [Notification::StaleOrder { order_id, idle_minutes }]
                if *order_id == order.id && *idle_minutes >= 20
        ));

        let second = sweeper.sweep_once().await?;
        assert_eq!(second.stale_notices, 0);
        assert!(drain(&mut rx).is_empty());

        backdate_test_order(&db, order.id, chrono::Duration::minutes(30)).await?;
        assert_eq!(sweeper.sweep_once().await?.stale_notices, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_admin_fails_the_sweep() -> Result<()> {
        let db = setup_test_db().await?;
        let (workflow, _rx) = test_workflow(&db);
        let queue = workflow.queue().clone();
        let sweeper = Sweeper::new(
            db.clone(),
            workflow,
            queue,
            SweeperConfig::default(),
            "nobody@example.com".to_string(),
        );
        let result = sweeper.sweep_once().await;
        assert!(matches!(result, Err(Error::Internal { .. })));
        Ok(())
    }
}
