//! Order workflow engine - the state machine that moves an order from creation
//! through completion or cancellation.
//!
//! Every mutating transition follows the same shape:
//! 1. authorize against a relation-loaded read of the order,
//! 2. open a transaction and take the order row lock,
//! 3. re-check the status precondition on the locked row,
//! 4. write status, balance and history rows, commit,
//! 5. publish a [`Notification`] for the dispatcher.
//!
//! The master fee is debited and the master assigned in the same transaction, so
//! a failed precondition rolls both back together.

mod create;

pub use create::{CreateOrderRequest, CreatedOrder, OrderAutoRequest};

use crate::{
    core::{
        identity::TokenService,
        ledger,
        order_repository::{self, OrderLoad},
        users,
    },
    entities::{OrderStatus, UserRole, order, user},
    errors::{Error, Result},
    notify::{Notification, NotificationQueue},
};
use sea_orm::{DatabaseConnection, TransactionTrait};
use tracing::{info, instrument};

/// How a master leaves an order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Removal {
    /// The owner rejected the master; the order goes back to the pool
    Decline,
    /// The order is cancelled outright
    Cancel,
}

impl Removal {
    const fn target(self) -> OrderStatus {
        match self {
            Self::Decline => OrderStatus::Created,
            Self::Cancel => OrderStatus::Cancel,
        }
    }
}

/// Executes order transitions on behalf of authenticated users
#[derive(Debug, Clone)]
pub struct OrderWorkflow {
    db: DatabaseConnection,
    queue: NotificationQueue,
    tokens: TokenService,
    take_order_fee: i64,
    master_start_balance: i64,
}

impl OrderWorkflow {
    /// Creates the engine over its collaborators.
    #[must_use]
    pub const fn new(
        db: DatabaseConnection,
        queue: NotificationQueue,
        tokens: TokenService,
        take_order_fee: i64,
        master_start_balance: i64,
    ) -> Self {
        Self {
            db,
            queue,
            tokens,
            take_order_fee,
            master_start_balance,
        }
    }

    /// Queue the engine publishes events to.
    #[must_use]
    pub const fn queue(&self) -> &NotificationQueue {
        &self.queue
    }

    /// Fee debited from a master who takes an order, in kopecks.
    #[must_use]
    pub const fn take_order_fee(&self) -> i64 {
        self.take_order_fee
    }

    /// A master takes a CREATED order in their region and pays the fee.
    #[instrument(skip(self, master), fields(master_id = master.id))]
    pub async fn start_calculation(
        &self,
        master: &user::Model,
        order_id: i64,
    ) -> Result<order::Model> {
        if master.role != UserRole::Master {
            return Err(Error::forbidden("Only a master can take an order into work"));
        }
        let master_region = users::region_of(&self.db, master)
            .await?
            .ok_or_else(|| Error::forbidden("Master has no address"))?;

        let view = order_repository::find(
            &self.db,
            order_id,
            OrderLoad {
                address: true,
                ..OrderLoad::BARE
            },
        )
        .await?;
        if view.region_id() != Some(master_region) {
            return Err(Error::forbidden("Order is in another region"));
        }

        let txn = self.db.begin().await?;
        let current = order_repository::lock(&txn, order_id).await?;
        // The declined set only grows while the order row is locked.
        if order_repository::is_declined(&txn, order_id, master.id).await? {
            return Err(Error::invalid_state("This master cannot take the order again"));
        }
        if current.status != OrderStatus::Created {
            return Err(Error::invalid_state(
                "The order has already been taken by another master",
            ));
        }
        ledger::decrease(&txn, master.id, self.take_order_fee).await?;

        let updated =
            order_repository::update_status(&txn, current, OrderStatus::Calculating, Some(master.id))
                .await?;
        order_repository::append_history(&txn, &updated, master.id, None).await?;
        txn.commit().await?;

        info!(order_id, fee = self.take_order_fee, "Order taken into work");
        self.queue.publish(Notification::OrderTaken { order_id });
        Ok(updated)
    }

    /// The assigned master sends the estimate to the owners.
    #[instrument(skip(self, master), fields(master_id = master.id))]
    pub async fn send_for_review(
        &self,
        master: &user::Model,
        order_id: i64,
    ) -> Result<order::Model> {
        let view = order_repository::find(&self.db, order_id, OrderLoad::BARE).await?;
        if view.order.master_id != Some(master.id) {
            return Err(Error::forbidden("Only the assigned master can send the order for review"));
        }

        let txn = self.db.begin().await?;
        let current = order_repository::lock(&txn, order_id).await?;
        if current.master_id != Some(master.id) || current.status != OrderStatus::Calculating {
            return Err(Error::invalid_state("The order is not being calculated"));
        }
        let master_id = current.master_id;
        let updated =
            order_repository::update_status(&txn, current, OrderStatus::Reviewing, master_id)
                .await?;
        order_repository::append_history(&txn, &updated, master.id, None).await?;
        txn.commit().await?;

        info!(order_id, "Order sent for review");
        self.queue.publish(Notification::SentForReview { order_id });
        Ok(updated)
    }

    /// An owner accepts the master's estimate.
    #[instrument(skip(self, actor), fields(actor_id = actor.id))]
    pub async fn accept(&self, actor: &user::Model, order_id: i64) -> Result<order::Model> {
        let view = order_repository::find(&self.db, order_id, OrderLoad::BARE).await?;
        if !view.order.is_owner(actor.id) {
            return Err(Error::forbidden("Only the order owner can accept the estimate"));
        }

        let txn = self.db.begin().await?;
        let current = order_repository::lock(&txn, order_id).await?;
        if current.status != OrderStatus::Reviewing {
            return Err(Error::invalid_state("The order is not waiting for review"));
        }
        let Some(master_id) = current.master_id else {
            return Err(Error::internal(format!(
                "Order {order_id} is under review without a master"
            )));
        };
        let updated =
            order_repository::update_status(&txn, current, OrderStatus::Accepted, Some(master_id))
                .await?;
        order_repository::append_history(&txn, &updated, actor.id, None).await?;
        txn.commit().await?;

        info!(order_id, "Estimate accepted");
        self.queue.publish(Notification::Accepted { order_id });
        Ok(updated)
    }

    /// An owner, the assigned master or an admin closes the order.
    #[instrument(skip(self, actor), fields(actor_id = actor.id))]
    pub async fn complete(&self, actor: &user::Model, order_id: i64) -> Result<order::Model> {
        let view = order_repository::find(&self.db, order_id, OrderLoad::BARE).await?;
        if !view.order.is_participant(actor.id) && !actor.is_admin() {
            return Err(Error::forbidden("Only order participants can complete the order"));
        }

        let txn = self.db.begin().await?;
        let current = order_repository::lock(&txn, order_id).await?;
        if current.status.is_terminal() {
            return Err(Error::invalid_state(format!(
                "The order is already {:?}",
                current.status
            )));
        }
        let master_id = current.master_id;
        let updated =
            order_repository::update_status(&txn, current, OrderStatus::Completed, master_id)
                .await?;
        order_repository::append_history(&txn, &updated, actor.id, None).await?;
        txn.commit().await?;

        info!(order_id, "Order completed");
        self.queue.publish(Notification::Completed {
            order_id,
            by: actor.role,
        });
        Ok(updated)
    }

    /// An owner or admin removes the master; the order returns to the pool and
    /// the master can never take it again.
    #[instrument(skip(self, actor, comment), fields(actor_id = actor.id))]
    pub async fn decline_master(
        &self,
        actor: &user::Model,
        order_id: i64,
        comment: &str,
    ) -> Result<order::Model> {
        let view = order_repository::find(&self.db, order_id, OrderLoad::BARE).await?;
        if !view.order.is_owner(actor.id) && !actor.is_admin() {
            return Err(Error::forbidden("Only the order owner can change the master"));
        }
        self.remove_master(actor, order_id, Removal::Decline, comment)
            .await
    }

    /// An owner or admin cancels the order, refunding the master if one was assigned.
    #[instrument(skip(self, actor, comment), fields(actor_id = actor.id))]
    pub async fn cancel_order(
        &self,
        actor: &user::Model,
        order_id: i64,
        comment: &str,
    ) -> Result<order::Model> {
        if actor.role == UserRole::Master {
            return Err(Error::forbidden("A master cannot cancel an order"));
        }
        if comment.trim().is_empty() {
            return Err(Error::invalid_state("A cancellation comment is required"));
        }
        let view = order_repository::find(&self.db, order_id, OrderLoad::BARE).await?;
        if !view.order.is_owner(actor.id) && !actor.is_admin() {
            return Err(Error::forbidden("Only the order owner can cancel the order"));
        }
        self.remove_master(actor, order_id, Removal::Cancel, comment)
            .await
    }

    /// Clears the master, refunds the fee and moves the order to the removal's
    /// target status. Authorization is the caller's job.
    async fn remove_master(
        &self,
        actor: &user::Model,
        order_id: i64,
        removal: Removal,
        comment: &str,
    ) -> Result<order::Model> {
        let txn = self.db.begin().await?;
        let current = order_repository::lock(&txn, order_id).await?;
        if current.status.is_terminal() {
            return Err(Error::invalid_state(format!(
                "The order is already {:?}",
                current.status
            )));
        }

        let master_id = current.master_id;
        if removal == Removal::Decline {
            let Some(master_id) = master_id else {
                return Err(Error::invalid_state("The order has no master"));
            };
            order_repository::add_declined_master(&txn, order_id, master_id).await?;
        }
        if let Some(master_id) = master_id {
            ledger::increase(&txn, master_id, self.take_order_fee).await?;
        }

        let updated =
            order_repository::update_status(&txn, current, removal.target(), None).await?;
        let comment = Some(comment.trim().to_string()).filter(|c| !c.is_empty());
        order_repository::append_history(&txn, &updated, actor.id, comment).await?;
        txn.commit().await?;

        info!(order_id, ?master_id, ?removal, "Master removed from order");
        self.queue.publish(Notification::MasterRemoved {
            order_id,
            master_id,
            cancelled: removal == Removal::Cancel,
        });
        Ok(updated)
    }
}
