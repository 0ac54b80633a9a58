//! Order creation.
//!
//! Creation is idempotent on the client's guarantee id: a repeated request, or one
//! that loses an insert race to an identical request, gets the existing order back
//! together with a fresh access token for its driver.

use super::OrderWorkflow;
use crate::{
    core::{
        addresses::{self, NewAddress},
        autos::{self, AutoCandidate},
        order_repository::{self, NewOrder},
        users::{self, NewUser, ProfileUpdate},
    },
    entities::{UserRole, order, user},
    errors::{Error, Result},
    notify::Notification,
};
use sea_orm::{DbErr, SqlErr, TransactionTrait};
use tracing::{info, instrument, warn};

/// A vehicle listed on a new order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderAutoRequest {
    /// A vehicle the client already knows by id
    Existing(i64),
    /// A vehicle described by the client, deduplicated against known ones
    Described(AutoCandidate),
}

/// Everything a client submits to open an order
#[derive(Debug, Clone)]
pub struct CreateOrderRequest {
    /// Client-generated idempotency key
    pub guarantee_id: String,
    /// Driver name, required unless a driver is creating the order
    pub driver_name: Option<String>,
    /// Driver phone, required unless a driver is creating the order
    pub driver_phone: Option<String>,
    /// Driver email for a newly registered driver
    pub driver_email: Option<String>,
    /// Vehicles in display order
    pub autos: Vec<OrderAutoRequest>,
    /// Breakdown location
    pub address: NewAddress,
    /// Problem description
    pub description: String,
    /// Extra notes
    pub notes: Option<String>,
    /// Urgency label
    pub urgency: Option<String>,
    /// Towing needed
    pub need_evacuator: bool,
    /// Mobile crew needed
    pub need_mobile_team: bool,
}

/// Result of a create request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedOrder {
    /// The new or previously created order
    pub order_id: i64,
    /// Driver of the order
    pub driver_id: i64,
    /// Driver access token, issued to anonymous and repeated requests
    pub access_token: Option<String>,
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl OrderWorkflow {
    /// Opens an order, or returns the one already opened under the same guarantee id.
    #[instrument(skip(self, actor, request), fields(guarantee_id = %request.guarantee_id))]
    pub async fn create_order(
        &self,
        actor: Option<&user::Model>,
        request: CreateOrderRequest,
    ) -> Result<CreatedOrder> {
        let guarantee_id = request.guarantee_id.trim().to_string();
        if guarantee_id.is_empty() {
            return Err(Error::invalid_state("Guarantee id is required"));
        }

        if let Some(existing) =
            order_repository::find_by_guarantee_id(&self.db, &guarantee_id).await?
        {
            info!(order_id = existing.id, "Repeated create request");
            return self.existing_order(&existing).await;
        }

        let order = match self.insert_order(actor, guarantee_id.clone(), request).await {
            Ok(order) => order,
            Err(Error::Database(err)) if is_unique_violation(&err) => {
                let Some(existing) =
                    order_repository::find_by_guarantee_id(&self.db, &guarantee_id).await?
                else {
                    return Err(Error::Database(err));
                };
                warn!(order_id = existing.id, "Lost create race, returning existing order");
                return self.existing_order(&existing).await;
            }
            Err(e) => return Err(e),
        };

        info!(order_id = order.id, driver_id = order.driver_id, "Order created");
        self.queue
            .publish(Notification::OrderCreated { order_id: order.id });

        let access_token = match actor {
            Some(_) => None,
            None => {
                let driver = users::get_user(&self.db, order.driver_id).await?;
                Some(self.tokens.issue(&driver)?)
            }
        };
        Ok(CreatedOrder {
            order_id: order.id,
            driver_id: order.driver_id,
            access_token,
        })
    }

    async fn existing_order(&self, existing: &order::Model) -> Result<CreatedOrder> {
        let driver = users::get_user(&self.db, existing.driver_id).await?;
        Ok(CreatedOrder {
            order_id: existing.id,
            driver_id: driver.id,
            access_token: Some(self.tokens.issue(&driver)?),
        })
    }

    async fn insert_order(
        &self,
        actor: Option<&user::Model>,
        guarantee_id: String,
        request: CreateOrderRequest,
    ) -> Result<order::Model> {
        let txn = self.db.begin().await?;

        let driver = self.resolve_driver(&txn, actor, &request).await?;
        let customer_id = actor
            .filter(|user| user.role == UserRole::Customer)
            .map(|user| user.id);
        let address = addresses::create(&txn, request.address).await?;

        let mut auto_ids = Vec::with_capacity(request.autos.len());
        for requested in request.autos {
            let auto = match requested {
                OrderAutoRequest::Existing(auto_id) => autos::resolve(&txn, auto_id).await?,
                OrderAutoRequest::Described(candidate) => {
                    let candidate = AutoCandidate {
                        driver_id: candidate.driver_id.or(Some(driver.id)),
                        customer_id: candidate.customer_id.or(customer_id),
                        ..candidate
                    };
                    autos::create_or_get(&txn, candidate).await?
                }
            };
            auto_ids.push(auto.id);
        }

        let order = order_repository::insert(
            &txn,
            NewOrder {
                guarantee_id,
                customer_id,
                driver_id: driver.id,
                address_id: address.id,
                description: request.description,
                notes: non_empty(request.notes.as_ref()),
                urgency: non_empty(request.urgency.as_ref()),
                need_evacuator: request.need_evacuator,
                need_mobile_team: request.need_mobile_team,
            },
        )
        .await?;
        order_repository::attach_autos(&txn, order.id, &auto_ids).await?;

        let created_by = actor.map_or(driver.id, |user| user.id);
        order_repository::append_history(&txn, &order, created_by, None).await?;

        txn.commit().await?;
        Ok(order)
    }

    /// The acting driver (with their profile synced to the form), or the driver
    /// named on the form, registered if unknown.
    async fn resolve_driver<C>(
        &self,
        db: &C,
        actor: Option<&user::Model>,
        request: &CreateOrderRequest,
    ) -> Result<user::Model>
    where
        C: sea_orm::ConnectionTrait,
    {
        let name = non_empty(request.driver_name.as_ref());
        let phone = non_empty(request.driver_phone.as_ref());

        if let Some(driver) = actor.filter(|user| user.role == UserRole::Driver) {
            return users::update_profile(
                db,
                driver.id,
                ProfileUpdate {
                    name,
                    phone,
                    ..ProfileUpdate::default()
                },
            )
            .await;
        }

        let (Some(name), Some(phone)) = (name, phone) else {
            return Err(Error::invalid_state("Driver name and phone are required"));
        };
        if let Some(known) = users::find_by_phone_and_role(db, &phone, UserRole::Driver).await? {
            return Ok(known);
        }

        let mut driver = NewUser::driver(name, phone);
        if let Some(email) = non_empty(request.driver_email.as_ref()) {
            if users::find_by_email(db, &email).await?.is_none() {
                driver.email = Some(email);
            }
        }
        let created = users::create_user(db, driver, self.master_start_balance).await?;
        info!(driver_id = created.id, "Registered driver from order form");
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::{
        entities::{AutoKind, OrderStatus},
        test_utils::*,
    };

    fn request(guarantee_id: &str, region_id: i64) -> CreateOrderRequest {
        CreateOrderRequest {
            guarantee_id: guarantee_id.to_string(),
            driver_name: Some("Ivan".to_string()),
            driver_phone: Some("+79001112233".to_string()),
            driver_email: None,
            autos: vec![OrderAutoRequest::Described(AutoCandidate {
                brand: Some("KAMAZ".to_string()),
                vin: Some("XTC65115".to_string()),
                kind: Some(AutoKind::Truck),
                ..AutoCandidate::default()
            })],
            address: NewAddress::in_region(region_id),
            description: "Engine will not start".to_string(),
            notes: None,
            urgency: Some("high".to_string()),
            need_evacuator: false,
            need_mobile_team: true,
        }
    }

    #[tokio::test]
    async fn test_anonymous_create_registers_driver() -> Result<()> {
        let db = setup_test_db().await?;
        let (workflow, mut rx) = test_workflow(&db);
        let region = create_test_region(&db, "Moscow").await?;

        let created = workflow.create_order(None, request("g-1", region.id)).await?;
        let token = created.access_token.unwrap();
        let driver = test_token_service().authenticate(&db, &token).await?;
        assert_eq!(driver.id, created.driver_id);
        assert_eq!(driver.role, UserRole::Driver);

        let view = order_repository::find(&db, created.order_id, order_repository::OrderLoad::FULL)
            .await?;
        assert_eq!(view.order.status, OrderStatus::Created);
        assert_eq!(view.order.customer_id, None);
        assert_eq!(view.region_id(), Some(region.id));
        assert_eq!(view.autos.len(), 1);
        assert_eq!(view.autos[0].driver_id, Some(driver.id));

        let history = order_repository::history(&db, created.order_id).await?;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].updated_by, driver.id);
        assert_eq!(
            rx.try_recv().ok(),
            Some(Notification::OrderCreated {
                order_id: created.order_id
            })
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_repeated_guarantee_id_returns_same_order() -> Result<()> {
        let db = setup_test_db().await?;
        let (workflow, _rx) = test_workflow(&db);
        let region = create_test_region(&db, "Moscow").await?;

        let first = workflow.create_order(None, request("g-1", region.id)).await?;
        let second = workflow.create_order(None, request("g-1", region.id)).await?;
        assert_eq!(first.order_id, second.order_id);
        assert_eq!(first.driver_id, second.driver_id);
        assert!(second.access_token.is_some());

        let all = order_repository::list(
            &db,
            order_repository::OrderFilter::default(),
            order_repository::OrderLoad::BARE,
        )
        .await?;
        assert_eq!(all.len(), 1);
        assert_eq!(order_repository::history(&db, first.order_id).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_known_driver_and_vehicle_are_reused() -> Result<()> {
        let db = setup_test_db().await?;
        let (workflow, _rx) = test_workflow(&db);
        let region = create_test_region(&db, "Moscow").await?;

        let first = workflow.create_order(None, request("g-1", region.id)).await?;
        let second = workflow.create_order(None, request("g-2", region.id)).await?;
        assert_ne!(first.order_id, second.order_id);
        assert_eq!(first.driver_id, second.driver_id);
        assert_eq!(
            order_repository::auto_ids_of(&db, first.order_id).await?,
            order_repository::auto_ids_of(&db, second.order_id).await?
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_customer_creates_for_driver() -> Result<()> {
        let db = setup_test_db().await?;
        let (workflow, _rx) = test_workflow(&db);
        let region = create_test_region(&db, "Moscow").await?;
        let customer = create_test_customer(&db, "Fleet LLC").await?;

        let created = workflow
            .create_order(Some(&customer), request("g-1", region.id))
            .await?;
        assert!(created.access_token.is_none());

        let order = order_repository::find_model(&db, created.order_id).await?;
        assert_eq!(order.customer_id, Some(customer.id));
        assert_ne!(order.driver_id, customer.id);
        assert_eq!(order_repository::history(&db, order.id).await?[0].updated_by, customer.id);
        Ok(())
    }

    #[tokio::test]
    async fn test_driver_profile_synced_from_form() -> Result<()> {
        let db = setup_test_db().await?;
        let (workflow, _rx) = test_workflow(&db);
        let region = create_test_region(&db, "Moscow").await?;
        let driver = create_test_driver(&db, "Old Name", "+79000000000").await?;

        let created = workflow
            .create_order(Some(&driver), request("g-1", region.id))
            .await?;
        assert_eq!(created.driver_id, driver.id);

        let synced = users::get_user(&db, driver.id).await?;
        assert_eq!(synced.name, "Ivan");
        assert_eq!(synced.phone.as_deref(), Some("+79001112233"));
        assert_eq!(users::user_info_changes(&db, driver.id).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_request_leaves_nothing_behind() -> Result<()> {
        let db = setup_test_db().await?;
        let (workflow, mut rx) = test_workflow(&db);

        let mut no_driver = request("g-1", 1);
        no_driver.driver_phone = None;
        let result = workflow.create_order(None, no_driver).await;
        assert!(matches!(result, Err(Error::InvalidState { .. })));

        let bad_region = workflow.create_order(None, request("g-2", 42)).await;
        assert!(matches!(
            bad_region,
            Err(Error::NotFound {
                resource: "Region",
                ..
            })
        ));
        assert!(
            users::find_by_phone_and_role(&db, "+79001112233", UserRole::Driver)
                .await?
                .is_none()
        );
        assert!(rx.try_recv().is_err());
        Ok(())
    }
}
