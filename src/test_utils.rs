//! Shared test utilities.
//!
//! Helpers here set up an in-memory database and create users, vehicles and
//! orders with sensible defaults. Orders created here bypass the workflow and
//! publish nothing.

use crate::{
    core::{
        addresses::{self, NewAddress},
        autos::{self, AutoCandidate},
        identity::TokenService,
        order_repository::{self, NewOrder},
        users::{self, NewUser},
        workflow::OrderWorkflow,
    },
    entities::{self, OrderStatus, UserRole, order},
    errors::{Error, Result},
    notify::{MessageLink, Messenger, Notification, NotificationQueue},
};
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use std::sync::{
    Mutex,
    atomic::{AtomicU64, Ordering},
};
use tokio::sync::mpsc;

/// Secret used by every token service in tests
pub const TEST_JWT_SECRET: &str = "test-secret-please-ignore";

/// Fee charged by [`test_workflow`]
pub const TEST_TAKE_ORDER_FEE: i64 = 300_000;

static SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_seq() -> u64 {
    SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Token service with a one hour lifetime.
#[must_use]
pub fn test_token_service() -> TokenService {
    TokenService::new(TEST_JWT_SECRET, chrono::Duration::hours(1))
}

/// Workflow over `db` with the default fee and start balance.
///
/// The receiver must be kept alive (or dropped deliberately) by the caller;
/// published notifications pile up in it.
pub fn test_workflow(db: &DatabaseConnection) -> (OrderWorkflow, mpsc::Receiver<Notification>) {
    let (queue, receiver) = NotificationQueue::new(64);
    let workflow = OrderWorkflow::new(
        db.clone(),
        queue,
        test_token_service(),
        TEST_TAKE_ORDER_FEE,
        1_000_000,
    );
    (workflow, receiver)
}

pub async fn create_test_region(
    db: &DatabaseConnection,
    name: &str,
) -> Result<entities::region::Model> {
    addresses::create_region(db, name).await
}

/// Creates a master living in `region_id` with exactly `balance` kopecks.
pub async fn create_test_master(
    db: &DatabaseConnection,
    region_id: i64,
    balance: i64,
) -> Result<entities::user::Model> {
    create_master(db, region_id, balance, None).await
}

/// Same as [`create_test_master`], reachable on Telegram chat `telegram_id`.
pub async fn create_test_master_with_telegram(
    db: &DatabaseConnection,
    region_id: i64,
    balance: i64,
    telegram_id: i64,
) -> Result<entities::user::Model> {
    create_master(db, region_id, balance, Some(telegram_id)).await
}

async fn create_master(
    db: &DatabaseConnection,
    region_id: i64,
    balance: i64,
    telegram_id: Option<i64>,
) -> Result<entities::user::Model> {
    let address = addresses::create(db, NewAddress::in_region(region_id)).await?;
    let seq = next_seq();
    users::create_user(
        db,
        NewUser {
            role: UserRole::Master,
            name: format!("Master {seq}"),
            email: Some(format!("master{seq}@example.com")),
            phone: Some(format!("+7800{seq:07}")),
            inn: None,
            address_id: Some(address.id),
            telegram_id,
        },
        balance,
    )
    .await
}

pub async fn create_test_driver(
    db: &DatabaseConnection,
    name: &str,
    phone: &str,
) -> Result<entities::user::Model> {
    users::create_user(db, NewUser::driver(name, phone), 0).await
}

pub async fn create_test_customer(
    db: &DatabaseConnection,
    name: &str,
) -> Result<entities::user::Model> {
    let seq = next_seq();
    users::create_user(
        db,
        NewUser {
            role: UserRole::Customer,
            name: name.to_string(),
            email: Some(format!("customer{seq}@example.com")),
            phone: Some(format!("+7900{seq:07}")),
            inn: None,
            address_id: None,
            telegram_id: None,
        },
        0,
    )
    .await
}

/// Creates an admin with an email and no Telegram chat.
pub async fn create_test_admin(db: &DatabaseConnection) -> Result<entities::user::Model> {
    let seq = next_seq();
    users::create_user(
        db,
        NewUser {
            role: UserRole::Admin,
            name: "Admin".to_string(),
            email: Some(format!("admin{seq}@example.com")),
            phone: None,
            inn: None,
            address_id: None,
            telegram_id: None,
        },
        0,
    )
    .await
}

/// Creates a truck with the given VIN and no owner.
pub async fn create_test_auto(db: &DatabaseConnection, vin: &str) -> Result<entities::auto::Model> {
    autos::create_or_get(
        db,
        AutoCandidate {
            brand: Some("Volvo".to_string()),
            vin: Some(vin.to_string()),
            ..Default::default()
        },
    )
    .await
}

/// Creates a CREATED order in `region_id` for a fresh driver.
///
/// # Defaults
/// * driver: new driver with a unique phone
/// * `guarantee_id`: unique per call
/// * `description`: "Engine does not start"
pub async fn create_test_order(
    db: &DatabaseConnection,
    region_id: i64,
    auto_ids: &[i64],
) -> Result<order::Model> {
    let seq = next_seq();
    let driver = create_test_driver(db, &format!("Driver {seq}"), &format!("+7700{seq:07}")).await?;
    let address = addresses::create(db, NewAddress::in_region(region_id)).await?;
    let order = order_repository::insert(
        db,
        NewOrder {
            guarantee_id: format!("test-order-{seq}"),
            customer_id: None,
            driver_id: driver.id,
            address_id: address.id,
            description: "Engine does not start".to_string(),
            notes: None,
            urgency: None,
            need_evacuator: false,
            need_mobile_team: false,
        },
    )
    .await?;
    order_repository::attach_autos(db, order.id, auto_ids).await?;
    order_repository::append_history(db, &order, driver.id, None).await?;
    Ok(order)
}

/// Overwrites an order's status without touching anything else.
pub async fn set_test_order_status(
    db: &DatabaseConnection,
    order_id: i64,
    status: OrderStatus,
) -> Result<order::Model> {
    let current = order_repository::find_model(db, order_id).await?;
    let mut model: order::ActiveModel = current.into();
    model.status = Set(status);
    model.update(db).await.map_err(Into::into)
}

/// Puts `master_id` on the order in `status`, skipping the fee.
pub async fn assign_test_master(
    db: &DatabaseConnection,
    order_id: i64,
    master_id: i64,
    status: OrderStatus,
) -> Result<order::Model> {
    let current = order_repository::find_model(db, order_id).await?;
    order_repository::update_status(db, current, status, Some(master_id)).await
}

/// Moves the order's last status change `age` into the past.
pub async fn backdate_test_order(
    db: &DatabaseConnection,
    order_id: i64,
    age: chrono::Duration,
) -> Result<order::Model> {
    let current = order_repository::find_model(db, order_id).await?;
    let mut model: order::ActiveModel = current.into();
    model.last_status_update_time = Set(chrono::Utc::now() - age);
    model.update(db).await.map_err(Into::into)
}

/// A message captured by [`RecordingMessenger`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub chat_id: i64,
    pub text: String,
    /// Button URL, if any
    pub link: Option<String>,
}

/// Messenger that keeps every message in memory
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<SentMessage>>,
    fail: bool,
}

impl RecordingMessenger {
    /// A messenger whose every send fails.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Messages sent so far, in order.
    #[allow(clippy::unwrap_used)]
    pub fn messages(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Messenger for RecordingMessenger {
    #[allow(clippy::unwrap_used)]
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        link: Option<&MessageLink>,
    ) -> Result<()> {
        if self.fail {
            return Err(Error::Messaging {
                message: "chat unreachable".to_string(),
            });
        }
        self.sent.lock().unwrap().push(SentMessage {
            chat_id,
            text: text.to_string(),
            link: link.map(|l| l.url.clone()),
        });
        Ok(())
    }
}
