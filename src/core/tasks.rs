//! Tasks - itemized work a master records against the vehicles of an order.

use crate::{
    core::{
        autos,
        order_repository::{self, OrderLoad},
    },
    entities::{Task, task, user},
    errors::{Error, Result},
};
use sea_orm::{QueryOrder, Set, prelude::*};
use tracing::info;

/// Fields of a new task
#[derive(Debug, Clone)]
pub struct NewTask {
    /// Order the work belongs to
    pub order_id: i64,
    /// Vehicle the work is done on
    pub auto_id: i64,
    /// Short name of the work
    pub name: String,
    /// Details
    pub description: Option<String>,
    /// Price in kopecks
    pub price: Option<i64>,
}

/// Replacement values for a task's editable fields
#[derive(Debug, Clone)]
pub struct TaskUpdate {
    /// Short name of the work
    pub name: String,
    /// Details
    pub description: Option<String>,
    /// Price in kopecks
    pub price: Option<i64>,
}

fn validate(name: &str, price: Option<i64>) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::invalid_state("Task name cannot be empty"));
    }
    if price.is_some_and(|p| p < 0) {
        return Err(Error::invalid_state("Task price must not be negative"));
    }
    Ok(name.to_string())
}

async fn get_task<C>(db: &C, task_id: i64) -> Result<task::Model>
where
    C: ConnectionTrait,
{
    Task::find_by_id(task_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("Task", task_id))
}

/// Loads the task and checks that the actor is the master of its order.
async fn task_of_master<C>(db: &C, actor: &user::Model, task_id: i64) -> Result<task::Model>
where
    C: ConnectionTrait,
{
    let task = get_task(db, task_id).await?;
    let order = order_repository::find_model(db, task.order_id).await?;
    if order.master_id != Some(actor.id) {
        return Err(Error::forbidden("Only the order master can change its tasks"));
    }
    Ok(task)
}

/// Records a task on one of the order's vehicles.
pub async fn create_task<C>(db: &C, actor: &user::Model, new_task: NewTask) -> Result<task::Model>
where
    C: ConnectionTrait,
{
    let name = validate(&new_task.name, new_task.price)?;
    let view = order_repository::find(
        db,
        new_task.order_id,
        OrderLoad {
            autos: true,
            ..OrderLoad::BARE
        },
    )
    .await?;
    if view.order.master_id != Some(actor.id) {
        return Err(Error::forbidden("Only the order master can add tasks"));
    }

    let auto = autos::resolve(db, new_task.auto_id).await?;
    if !view.autos.iter().any(|listed| listed.id == auto.id) {
        return Err(Error::forbidden("Vehicle is not part of this order"));
    }

    let now = chrono::Utc::now();
    let created = task::ActiveModel {
        order_id: Set(view.order.id),
        auto_id: Set(auto.id),
        name: Set(name),
        description: Set(new_task.description),
        price: Set(new_task.price),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;

    info!(task_id = created.id, order_id = created.order_id, "Task created");
    Ok(created)
}

/// Replaces a task's name, description and price.
pub async fn update_task<C>(
    db: &C,
    actor: &user::Model,
    task_id: i64,
    update: TaskUpdate,
) -> Result<task::Model>
where
    C: ConnectionTrait,
{
    let name = validate(&update.name, update.price)?;
    let current = task_of_master(db, actor, task_id).await?;

    let mut model: task::ActiveModel = current.into();
    model.name = Set(name);
    model.description = Set(update.description);
    model.price = Set(update.price);
    model.updated_at = Set(chrono::Utc::now());
    model.update(db).await.map_err(Into::into)
}

/// Deletes a task.
pub async fn delete_task<C>(db: &C, actor: &user::Model, task_id: i64) -> Result<()>
where
    C: ConnectionTrait,
{
    let task = task_of_master(db, actor, task_id).await?;
    task.delete(db).await?;
    info!(task_id, "Task deleted");
    Ok(())
}

/// Tasks of an order, newest first, optionally for one vehicle only.
pub async fn list_tasks<C>(
    db: &C,
    actor: &user::Model,
    order_id: i64,
    auto_id: Option<i64>,
) -> Result<Vec<task::Model>>
where
    C: ConnectionTrait,
{
    let order = order_repository::find_model(db, order_id).await?;
    if !order.is_participant(actor.id) && !actor.is_admin() {
        return Err(Error::forbidden("No access to this order's tasks"));
    }

    let mut query = Task::find().filter(task::Column::OrderId.eq(order_id));
    if let Some(auto_id) = auto_id {
        query = query.filter(task::Column::AutoId.eq(auto_id));
    }
    query
        .order_by_desc(task::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::{core::users, entities::OrderStatus, test_utils::*};

    fn new_task(order_id: i64, auto_id: i64, name: &str) -> NewTask {
        NewTask {
            order_id,
            auto_id,
            name: name.to_string(),
            description: None,
            price: Some(150_000),
        }
    }

    #[test]
    fn test_validate() {
        assert!(validate("Oil change", Some(0)).is_ok());
        assert!(validate("   ", None).is_err());
        assert!(validate("Oil change", Some(-1)).is_err());
    }

    #[tokio::test]
    async fn test_master_manages_tasks() -> Result<()> {
        let db = setup_test_db().await?;
        let region = create_test_region(&db, "Moscow").await?;
        let master = create_test_master(&db, region.id, 0).await?;
        let truck = create_test_auto(&db, "VIN1").await?;
        let trailer = create_test_auto(&db, "VIN2").await?;
        let order = create_test_order(&db, region.id, &[truck.id, trailer.id]).await?;
        assign_test_master(&db, order.id, master.id, OrderStatus::Calculating).await?;

        let first = create_task(&db, &master, new_task(order.id, truck.id, "Diagnostics")).await?;
        let second =
            create_task(&db, &master, new_task(order.id, trailer.id, "Brake pads")).await?;

        let updated = update_task(
            &db,
            &master,
            first.id,
            TaskUpdate {
                name: "Full diagnostics".to_string(),
                description: Some("Computer check".to_string()),
                price: None,
            },
        )
        .await?;
        assert_eq!(updated.name, "Full diagnostics");
        assert_eq!(updated.price, None);

        let all: Vec<i64> = list_tasks(&db, &master, order.id, None)
            .await?
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(all, vec![second.id, first.id]);

        let truck_only = list_tasks(&db, &master, order.id, Some(truck.id)).await?;
        assert_eq!(truck_only.len(), 1);

        delete_task(&db, &master, second.id).await?;
        assert_eq!(list_tasks(&db, &master, order.id, None).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_task_permissions() -> Result<()> {
        let db = setup_test_db().await?;
        let region = create_test_region(&db, "Moscow").await?;
        let master = create_test_master(&db, region.id, 0).await?;
        let other = create_test_master(&db, region.id, 0).await?;
        let admin = create_test_admin(&db).await?;
        let truck = create_test_auto(&db, "VIN1").await?;
        let foreign = create_test_auto(&db, "VIN2").await?;
        let order = create_test_order(&db, region.id, &[truck.id]).await?;
        assign_test_master(&db, order.id, master.id, OrderStatus::Calculating).await?;
        let driver = users::get_user(&db, order.driver_id).await?;

        let by_driver = create_task(&db, &driver, new_task(order.id, truck.id, "x")).await;
        assert!(matches!(by_driver, Err(Error::Forbidden { .. })));
        let wrong_auto = create_task(&db, &master, new_task(order.id, foreign.id, "x")).await;
        assert!(matches!(wrong_auto, Err(Error::Forbidden { .. })));

        let task = create_task(&db, &master, new_task(order.id, truck.id, "Tow")).await?;
        let by_other = delete_task(&db, &other, task.id).await;
        assert!(matches!(by_other, Err(Error::Forbidden { .. })));

        assert_eq!(list_tasks(&db, &driver, order.id, None).await?.len(), 1);
        assert_eq!(list_tasks(&db, &admin, order.id, None).await?.len(), 1);
        let outsider = list_tasks(&db, &other, order.id, None).await;
        assert!(matches!(outsider, Err(Error::Forbidden { .. })));

        let missing = delete_task(&db, &master, 9_999).await;
        assert!(matches!(missing, Err(Error::NotFound { resource: "Task", .. })));
        Ok(())
    }
}
