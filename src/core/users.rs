//! User business logic - lookups, implicit driver creation, profile audit, admin bootstrap.
//!
//! Profile edits always go through [`update_profile`] so that every change of
//! name, phone, email or INN leaves a `UserInfoChange` row behind.

use crate::{
    config::app::AdminConfig,
    entities::{
        Address, TelegramChat, User, UserChat, UserInfoChange, UserRole, address, telegram_chat,
        user, user_chat, user_info_change,
    },
    errors::{Error, Result},
};
use sea_orm::{QueryOrder, QuerySelect, QueryTrait, Set, prelude::*, sea_query::OnConflict};
use tracing::info;

/// Fields needed to create a user
#[derive(Debug, Clone)]
pub struct NewUser {
    /// Marketplace role
    pub role: UserRole,
    /// Display name
    pub name: String,
    /// Login email
    pub email: Option<String>,
    /// Contact phone
    pub phone: Option<String>,
    /// Taxpayer number
    pub inn: Option<String>,
    /// Home address
    pub address_id: Option<i64>,
    /// Personal Telegram chat id
    pub telegram_id: Option<i64>,
}

impl NewUser {
    /// A driver known only by name and phone, as created from an order form.
    #[must_use]
    pub fn driver(name: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            role: UserRole::Driver,
            name: name.into(),
            email: None,
            phone: Some(phone.into()),
            inn: None,
            address_id: None,
            telegram_id: None,
        }
    }
}

/// Profile fields that may change; `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    /// New display name
    pub name: Option<String>,
    /// New phone
    pub phone: Option<String>,
    /// New email
    pub email: Option<String>,
    /// New taxpayer number
    pub inn: Option<String>,
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Creates a user. Masters start with `master_start_balance`, everyone else with zero.
pub async fn create_user<C>(db: &C, new_user: NewUser, master_start_balance: i64) -> Result<user::Model>
where
    C: ConnectionTrait,
{
    let name = new_user.name.trim().to_string();
    if name.is_empty() {
        return Err(Error::invalid_state("User name cannot be empty"));
    }

    let balance = if new_user.role == UserRole::Master {
        master_start_balance
    } else {
        0
    };

    let model = user::ActiveModel {
        role: Set(new_user.role),
        name: Set(name),
        email: Set(new_user.email),
        phone: Set(new_user.phone),
        inn: Set(new_user.inn),
        balance: Set(balance),
        address_id: Set(new_user.address_id),
        telegram_id: Set(new_user.telegram_id),
        password_epoch: Set(now_millis()),
        registration_date: Set(chrono::Utc::now()),
        ..Default::default()
    };

    model.insert(db).await.map_err(Into::into)
}

/// Fetches a user by id.
pub async fn get_user<C>(db: &C, user_id: i64) -> Result<user::Model>
where
    C: ConnectionTrait,
{
    User::find_by_id(user_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("User", user_id))
}

/// Finds a user with the given role by phone.
pub async fn find_by_phone_and_role<C>(
    db: &C,
    phone: &str,
    role: UserRole,
) -> Result<Option<user::Model>>
where
    C: ConnectionTrait,
{
    User::find()
        .filter(user::Column::Phone.eq(phone))
        .filter(user::Column::Role.eq(role))
        .order_by_asc(user::Column::Id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Finds a user by login email.
pub async fn find_by_email<C>(db: &C, email: &str) -> Result<Option<user::Model>>
where
    C: ConnectionTrait,
{
    User::find()
        .filter(user::Column::Email.eq(email))
        .one(db)
        .await
        .map_err(Into::into)
}

/// All admins.
pub async fn admins<C>(db: &C) -> Result<Vec<user::Model>>
where
    C: ConnectionTrait,
{
    User::find()
        .filter(user::Column::Role.eq(UserRole::Admin))
        .order_by_asc(user::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Masters whose home address lies in the region.
pub async fn masters_in_region<C>(db: &C, region_id: i64) -> Result<Vec<user::Model>>
where
    C: ConnectionTrait,
{
    User::find()
        .filter(user::Column::Role.eq(UserRole::Master))
        .filter(
            user::Column::AddressId.in_subquery(
                Address::find()
                    .select_only()
                    .column(address::Column::Id)
                    .filter(address::Column::RegionId.eq(region_id))
                    .into_query(),
            ),
        )
        .order_by_asc(user::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Region of the user's home address, if they have one.
pub async fn region_of<C>(db: &C, user: &user::Model) -> Result<Option<i64>>
where
    C: ConnectionTrait,
{
    let Some(address_id) = user.address_id else {
        return Ok(None);
    };
    Ok(Address::find_by_id(address_id)
        .one(db)
        .await?
        .map(|address| address.region_id))
}

/// Applies a profile update and records the previous values.
///
/// Returns the user unchanged, without an audit row, when nothing differs.
pub async fn update_profile<C>(db: &C, user_id: i64, update: ProfileUpdate) -> Result<user::Model>
where
    C: ConnectionTrait,
{
    let current = get_user(db, user_id).await?;

    let new_name = update.name.unwrap_or_else(|| current.name.clone());
    let new_phone = update.phone.or_else(|| current.phone.clone());
    let new_email = update.email.or_else(|| current.email.clone());
    let new_inn = update.inn.or_else(|| current.inn.clone());

    if new_name == current.name
        && new_phone == current.phone
        && new_email == current.email
        && new_inn == current.inn
    {
        return Ok(current);
    }

    let change = user_info_change::ActiveModel {
        user_id: Set(user_id),
        previous_name: Set(current.name.clone()),
        new_name: Set(new_name.clone()),
        previous_phone: Set(current.phone.clone()),
        new_phone: Set(new_phone.clone()),
        previous_email: Set(current.email.clone()),
        new_email: Set(new_email.clone()),
        previous_inn: Set(current.inn.clone()),
        new_inn: Set(new_inn.clone()),
        changed_at: Set(chrono::Utc::now()),
        ..Default::default()
    };
    change.insert(db).await?;

    let mut model: user::ActiveModel = current.into();
    model.name = Set(new_name);
    model.phone = Set(new_phone);
    model.email = Set(new_email);
    model.inn = Set(new_inn);

    let updated = model.update(db).await?;
    info!(user_id, "User profile updated");
    Ok(updated)
}

/// Profile change history of a user, oldest first.
pub async fn user_info_changes<C>(db: &C, user_id: i64) -> Result<Vec<user_info_change::Model>>
where
    C: ConnectionTrait,
{
    UserInfoChange::find()
        .filter(user_info_change::Column::UserId.eq(user_id))
        .order_by_asc(user_info_change::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Moves the password epoch forward, invalidating every token issued before.
pub async fn bump_password_epoch<C>(db: &C, user_id: i64) -> Result<user::Model>
where
    C: ConnectionTrait,
{
    let current = get_user(db, user_id).await?;
    let epoch = now_millis().max(current.password_epoch + 1);

    let mut model: user::ActiveModel = current.into();
    model.password_epoch = Set(epoch);
    model.update(db).await.map_err(Into::into)
}

/// Creates the configured admin account unless a user with that email exists.
pub async fn ensure_admin(db: &DatabaseConnection, admin: &AdminConfig) -> Result<user::Model> {
    if let Some(existing) = find_by_email(db, &admin.email).await? {
        if existing.role != UserRole::Admin {
            return Err(Error::Config {
                message: format!("User {} exists but is not an admin", admin.email),
            });
        }
        return Ok(existing);
    }

    let created = create_user(
        db,
        NewUser {
            role: UserRole::Admin,
            name: admin.name.clone(),
            email: Some(admin.email.clone()),
            phone: Some(admin.phone.clone()),
            inn: None,
            address_id: None,
            telegram_id: None,
        },
        0,
    )
    .await?;
    info!(admin_id = created.id, "Admin account created");
    Ok(created)
}

/// Registers (or re-points) a group chat under a shareable code.
pub async fn register_chat<C>(
    db: &C,
    chat_uuid: &str,
    telegram_chat_id: i64,
    title: Option<String>,
) -> Result<()>
where
    C: ConnectionTrait,
{
    let chat = telegram_chat::ActiveModel {
        chat_uuid: Set(chat_uuid.to_string()),
        telegram_chat_id: Set(telegram_chat_id),
        title: Set(title),
    };
    TelegramChat::insert(chat)
        .on_conflict(
            OnConflict::column(telegram_chat::Column::ChatUuid)
                .update_columns([
                    telegram_chat::Column::TelegramChatId,
                    telegram_chat::Column::Title,
                ])
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    Ok(())
}

/// Links a registered chat to a user. Linking twice is a no-op.
pub async fn link_chat<C>(db: &C, user_id: i64, chat_uuid: &str) -> Result<()>
where
    C: ConnectionTrait,
{
    TelegramChat::find_by_id(chat_uuid.to_string())
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("Telegram chat", chat_uuid))?;

    let link = user_chat::ActiveModel {
        user_id: Set(user_id),
        chat_uuid: Set(chat_uuid.to_string()),
        ..Default::default()
    };
    UserChat::insert(link)
        .on_conflict(
            OnConflict::columns([user_chat::Column::UserId, user_chat::Column::ChatUuid])
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    Ok(())
}

/// Telegram chat ids of every group chat linked to the user.
pub async fn linked_chat_ids<C>(db: &C, user_id: i64) -> Result<Vec<i64>>
where
    C: ConnectionTrait,
{
    let chats = TelegramChat::find()
        .filter(
            telegram_chat::Column::ChatUuid.in_subquery(
                UserChat::find()
                    .select_only()
                    .column(user_chat::Column::ChatUuid)
                    .filter(user_chat::Column::UserId.eq(user_id))
                    .into_query(),
            ),
        )
        .all(db)
        .await?;
    Ok(chats.into_iter().map(|chat| chat.telegram_chat_id).collect())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::*;

    #[tokio::test]
    async fn test_create_user_validation() -> Result<()> {
        let db = setup_test_db().await?;
        let result = create_user(&db, NewUser::driver("   ", "+79990000000"), 0).await;
        assert!(matches!(result, Err(Error::InvalidState { .. })));
        assert!(find_by_phone_and_role(&db, "+79990000000", UserRole::Driver)
            .await?
            .is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_master_gets_start_balance() -> Result<()> {
        let db = setup_test_db().await?;
        let region = create_test_region(&db, "Moscow").await?;
        let master = create_test_master(&db, region.id, 1_000_000).await?;
        let driver = create_test_driver(&db, "Ivan", "+79990000001").await?;

        assert_eq!(master.balance, 1_000_000);
        assert_eq!(driver.balance, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_find_by_phone_respects_role() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_driver(&db, "Ivan", "+79990000001").await?;

        assert!(
            find_by_phone_and_role(&db, "+79990000001", UserRole::Driver)
                .await?
                .is_some()
        );
        assert!(
            find_by_phone_and_role(&db, "+79990000001", UserRole::Customer)
                .await?
                .is_none()
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_masters_in_region() -> Result<()> {
        let db = setup_test_db().await?;
        let moscow = create_test_region(&db, "Moscow").await?;
        let kazan = create_test_region(&db, "Kazan").await?;
        let local = create_test_master(&db, moscow.id, 0).await?;
        create_test_master(&db, kazan.id, 0).await?;

        let masters = masters_in_region(&db, moscow.id).await?;
        assert_eq!(masters.len(), 1);
        assert_eq!(masters[0].id, local.id);
        assert_eq!(region_of(&db, &local).await?, Some(moscow.id));
        Ok(())
    }

    #[tokio::test]
    async fn test_update_profile_records_change() -> Result<()> {
        let db = setup_test_db().await?;
        let driver = create_test_driver(&db, "Ivan", "+79990000001").await?;

        let updated = update_profile(
            &db,
            driver.id,
            ProfileUpdate {
                name: Some("Ivan Petrov".to_string()),
                ..Default::default()
            },
        )
        .await?;
        assert_eq!(updated.name, "Ivan Petrov");
        assert_eq!(updated.phone.as_deref(), Some("+79990000001"));

        let changes = user_info_changes(&db, driver.id).await?;
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].previous_name, "Ivan");
        assert_eq!(changes[0].new_name, "Ivan Petrov");

        // Same values again: no new audit row
        update_profile(
            &db,
            driver.id,
            ProfileUpdate {
                name: Some("Ivan Petrov".to_string()),
                ..Default::default()
            },
        )
        .await?;
        assert_eq!(user_info_changes(&db, driver.id).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_ensure_admin_is_idempotent() -> Result<()> {
        let db = setup_test_db().await?;
        let config = AdminConfig::default();

        let first = ensure_admin(&db, &config).await?;
        let second = ensure_admin(&db, &config).await?;
        assert_eq!(first.id, second.id);
        assert_eq!(admins(&db).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_linked_chats_are_a_set() -> Result<()> {
        let db = setup_test_db().await?;
        let driver = create_test_driver(&db, "Ivan", "+79990000001").await?;
        register_chat(&db, "fleet-chat", -100_500, Some("Fleet".to_string())).await?;

        link_chat(&db, driver.id, "fleet-chat").await?;
        link_chat(&db, driver.id, "fleet-chat").await?;

        assert_eq!(linked_chat_ids(&db, driver.id).await?, vec![-100_500]);
        assert!(matches!(
            link_chat(&db, driver.id, "missing").await,
            Err(Error::NotFound { .. })
        ));
        Ok(())
    }
}
