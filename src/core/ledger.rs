//! Balance ledger - atomic credit and debit of a user's balance.
//!
//! Both operations take an exclusive row lock on the user for the lifetime of the
//! caller's transaction and never commit themselves. A debit that would leave the
//! balance negative fails with [`Error::InsufficientFunds`] and changes nothing.

use crate::{
    entities::{User, user},
    errors::{Error, Result},
};
use sea_orm::{QuerySelect, Set, prelude::*};
use tracing::debug;

async fn lock_user<C>(db: &C, user_id: i64) -> Result<user::Model>
where
    C: ConnectionTrait,
{
    User::find_by_id(user_id)
        .lock_exclusive()
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("User", user_id))
}

fn check_amount(amount: i64) -> Result<()> {
    if amount < 0 {
        return Err(Error::invalid_state(format!(
            "Amount must not be negative: {amount}"
        )));
    }
    Ok(())
}

async fn set_balance<C>(db: &C, current: user::Model, balance: i64) -> Result<user::Model>
where
    C: ConnectionTrait,
{
    let mut model: user::ActiveModel = current.into();
    model.balance = Set(balance);
    model.update(db).await.map_err(Into::into)
}

/// Credits `amount` kopecks to the user.
pub async fn increase<C>(db: &C, user_id: i64, amount: i64) -> Result<user::Model>
where
    C: ConnectionTrait,
{
    check_amount(amount)?;
    let current = lock_user(db, user_id).await?;
    let balance = current
        .balance
        .checked_add(amount)
        .ok_or_else(|| Error::internal(format!("Balance overflow for user {user_id}")))?;

    debug!(user_id, amount, balance, "Balance increased");
    set_balance(db, current, balance).await
}

/// Debits `amount` kopecks from the user, refusing to go below zero.
pub async fn decrease<C>(db: &C, user_id: i64, amount: i64) -> Result<user::Model>
where
    C: ConnectionTrait,
{
    check_amount(amount)?;
    let current = lock_user(db, user_id).await?;
    if current.balance - amount < 0 {
        return Err(Error::InsufficientFunds {
            current: current.balance,
            required: amount,
        });
    }

    let balance = current.balance - amount;
    debug!(user_id, amount, balance, "Balance decreased");
    set_balance(db, current, balance).await
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::*;
    use sea_orm::TransactionTrait;

    #[tokio::test]
    async fn test_negative_amount_rejected() -> Result<()> {
        let db = setup_test_db().await?;
        let region = create_test_region(&db, "Moscow").await?;
        let master = create_test_master(&db, region.id, 1_000).await?;
        assert!(matches!(
            increase(&db, master.id, -5).await,
            Err(Error::InvalidState { .. })
        ));
        assert!(matches!(
            decrease(&db, master.id, -5).await,
            Err(Error::InvalidState { .. })
        ));
        let reloaded = crate::core::users::get_user(&db, master.id).await?;
        assert_eq!(reloaded.balance, 1_000);
        Ok(())
    }

    #[tokio::test]
    async fn test_increase_and_decrease() -> Result<()> {
        let db = setup_test_db().await?;
        let region = create_test_region(&db, "Moscow").await?;
        let master = create_test_master(&db, region.id, 1_000).await?;

        let after_credit = increase(&db, master.id, 500).await?;
        assert_eq!(after_credit.balance, 1_500);

        let after_debit = decrease(&db, master.id, 1_500).await?;
        assert_eq!(after_debit.balance, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_decrease_below_zero_leaves_balance() -> Result<()> {
        let db = setup_test_db().await?;
        let region = create_test_region(&db, "Moscow").await?;
        let master = create_test_master(&db, region.id, 100).await?;

        let result = decrease(&db, master.id, 101).await;
        assert!(matches!(
            result,
            Err(Error::InsufficientFunds {
                current: 100,
                required: 101
            })
        ));

        let reloaded = crate::core::users::get_user(&db, master.id).await?;
        assert_eq!(reloaded.balance, 100);
        Ok(())
    }

    #[tokio::test]
    async fn test_uncommitted_debit_is_rolled_back() -> Result<()> {
        let db = setup_test_db().await?;
        let region = create_test_region(&db, "Moscow").await?;
        let master = create_test_master(&db, region.id, 100).await?;

        {
            let txn = db.begin().await?;
            decrease(&txn, master.id, 60).await?;
            // dropped without commit
        }

        let reloaded = crate::core::users::get_user(&db, master.id).await?;
        assert_eq!(reloaded.balance, 100);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_user() -> Result<()> {
        let db = setup_test_db().await?;
        assert!(matches!(
            increase(&db, 999, 1).await,
            Err(Error::NotFound { .. })
        ));
        Ok(())
    }
}
